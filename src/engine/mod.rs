//! Core domain logic: reconciliation against the scheduling service, the
//! result-action state machine, and the bulk batch processor.

pub mod actions;
pub mod bulk;
pub mod reconcile;

pub use actions::{apply_action, ActionOutcome, ActionRequest, Disposition, ResultAction};
pub use bulk::{process_batch, BulkReport, BulkRow};
pub use reconcile::{reconcile_event, ReconcileOutcome, SyncEvent};

use crate::db::DatabaseError;
use crate::dispatch::DispatchError;
use crate::scheduling::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for EngineError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity_type, id } => {
                EngineError::NotFound(format!("{entity_type} {id} not found"))
            }
            other => EngineError::Database(other),
        }
    }
}

impl From<GatewayError> for EngineError {
    fn from(err: GatewayError) -> Self {
        EngineError::Unavailable(err.to_string())
    }
}

impl From<DispatchError> for EngineError {
    fn from(err: DispatchError) -> Self {
        EngineError::Unavailable(err.to_string())
    }
}
