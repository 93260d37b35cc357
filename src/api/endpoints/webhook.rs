//! Inbound sync webhook from the scheduling service.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tracing::error;

use crate::api::types::{ApiContext, DataEnvelope};
use crate::dispatch::ResultDispatcher;
use crate::engine::{reconcile_event, ReconcileOutcome, SyncEvent};
use crate::scheduling::SchedulingGateway;

/// `POST /api/sync` — process one scheduling event.
///
/// Always acknowledges 200: reconciliation is idempotent and self-corrects
/// on a later delivery, so rejecting the webhook would only provoke the
/// scheduling service's retry storm. Failures are surfaced through logs.
pub async fn receive<G, D>(
    State(ctx): State<ApiContext<G, D>>,
    Json(event): Json<SyncEvent>,
) -> Json<DataEnvelope<Value>>
where
    G: SchedulingGateway + Send + Sync + 'static,
    D: ResultDispatcher + Send + Sync + 'static,
{
    let outcome = match reconcile_event(&ctx.store, ctx.scheduling.as_ref(), &event).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!(
                external_id = event.external_id,
                action = %event.action,
                error = %e,
                "reconciliation failed"
            );
            None
        }
    };

    let body = match outcome {
        Some(ReconcileOutcome::InvalidExternalId) if event.return_data => {
            json!({ "state": "InvalidAcuityIDPosted" })
        }
        _ => json!({}),
    };
    Json(DataEnvelope::new(body))
}
