use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::ActivityAction;

/// Append-only diff record attached to an appointment or result id.
/// Written on every tracked mutation; audit-only, never read back into
/// business decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    /// Id of the appointment or result this entry describes.
    pub entity_id: String,
    pub action: ActivityAction,
    pub actor: Option<String>,
    pub current_data: serde_json::Value,
    pub new_data: serde_json::Value,
    pub created_at: NaiveDateTime,
}
