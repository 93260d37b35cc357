use serde::{Deserialize, Serialize};

/// Maps a coupon/certificate code to an organization. Read-only lookup
/// consulted during reconciliation when the external booking lacks an
/// organization assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub code: String,
    pub organization_id: Option<String>,
    pub name: Option<String>,
}
