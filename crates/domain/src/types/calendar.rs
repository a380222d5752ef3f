//! Internal calendar type

use serde::{Deserialize, Serialize};

/// A user-owned calendar that synced events land in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calendar {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// Inactive calendars are never chosen as a sync fallback target
    pub active: bool,
}
