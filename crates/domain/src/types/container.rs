//! Remote container discovery result

use serde::{Deserialize, Serialize};

/// A remote grouping of events (Notion database, CalDAV/Google calendar)
///
/// Discovered per sync, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteContainer {
    /// Provider-native identifier (database id, collection href, calendar id)
    pub id: String,
    pub title: String,
    /// Whether the container schema exposes a date-typed field; used by the
    /// calendar-likeness filter alongside title keywords
    pub has_date_field: bool,
}
