//! Sync result types

use serde::{Deserialize, Serialize};

/// Result of one `sync_to_calendar` call
///
/// A sync with some failed items still reports `success: true` with
/// `synced_events < total_events`; `success: false` is reserved for
/// structured failures (no calendar, no credential, pipeline error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub success: bool,
    pub synced_events: usize,
    pub total_events: usize,
    pub calendar_id: Option<String>,
    pub error: Option<String>,
}

impl SyncReport {
    pub fn completed(synced_events: usize, total_events: usize, calendar_id: String) -> Self {
        Self {
            success: true,
            synced_events,
            total_events,
            calendar_id: Some(calendar_id),
            error: None,
        }
    }

    pub fn failed(calendar_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            synced_events: 0,
            total_events: 0,
            calendar_id,
            error: Some(error.into()),
        }
    }
}

/// Insert/update counts reported by an atomic batch upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertStats {
    pub inserted: usize,
    pub updated: usize,
}

impl UpsertStats {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Outcome of reconciling one batch of canonical events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub updated: usize,
    /// Events dropped because no calendar could be resolved, or whose
    /// write failed; they count against the caller's total but are never
    /// stored orphaned
    pub skipped: usize,
}

impl BatchOutcome {
    pub fn synced(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn absorb(&mut self, other: BatchOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
    }
}
