//! Canonical event types
//!
//! [`CanonicalEvent`] is the platform-independent representation moved
//! through the sync pipeline; [`EventRow`] is the persisted shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::NotionFlowError;

/// The platform a synced event originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcePlatform {
    Notion,
    Google,
    Apple,
    Outlook,
}

impl SourcePlatform {
    /// Lowercase wire/storage form, also used as the external-id prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notion => "notion",
            Self::Google => "google",
            Self::Apple => "apple",
            Self::Outlook => "outlook",
        }
    }
}

impl std::fmt::Display for SourcePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourcePlatform {
    type Err = NotionFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notion" => Ok(Self::Notion),
            "google" => Ok(Self::Google),
            "apple" => Ok(Self::Apple),
            "outlook" => Ok(Self::Outlook),
            other => Err(NotionFlowError::InvalidInput(format!("unknown platform: {other}"))),
        }
    }
}

/// A normalized calendar event, ready for reconciliation
///
/// Invariant (enforced by the normalizer, assumed by storage): `end > start`
/// strictly. `calendar_id` is resolved by the reconciler before persistence;
/// an event whose calendar cannot be resolved is dropped, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub title: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    /// Stable identifier, namespaced per platform (`{platform}_{native_id}`)
    pub external_id: String,
    pub source_platform: SourcePlatform,
    pub calendar_id: Option<String>,
}

/// Persisted calendar event row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    /// UUIDv7, assigned at insert time
    pub id: String,
    pub user_id: String,
    pub calendar_id: String,
    pub title: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub external_id: String,
    pub source_platform: SourcePlatform,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
