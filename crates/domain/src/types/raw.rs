//! Raw provider event types
//!
//! Platform clients return events in these loosely-typed shapes; the
//! normalizer converts them into [`crate::types::CanonicalEvent`]s.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_LOOKAHEAD_DAYS, DEFAULT_LOOKBACK_DAYS};
use crate::types::SourcePlatform;

/// A raw event as fetched from a provider, before normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub platform: SourcePlatform,
    /// Provider-native identifier (Notion page id, Google event id,
    /// CalDAV UID / href stem)
    pub native_id: String,
    pub data: RawEventData,
}

/// Platform-native payload carried by a [`RawEvent`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RawEventData {
    /// The `properties` object of a Notion page, untouched
    Notion { properties: serde_json::Value },
    /// Relevant fields of a Google Calendar API event resource
    Google {
        summary: Option<String>,
        description: Option<String>,
        start: RawDateStamp,
        end: Option<RawDateStamp>,
        cancelled: bool,
    },
    /// Raw ICS text of a CalDAV calendar object
    CalDav { calendar_data: String },
}

/// A provider date value that is either a datetime or a bare date
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDateStamp {
    pub date_time: Option<String>,
    pub date: Option<String>,
}

/// One page of raw events plus the cursor to fetch the next one
#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub events: Vec<RawEvent>,
    pub next_cursor: Option<String>,
}

impl EventPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The UTC window remote events are fetched for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Default sync window around `now` (30 days back, 90 days forward)
    pub fn around(now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::days(DEFAULT_LOOKBACK_DAYS),
            end: now + Duration::days(DEFAULT_LOOKAHEAD_DAYS),
        }
    }

    /// Window with explicit lookback/lookahead day counts around `now`
    pub fn with_spans(now: DateTime<Utc>, lookback_days: i64, lookahead_days: i64) -> Self {
        Self {
            start: now - Duration::days(lookback_days),
            end: now + Duration::days(lookahead_days),
        }
    }
}
