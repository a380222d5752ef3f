//! Event normalizer
//!
//! Converts raw provider items into [`CanonicalEvent`]s, or `None` when an
//! item cannot be mapped (no date, cancelled, unparseable payload). A
//! dropped item never fails the batch it arrived in.
//!
//! The normalizer owns the `end > start` invariant: storage enforces it as
//! a hard constraint and upstream data is unreliable, so violations are
//! repaired rather than rejected (see [`repair_end`]).

pub mod caldav;
pub mod google;
pub mod notion;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use notionflow_domain::constants::{
    ALL_DAY_EVENT_FALLBACK_DAYS, LAST_RESORT_PAD_MINUTES, TIMED_EVENT_FALLBACK_HOURS,
};
use notionflow_domain::{CanonicalEvent, RawEvent, RawEventData, SourcePlatform};
use tracing::debug;

/// Candidate property names probed for an event title, in order.
///
/// Matched case-insensitively before falling back to the first title-typed
/// property. Additions for new locales/conventions go here.
pub const TITLE_PROPERTY_CANDIDATES: &[&str] = &[
    "Name", "Title", "Task", "Event", "Subject", "名前", "タイトル", "Titel", "Titre", "Nombre",
];

/// Candidate property names probed for an event date, in order.
pub const DATE_PROPERTY_CANDIDATES: &[&str] = &[
    "Date", "Due", "Due Date", "When", "Start", "Scheduled", "日付", "期限", "Datum", "Fecha",
];

/// Normalize one raw provider event into a canonical event.
pub fn normalize(raw: &RawEvent) -> Option<CanonicalEvent> {
    let event = match &raw.data {
        RawEventData::Notion { properties } => notion::normalize_page(&raw.native_id, properties),
        RawEventData::Google { summary, description, start, end, cancelled } => {
            google::normalize_event(&raw.native_id, summary, description, start, end, *cancelled)
        }
        RawEventData::CalDav { calendar_data } => {
            caldav::normalize_object(&raw.native_id, calendar_data)
        }
    };

    if event.is_none() {
        debug!(
            platform = %raw.platform,
            native_id = %raw.native_id,
            "dropping raw event that could not be normalized"
        );
    }

    event
}

/// Build the platform-namespaced external id for a native id.
pub fn external_id(platform: SourcePlatform, native_id: &str) -> String {
    format!("{}_{}", platform.as_str(), native_id)
}

/// Repair the event end so that `end > start` holds strictly.
///
/// Three stages: a missing end collapses to the start; a non-positive
/// duration gets the platform-conventional fallback (1 hour timed, 1 day
/// all-day); if the invariant still does not hold, a 10-minute pad is the
/// last resort.
pub fn repair_end(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    all_day: bool,
) -> DateTime<Utc> {
    let mut end = end.unwrap_or(start);

    if end <= start {
        let fallback = if all_day {
            Duration::days(ALL_DAY_EVENT_FALLBACK_DAYS)
        } else {
            Duration::hours(TIMED_EVENT_FALLBACK_HOURS)
        };
        end = start.checked_add_signed(fallback).unwrap_or(end);
    }

    if end <= start {
        end = start
            .checked_add_signed(Duration::minutes(LAST_RESORT_PAD_MINUTES))
            .unwrap_or(end);
    }

    end
}

/// True when a provider date string carries no time component.
pub fn is_date_only(value: &str) -> bool {
    !value.contains('T')
}

/// Parse a provider timestamp string into a UTC datetime.
///
/// Accepts RFC3339 with `Z` or an offset, bare datetimes (assumed UTC),
/// and bare dates (midnight UTC). Unparseable values fall back to now so
/// an event with a garbled date still syncs rather than vanishing.
pub fn parse_provider_timestamp(value: &str) -> DateTime<Utc> {
    let trimmed = value.trim();

    if is_date_only(trimmed) {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return midnight.and_utc();
            }
        }
        debug!(value, "unparseable provider date, falling back to now");
        return Utc::now();
    }

    let has_explicit_offset = trimmed.ends_with('Z')
        || trimmed
            .rfind('T')
            .is_some_and(|idx| trimmed[idx + 1..].chars().any(|c| matches!(c, '+' | '-')));

    let candidate = if has_explicit_offset { trimmed.to_string() } else { format!("{trimmed}Z") };

    match DateTime::parse_from_rfc3339(&candidate) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => {
            debug!(value, "unparseable provider timestamp, falling back to now");
            Utc::now()
        }
    }
}
