//! Google Calendar event normalization

use notionflow_domain::constants::FALLBACK_EVENT_TITLE;
use notionflow_domain::{CanonicalEvent, RawDateStamp, SourcePlatform};

use super::{external_id, parse_provider_timestamp, repair_end};

/// Normalize one Google Calendar event resource.
///
/// A `date` stamp (no `dateTime`) marks an all-day event. Cancelled events
/// and events without any start value are dropped.
pub fn normalize_event(
    native_id: &str,
    summary: &Option<String>,
    description: &Option<String>,
    start: &RawDateStamp,
    end: &Option<RawDateStamp>,
    cancelled: bool,
) -> Option<CanonicalEvent> {
    if cancelled {
        return None;
    }

    let all_day = start.date_time.is_none() && start.date.is_some();
    let start_raw = start.date_time.as_deref().or(start.date.as_deref())?;
    let start_ts = parse_provider_timestamp(start_raw);

    let end_ts = end
        .as_ref()
        .and_then(|stamp| stamp.date_time.as_deref().or(stamp.date.as_deref()))
        .map(parse_provider_timestamp);
    let end_ts = repair_end(start_ts, end_ts, all_day);

    let title = match summary.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => FALLBACK_EVENT_TITLE.to_string(),
    };

    Some(CanonicalEvent {
        title,
        description: description.clone().unwrap_or_default(),
        start: start_ts,
        end: end_ts,
        all_day,
        external_id: external_id(SourcePlatform::Google, native_id),
        source_platform: SourcePlatform::Google,
        calendar_id: None,
    })
}
