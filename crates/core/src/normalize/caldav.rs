//! CalDAV calendar-object normalization
//!
//! CalDAV hands back raw ICS text per event resource. Parsing goes through
//! the icalendar crate's parser (`unfold` + `read_calendar`); date handling
//! covers `VALUE=DATE`, UTC, floating, and `TZID`-zoned forms.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use icalendar::parser::{read_calendar, unfold};
use icalendar::{CalendarDateTime, DatePerhapsTime};
use notionflow_domain::constants::FALLBACK_EVENT_TITLE;
use notionflow_domain::{CanonicalEvent, SourcePlatform};

use super::{external_id, repair_end};

/// Normalize one CalDAV calendar object (raw ICS) into a canonical event.
///
/// `native_id` is the resource href stem, used when the VEVENT carries no
/// UID. Objects without a VEVENT or without a parseable DTSTART are
/// dropped, as are cancelled events.
pub fn normalize_object(native_id: &str, calendar_data: &str) -> Option<CanonicalEvent> {
    let unfolded = unfold(calendar_data);
    let calendar = read_calendar(&unfolded).ok()?;
    let vevent = calendar.components.iter().find(|c| c.name == "VEVENT")?;

    if let Some(status) = vevent.find_prop("STATUS") {
        if status.val.as_ref().eq_ignore_ascii_case("CANCELLED") {
            return None;
        }
    }

    let uid = vevent
        .find_prop("UID")
        .map(|p| p.val.to_string())
        .unwrap_or_else(|| native_id.to_string());

    let summary = vevent
        .find_prop("SUMMARY")
        .map(|p| p.val.to_string())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_EVENT_TITLE.to_string());

    let description =
        vevent.find_prop("DESCRIPTION").map(|p| p.val.to_string()).unwrap_or_default();

    let dtstart = DatePerhapsTime::try_from(vevent.find_prop("DTSTART")?).ok()?;
    let (start, all_day) = to_utc(dtstart);

    let end = vevent
        .find_prop("DTEND")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(|dpt| to_utc(dpt).0);
    let end = repair_end(start, end, all_day);

    Some(CanonicalEvent {
        title: summary,
        description,
        start,
        end,
        all_day,
        external_id: external_id(SourcePlatform::Apple, &uid),
        source_platform: SourcePlatform::Apple,
        calendar_id: None,
    })
}

/// Convert an ICS date value to UTC, flagging date-only values as all-day.
///
/// Floating datetimes and unknown TZIDs are taken as UTC rather than
/// dropped; a slightly shifted event beats a missing one.
fn to_utc(dpt: DatePerhapsTime) -> (DateTime<Utc>, bool) {
    match dpt {
        DatePerhapsTime::Date(date) => (date.and_time(NaiveTime::MIN).and_utc(), true),
        DatePerhapsTime::DateTime(value) => {
            let utc = match value {
                CalendarDateTime::Utc(dt) => dt,
                CalendarDateTime::Floating(naive) => naive.and_utc(),
                CalendarDateTime::WithTimezone { date_time, tzid } => {
                    match tzid.parse::<chrono_tz::Tz>() {
                        Ok(tz) => tz
                            .from_local_datetime(&date_time)
                            .single()
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_else(|| date_time.and_utc()),
                        Err(_) => date_time.and_utc(),
                    }
                }
            };
            (utc, false)
        }
    }
}
