//! Notion page normalization
//!
//! Notion databases have no fixed schema: the title and date live in
//! user-named properties. Extraction probes the conventional names first
//! (see the candidate tables in the parent module) and falls back to the
//! first property of the wanted type.

use notionflow_domain::constants::FALLBACK_EVENT_TITLE;
use notionflow_domain::{CanonicalEvent, SourcePlatform};
use serde_json::{Map, Value};

use super::{
    external_id, is_date_only, parse_provider_timestamp, repair_end, DATE_PROPERTY_CANDIDATES,
    TITLE_PROPERTY_CANDIDATES,
};

/// Candidate property names probed for an event description.
const DESCRIPTION_PROPERTY_CANDIDATES: &[&str] = &["Description", "Notes", "Details", "メモ"];

/// Normalize one Notion page (its `properties` object) into a canonical
/// event. Pages without a title-typed property or without a usable date
/// value are dropped.
pub fn normalize_page(native_id: &str, properties: &Value) -> Option<CanonicalEvent> {
    let props = properties.as_object()?;

    let title_text = extract_title(props)?;
    let title = if title_text.trim().is_empty() {
        FALLBACK_EVENT_TITLE.to_string()
    } else {
        title_text
    };

    let (start_raw, end_raw) = extract_date(props)?;
    let all_day = is_date_only(&start_raw);
    let start = parse_provider_timestamp(&start_raw);
    let end = end_raw.as_deref().map(parse_provider_timestamp);
    let end = repair_end(start, end, all_day);

    Some(CanonicalEvent {
        title,
        description: extract_description(props).unwrap_or_default(),
        start,
        end,
        all_day,
        external_id: external_id(SourcePlatform::Notion, native_id),
        source_platform: SourcePlatform::Notion,
        calendar_id: None,
    })
}

/// Probe for the page title: candidate names first, then the first
/// title-typed property. Returns `None` when the schema has no title
/// property at all.
fn extract_title(props: &Map<String, Value>) -> Option<String> {
    for candidate in TITLE_PROPERTY_CANDIDATES {
        if let Some(value) = get_ignore_case(props, candidate) {
            if value.get("type").and_then(Value::as_str) == Some("title") {
                return Some(rich_text_plain(value.get("title")));
            }
        }
    }

    props
        .values()
        .find(|value| value.get("type").and_then(Value::as_str) == Some("title"))
        .map(|value| rich_text_plain(value.get("title")))
}

/// Probe for the page date: candidate names first, then the first
/// date-typed property carrying a value. Returns `(start, end)` strings.
fn extract_date(props: &Map<String, Value>) -> Option<(String, Option<String>)> {
    for candidate in DATE_PROPERTY_CANDIDATES {
        if let Some(value) = get_ignore_case(props, candidate) {
            if let Some(pair) = date_value(value) {
                return Some(pair);
            }
        }
    }

    props.values().find_map(date_value)
}

fn extract_description(props: &Map<String, Value>) -> Option<String> {
    for candidate in DESCRIPTION_PROPERTY_CANDIDATES {
        if let Some(value) = get_ignore_case(props, candidate) {
            if value.get("type").and_then(Value::as_str) == Some("rich_text") {
                return Some(rich_text_plain(value.get("rich_text")));
            }
        }
    }
    None
}

/// `(start, end)` of a date-typed property, `None` when the property is
/// not a date or its value is empty
fn date_value(value: &Value) -> Option<(String, Option<String>)> {
    if value.get("type").and_then(Value::as_str) != Some("date") {
        return None;
    }
    let date = value.get("date")?.as_object()?;
    let start = date.get("start")?.as_str()?.to_string();
    let end = date.get("end").and_then(Value::as_str).map(str::to_string);
    Some((start, end))
}

fn get_ignore_case<'a>(props: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    props
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

/// Concatenated `plain_text` of a Notion rich-text array
fn rich_text_plain(items: Option<&Value>) -> String {
    items
        .and_then(Value::as_array)
        .map(|array| {
            array
                .iter()
                .filter_map(|item| item.get("plain_text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use super::*;

    fn title_prop(text: &str) -> Value {
        json!({ "type": "title", "title": [{ "plain_text": text }] })
    }

    fn date_prop(start: &str, end: Option<&str>) -> Value {
        json!({ "type": "date", "date": { "start": start, "end": end } })
    }

    #[test]
    fn extracts_conventional_name_and_date() {
        let props = json!({
            "Name": title_prop("Sprint planning"),
            "Date": date_prop("2025-03-01T10:00:00Z", Some("2025-03-01T11:00:00Z")),
        });

        let event = normalize_page("page1", &props).unwrap();
        assert_eq!(event.title, "Sprint planning");
        assert_eq!(event.external_id, "notion_page1");
        assert!(!event.all_day);
        assert_eq!(event.end - event.start, Duration::hours(1));
    }

    #[test]
    fn probes_localized_property_names() {
        let props = json!({
            "名前": title_prop("打ち合わせ"),
            "日付": date_prop("2025-03-02", None),
        });

        let event = normalize_page("page2", &props).unwrap();
        assert_eq!(event.title, "打ち合わせ");
        assert!(event.all_day);
    }

    #[test]
    fn falls_back_to_first_typed_property() {
        // Unconventional names: probing by name fails, type-based fallback wins
        let props = json!({
            "Responsible": { "type": "people", "people": [] },
            "What we are doing": title_prop("Offsite"),
            "Happens on": date_prop("2025-04-01", None),
        });

        let event = normalize_page("page3", &props).unwrap();
        assert_eq!(event.title, "Offsite");
        assert!(event.all_day);
    }

    #[test]
    fn empty_title_defaults_to_untitled() {
        let props = json!({
            "Name": title_prop(""),
            "Date": date_prop("2025-03-01T10:00:00Z", None),
        });

        let event = normalize_page("page4", &props).unwrap();
        assert_eq!(event.title, FALLBACK_EVENT_TITLE);
    }

    #[test]
    fn page_without_date_is_dropped() {
        let props = json!({
            "Name": title_prop("No date here"),
            "Status": { "type": "select", "select": { "name": "Doing" } },
        });

        assert!(normalize_page("page5", &props).is_none());
    }

    #[test]
    fn page_without_title_property_is_dropped() {
        let props = json!({
            "Date": date_prop("2025-03-01", None),
        });

        assert!(normalize_page("page6", &props).is_none());
    }

    #[test]
    fn null_date_value_is_skipped_in_probing() {
        // "Date" exists but is empty; a later property carries the value
        let props = json!({
            "Name": title_prop("Planning"),
            "Date": { "type": "date", "date": null },
            "Scheduled": date_prop("2025-03-05T09:00:00Z", None),
        });

        let event = normalize_page("page7", &props).unwrap();
        assert_eq!(event.start, Utc.with_ymd_and_hms(2025, 3, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn all_day_end_defaults_to_start_plus_one_day() {
        let props = json!({
            "Name": title_prop("Holiday"),
            "Date": date_prop("2025-05-01", None),
        });

        let event = normalize_page("page8", &props).unwrap();
        assert!(event.all_day);
        assert_eq!(event.end - event.start, Duration::days(1));
    }

    #[test]
    fn description_comes_from_rich_text_property() {
        let props = json!({
            "Name": title_prop("Review"),
            "Date": date_prop("2025-03-01T10:00:00Z", None),
            "Notes": { "type": "rich_text", "rich_text": [{ "plain_text": "bring slides" }] },
        });

        let event = normalize_page("page9", &props).unwrap();
        assert_eq!(event.description, "bring slides");
    }
}
