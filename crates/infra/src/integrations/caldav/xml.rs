//! CalDAV multistatus response parsing.

/// A calendar collection found under the calendar home
#[derive(Debug)]
pub struct CalendarCollection {
    pub href: String,
    pub display_name: Option<String>,
}

/// A fetched calendar resource with its ICS payload
#[derive(Debug)]
pub struct CalendarResource {
    pub href: String,
    pub calendar_data: String,
}

/// First `<href>` nested under the named property element
/// (e.g. `current-user-principal` or `calendar-home-set`).
pub fn nested_href(body: &str, property: &str) -> Option<String> {
    let doc = roxmltree::Document::parse(body).ok()?;
    doc.root_element()
        .descendants()
        .find(|node| node.tag_name().name() == property)
        .and_then(|node| {
            node.descendants()
                .find(|child| child.tag_name().name() == "href")
                .and_then(|child| child.text())
        })
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Collections whose `resourcetype` includes `calendar`.
pub fn parse_calendar_collections(body: &str) -> Vec<CalendarCollection> {
    let Ok(doc) = roxmltree::Document::parse(body) else {
        return Vec::new();
    };
    let root = doc.root_element();

    let mut collections = Vec::new();

    for response in root.descendants().filter(|n| n.tag_name().name() == "response") {
        let href = response
            .descendants()
            .find(|n| n.tag_name().name() == "href")
            .and_then(|n| n.text())
            .map(|s| s.trim().to_string());

        let Some(href) = href else { continue };

        let is_calendar = response
            .descendants()
            .filter(|n| n.tag_name().name() == "resourcetype")
            .any(|n| n.children().any(|child| child.tag_name().name() == "calendar"));

        if !is_calendar {
            continue;
        }

        let display_name = response
            .descendants()
            .find(|n| n.tag_name().name() == "displayname")
            .and_then(|n| n.text())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        collections.push(CalendarCollection { href, display_name });
    }

    collections
}

/// Resources carrying `calendar-data` from a REPORT response.
pub fn parse_calendar_resources(body: &str) -> Vec<CalendarResource> {
    let Ok(doc) = roxmltree::Document::parse(body) else {
        return Vec::new();
    };
    let root = doc.root_element();

    let mut resources = Vec::new();

    for response in root.descendants().filter(|n| n.tag_name().name() == "response") {
        let href = response
            .descendants()
            .find(|n| n.tag_name().name() == "href")
            .and_then(|n| n.text())
            .map(|s| s.trim().to_string());

        let Some(href) = href else { continue };

        let calendar_data = response
            .descendants()
            .find(|n| n.tag_name().name() == "calendar-data")
            .and_then(|n| n.text())
            .map(|s| s.to_string());

        if let Some(calendar_data) = calendar_data {
            resources.push(CalendarResource { href, calendar_data });
        }
    }

    resources
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_href_finds_principal() {
        let body = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/</d:href>
    <d:propstat>
      <d:prop>
        <d:current-user-principal>
          <d:href>/123456/principal/</d:href>
        </d:current-user-principal>
      </d:prop>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

        assert_eq!(
            nested_href(body, "current-user-principal").as_deref(),
            Some("/123456/principal/")
        );
        assert!(nested_href(body, "calendar-home-set").is_none());
    }

    #[test]
    fn collections_filter_to_calendar_resourcetypes() {
        let body = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/123456/calendars/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/123456/calendars/work/</d:href>
    <d:propstat><d:prop>
      <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
      <d:displayname>Work</d:displayname>
    </d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

        let collections = parse_calendar_collections(body);
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].href, "/123456/calendars/work/");
        assert_eq!(collections[0].display_name.as_deref(), Some("Work"));
    }

    #[test]
    fn resources_require_calendar_data() {
        let body = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/cal/evt-1.ics</d:href>
    <d:propstat><d:prop>
      <c:calendar-data>BEGIN:VCALENDAR
END:VCALENDAR</c:calendar-data>
    </d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/cal/evt-2.ics</d:href>
    <d:propstat><d:prop><d:getetag>"abc"</d:getetag></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

        let resources = parse_calendar_resources(body);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].href, "/cal/evt-1.ics");
        assert!(resources[0].calendar_data.contains("BEGIN:VCALENDAR"));
    }

    #[test]
    fn malformed_xml_yields_nothing() {
        assert!(parse_calendar_collections("<not-xml").is_empty());
        assert!(parse_calendar_resources("<not-xml").is_empty());
        assert!(nested_href("<not-xml", "href").is_none());
    }
}
