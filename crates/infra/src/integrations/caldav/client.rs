use std::time::Duration;

use async_trait::async_trait;
use notionflow_core::PlatformClient;
use notionflow_domain::{
    EventPage, NotionFlowError, RawEvent, RawEventData, RemoteContainer, Result, SourcePlatform,
    SyncConfig, SyncCredential, TimeWindow,
};
use reqwest::{Method, StatusCode};
use tracing::{debug, instrument, warn};
use url::Url;

use super::xml;
use crate::errors::http_status_error;
use crate::http::HttpClient;

const ICLOUD_CALDAV_BASE: &str = "https://caldav.icloud.com";

const PRINCIPAL_PROPFIND: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop><d:current-user-principal/></d:prop>
</d:propfind>"#;

const HOME_SET_PROPFIND: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop><c:calendar-home-set/></d:prop>
</d:propfind>"#;

const CALENDARS_PROPFIND: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop><d:resourcetype/><d:displayname/></d:prop>
</d:propfind>"#;

/// CalDAV client for Apple/iCloud calendars
pub struct CalDavClient {
    http: HttpClient,
    base_url: String,
    max_calendars: usize,
}

impl CalDavClient {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        Self::with_base_url(ICLOUD_CALDAV_BASE, config)
    }

    /// Client against a non-default server (tests, generic CalDAV)
    pub fn with_base_url(base_url: impl Into<String>, config: &SyncConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            max_calendars: config.max_calendars_per_sync,
        })
    }

    fn basic<'a>(&self, credential: &'a SyncCredential) -> Result<(&'a str, &'a str)> {
        credential.basic_auth().ok_or_else(|| {
            NotionFlowError::Config("caldav credential is not a username/password pair".into())
        })
    }

    /// Absolute URL for an href from a multistatus response.
    fn resolve(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            return href.to_string();
        }
        match Url::parse(&self.base_url).and_then(|base| base.join(href)) {
            Ok(url) => url.to_string(),
            Err(_) => format!("{}{}", self.base_url.trim_end_matches('/'), href),
        }
    }

    /// Send a WebDAV request; auth-class failures are errors, everything
    /// else degrades to `None` with a warning.
    async fn dav_request(
        &self,
        method: &str,
        url: &str,
        auth: (&str, &str),
        depth: &str,
        body: &'static str,
        context: &str,
    ) -> Result<Option<String>> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| NotionFlowError::Internal(format!("invalid HTTP method {method}")))?;

        let request = self
            .http
            .request(method, url)
            .basic_auth(auth.0, Some(auth.1))
            .header("Depth", depth)
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(body);

        let response = match self.http.send(request).await {
            Ok(response) => response,
            Err(err @ NotionFlowError::Auth(_)) => return Err(err),
            Err(err) => {
                warn!(url, context, error = %err, "caldav request failed");
                return Ok(None);
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(http_status_error(status, context));
        }
        if !status.is_success() {
            warn!(url, context, %status, "caldav request failed");
            return Ok(None);
        }

        match response.text().await {
            Ok(text) => Ok(Some(text)),
            Err(err) => {
                warn!(url, context, error = %err, "failed to read caldav response body");
                Ok(None)
            }
        }
    }

    /// Two-stage home discovery: principal, then calendar-home-set.
    /// Falls back to the conventional `{base}/{username}/calendars/` layout
    /// when either stage fails.
    async fn discover_home(&self, auth: (&str, &str)) -> Result<String> {
        let root = format!("{}/", self.base_url.trim_end_matches('/'));

        let principal = match self
            .dav_request("PROPFIND", &root, auth, "0", PRINCIPAL_PROPFIND, "principal discovery")
            .await?
        {
            Some(body) => xml::nested_href(&body, "current-user-principal"),
            None => None,
        };

        if let Some(principal) = principal {
            let principal_url = self.resolve(&principal);
            let home = match self
                .dav_request(
                    "PROPFIND",
                    &principal_url,
                    auth,
                    "0",
                    HOME_SET_PROPFIND,
                    "calendar home discovery",
                )
                .await?
            {
                Some(body) => xml::nested_href(&body, "calendar-home-set"),
                None => None,
            };

            if let Some(home) = home {
                return Ok(self.resolve(&home));
            }
        }

        let guessed =
            format!("{}/{}/calendars/", self.base_url.trim_end_matches('/'), auth.0);
        warn!(guessed, "caldav discovery failed, falling back to guessed home URL");
        Ok(guessed)
    }
}

#[async_trait]
impl PlatformClient for CalDavClient {
    fn platform(&self) -> SourcePlatform {
        SourcePlatform::Apple
    }

    /// Enumerate calendar collections under the calendar home, capped to
    /// bound per-sync latency.
    #[instrument(skip(self, credential))]
    async fn discover_containers(
        &self,
        credential: &SyncCredential,
    ) -> Result<Vec<RemoteContainer>> {
        let auth = self.basic(credential)?;
        let home_url = self.discover_home(auth).await?;

        let Some(body) = self
            .dav_request(
                "PROPFIND",
                &home_url,
                auth,
                "1",
                CALENDARS_PROPFIND,
                "calendar enumeration",
            )
            .await?
        else {
            return Ok(Vec::new());
        };

        let mut collections = xml::parse_calendar_collections(&body);
        if collections.len() > self.max_calendars {
            warn!(
                found = collections.len(),
                cap = self.max_calendars,
                "more calendars than the per-sync cap, truncating"
            );
            collections.truncate(self.max_calendars);
        }

        let containers = collections
            .into_iter()
            .map(|collection| {
                let title = collection
                    .display_name
                    .unwrap_or_else(|| href_stem(&collection.href).to_string());
                RemoteContainer {
                    id: self.resolve(&collection.href),
                    title,
                    // CalDAV collections hold dated components by definition
                    has_date_field: true,
                }
            })
            .collect::<Vec<_>>();

        debug!(count = containers.len(), "discovered caldav calendars");
        Ok(containers)
    }

    /// REPORT the calendar for VEVENTs inside the window. CalDAV has no
    /// server-side cursor; everything arrives in one page.
    #[instrument(skip(self, credential, window), fields(calendar = %container.id))]
    async fn fetch_page(
        &self,
        credential: &SyncCredential,
        container: &RemoteContainer,
        window: &TimeWindow,
        _cursor: Option<&str>,
    ) -> Result<EventPage> {
        let auth = self.basic(credential)?;
        let body = calendar_query_body(window);

        // The REPORT body varies per window; dav_request takes a static
        // body, so build the request inline here.
        let request = self
            .http
            .request(
                Method::from_bytes(b"REPORT").map_err(|_| {
                    NotionFlowError::Internal("invalid HTTP method REPORT".into())
                })?,
                &container.id,
            )
            .basic_auth(auth.0, Some(auth.1))
            .header("Depth", "1")
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(body);

        let response = match self.http.send(request).await {
            Ok(response) => response,
            Err(err @ NotionFlowError::Auth(_)) => return Err(err),
            Err(err) => {
                warn!(error = %err, "caldav report failed, treating calendar as empty");
                return Ok(EventPage::empty());
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(http_status_error(status, "caldav calendar query"));
        }
        if !status.is_success() {
            warn!(%status, "caldav report failed, treating calendar as empty");
            return Ok(EventPage::empty());
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "failed to read caldav report body");
                return Ok(EventPage::empty());
            }
        };

        let events = xml::parse_calendar_resources(&text)
            .into_iter()
            .map(|resource| RawEvent {
                platform: SourcePlatform::Apple,
                native_id: href_stem(&resource.href).to_string(),
                data: RawEventData::CalDav { calendar_data: resource.calendar_data },
            })
            .collect();

        Ok(EventPage { events, next_cursor: None })
    }
}

/// Last path segment of an href, without the `.ics` extension
fn href_stem(href: &str) -> &str {
    href.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(href)
        .trim_end_matches(".ics")
}

/// `calendar-query` REPORT body with a VEVENT time-range filter.
/// Times use the CalDAV `YYYYMMDDTHHMMSSZ` form.
fn calendar_query_body(window: &TimeWindow) -> String {
    let start = window.start.format("%Y%m%dT%H%M%SZ");
    let end = window.end.format("%Y%m%dT%H%M%SZ");
    format!(
        r#"<C:calendar-query xmlns="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
    <prop>
        <getetag/>
        <C:calendar-data/>
    </prop>
    <C:filter>
        <C:comp-filter name="VCALENDAR">
            <C:comp-filter name="VEVENT">
                <C:time-range start="{start}" end="{end}"/>
            </C:comp-filter>
        </C:comp-filter>
    </C:filter>
</C:calendar-query>"#
    )
}
