use std::time::Duration;

use async_trait::async_trait;
use notionflow_core::PlatformClient;
use notionflow_domain::constants::DEFAULT_QUERY_PAGE_SIZE;
use notionflow_domain::{
    EventPage, NotionFlowError, RawDateStamp, RawEvent, RawEventData, RemoteContainer, Result,
    SourcePlatform, SyncConfig, SyncCredential, TimeWindow,
};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::errors::http_status_error;
use crate::http::HttpClient;

const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Google Calendar v3 API client
pub struct GoogleCalendarClient {
    http: HttpClient,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarListEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleEvent {
    #[serde(default)]
    id: String,
    summary: Option<String>,
    description: Option<String>,
    start: Option<GoogleDateStamp>,
    end: Option<GoogleDateStamp>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleDateStamp {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    date: Option<String>,
}

impl From<GoogleDateStamp> for RawDateStamp {
    fn from(stamp: GoogleDateStamp) -> Self {
        RawDateStamp { date_time: stamp.date_time, date: stamp.date }
    }
}

impl GoogleCalendarClient {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        Self::with_base_url(GOOGLE_CALENDAR_API_BASE, config)
    }

    /// Client against a non-default endpoint (tests)
    pub fn with_base_url(base_url: impl Into<String>, config: &SyncConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self { http, base_url: base_url.into() })
    }

    fn bearer<'a>(&self, credential: &'a SyncCredential) -> Result<&'a str> {
        credential.bearer_token().ok_or_else(|| {
            NotionFlowError::Config("google credential is not an OAuth token".into())
        })
    }

    /// Send a GET and fail only on auth-class problems; `None` means the
    /// call degraded and the caller should treat it as empty.
    async fn get_degrading(
        &self,
        token: &str,
        url: &str,
        query: &[(&str, String)],
        context: &str,
    ) -> Result<Option<Response>> {
        let request = self.http.request(Method::GET, url).bearer_auth(token).query(query);

        let response = match self.http.send(request).await {
            Ok(response) => response,
            Err(err @ NotionFlowError::Auth(_)) => return Err(err),
            Err(err) => {
                warn!(error = %err, context, "google api call failed, degrading to empty result");
                return Ok(None);
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(http_status_error(status, context));
        }
        if !status.is_success() {
            warn!(%status, context, "google api call failed, degrading to empty result");
            return Ok(None);
        }

        Ok(Some(response))
    }
}

#[async_trait]
impl PlatformClient for GoogleCalendarClient {
    fn platform(&self) -> SourcePlatform {
        SourcePlatform::Google
    }

    /// List the calendars on the account's calendar list.
    #[instrument(skip(self, credential))]
    async fn discover_containers(
        &self,
        credential: &SyncCredential,
    ) -> Result<Vec<RemoteContainer>> {
        let token = self.bearer(credential)?;
        let url = format!("{}/users/me/calendarList", self.base_url);
        let mut containers = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = Vec::new();
            if let Some(ref value) = page_token {
                query.push(("pageToken", value.clone()));
            }

            let Some(response) =
                self.get_degrading(token, &url, &query, "google calendar list").await?
            else {
                return Ok(containers);
            };

            let parsed: CalendarListResponse = match response.json().await {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(error = %err, "malformed google calendar list response");
                    return Ok(containers);
                }
            };

            containers.extend(parsed.items.into_iter().filter(|entry| !entry.id.is_empty()).map(
                |entry| RemoteContainer {
                    id: entry.id,
                    title: if entry.summary.is_empty() {
                        "(unnamed)".to_string()
                    } else {
                        entry.summary
                    },
                    // Google calendars hold dated events by definition
                    has_date_field: true,
                },
            ));

            page_token = parsed.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        debug!(count = containers.len(), "discovered google calendars");
        Ok(containers)
    }

    /// Fetch one page of events from a calendar within the sync window.
    #[instrument(skip(self, credential, window), fields(calendar_id = %container.id))]
    async fn fetch_page(
        &self,
        credential: &SyncCredential,
        container: &RemoteContainer,
        window: &TimeWindow,
        cursor: Option<&str>,
    ) -> Result<EventPage> {
        let token = self.bearer(credential)?;
        let url = format!("{}/calendars/{}/events", self.base_url, container.id);

        let mut query: Vec<(&str, String)> = vec![
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
            ("timeMin", window.start.to_rfc3339()),
            ("timeMax", window.end.to_rfc3339()),
            ("maxResults", DEFAULT_QUERY_PAGE_SIZE.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("pageToken", cursor.to_string()));
        }

        let Some(response) =
            self.get_degrading(token, &url, &query, "google events list").await?
        else {
            return Ok(EventPage::empty());
        };

        let parsed: EventsResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "malformed google events response");
                return Ok(EventPage::empty());
            }
        };

        let events = parsed
            .items
            .into_iter()
            .filter(|event| !event.id.is_empty())
            .map(|event| RawEvent {
                platform: SourcePlatform::Google,
                native_id: event.id,
                data: RawEventData::Google {
                    summary: event.summary,
                    description: event.description,
                    start: event.start.map(RawDateStamp::from).unwrap_or_default(),
                    end: event.end.map(RawDateStamp::from),
                    cancelled: event.status.as_deref() == Some("cancelled"),
                },
            })
            .collect();

        Ok(EventPage { events, next_cursor: parsed.next_page_token })
    }
}
