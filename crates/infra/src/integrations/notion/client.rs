use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use notionflow_core::PlatformClient;
use notionflow_domain::constants::DEFAULT_QUERY_PAGE_SIZE;
use notionflow_domain::{
    EventPage, NotionFlowError, RawEvent, RawEventData, RemoteContainer, Result, SourcePlatform,
    SyncConfig, SyncCredential, TimeWindow,
};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::errors::http_status_error;
use crate::http::HttpClient;

const NOTION_API_BASE: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

/// Notion REST API client
pub struct NotionClient {
    http: HttpClient,
    base_url: String,
    /// Databases whose schema repeatedly broke queries; skipped for the
    /// lifetime of this client instance
    poisoned: Mutex<HashSet<String>>,
    /// Date property detected per database, used for query sorting
    date_properties: Mutex<HashMap<String, Option<String>>>,
}

#[derive(Debug, Deserialize)]
struct PagedResults {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

/// Outcome of one database query attempt
enum QueryAttempt {
    Parsed(PagedResults),
    /// HTTP 400 - schema-dependent sorts/filters rejected
    BadRequest,
    /// Transient failure already logged; treat as an empty page
    Degraded,
}

impl NotionClient {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        Self::with_base_url(NOTION_API_BASE, config)
    }

    /// Client against a non-default endpoint (tests)
    pub fn with_base_url(base_url: impl Into<String>, config: &SyncConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            poisoned: Mutex::new(HashSet::new()),
            date_properties: Mutex::new(HashMap::new()),
        })
    }

    fn bearer<'a>(&self, credential: &'a SyncCredential) -> Result<&'a str> {
        credential
            .bearer_token()
            .ok_or_else(|| NotionFlowError::Config("notion credential is not a token".into()))
    }

    fn is_poisoned(&self, database_id: &str) -> bool {
        lock(&self.poisoned).contains(database_id)
    }

    fn poison(&self, database_id: &str) {
        warn!(database_id, "blacklisting notion database after repeated query failures");
        lock(&self.poisoned).insert(database_id.to_string());
    }

    /// The database's date property, from the discovery cache or a schema
    /// fetch. `None` means the database has no date property (or the
    /// schema could not be read) and queries sort by `last_edited_time`.
    async fn date_property_for(&self, token: &str, database_id: &str) -> Option<String> {
        if let Some(cached) = lock(&self.date_properties).get(database_id) {
            return cached.clone();
        }

        let url = format!("{}/databases/{}", self.base_url, database_id);
        let request = self
            .http
            .request(Method::GET, &url)
            .bearer_auth(token)
            .header("Notion-Version", NOTION_VERSION);

        let detected = match self.http.send(request).await {
            Ok(response) if response.status().is_success() => match response.json::<Value>().await
            {
                Ok(database) => detect_date_property(&database),
                Err(err) => {
                    debug!(database_id, error = %err, "failed to parse database schema");
                    None
                }
            },
            Ok(response) => {
                debug!(database_id, status = %response.status(), "failed to fetch database schema");
                None
            }
            Err(err) => {
                debug!(database_id, error = %err, "failed to fetch database schema");
                None
            }
        };

        lock(&self.date_properties).insert(database_id.to_string(), detected.clone());
        detected
    }

    async fn query_database(
        &self,
        token: &str,
        database_id: &str,
        body: &Value,
    ) -> Result<QueryAttempt> {
        let url = format!("{}/databases/{}/query", self.base_url, database_id);
        let request = self
            .http
            .request(Method::POST, &url)
            .bearer_auth(token)
            .header("Notion-Version", NOTION_VERSION)
            .json(body);

        let response = match self.http.send(request).await {
            Ok(response) => response,
            Err(err @ NotionFlowError::Auth(_)) => return Err(err),
            Err(err) => {
                warn!(database_id, error = %err, "notion query failed, treating page as empty");
                return Ok(QueryAttempt::Degraded);
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(http_status_error(status, "notion database query"));
        }
        if status == StatusCode::BAD_REQUEST {
            return Ok(QueryAttempt::BadRequest);
        }
        if !status.is_success() {
            warn!(database_id, %status, "notion query failed, treating page as empty");
            return Ok(QueryAttempt::Degraded);
        }

        match response.json::<PagedResults>().await {
            Ok(parsed) => Ok(QueryAttempt::Parsed(parsed)),
            Err(err) => {
                warn!(database_id, error = %err, "malformed notion query response");
                Ok(QueryAttempt::Degraded)
            }
        }
    }
}

#[async_trait]
impl PlatformClient for NotionClient {
    fn platform(&self) -> SourcePlatform {
        SourcePlatform::Notion
    }

    /// Search for all databases visible to the integration, paginating the
    /// search cursor until exhausted.
    #[instrument(skip(self, credential))]
    async fn discover_containers(
        &self,
        credential: &SyncCredential,
    ) -> Result<Vec<RemoteContainer>> {
        let token = self.bearer(credential)?;
        let mut containers = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({
                "filter": { "property": "object", "value": "database" },
                "page_size": DEFAULT_QUERY_PAGE_SIZE,
            });
            if let Some(ref value) = cursor {
                body["start_cursor"] = json!(value);
            }

            let request = self
                .http
                .request(Method::POST, format!("{}/search", self.base_url))
                .bearer_auth(token)
                .header("Notion-Version", NOTION_VERSION)
                .json(&body);

            let response = match self.http.send(request).await {
                Ok(response) => response,
                Err(err @ NotionFlowError::Auth(_)) => return Err(err),
                Err(err) => {
                    warn!(error = %err, "notion database search failed, stopping discovery");
                    return Ok(containers);
                }
            };

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(http_status_error(status, "notion database search"));
            }
            if !status.is_success() {
                warn!(%status, "notion database search failed, stopping discovery");
                return Ok(containers);
            }

            let parsed: PagedResults = match response.json().await {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(error = %err, "malformed notion search response, stopping discovery");
                    return Ok(containers);
                }
            };

            for database in &parsed.results {
                let Some(id) = database.get("id").and_then(Value::as_str) else {
                    continue;
                };
                if self.is_poisoned(id) {
                    debug!(database_id = id, "skipping blacklisted database");
                    continue;
                }

                let date_property = detect_date_property(database);
                lock(&self.date_properties).insert(id.to_string(), date_property.clone());

                containers.push(RemoteContainer {
                    id: id.to_string(),
                    title: database_title(database),
                    has_date_field: date_property.is_some(),
                });
            }

            cursor = parsed.next_cursor;
            if !parsed.has_more || cursor.is_none() {
                break;
            }
        }

        debug!(count = containers.len(), "discovered notion databases");
        Ok(containers)
    }

    /// Query one page of a database, sorted by its date property when one
    /// exists. HTTP 400 retries once without sorts/filters before the
    /// database is blacklisted.
    #[instrument(skip(self, credential, window), fields(database_id = %container.id))]
    async fn fetch_page(
        &self,
        credential: &SyncCredential,
        container: &RemoteContainer,
        window: &TimeWindow,
        cursor: Option<&str>,
    ) -> Result<EventPage> {
        let token = self.bearer(credential)?;

        if self.is_poisoned(&container.id) {
            debug!("database is blacklisted, returning empty page");
            return Ok(EventPage::empty());
        }

        let date_property = self.date_property_for(token, &container.id).await;
        let body = query_body(date_property.as_deref(), window, cursor, true);

        let parsed = match self.query_database(token, &container.id, &body).await? {
            QueryAttempt::Parsed(parsed) => parsed,
            QueryAttempt::Degraded => return Ok(EventPage::empty()),
            QueryAttempt::BadRequest => {
                warn!("notion rejected the sorted query, retrying without sorts");
                let plain = query_body(None, window, cursor, false);
                match self.query_database(token, &container.id, &plain).await? {
                    QueryAttempt::Parsed(parsed) => parsed,
                    QueryAttempt::Degraded => return Ok(EventPage::empty()),
                    QueryAttempt::BadRequest => {
                        self.poison(&container.id);
                        return Ok(EventPage::empty());
                    }
                }
            }
        };

        let events = parsed
            .results
            .iter()
            .filter(|page| page.get("archived").and_then(Value::as_bool) != Some(true))
            .filter_map(|page| {
                let id = page.get("id").and_then(Value::as_str)?;
                let properties = page.get("properties")?.clone();
                Some(RawEvent {
                    platform: SourcePlatform::Notion,
                    native_id: id.to_string(),
                    data: RawEventData::Notion { properties },
                })
            })
            .collect();

        Ok(EventPage {
            events,
            next_cursor: if parsed.has_more { parsed.next_cursor } else { None },
        })
    }
}

/// First date-typed property name in a database object's schema
fn detect_date_property(database: &Value) -> Option<String> {
    let properties = database.get("properties")?.as_object()?;
    properties
        .iter()
        .find(|(_, value)| value.get("type").and_then(Value::as_str) == Some("date"))
        .map(|(name, _)| name.clone())
}

fn database_title(database: &Value) -> String {
    let joined = database
        .get("title")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("plain_text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if joined.trim().is_empty() {
        "Untitled".to_string()
    } else {
        joined
    }
}

fn query_body(
    date_property: Option<&str>,
    window: &TimeWindow,
    cursor: Option<&str>,
    sorted: bool,
) -> Value {
    let mut body = json!({ "page_size": DEFAULT_QUERY_PAGE_SIZE });
    if let Some(cursor) = cursor {
        body["start_cursor"] = json!(cursor);
    }

    if sorted {
        match date_property {
            Some(name) => {
                body["sorts"] = json!([{ "property": name, "direction": "ascending" }]);
                body["filter"] = json!({
                    "property": name,
                    "date": { "on_or_after": window.start.to_rfc3339() },
                });
            }
            None => {
                body["sorts"] =
                    json!([{ "timestamp": "last_edited_time", "direction": "descending" }]);
            }
        }
    }

    body
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use notionflow_domain::CredentialSecret;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn credential() -> SyncCredential {
        SyncCredential::new(
            "u1",
            SourcePlatform::Notion,
            CredentialSecret::ApiToken { token: "secret_token".into() },
        )
    }

    fn client(server: &MockServer) -> NotionClient {
        NotionClient::with_base_url(server.uri(), &SyncConfig::default()).unwrap()
    }

    fn window() -> TimeWindow {
        TimeWindow::around(chrono::Utc::now())
    }

    fn database_json(id: &str, title: &str, with_date: bool) -> Value {
        let mut properties = json!({
            "Name": { "type": "title", "title": {} },
        });
        if with_date {
            properties["Date"] = json!({ "type": "date", "date": {} });
        }
        json!({
            "object": "database",
            "id": id,
            "title": [{ "plain_text": title }],
            "properties": properties,
        })
    }

    fn page_json(id: &str, title: &str, date: &str) -> Value {
        json!({
            "object": "page",
            "id": id,
            "archived": false,
            "properties": {
                "Name": { "type": "title", "title": [{ "plain_text": title }] },
                "Date": { "type": "date", "date": { "start": date, "end": null } },
            },
        })
    }

    #[tokio::test]
    async fn discovery_paginates_and_detects_date_properties() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .and(header("Notion-Version", NOTION_VERSION))
            .and(body_string_contains("start_cursor"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [database_json("db2", "Notes", false)],
                "has_more": false,
                "next_cursor": null,
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [database_json("db1", "Team Calendar", true)],
                "has_more": true,
                "next_cursor": "cursor-2",
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let containers = client.discover_containers(&credential()).await.unwrap();

        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].id, "db1");
        assert!(containers[0].has_date_field);
        assert_eq!(containers[0].title, "Team Calendar");
        assert!(!containers[1].has_date_field);
    }

    #[tokio::test]
    async fn discovery_auth_failure_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = client(&server).discover_containers(&credential()).await;
        assert!(matches!(result, Err(NotionFlowError::Auth(_))));
    }

    #[tokio::test]
    async fn discovery_transient_failure_degrades_to_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let containers = client(&server).discover_containers(&credential()).await.unwrap();
        assert!(containers.is_empty());
    }

    #[tokio::test]
    async fn query_maps_pages_and_carries_cursor() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/databases/db1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    page_json("p1", "Standup", "2025-03-01T10:00:00Z"),
                    page_json("p2", "Retro", "2025-03-02T10:00:00Z"),
                ],
                "has_more": true,
                "next_cursor": "cursor-xyz",
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let container =
            RemoteContainer { id: "db1".into(), title: "Tasks".into(), has_date_field: true };
        let page = client.fetch_page(&credential(), &container, &window(), None).await.unwrap();

        assert_eq!(page.events.len(), 2);
        assert_eq!(page.events[0].native_id, "p1");
        assert!(matches!(page.events[0].data, RawEventData::Notion { .. }));
        assert_eq!(page.next_cursor.as_deref(), Some("cursor-xyz"));
    }

    #[tokio::test]
    async fn bad_request_retries_without_sorts() {
        let server = MockServer::start().await;

        // The sorted attempt is rejected; the plain retry succeeds
        Mock::given(method("POST"))
            .and(path("/databases/db1/query"))
            .and(body_string_contains("sorts"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/databases/db1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [page_json("p1", "Standup", "2025-03-01T10:00:00Z")],
                "has_more": false,
                "next_cursor": null,
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let container =
            RemoteContainer { id: "db1".into(), title: "Tasks".into(), has_date_field: true };
        let page = client.fetch_page(&credential(), &container, &window(), None).await.unwrap();

        assert_eq!(page.events.len(), 1);
    }

    #[tokio::test]
    async fn repeated_bad_requests_blacklist_the_database() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/databases/db1/query"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [database_json("db1", "Team Calendar", true)],
                "has_more": false,
                "next_cursor": null,
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let container =
            RemoteContainer { id: "db1".into(), title: "Tasks".into(), has_date_field: true };

        let page = client.fetch_page(&credential(), &container, &window(), None).await.unwrap();
        assert!(page.events.is_empty());

        // Blacklisted databases disappear from subsequent discovery and
        // are never queried again
        let containers = client.discover_containers(&credential()).await.unwrap();
        assert!(containers.is_empty());

        let page = client.fetch_page(&credential(), &container, &window(), None).await.unwrap();
        assert!(page.events.is_empty());
    }
}
