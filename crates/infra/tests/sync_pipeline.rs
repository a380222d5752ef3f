//! End-to-end pipeline tests: orchestrator + platform clients against mock
//! servers + the in-memory datastore.
//!
//! These cover the cross-component properties (idempotence, upsert
//! correctness, graceful degradation) that the per-module unit tests can
//! only show in isolation.

use std::sync::Arc;

use notionflow_domain::{
    Calendar, CredentialSecret, SourcePlatform, SyncConfig, SyncCredential,
};
use notionflow_core::SyncService;
use notionflow_infra::{GoogleCalendarClient, InMemoryDatastore, NotionClient};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER: &str = "user-1";

/// Opt into log output with e.g. `RUST_LOG=debug cargo test`
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn calendar() -> Calendar {
    Calendar { id: "cal-1".into(), user_id: USER.into(), name: "Main".into(), active: true }
}

fn google_credential() -> SyncCredential {
    SyncCredential::new(
        USER,
        SourcePlatform::Google,
        CredentialSecret::OAuth {
            access_token: "ya29.token".into(),
            refresh_token: None,
            expires_at: None,
        },
    )
}

fn notion_credential() -> SyncCredential {
    SyncCredential::new(
        USER,
        SourcePlatform::Notion,
        CredentialSecret::ApiToken { token: "secret_token".into() },
    )
}

fn store_with_user(credential: SyncCredential) -> Arc<InMemoryDatastore> {
    let store = Arc::new(InMemoryDatastore::new());
    store.add_calendar(calendar());
    store.put_credential(credential);
    store
}

fn google_service(server: &MockServer, store: &Arc<InMemoryDatastore>) -> SyncService {
    let client =
        Arc::new(GoogleCalendarClient::with_base_url(server.uri(), &SyncConfig::default()).unwrap());
    SyncService::new(client, store.clone(), store.clone(), store.clone(), SyncConfig::default())
}

async fn mount_google_calendar_list(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/users/me/calendarList"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "id": "primary", "summary": "Personal" }],
        })))
        .mount(server)
        .await;
}

async fn mount_google_events(server: &MockServer, titles: (&str, &str)) {
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {
                    "id": "evt1",
                    "summary": titles.0,
                    "description": "weekly",
                    "start": { "dateTime": "2025-03-03T09:00:00Z" },
                    "end": { "dateTime": "2025-03-03T09:30:00Z" },
                    "status": "confirmed",
                },
                {
                    "id": "evt2",
                    "summary": titles.1,
                    "start": { "date": "2025-03-04" },
                    "end": { "date": "2025-03-05" },
                    "status": "confirmed",
                },
            ],
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn google_events_sync_end_to_end() {
    init_tracing();
    let server = MockServer::start().await;
    mount_google_calendar_list(&server).await;
    mount_google_events(&server, ("Standup", "Conference")).await;

    let store = store_with_user(google_credential());
    let service = google_service(&server, &store);

    let report = service.sync_to_calendar(USER, None).await;
    assert!(report.success, "sync failed: {:?}", report.error);
    assert_eq!(report.synced_events, 2);
    assert_eq!(report.total_events, 2);
    assert_eq!(report.calendar_id.as_deref(), Some("cal-1"));

    let timed = store.event(USER, SourcePlatform::Google, "google_evt1").unwrap();
    assert_eq!(timed.title, "Standup");
    assert_eq!(timed.description, "weekly");
    assert_eq!(timed.calendar_id, "cal-1");
    assert!(!timed.all_day);
    assert!(timed.end > timed.start);

    let all_day = store.event(USER, SourcePlatform::Google, "google_evt2").unwrap();
    assert!(all_day.all_day);
    assert!(all_day.end > all_day.start);

    // Success stamps the credential
    let credential = store.credential(USER, SourcePlatform::Google).unwrap();
    assert_eq!(credential.consecutive_failures, 0);
    assert!(credential.last_synced_at.is_some());
}

#[tokio::test]
async fn resync_with_unchanged_data_creates_no_duplicates() {
    let server = MockServer::start().await;
    mount_google_calendar_list(&server).await;
    mount_google_events(&server, ("Standup", "Conference")).await;

    let store = store_with_user(google_credential());
    let service = google_service(&server, &store);

    let first = service.sync_to_calendar(USER, None).await;
    assert!(first.success);
    assert_eq!(store.event_count(), 2);

    let second = service.sync_to_calendar(USER, None).await;
    assert!(second.success);
    assert_eq!(second.synced_events, 2);
    assert_eq!(store.event_count(), 2, "re-sync must not duplicate rows");
}

#[tokio::test]
async fn remote_title_change_updates_the_stored_row() {
    let server = MockServer::start().await;
    mount_google_calendar_list(&server).await;
    mount_google_events(&server, ("Old title", "Conference")).await;

    let store = store_with_user(google_credential());
    let service = google_service(&server, &store);

    assert!(service.sync_to_calendar(USER, None).await.success);
    assert_eq!(
        store.event(USER, SourcePlatform::Google, "google_evt1").unwrap().title,
        "Old title"
    );

    // The remote event gets renamed; the next sync must update in place
    server.reset().await;
    mount_google_calendar_list(&server).await;
    mount_google_events(&server, ("New title", "Conference")).await;

    assert!(service.sync_to_calendar(USER, None).await.success);
    assert_eq!(store.event_count(), 2);
    assert_eq!(
        store.event(USER, SourcePlatform::Google, "google_evt1").unwrap().title,
        "New title"
    );
}

#[tokio::test]
async fn provider_outage_is_a_successful_empty_sync() {
    let server = MockServer::start().await;
    mount_google_calendar_list(&server).await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = store_with_user(google_credential());
    let service = google_service(&server, &store);

    let report = service.sync_to_calendar(USER, None).await;
    assert!(report.success);
    assert_eq!(report.synced_events, 0);
    assert_eq!(store.event_count(), 0);
}

#[tokio::test]
async fn undateable_items_are_dropped_not_fatal() {
    let server = MockServer::start().await;
    mount_google_calendar_list(&server).await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "id": "evt1", "summary": "No start at all" },
                {
                    "id": "evt2",
                    "summary": "Fine",
                    "start": { "dateTime": "2025-03-03T09:00:00Z" },
                    "end": { "dateTime": "2025-03-03T10:00:00Z" },
                },
            ],
        })))
        .mount(&server)
        .await;

    let store = store_with_user(google_credential());
    let service = google_service(&server, &store);

    let report = service.sync_to_calendar(USER, None).await;
    assert!(report.success);
    assert_eq!(report.total_events, 2);
    assert_eq!(report.synced_events, 1);
    assert_eq!(store.event_count(), 1);
}

#[tokio::test]
async fn notion_pages_sync_through_the_same_pipeline() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "object": "database",
                "id": "db1",
                "title": [{ "plain_text": "Team Calendar" }],
                "properties": {
                    "Name": { "type": "title", "title": {} },
                    "Date": { "type": "date", "date": {} },
                },
            }],
            "has_more": false,
            "next_cursor": null,
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/databases/db1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "object": "page",
                "id": "p1",
                "archived": false,
                "properties": {
                    "Name": { "type": "title", "title": [{ "plain_text": "Sprint planning" }] },
                    "Date": { "type": "date", "date": { "start": "2025-03-06", "end": null } },
                },
            }],
            "has_more": false,
            "next_cursor": null,
        })))
        .mount(&server)
        .await;

    let store = store_with_user(notion_credential());
    let client =
        Arc::new(NotionClient::with_base_url(server.uri(), &SyncConfig::default()).unwrap());
    let service = SyncService::new(
        client,
        store.clone(),
        store.clone(),
        store.clone(),
        SyncConfig::default(),
    );

    let report = service.sync_to_calendar(USER, None).await;
    assert!(report.success, "sync failed: {:?}", report.error);
    assert_eq!(report.synced_events, 1);

    let row = store.event(USER, SourcePlatform::Notion, "notion_p1").unwrap();
    assert_eq!(row.title, "Sprint planning");
    assert!(row.all_day);
    assert!(row.end > row.start);
}
