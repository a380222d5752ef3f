//! In-memory implementation of the datastore ports.
//!
//! Mirrors the Postgres semantics (atomic upsert on the natural key,
//! failure counters, fallback lookups) over mutex-held maps. Used by the
//! pipeline integration tests and for local wiring without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use notionflow_domain::{
    Calendar, EventRow, NotionFlowError, Result, SourcePlatform, SyncCredential, UpsertStats,
};
use notionflow_core::{CalendarStore, CredentialStore, EventRepository};

type NaturalKey = (String, SourcePlatform, String);

/// In-memory datastore implementing all three persistence ports
#[derive(Default)]
pub struct InMemoryDatastore {
    events: Mutex<HashMap<NaturalKey, EventRow>>,
    credentials: Mutex<HashMap<(String, SourcePlatform), SyncCredential>>,
    calendars: Mutex<Vec<Calendar>>,
    sync_targets: Mutex<HashMap<String, String>>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_calendar(&self, calendar: Calendar) {
        lock(&self.calendars).push(calendar);
    }

    pub fn put_credential(&self, credential: SyncCredential) {
        lock(&self.credentials)
            .insert((credential.user_id.clone(), credential.platform), credential);
    }

    pub fn set_sync_target(&self, user_id: &str, calendar_id: &str) {
        lock(&self.sync_targets).insert(user_id.to_string(), calendar_id.to_string());
    }

    pub fn event_count(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn event(
        &self,
        user_id: &str,
        platform: SourcePlatform,
        external_id: &str,
    ) -> Option<EventRow> {
        lock(&self.events)
            .get(&(user_id.to_string(), platform, external_id.to_string()))
            .cloned()
    }

    pub fn credential(&self, user_id: &str, platform: SourcePlatform) -> Option<SyncCredential> {
        lock(&self.credentials).get(&(user_id.to_string(), platform)).cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl EventRepository for InMemoryDatastore {
    async fn upsert_batch(&self, rows: &[EventRow]) -> Result<UpsertStats> {
        let mut events = lock(&self.events);
        let mut stats = UpsertStats::default();
        for row in rows {
            let key =
                (row.user_id.clone(), row.source_platform, row.external_id.clone());
            match events.get_mut(&key) {
                Some(existing) => {
                    existing.title = row.title.clone();
                    existing.description = row.description.clone();
                    existing.start = row.start;
                    existing.end = row.end;
                    existing.all_day = row.all_day;
                    existing.updated_at = Utc::now();
                    stats.updated += 1;
                }
                None => {
                    events.insert(key, row.clone());
                    stats.inserted += 1;
                }
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl CredentialStore for InMemoryDatastore {
    async fn get(
        &self,
        user_id: &str,
        platform: SourcePlatform,
    ) -> Result<Option<SyncCredential>> {
        Ok(lock(&self.credentials).get(&(user_id.to_string(), platform)).cloned())
    }

    async fn record_success(&self, user_id: &str, platform: SourcePlatform) -> Result<()> {
        if let Some(credential) =
            lock(&self.credentials).get_mut(&(user_id.to_string(), platform))
        {
            credential.consecutive_failures = 0;
            credential.last_synced_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn record_failure(&self, user_id: &str, platform: SourcePlatform) -> Result<u32> {
        let mut credentials = lock(&self.credentials);
        match credentials.get_mut(&(user_id.to_string(), platform)) {
            Some(credential) => {
                credential.consecutive_failures += 1;
                Ok(credential.consecutive_failures)
            }
            None => Err(NotionFlowError::NotFound(format!(
                "no credential stored for user {user_id} on {platform}"
            ))),
        }
    }

    async fn set_enabled(
        &self,
        user_id: &str,
        platform: SourcePlatform,
        enabled: bool,
    ) -> Result<()> {
        if let Some(credential) =
            lock(&self.credentials).get_mut(&(user_id.to_string(), platform))
        {
            credential.enabled = enabled;
        }
        Ok(())
    }
}

#[async_trait]
impl CalendarStore for InMemoryDatastore {
    async fn get(&self, user_id: &str, calendar_id: &str) -> Result<Option<Calendar>> {
        Ok(lock(&self.calendars)
            .iter()
            .find(|calendar| calendar.user_id == user_id && calendar.id == calendar_id)
            .cloned())
    }

    async fn first_active(&self, user_id: &str) -> Result<Option<Calendar>> {
        Ok(lock(&self.calendars)
            .iter()
            .find(|calendar| calendar.user_id == user_id && calendar.active)
            .cloned())
    }

    async fn sync_target(&self, user_id: &str) -> Result<Option<String>> {
        Ok(lock(&self.sync_targets).get(user_id).cloned())
    }
}
