//! Database reconciler
//!
//! Persists batches of canonical events with at-most-one-record-per-natural
//! key semantics. The natural key is `(user_id, source_platform,
//! external_id)`; the repository's atomic upsert is the only write path, so
//! concurrent syncs for the same user cannot race a select-then-insert.

use std::sync::Arc;

use chrono::Utc;
use notionflow_domain::{BatchOutcome, CanonicalEvent, EventRow, Result};
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::sync::ports::{CalendarStore, EventRepository};

/// Reconciles normalized events against stored rows
#[derive(Clone)]
pub struct Reconciler {
    events: Arc<dyn EventRepository>,
    calendars: Arc<dyn CalendarStore>,
}

impl Reconciler {
    pub fn new(events: Arc<dyn EventRepository>, calendars: Arc<dyn CalendarStore>) -> Self {
        Self { events, calendars }
    }

    /// Persist one batch of events for a user.
    ///
    /// Every stored row needs a calendar: events resolve to their own
    /// `calendar_id`, then the caller's target, then the user's first
    /// active calendar. Unresolvable events are skipped (never stored
    /// orphaned) and reported in the outcome. A failed write reduces the
    /// synced count but does not abort the caller's loop.
    #[instrument(skip(self, batch), fields(user_id, count = batch.len()))]
    pub async fn persist_batch(
        &self,
        user_id: &str,
        target_calendar: Option<&str>,
        batch: Vec<CanonicalEvent>,
    ) -> Result<BatchOutcome> {
        if batch.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let fallback = match target_calendar {
            Some(id) => Some(id.to_string()),
            None => self.calendars.first_active(user_id).await?.map(|calendar| calendar.id),
        };

        let mut outcome = BatchOutcome::default();
        let now = Utc::now();
        let mut rows = Vec::with_capacity(batch.len());

        for event in batch {
            let calendar_id = match event.calendar_id.clone().or_else(|| fallback.clone()) {
                Some(id) => id,
                None => {
                    warn!(
                        user_id,
                        external_id = %event.external_id,
                        "no calendar resolvable for event, skipping"
                    );
                    outcome.skipped += 1;
                    continue;
                }
            };

            rows.push(EventRow {
                id: Uuid::now_v7().to_string(),
                user_id: user_id.to_string(),
                calendar_id,
                title: event.title,
                description: event.description,
                start: event.start,
                end: event.end,
                all_day: event.all_day,
                external_id: event.external_id,
                source_platform: event.source_platform,
                created_at: now,
                updated_at: now,
            });
        }

        if rows.is_empty() {
            return Ok(outcome);
        }

        match self.events.upsert_batch(&rows).await {
            Ok(stats) => {
                outcome.inserted += stats.inserted;
                outcome.updated += stats.updated;
            }
            Err(err) => {
                error!(user_id, count = rows.len(), error = %err, "failed to persist event batch");
                outcome.skipped += rows.len();
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use notionflow_domain::{Calendar, NotionFlowError, SourcePlatform, UpsertStats};

    use super::*;

    /// In-memory event repository with atomic-upsert semantics
    #[derive(Default)]
    struct FakeEventRepository {
        rows: Mutex<HashMap<(String, String), EventRow>>,
        fail: Mutex<bool>,
    }

    impl FakeEventRepository {
        fn row_count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        fn title_of(&self, user_id: &str, external_id: &str) -> Option<String> {
            self.rows
                .lock()
                .unwrap()
                .get(&(user_id.to_string(), external_id.to_string()))
                .map(|row| row.title.clone())
        }
    }

    #[async_trait]
    impl EventRepository for FakeEventRepository {
        async fn upsert_batch(&self, rows: &[EventRow]) -> notionflow_domain::Result<UpsertStats> {
            if *self.fail.lock().unwrap() {
                return Err(NotionFlowError::Database("connection reset".into()));
            }
            let mut stored = self.rows.lock().unwrap();
            let mut stats = UpsertStats::default();
            for row in rows {
                let key = (row.user_id.clone(), row.external_id.clone());
                match stored.get_mut(&key) {
                    Some(existing) => {
                        existing.title = row.title.clone();
                        existing.description = row.description.clone();
                        existing.start = row.start;
                        existing.end = row.end;
                        existing.all_day = row.all_day;
                        existing.updated_at = row.updated_at;
                        stats.updated += 1;
                    }
                    None => {
                        stored.insert(key, row.clone());
                        stats.inserted += 1;
                    }
                }
            }
            Ok(stats)
        }
    }

    struct FakeCalendarStore {
        active: Option<Calendar>,
    }

    #[async_trait]
    impl CalendarStore for FakeCalendarStore {
        async fn get(
            &self,
            _user_id: &str,
            calendar_id: &str,
        ) -> notionflow_domain::Result<Option<Calendar>> {
            Ok(self.active.clone().filter(|c| c.id == calendar_id))
        }

        async fn first_active(
            &self,
            _user_id: &str,
        ) -> notionflow_domain::Result<Option<Calendar>> {
            Ok(self.active.clone())
        }

        async fn sync_target(&self, _user_id: &str) -> notionflow_domain::Result<Option<String>> {
            Ok(None)
        }
    }

    fn event(external_id: &str, title: &str) -> CanonicalEvent {
        let start = Utc::now();
        CanonicalEvent {
            title: title.to_string(),
            description: String::new(),
            start,
            end: start + Duration::hours(1),
            all_day: false,
            external_id: external_id.to_string(),
            source_platform: SourcePlatform::Notion,
            calendar_id: None,
        }
    }

    fn reconciler_with(
        repo: Arc<FakeEventRepository>,
        active: Option<Calendar>,
    ) -> Reconciler {
        Reconciler::new(repo, Arc::new(FakeCalendarStore { active }))
    }

    fn personal_calendar() -> Calendar {
        Calendar {
            id: "cal-1".into(),
            user_id: "u1".into(),
            name: "Personal".into(),
            active: true,
        }
    }

    #[tokio::test]
    async fn rerunning_identical_batch_creates_no_duplicates() {
        let repo = Arc::new(FakeEventRepository::default());
        let reconciler = reconciler_with(repo.clone(), Some(personal_calendar()));

        let batch: Vec<_> = (1..=5).map(|i| event(&format!("notion_e{i}"), "Event")).collect();

        let first = reconciler.persist_batch("u1", Some("cal-1"), batch.clone()).await.unwrap();
        assert_eq!(first.inserted, 5);
        assert_eq!(repo.row_count(), 5);

        let second = reconciler.persist_batch("u1", Some("cal-1"), batch).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 5);
        assert_eq!(repo.row_count(), 5, "idempotent re-run must not grow the table");
    }

    #[tokio::test]
    async fn changed_title_updates_existing_row() {
        let repo = Arc::new(FakeEventRepository::default());
        let reconciler = reconciler_with(repo.clone(), Some(personal_calendar()));

        reconciler
            .persist_batch("u1", Some("cal-1"), vec![event("notion_e1", "Old title")])
            .await
            .unwrap();
        reconciler
            .persist_batch("u1", Some("cal-1"), vec![event("notion_e1", "New title")])
            .await
            .unwrap();

        assert_eq!(repo.row_count(), 1);
        assert_eq!(repo.title_of("u1", "notion_e1").as_deref(), Some("New title"));
    }

    #[tokio::test]
    async fn events_without_resolvable_calendar_are_skipped() {
        let repo = Arc::new(FakeEventRepository::default());
        // No target passed and no active calendar to fall back to
        let reconciler = reconciler_with(repo.clone(), None);

        let mut with_own_calendar = event("notion_e1", "Has calendar");
        with_own_calendar.calendar_id = Some("cal-9".into());
        let batch = vec![
            with_own_calendar,
            event("notion_e2", "Orphan A"),
            event("notion_e3", "Orphan B"),
        ];

        let outcome = reconciler.persist_batch("u1", None, batch).await.unwrap();
        assert_eq!(outcome.synced(), 1);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(repo.row_count(), 1, "orphans must never be stored");
    }

    #[tokio::test]
    async fn fallback_calendar_is_first_active() {
        let repo = Arc::new(FakeEventRepository::default());
        let reconciler = reconciler_with(repo.clone(), Some(personal_calendar()));

        let outcome =
            reconciler.persist_batch("u1", None, vec![event("notion_e1", "Event")]).await.unwrap();
        assert_eq!(outcome.synced(), 1);

        let rows = repo.rows.lock().unwrap();
        let row = rows.values().next().unwrap();
        assert_eq!(row.calendar_id, "cal-1");
    }

    #[tokio::test]
    async fn repository_failure_reduces_counts_without_erroring() {
        let repo = Arc::new(FakeEventRepository::default());
        *repo.fail.lock().unwrap() = true;
        let reconciler = reconciler_with(repo.clone(), Some(personal_calendar()));

        let outcome = reconciler
            .persist_batch("u1", Some("cal-1"), vec![event("notion_e1", "Event")])
            .await
            .unwrap();

        assert_eq!(outcome.synced(), 0);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(repo.row_count(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let repo = Arc::new(FakeEventRepository::default());
        let reconciler = reconciler_with(repo.clone(), Some(personal_calendar()));

        let outcome = reconciler.persist_batch("u1", Some("cal-1"), Vec::new()).await.unwrap();
        assert_eq!(outcome, BatchOutcome::default());
    }
}
