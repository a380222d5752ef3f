//! Sync orchestrator - the per-user entry point
//!
//! Drives the Client -> Normalizer -> Reconciler pipeline for one platform
//! and returns a [`SyncReport`]. Failures never escape as errors: whatever
//! goes wrong inside the pipeline becomes `{ success: false, error }`, and
//! partial progress already persisted is kept.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use notionflow_domain::{
    BatchOutcome, Calendar, CanonicalEvent, EventPage, RemoteContainer, Result, SourcePlatform,
    SyncConfig, SyncCredential, SyncReport, TimeWindow,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::normalize;
use crate::reconcile::Reconciler;
use crate::sync::ports::{CalendarStore, CredentialStore, EventRepository, PlatformClient};

/// Title keywords that mark a remote container as calendar-like
const CALENDAR_TITLE_KEYWORDS: &[&str] =
    &["calendar", "schedule", "event", "agenda", "planner", "meeting"];

/// Per-platform sync service
///
/// Cheap to clone; background continuations run on a clone of the service.
#[derive(Clone)]
pub struct SyncService {
    client: Arc<dyn PlatformClient>,
    credentials: Arc<dyn CredentialStore>,
    calendars: Arc<dyn CalendarStore>,
    reconciler: Reconciler,
    config: SyncConfig,
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

/// Immutable per-sync context shared with background continuations
struct SyncContext {
    user_id: String,
    calendar_id: String,
    credential: SyncCredential,
    window: TimeWindow,
}

/// Mutable walk state over the discovered containers
struct SyncProgress {
    queue: VecDeque<RemoteContainer>,
    /// Container whose pagination was interrupted by the initial-load cap
    current: Option<RemoteContainer>,
    cursor: Option<String>,
    totals: BatchOutcome,
    total_events: usize,
}

impl SyncService {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        credentials: Arc<dyn CredentialStore>,
        calendars: Arc<dyn CalendarStore>,
        events: Arc<dyn EventRepository>,
        config: SyncConfig,
    ) -> Self {
        let reconciler = Reconciler::new(events, calendars.clone());
        Self {
            client,
            credentials,
            calendars,
            reconciler,
            config,
            background: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sync this service's platform into a calendar for one user.
    ///
    /// When `calendar_id` is not passed, the user's configured sync target
    /// is used, then their first active calendar.
    #[instrument(skip(self))]
    pub async fn sync_to_calendar(&self, user_id: &str, calendar_id: Option<&str>) -> SyncReport {
        let platform = self.client.platform();

        let calendar = match self.resolve_calendar(user_id, calendar_id).await {
            Ok(Some(calendar)) => calendar,
            Ok(None) => {
                warn!(user_id, %platform, "sync requested without a resolvable calendar");
                return SyncReport::failed(None, "no calendar selected");
            }
            Err(err) => return SyncReport::failed(None, err.to_string()),
        };

        let credential = match self.credentials.get(user_id, platform).await {
            Ok(Some(credential)) if credential.enabled => credential,
            Ok(_) => {
                warn!(user_id, %platform, "sync requested without an enabled credential");
                return SyncReport::failed(Some(calendar.id), format!("not connected: {platform}"));
            }
            Err(err) => return SyncReport::failed(Some(calendar.id), err.to_string()),
        };

        match self.run_pipeline(user_id, &calendar, credential).await {
            Ok((synced, total)) => {
                if let Err(err) = self.credentials.record_success(user_id, platform).await {
                    error!(user_id, %platform, error = %err, "failed to record sync success");
                }
                info!(user_id, %platform, synced, total, "sync completed");
                SyncReport::completed(synced, total, calendar.id)
            }
            Err(err) => {
                error!(user_id, %platform, error = %err, "sync failed");
                self.note_failure(user_id, platform).await;
                SyncReport::failed(Some(calendar.id), err.to_string())
            }
        }
    }

    /// Await all background continuations.
    ///
    /// For tests and graceful shutdown; continuations not yet finished when
    /// the process exits are lost, which is the accepted trade-off for
    /// keeping the foreground call fast.
    pub async fn drain_background(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.background.lock().unwrap_or_else(|p| p.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "background sync task aborted");
            }
        }
    }

    async fn run_pipeline(
        &self,
        user_id: &str,
        calendar: &Calendar,
        credential: SyncCredential,
    ) -> Result<(usize, usize)> {
        let containers = self.client.discover_containers(&credential).await?;
        let discovered = containers.len();
        let queue: VecDeque<RemoteContainer> =
            containers.into_iter().filter(is_calendar_like).collect();
        debug!(user_id, discovered, calendar_like = queue.len(), "discovered remote containers");

        if queue.is_empty() {
            // "Nothing to sync" is a valid outcome, distinct from misconfiguration
            info!(user_id, "no calendar-like containers found");
            return Ok((0, 0));
        }

        let ctx = SyncContext {
            user_id: user_id.to_string(),
            calendar_id: calendar.id.clone(),
            credential,
            window: TimeWindow::with_spans(
                Utc::now(),
                self.config.lookback_days,
                self.config.lookahead_days,
            ),
        };
        let mut state = SyncProgress {
            queue,
            current: None,
            cursor: None,
            totals: BatchOutcome::default(),
            total_events: 0,
        };

        let finished = self.drain(&ctx, &mut state, Some(self.config.initial_event_cap)).await?;
        let synced = state.totals.synced();
        let total = state.total_events;

        if !finished {
            info!(
                user_id,
                synced,
                cap = self.config.initial_event_cap,
                "initial sync cap reached, deferring remainder to background"
            );
            self.spawn_continuation(ctx, state);
        }

        Ok((synced, total))
    }

    /// Walk the container queue, paginating, normalizing and persisting.
    ///
    /// Returns `Ok(true)` when every container is fully processed and
    /// `Ok(false)` when `cap` interrupted the walk with work remaining in
    /// `state`.
    async fn drain(
        &self,
        ctx: &SyncContext,
        state: &mut SyncProgress,
        cap: Option<usize>,
    ) -> Result<bool> {
        loop {
            let container = match state.current.take() {
                Some(container) => container,
                None => match state.queue.pop_front() {
                    Some(container) => {
                        state.cursor = None;
                        container
                    }
                    None => return Ok(true),
                },
            };

            let mut pages = 0usize;
            loop {
                let EventPage { events, next_cursor } = self
                    .client
                    .fetch_page(&ctx.credential, &container, &ctx.window, state.cursor.as_deref())
                    .await?;
                pages += 1;
                state.total_events += events.len();
                state.cursor = next_cursor;

                let normalized: Vec<CanonicalEvent> =
                    events.iter().filter_map(normalize::normalize).collect();
                let dropped = events.len() - normalized.len();
                if dropped > 0 {
                    debug!(container = %container.title, dropped, "dropped unmappable events");
                }

                for chunk in normalized.chunks(self.config.batch_size.max(1)) {
                    let outcome = self
                        .reconciler
                        .persist_batch(&ctx.user_id, Some(&ctx.calendar_id), chunk.to_vec())
                        .await?;
                    state.totals.absorb(outcome);
                }

                if let Some(cap) = cap {
                    if state.totals.synced() >= cap {
                        if state.cursor.is_some() {
                            state.current = Some(container);
                        }
                        let finished = state.current.is_none() && state.queue.is_empty();
                        return Ok(finished);
                    }
                }

                match &state.cursor {
                    None => break,
                    Some(_) if pages >= self.config.max_pages_per_container => {
                        warn!(
                            container = %container.title,
                            pages, "pagination bound reached, stopping container early"
                        );
                        state.cursor = None;
                        break;
                    }
                    Some(_) => {}
                }
            }
        }
    }

    /// Continue an interrupted walk on a background task (fire-and-forget
    /// with a retained handle).
    fn spawn_continuation(&self, ctx: SyncContext, mut state: SyncProgress) {
        let service = self.clone();
        let handle = tokio::spawn(async move {
            match service.drain(&ctx, &mut state, None).await {
                Ok(_) => info!(
                    user_id = %ctx.user_id,
                    synced = state.totals.synced(),
                    "background sync continuation finished"
                ),
                Err(err) => warn!(
                    user_id = %ctx.user_id,
                    error = %err,
                    "background sync continuation failed"
                ),
            }
        });
        self.background.lock().unwrap_or_else(|p| p.into_inner()).push(handle);
    }

    async fn resolve_calendar(
        &self,
        user_id: &str,
        explicit: Option<&str>,
    ) -> Result<Option<Calendar>> {
        if let Some(id) = explicit {
            return self.calendars.get(user_id, id).await;
        }
        if let Some(target) = self.calendars.sync_target(user_id).await? {
            if let Some(calendar) = self.calendars.get(user_id, &target).await? {
                return Ok(Some(calendar));
            }
            debug!(user_id, sync_target = %target, "configured sync target no longer exists, falling back");
        }
        self.calendars.first_active(user_id).await
    }

    /// Post-call failure policy: count consecutive failures and disable the
    /// credential once the threshold is reached.
    async fn note_failure(&self, user_id: &str, platform: SourcePlatform) {
        match self.credentials.record_failure(user_id, platform).await {
            Ok(count) if count >= self.config.failure_disable_threshold => {
                warn!(
                    user_id,
                    %platform,
                    consecutive_failures = count,
                    "failure threshold reached, disabling credential"
                );
                if let Err(err) = self.credentials.set_enabled(user_id, platform, false).await {
                    error!(user_id, %platform, error = %err, "failed to disable credential");
                }
            }
            Ok(count) => {
                debug!(user_id, %platform, consecutive_failures = count, "recorded sync failure");
            }
            Err(err) => {
                error!(user_id, %platform, error = %err, "failed to record sync failure");
            }
        }
    }
}

fn is_calendar_like(container: &RemoteContainer) -> bool {
    if container.has_date_field {
        return true;
    }
    let title = container.title.to_lowercase();
    CALENDAR_TITLE_KEYWORDS.iter().any(|keyword| title.contains(keyword))
}
