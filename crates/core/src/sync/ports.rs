//! Port interfaces consumed by the sync engine
//!
//! Infrastructure adapters (platform API clients, the Postgres datastore)
//! implement these traits; the orchestrator and reconciler only ever see
//! the trait objects.

use async_trait::async_trait;
use notionflow_domain::{
    Calendar, EventPage, EventRow, RemoteContainer, Result, SourcePlatform, SyncCredential,
    TimeWindow, UpsertStats,
};

/// A client for one external calendar platform
///
/// Implementations degrade transient provider failures (timeouts, 5xx,
/// malformed responses) to empty results with a warning; only auth- and
/// configuration-class errors surface as `Err`. Callers therefore judge a
/// sync by its counts, not by the absence of errors.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// The platform this client speaks to
    fn platform(&self) -> SourcePlatform;

    /// Enumerate the remote containers (Notion databases, calendars)
    /// visible to the credential
    async fn discover_containers(
        &self,
        credential: &SyncCredential,
    ) -> Result<Vec<RemoteContainer>>;

    /// Fetch one page of raw events from a container
    ///
    /// `cursor` is the opaque continuation returned by the previous page,
    /// `None` for the first page. Providers without server-side pagination
    /// return everything in one page with `next_cursor: None`.
    async fn fetch_page(
        &self,
        credential: &SyncCredential,
        container: &RemoteContainer,
        window: &TimeWindow,
        cursor: Option<&str>,
    ) -> Result<EventPage>;
}

/// Persistence port for canonical events
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Atomically upsert a batch of rows keyed on
    /// `(user_id, source_platform, external_id)`.
    ///
    /// Existing rows have only their mutable fields (title, description,
    /// times, all-day flag, updated_at) replaced; identity fields and
    /// created_at are never touched. Re-running with identical input must
    /// not create new rows.
    async fn upsert_batch(&self, rows: &[EventRow]) -> Result<UpsertStats>;
}

/// Persistence port for per-(user, platform) sync credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, user_id: &str, platform: SourcePlatform)
        -> Result<Option<SyncCredential>>;

    /// Reset the consecutive-failure counter and stamp `last_synced_at`
    async fn record_success(&self, user_id: &str, platform: SourcePlatform) -> Result<()>;

    /// Increment the consecutive-failure counter, returning the new count
    async fn record_failure(&self, user_id: &str, platform: SourcePlatform) -> Result<u32>;

    async fn set_enabled(
        &self,
        user_id: &str,
        platform: SourcePlatform,
        enabled: bool,
    ) -> Result<()>;
}

/// Lookup port for the user's internal calendars
#[async_trait]
pub trait CalendarStore: Send + Sync {
    async fn get(&self, user_id: &str, calendar_id: &str) -> Result<Option<Calendar>>;

    /// The user's first active calendar, used as the fallback sync target
    async fn first_active(&self, user_id: &str) -> Result<Option<Calendar>>;

    /// The user's designated sync target calendar id, if one is configured
    async fn sync_target(&self, user_id: &str) -> Result<Option<String>>;
}
