//! Domain data types

pub mod calendar;
pub mod container;
pub mod credential;
pub mod event;
pub mod raw;
pub mod sync;

pub use calendar::Calendar;
pub use container::RemoteContainer;
pub use credential::{CredentialSecret, SyncCredential};
pub use event::{CanonicalEvent, EventRow, SourcePlatform};
pub use raw::{EventPage, RawDateStamp, RawEvent, RawEventData, TimeWindow};
pub use sync::{BatchOutcome, SyncReport, UpsertStats};
