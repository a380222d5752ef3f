//! # NotionFlow Core
//!
//! Pure business logic layer of the sync engine - no infrastructure
//! dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for platform clients and the datastore
//! - The event normalizer (raw provider data -> canonical events)
//! - The database reconciler (idempotent batch persistence)
//! - The sync orchestrator (per-user entry point)
//!
//! ## Architecture Principles
//! - Only depends on `notionflow-domain`
//! - No database or HTTP code
//! - All external dependencies via traits
//! - Pure, testable business logic

pub mod normalize;
pub mod reconcile;
pub mod sync;

// Re-export specific items to avoid ambiguity
pub use reconcile::Reconciler;
pub use sync::ports::{CalendarStore, CredentialStore, EventRepository, PlatformClient};
pub use sync::service::SyncService;
