//! CalDAV (RFC 4791) client, used for Apple/iCloud calendars
//!
//! Authentication is HTTP Basic with an app-specific password. Discovery
//! is two-stage: PROPFIND the principal for the calendar-home-set, then
//! PROPFIND the home to enumerate calendar collections. Events are fetched
//! with a `calendar-query` REPORT filtered to a VEVENT time range.

mod client;
mod xml;

pub use client::CalDavClient;
