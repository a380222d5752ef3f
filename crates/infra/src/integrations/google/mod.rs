//! Google Calendar API client
//!
//! Speaks the Calendar v3 REST API with an OAuth2 bearer token:
//! `calendarList` for discovery, `events.list` (singleEvents, ordered by
//! start time, bounded by a time window) for fetching.

mod client;

pub use client::GoogleCalendarClient;
