//! Notion API client
//!
//! Speaks the Notion REST API (`/search`, `/databases/{id}`,
//! `/databases/{id}/query`) with bearer auth. Notion databases are
//! schemaless from our point of view, so discovery records which date
//! property (if any) each database carries; queries sort by it and fall
//! back to `last_edited_time` otherwise.
//!
//! Query errors caused by schema quirks (HTTP 400) are retried once
//! without sorts/filters; a database that still fails is remembered in an
//! instance-owned poison list and skipped for the rest of this process.

mod client;

pub use client::NotionClient;
