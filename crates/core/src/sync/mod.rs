//! Sync orchestration - ports and the per-user sync service

pub mod ports;
pub mod service;
