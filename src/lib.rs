//! Room & quiz session coordinator.
//!
//! Tracks open room codes, issues and validates per-participant room
//! tokens, maintains live room membership, drives question-by-question
//! quiz progression under server-authoritative deadlines, and fans room
//! events out to every connected member.

pub mod api;
pub mod broadcast;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod presence;
pub mod quiz;
pub mod room;
pub mod token;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, the server-authoritative clock used
/// for join timestamps and question deadlines.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
