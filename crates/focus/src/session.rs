//! Focus session records
//!
//! A `Session` is the only thing that outlives a timer: one finished or
//! user-stopped focus interval with the time actually focused, its category
//! and how many times the app was left while it ran.

use chrono::{DateTime, Utc};
use focus_core::config::DEFAULT_CATEGORY;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// A completed session record (stored in the session collection)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Time-based unique id (milliseconds since the epoch)
    pub id: String,
    /// When the session was finalized
    pub date: DateTime<Utc>,
    /// Seconds actually focused
    pub duration: u32,
    /// Category label, never empty
    pub category: String,
    /// Number of times the app was backgrounded while running
    pub distractions: u32,
    /// Whether the countdown reached zero (vs stopped early)
    pub is_finished: bool,
}

impl Session {
    /// Create a record finalized at `date`
    pub fn new(
        date: DateTime<Utc>,
        duration: u32,
        category: &str,
        distractions: u32,
        is_finished: bool,
    ) -> Self {
        Self {
            id: next_id(date),
            date,
            duration,
            category: normalize_category(Some(category)),
            distractions,
            is_finished,
        }
    }
}

/// Allocate an id from the clock, strictly increasing within this process
fn next_id(date: DateTime<Utc>) -> String {
    let wanted = date.timestamp_millis();
    let mut current = LAST_ID.load(Ordering::Relaxed);
    loop {
        let candidate = wanted.max(current + 1);
        match LAST_ID.compare_exchange_weak(current, candidate, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return candidate.to_string(),
            Err(actual) => current = actual,
        }
    }
}

/// Trim a user supplied category, substituting the placeholder when blank
pub fn normalize_category(category: Option<&str>) -> String {
    match category.map(str::trim) {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => DEFAULT_CATEGORY.to_string(),
    }
}
