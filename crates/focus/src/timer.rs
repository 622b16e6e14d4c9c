//! Countdown state machine
//!
//! Pure state arithmetic for one timer instance: start, pause, tick,
//! finalize and distraction detection. Nothing here blocks or fails; the
//! controller drives it from the ticker and the lifecycle subscription and
//! takes care of persisting whatever `Session` comes out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

use crate::lifecycle::Visibility;
use crate::session::{normalize_category, Session};

/// Observable status of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    /// Full countdown left, not running
    Idle,
    Running,
    /// Stopped part way through
    Paused,
}

impl TimerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerStatus::Idle => "idle",
            TimerStatus::Running => "running",
            TimerStatus::Paused => "paused",
        }
    }
}

/// Progress shown to the user before a stop is confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopPrompt {
    pub elapsed: u32,
    pub remaining: u32,
    pub distractions: u32,
    pub category: String,
}

/// Outcome of asking to stop the countdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopRequest {
    /// No progress was made; stopping is a plain reset with nothing to save
    Reset,
    /// Progress would be recorded; the caller decides whether to confirm
    Confirm(StopPrompt),
}

/// Read-only copy of the timer for presentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub status: TimerStatus,
    pub configured_secs: u32,
    pub remaining_secs: u32,
    pub distractions: u32,
    pub category: String,
    pub clock: String,
}

#[derive(Debug, Clone)]
pub struct TimerState {
    configured: u32,
    remaining: u32,
    running: bool,
    distractions: u32,
    category: String,
    /// Last visibility reported by the host; only the active -> away edge counts
    last_visibility: Visibility,
}

impl TimerState {
    pub fn new(configured: NonZeroU32, category: Option<&str>) -> Self {
        Self {
            configured: configured.get(),
            remaining: configured.get(),
            running: false,
            distractions: 0,
            category: normalize_category(category),
            last_visibility: Visibility::Active,
        }
    }

    pub fn configured_secs(&self) -> u32 {
        self.configured
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining
    }

    pub fn distractions(&self) -> u32 {
        self.distractions
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn has_progress(&self) -> bool {
        self.remaining < self.configured
    }

    pub fn status(&self) -> TimerStatus {
        if self.running {
            TimerStatus::Running
        } else if self.has_progress() {
            TimerStatus::Paused
        } else {
            TimerStatus::Idle
        }
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            status: self.status(),
            configured_secs: self.configured,
            remaining_secs: self.remaining,
            distractions: self.distractions,
            category: self.category.clone(),
            clock: focus_core::format::clock(u64::from(self.remaining)),
        }
    }

    /// Start or resume. Returns false if already running.
    pub fn start(&mut self) -> bool {
        if self.running || self.remaining == 0 {
            return false;
        }
        self.running = true;
        true
    }

    /// Returns false if not running.
    pub fn pause(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        true
    }

    /// Start when stopped, pause when running. Returns the new running flag.
    pub fn toggle(&mut self) -> bool {
        if self.running {
            self.pause();
        } else {
            self.start();
        }
        self.running
    }

    pub fn tick(&mut self) -> Option<Session> {
        self.tick_at(Utc::now())
    }

    /// One second of countdown. Reaching zero finalizes as finished.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> Option<Session> {
        if !self.running || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        if self.remaining == 0 {
            return self.finalize_at(true, now);
        }
        None
    }

    pub fn finalize(&mut self, is_finished: bool) -> Option<Session> {
        self.finalize_at(is_finished, Utc::now())
    }

    /// Turn progress into a `Session` and reset to idle.
    ///
    /// Without progress this only clears the running flag.
    pub fn finalize_at(&mut self, is_finished: bool, now: DateTime<Utc>) -> Option<Session> {
        self.running = false;
        if !self.has_progress() {
            return None;
        }

        let session = Session::new(
            now,
            self.configured - self.remaining,
            &self.category,
            self.distractions,
            is_finished,
        );

        self.remaining = self.configured;
        self.distractions = 0;
        Some(session)
    }

    pub fn request_stop(&self) -> StopRequest {
        if !self.has_progress() {
            return StopRequest::Reset;
        }
        StopRequest::Confirm(StopPrompt {
            elapsed: self.configured - self.remaining,
            remaining: self.remaining,
            distractions: self.distractions,
            category: self.category.clone(),
        })
    }

    /// Record a host visibility change. Returns true when it counted as a
    /// distraction (the app left the foreground while running).
    pub fn on_visibility_change(&mut self, visibility: Visibility) -> bool {
        let was_active = self.last_visibility.is_active();
        self.last_visibility = visibility;

        if !(was_active && !visibility.is_active() && self.running) {
            return false;
        }
        self.running = false;
        self.distractions += 1;
        true
    }
}
