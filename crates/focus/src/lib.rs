//! focus - Pomodoro timer with distraction counting
//!
//! "Protect the sacred space of deep work."
//!
//! A countdown records how long you actually focused, in which category,
//! and how many times you left the app while it ran:
//! - `timer`: the countdown state machine
//! - `controller`: drives a timer from a ticker and host lifecycle events
//! - `store`: append-only session collection on a key-value blob store
//! - `stats`: daily, weekly and per-category totals for reports

pub mod controller;
pub mod lifecycle;
pub mod session;
pub mod stats;
pub mod store;
pub mod timer;

pub use controller::{TimerController, TimerEvent};
pub use lifecycle::Visibility;
pub use session::Session;
pub use stats::FocusStats;
pub use store::{SessionStore, StoreError};
pub use timer::{StopPrompt, StopRequest, TimerSnapshot, TimerState, TimerStatus};
