//! Focus Core - Shared functionality for the focus timer
//!
//! Paths, user configuration and the small formatting helpers used by both
//! the timer library and the `focus` binary.

pub mod config;
pub mod format;
pub mod paths;

pub use config::Config;
pub use paths::Paths;
