//! Configuration management for the focus timer

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Placeholder category used when none is chosen
pub const DEFAULT_CATEGORY: &str = "General";

/// Global focus timer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Length of one focus session (minutes)
    #[serde(default = "default_focus_minutes")]
    pub focus_minutes: u32,

    /// Category used when the user does not pick one
    #[serde(default = "default_category")]
    pub default_category: String,

    /// Categories offered when a session starts
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Interval between countdown ticks (milliseconds)
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

fn default_focus_minutes() -> u32 {
    25
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

fn default_categories() -> Vec<String> {
    ["General", "Coding", "Study", "Reading", "Work"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_tick_millis() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            focus_minutes: default_focus_minutes(),
            default_category: default_category(),
            categories: default_categories(),
            tick_millis: default_tick_millis(),
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Configured session length in seconds, never zero
    pub fn focus_seconds(&self) -> u32 {
        self.focus_minutes.max(1).saturating_mul(60)
    }

    /// The configured default category, or the placeholder if it is blank
    pub fn fallback_category(&self) -> &str {
        let trimmed = self.default_category.trim();
        if trimmed.is_empty() {
            DEFAULT_CATEGORY
        } else {
            trimmed
        }
    }
}
