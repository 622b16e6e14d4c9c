//! Standard paths used by the focus timer

use std::path::PathBuf;

/// Environment variable that overrides the data directory
pub const DATA_DIR_ENV: &str = "FOCUS_DATA_DIR";

/// Standard focus timer paths
pub struct Paths {
    /// Data directory (~/.local/share/focus)
    pub data: PathBuf,
    /// Config directory (~/.config/focus)
    pub config: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let data = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("focus"),
        };

        let config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("focus");

        Self { data, config }
    }

    /// Location of the user configuration file
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.json")
    }
}
