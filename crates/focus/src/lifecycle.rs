//! Host visibility as seen by the timer

use serde::{Deserialize, Serialize};

/// Whether the hosting process is in front of the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Active,
    Inactive,
    Background,
}

impl Visibility {
    pub fn is_active(&self) -> bool {
        matches!(self, Visibility::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Active => "active",
            Visibility::Inactive => "inactive",
            Visibility::Background => "background",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" | "fg" | "foreground" => Some(Visibility::Active),
            "inactive" => Some(Visibility::Inactive),
            "background" | "bg" => Some(Visibility::Background),
            _ => None,
        }
    }
}
