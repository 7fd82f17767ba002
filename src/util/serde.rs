//! Serializable identifiers and shared enums.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of any persisted pipeline entity.
pub type EntityId = String;

/// Generate a fresh entity identifier with a readable prefix (`post_…`, `sp_…`).
#[must_use]
pub fn new_id(prefix: &str) -> EntityId {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

/// Social platforms the pipeline can publish to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// LinkedIn.
    #[serde(rename = "linkedin")]
    LinkedIn,
    /// X (formerly Twitter).
    X,
    /// Threads.
    Threads,
    /// Instagram.
    Instagram,
    /// Facebook.
    Facebook,
}

impl Platform {
    /// All supported platforms.
    pub const ALL: [Self; 5] = [
        Self::LinkedIn,
        Self::X,
        Self::Threads,
        Self::Instagram,
        Self::Facebook,
    ];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LinkedIn => "linkedin",
            Self::X => "x",
            Self::Threads => "threads",
            Self::Instagram => "instagram",
            Self::Facebook => "facebook",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linkedin" => Ok(Self::LinkedIn),
            "x" | "twitter" => Ok(Self::X),
            "threads" => Ok(Self::Threads),
            "instagram" => Ok(Self::Instagram),
            "facebook" => Ok(Self::Facebook),
            other => Err(format!("unknown platform `{other}`")),
        }
    }
}

/// Named worker queue. Critical work is always drained first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueLane {
    /// Everything that is not time-sensitive.
    Default,
    /// Publish operations.
    Critical,
}

impl fmt::Display for QueueLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Critical => f.write_str("critical"),
        }
    }
}
