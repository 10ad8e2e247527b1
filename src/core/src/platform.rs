//! Platforms the sync and build paths support.

use serde::{Deserialize, Serialize};

/// Container platform (OS/architecture pair).
///
/// Only the two Linux architectures below are synced or built; anything else
/// found in a source image index is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "linux/amd64")]
    LinuxAmd64,
    #[serde(rename = "linux/arm64")]
    LinuxArm64,
}

impl Platform {
    /// Every supported platform, in lexicographic order of their keys.
    pub const SUPPORTED: [Platform; 2] = [Platform::LinuxAmd64, Platform::LinuxArm64];

    /// The `os/arch` key used in image indexes and tool flags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinuxAmd64 => "linux/amd64",
            Self::LinuxArm64 => "linux/arm64",
        }
    }

    pub fn os(&self) -> &'static str {
        "linux"
    }

    /// Architecture token, also used as the destination tag suffix.
    pub fn architecture(&self) -> &'static str {
        match self {
            Self::LinuxAmd64 => "amd64",
            Self::LinuxArm64 => "arm64",
        }
    }

    /// Look up a supported platform by its `os/arch` key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::SUPPORTED.into_iter().find(|p| p.as_str() == key)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_key(s).ok_or_else(|| {
            format!(
                "unsupported platform: '{}' (supported: linux/amd64, linux/arm64)",
                s
            )
        })
    }
}
