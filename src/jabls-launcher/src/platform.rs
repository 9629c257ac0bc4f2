//! Host platform detection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LauncherError, LauncherResult};

/// Logical platform a server archive is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformId {
    #[serde(rename = "windows")]
    Windows,
    #[serde(rename = "macos-x64")]
    MacosX64,
    #[serde(rename = "macos-arm64")]
    MacosArm64,
    #[serde(rename = "linux-x64")]
    LinuxX64,
    #[serde(rename = "linux-arm64")]
    LinuxArm64,
}

impl PlatformId {
    /// All platform identifiers, in catalog order.
    pub const ALL: [PlatformId; 5] = [
        Self::Windows,
        Self::MacosX64,
        Self::MacosArm64,
        Self::LinuxX64,
        Self::LinuxArm64,
    ];

    /// Get the identifier as used in catalogs and config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::MacosX64 => "macos-x64",
            Self::MacosArm64 => "macos-arm64",
            Self::LinuxX64 => "linux-x64",
            Self::LinuxArm64 => "linux-arm64",
        }
    }

    /// Detect the platform of the running process.
    pub fn resolve() -> LauncherResult<Self> {
        Self::resolve_from(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Map an OS name and CPU architecture to a platform.
    ///
    /// Windows maps to a single platform regardless of architecture. Any
    /// architecture other than arm64 falls back to the x64 build.
    pub fn resolve_from(os: &str, arch: &str) -> LauncherResult<Self> {
        let arm64 = matches!(arch, "aarch64" | "arm64");

        match os {
            "windows" => Ok(Self::Windows),
            "macos" if arm64 => Ok(Self::MacosArm64),
            "macos" => Ok(Self::MacosX64),
            "linux" if arm64 => Ok(Self::LinuxArm64),
            "linux" => Ok(Self::LinuxX64),
            _ => Err(LauncherError::UnsupportedPlatform {
                os: os.to_string(),
                arch: arch.to_string(),
            }),
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformId {
    type Err = LauncherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| LauncherError::Config {
                message: format!("Unknown platform identifier: {}", s),
            })
    }
}
