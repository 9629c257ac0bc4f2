//! Error types for jabls-launcher.

use std::path::PathBuf;
use thiserror::Error;

use crate::platform::PlatformId;

/// Result type for launcher operations.
pub type LauncherResult<T> = std::result::Result<T, LauncherError>;

/// Errors that can occur while provisioning, spawning or connecting.
#[derive(Debug, Error)]
pub enum LauncherError {
    // Startup errors
    #[error("Unsupported platform: {os} / {arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("No archive descriptor provided for platform \"{platform}\"")]
    MissingArchiveDescriptor { platform: PlatformId },

    // Provisioning errors
    #[error("Failed to query server archive metadata at {url}: {message}")]
    Provisioning { url: String, message: String },

    #[error("Download failed: {message}")]
    Download { message: String },

    #[error("Failed to extract archive: {message}")]
    Extraction { message: String },

    // Process errors
    #[error("Failed to start server {}: {message}", path.display())]
    Spawn { path: PathBuf, message: String },

    // Socket errors
    #[error("Connection to {address} failed: {message}")]
    Connection { address: String, message: String },

    // Config errors
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    // File system errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LauncherError {
    /// Check if this error can only be fixed by changing the setup.
    ///
    /// Fatal errors abort startup; retrying the same call cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedPlatform { .. }
                | Self::MissingArchiveDescriptor { .. }
                | Self::Config { .. }
        )
    }

    /// Check if a later attempt of the whole flow may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Provisioning { .. }
                | Self::Download { .. }
                | Self::Extraction { .. }
                | Self::Spawn { .. }
                | Self::Connection { .. }
                | Self::Io(_)
        )
    }
}
