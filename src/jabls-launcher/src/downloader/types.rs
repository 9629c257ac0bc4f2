//! Types and constants for the server downloader.

/// Directory under the scratch location holding the extracted server.
pub const SERVER_TREE_DIR: &str = "server-bin";

/// File under the scratch location holding the freshness record.
pub const METADATA_FILE: &str = "jabls-download-meta.json";

/// Stem of the temporary archive file written inside the server tree.
pub const ARCHIVE_FILE_STEM: &str = "jabls-portable";

/// Progress callback type for download progress reporting.
///
/// Called with (downloaded bytes, total bytes); total is 0 when the server
/// does not announce a content length.
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Result of a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// A fresh archive was downloaded and installed.
    Downloaded {
        /// Remote last-modified marker recorded for the install.
        last_modified: Option<String>,
    },
    /// The installed server matches the remote marker.
    UpToDate,
}

impl ProvisionOutcome {
    /// Whether a download took place.
    pub fn downloaded(&self) -> bool {
        matches!(self, Self::Downloaded { .. })
    }
}
