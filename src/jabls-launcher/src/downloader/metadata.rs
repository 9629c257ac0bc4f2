//! Freshness record persistence.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::LauncherResult;

/// Last-modified marker of the remote archive at the time of the last
/// successful install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl FreshnessRecord {
    pub fn new(last_modified: impl Into<String>) -> Self {
        Self {
            last_modified: Some(last_modified.into()),
        }
    }

    /// Decide whether the installed server must be replaced.
    ///
    /// A missing local record always forces a download. Otherwise only two
    /// present and differing markers do; a missing remote marker cannot prove
    /// the install stale.
    pub fn needs_redownload(local: Option<&FreshnessRecord>, remote: &FreshnessRecord) -> bool {
        let Some(local) = local else {
            return true;
        };

        match (&local.last_modified, &remote.last_modified) {
            (Some(local), Some(remote)) => local != remote,
            _ => false,
        }
    }
}

/// Reads and writes the freshness record file.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored record.
    ///
    /// Missing, unreadable and corrupt files all read as "no record".
    pub async fn read(&self) -> Option<FreshnessRecord> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                debug!("No freshness record at {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    "Ignoring corrupt freshness record {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Persist a record, replacing the previous one.
    pub async fn write(&self, record: &FreshnessRecord) -> LauncherResult<()> {
        let content = serde_json::to_string_pretty(record)?;
        atomic_write(&self.path, content.as_bytes()).await?;
        Ok(())
    }
}

/// Write through a temp sibling and rename it over the destination.
async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "Cannot determine parent directory",
        )
    })?;

    fs::create_dir_all(parent).await?;

    // Same directory so the rename stays on one filesystem
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    fs::write(&temp_path, content).await?;

    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&temp_path)
        .await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = replace_file(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(())
}

#[cfg(not(windows))]
async fn replace_file(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::rename(from, to).await
}

#[cfg(windows)]
async fn replace_file(from: &Path, to: &Path) -> std::io::Result<()> {
    // Windows may need target removed first
    let mut retries = 3;
    loop {
        match fs::rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(_) if retries > 0 => {
                retries -= 1;
                let _ = fs::remove_file(to).await;
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
