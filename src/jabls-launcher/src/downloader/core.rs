//! Binary provisioner: keeps the installed server tree in sync with the
//! remote archive.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use super::archive::extract_archive;
use super::http::{create_http_client, download_file, fetch_remote_metadata};
use super::metadata::{FreshnessRecord, MetadataStore};
use super::types::{ARCHIVE_FILE_STEM, ProgressCallback, ProvisionOutcome};
use crate::catalog::ArchiveDescriptor;
use crate::error::{LauncherError, LauncherResult};

/// Downloads, extracts and records the server archive.
///
/// Exclusively owns the server tree and the freshness record: the tree is
/// always replaced wholesale, and the record is only written once a
/// download, extraction and permission fix-up have all succeeded.
pub struct BinaryProvisioner {
    /// Root of the extracted server tree.
    tree_root: PathBuf,
    /// Freshness record of the current install.
    metadata: MetadataStore,
    /// HTTP client for metadata and downloads.
    client: reqwest::Client,
    /// Optional download progress reporting.
    progress: Option<ProgressCallback>,
}

impl BinaryProvisioner {
    /// Create a provisioner for a tree root and a metadata file.
    pub fn new(
        tree_root: impl Into<PathBuf>,
        metadata_path: impl Into<PathBuf>,
    ) -> LauncherResult<Self> {
        let client = create_http_client().map_err(|message| LauncherError::Config { message })?;

        Ok(Self {
            tree_root: tree_root.into(),
            metadata: MetadataStore::new(metadata_path),
            client,
            progress: None,
        })
    }

    /// Report download progress through `progress`.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Root directory of the extracted server.
    pub fn tree_root(&self) -> &Path {
        &self.tree_root
    }

    /// Path of the freshness record file.
    pub fn metadata_path(&self) -> &Path {
        self.metadata.path()
    }

    /// Make sure the installed server matches the remote archive.
    pub async fn ensure_latest(
        &self,
        descriptor: &ArchiveDescriptor,
    ) -> LauncherResult<ProvisionOutcome> {
        let remote = fetch_remote_metadata(&self.client, &descriptor.download_url).await?;
        let local = self.metadata.read().await;

        if !FreshnessRecord::needs_redownload(local.as_ref(), &remote) {
            debug!(
                "Server at {} is up to date (last-modified {:?})",
                self.tree_root.display(),
                remote.last_modified
            );
            // TODO: verify the executable still exists and re-download when it does not
            fs::create_dir_all(&self.tree_root).await?;
            return Ok(ProvisionOutcome::UpToDate);
        }

        info!(
            "Downloading server for {} from {}...",
            descriptor.platform, descriptor.download_url
        );

        let archive_path = self.download_archive(descriptor).await?;

        let extracted =
            extract_archive(&archive_path, &self.tree_root, descriptor.archive_format).await;
        let _ = fs::remove_file(&archive_path).await;
        extracted?;

        let executable = descriptor.executable_path(&self.tree_root);
        ensure_executable(&executable).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LauncherError::Extraction {
                    message: format!("Archive does not contain {}", executable.display()),
                }
            } else {
                LauncherError::Io(e)
            }
        })?;

        self.metadata.write(&remote).await?;

        info!("Installed server at {}", executable.display());
        Ok(ProvisionOutcome::Downloaded {
            last_modified: remote.last_modified,
        })
    }

    /// Recreate the tree root and stream the archive into it.
    async fn download_archive(&self, descriptor: &ArchiveDescriptor) -> LauncherResult<PathBuf> {
        match fs::remove_dir_all(&self.tree_root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.tree_root).await?;

        let archive_path = self.tree_root.join(format!(
            "{}.{}",
            ARCHIVE_FILE_STEM,
            descriptor.archive_format.extension()
        ));

        match fs::remove_file(&archive_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = download_file(
            &self.client,
            &descriptor.download_url,
            &archive_path,
            self.progress.as_ref(),
        )
        .await
        {
            let _ = fs::remove_file(&archive_path).await;
            return Err(e);
        }

        Ok(archive_path)
    }
}

/// Mark a file as executable (0o755). Only checks existence on Windows.
#[cfg(unix)]
async fn ensure_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path).await?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn ensure_executable(path: &Path) -> std::io::Result<()> {
    fs::metadata(path).await.map(|_| ())
}
