//! Launcher session: one owner for everything a host integration needs
//! between activation and deactivation.

use tokio::sync::watch;
use tracing::info;

use crate::catalog::{ArchiveCatalog, ArchiveDescriptor};
use crate::config::LauncherConfig;
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStream};
use crate::downloader::{BinaryProvisioner, ProgressCallback, ProvisionOutcome};
use crate::error::LauncherResult;
use crate::platform::PlatformId;
use crate::supervisor::ProcessSupervisor;

/// Owns the provisioner, supervisor and connection manager of one host.
///
/// Construction resolves the platform and picks the archive descriptor, so
/// an unsupported platform or an incomplete catalog fails here, before any
/// network or filesystem access.
pub struct LauncherSession {
    config: LauncherConfig,
    platform: PlatformId,
    manager: ConnectionManager,
}

impl LauncherSession {
    /// Create a session for the host platform.
    pub fn new(config: LauncherConfig, catalog: ArchiveCatalog) -> LauncherResult<Self> {
        let platform = PlatformId::resolve()?;
        Self::for_platform(config, &catalog, platform)
    }

    /// Create a session for an explicit platform.
    pub fn for_platform(
        config: LauncherConfig,
        catalog: &ArchiveCatalog,
        platform: PlatformId,
    ) -> LauncherResult<Self> {
        let descriptor = catalog.select(platform)?.clone();
        let provisioner = BinaryProvisioner::new(config.tree_root(), config.metadata_path())?;

        let manager = ConnectionManager::new(descriptor, provisioner, ProcessSupervisor::new())
            .with_backoff(config.backoff())
            .with_probe_timeout(config.probe_timeout());

        info!("JabLS launcher ready for {}", platform);

        Ok(Self {
            config,
            platform,
            manager,
        })
    }

    /// Report download progress while provisioning.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.manager = self.manager.with_progress(progress);
        self
    }

    /// Return a live stream to the server at the configured address,
    /// provisioning and spawning it first when nothing is listening.
    pub async fn ensure_server_connection(&self) -> LauncherResult<ConnectionStream> {
        let client = &self.config.client;
        self.manager.ensure_connection(&client.host, client.port).await
    }

    /// Bring the installed server up to date without starting it.
    pub async fn prepare_server_binaries(&self) -> LauncherResult<ProvisionOutcome> {
        self.manager
            .provisioner()
            .ensure_latest(self.manager.descriptor())
            .await
    }

    /// Stop the server started by this session, waiting for it to exit.
    pub async fn stop_server_process(&self) {
        self.manager.stop().await;
    }

    /// Whether this session has a live server child.
    pub async fn is_server_running(&self) -> bool {
        self.manager.supervisor().is_running().await
    }

    /// OS process id of the server child, if one is running.
    pub async fn server_pid(&self) -> Option<u32> {
        self.manager.supervisor().pid().await
    }

    pub fn platform(&self) -> PlatformId {
        self.platform
    }

    pub fn descriptor(&self) -> &ArchiveDescriptor {
        self.manager.descriptor()
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Current phase of the connection cycle.
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LauncherError;
    use tempfile::TempDir;

    fn config(scratch: &TempDir) -> LauncherConfig {
        LauncherConfig {
            scratch_dir: scratch.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_descriptor_fails_before_io() {
        let scratch = TempDir::new().unwrap();
        let catalog = ArchiveCatalog::new(Vec::new()).unwrap();

        let err = LauncherSession::for_platform(config(&scratch), &catalog, PlatformId::LinuxArm64)
            .err()
            .unwrap();

        assert!(matches!(
            err,
            LauncherError::MissingArchiveDescriptor {
                platform: PlatformId::LinuxArm64
            }
        ));
        assert!(err.is_fatal());
        assert!(!config(&scratch).tree_root().exists());
        assert!(!config(&scratch).metadata_path().exists());
    }

    #[test]
    fn test_selects_platform_descriptor() {
        let scratch = TempDir::new().unwrap();
        let session = LauncherSession::for_platform(
            config(&scratch),
            &ArchiveCatalog::jabls(),
            PlatformId::Windows,
        )
        .unwrap();

        assert_eq!(session.platform(), PlatformId::Windows);
        assert_eq!(session.descriptor().executable_name, "jabls.exe");
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_stop_without_server() {
        let scratch = TempDir::new().unwrap();
        let session = LauncherSession::for_platform(
            config(&scratch),
            &ArchiveCatalog::jabls(),
            PlatformId::LinuxX64,
        )
        .unwrap();

        assert!(!session.is_server_running().await);
        session.stop_server_process().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
