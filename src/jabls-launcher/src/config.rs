//! Launcher configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::catalog::{ArchiveCatalog, ArchiveDescriptor};
use crate::connection::Backoff;
use crate::downloader::types::{METADATA_FILE, SERVER_TREE_DIR};
use crate::error::{LauncherError, LauncherResult};

/// Environment variable overriding `client.host`.
pub const ENV_HOST: &str = "JABLS_HOST";
/// Environment variable overriding `client.port`.
pub const ENV_PORT: &str = "JABLS_PORT";
/// Environment variable overriding `scratchDir`.
pub const ENV_SCRATCH_DIR: &str = "JABLS_SCRATCH_DIR";

/// Where the editor-side client finds the server socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// User configuration for the launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherConfig {
    /// Server socket address
    #[serde(default)]
    pub client: ClientConfig,

    /// Timeout of the initial "is anything listening" probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// First reconnection delay
    #[serde(default = "default_backoff_start_ms")]
    pub backoff_start_ms: u64,

    /// Upper bound of the reconnection delay
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Per-user scratch location holding the server tree and its freshness record
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Archive descriptors replacing the built-in JabLS catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servers: Option<Vec<ArchiveDescriptor>>,
}

fn default_port() -> u16 {
    2087
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    500
}

fn default_backoff_start_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    3000
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("jabref")
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            probe_timeout_ms: default_probe_timeout_ms(),
            backoff_start_ms: default_backoff_start_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            scratch_dir: default_scratch_dir(),
            servers: None,
        }
    }
}

impl LauncherConfig {
    /// Standard config location (`<config dir>/jabls/launcher.json`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("jabls").join("launcher.json"))
    }

    /// Load config, apply environment overrides and validate.
    ///
    /// An explicit `path` must exist and parse. The standard location is
    /// optional, and a broken file there only produces a warning.
    pub fn load(path: Option<&Path>) -> LauncherResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path).unwrap_or_else(|e| {
                    warn!("Ignoring config {}: {}", path.display(), e);
                    Self::default()
                }),
                None => Self::default(),
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file.
    pub fn from_file(path: &Path) -> LauncherResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LauncherError::Config {
            message: format!("Cannot read {}: {}", path.display(), e),
        })?;

        let config = serde_json::from_str(&content).map_err(|e| LauncherError::Config {
            message: format!("Cannot parse {}: {}", path.display(), e),
        })?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `JABLS_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> LauncherResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST).filter(|h| !h.is_empty()) {
            self.client.host = host;
        }

        if let Some(port) = lookup(ENV_PORT) {
            self.client.port = port.trim().parse().map_err(|_| LauncherError::Config {
                message: format!("{} is not a valid port: {:?}", ENV_PORT, port),
            })?;
        }

        if let Some(dir) = lookup(ENV_SCRATCH_DIR).filter(|d| !d.is_empty()) {
            self.scratch_dir = PathBuf::from(dir);
        }

        Ok(())
    }

    /// Check value ranges.
    pub fn validate(&self) -> LauncherResult<()> {
        let invalid = |message: &str| {
            Err(LauncherError::Config {
                message: message.to_string(),
            })
        };

        if self.client.port == 0 {
            return invalid("client.port must be non-zero");
        }
        if self.client.host.is_empty() {
            return invalid("client.host must not be empty");
        }
        if self.probe_timeout_ms == 0 {
            return invalid("probeTimeoutMs must be greater than zero");
        }
        if self.backoff_start_ms == 0 {
            return invalid("backoffStartMs must be greater than zero");
        }
        if self.backoff_max_ms < self.backoff_start_ms {
            return invalid("backoffMaxMs must not be less than backoffStartMs");
        }
        Ok(())
    }

    /// Root of the extracted server tree.
    pub fn tree_root(&self) -> PathBuf {
        self.scratch_dir.join(SERVER_TREE_DIR)
    }

    /// Location of the freshness record.
    pub fn metadata_path(&self) -> PathBuf {
        self.scratch_dir.join(METADATA_FILE)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_start_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    /// Configured descriptors, or the built-in JabLS catalog.
    pub fn catalog(&self) -> LauncherResult<ArchiveCatalog> {
        match &self.servers {
            Some(servers) => ArchiveCatalog::new(servers.clone()),
            None => Ok(ArchiveCatalog::jabls()),
        }
    }
}
