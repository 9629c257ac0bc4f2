//! JabLS launcher - locate, obtain, run and talk to the JabLS sidecar server.
//!
//! Provides:
//! - Host platform detection
//! - Per-platform archive catalog lookup
//! - Freshness-checked download and extraction of the server archive
//! - Supervision of the server child process
//! - Probe and exponential-backoff connection to the server socket
//!
//! # Example
//!
//! ```rust,ignore
//! use jabls_launcher::{ArchiveCatalog, LauncherConfig, LauncherSession};
//!
//! let session = LauncherSession::new(LauncherConfig::load(None)?, ArchiveCatalog::jabls())?;
//!
//! // Provision and spawn the server if nothing is listening yet
//! let stream = session.ensure_server_connection().await?;
//! let (reader, writer) = stream.into_split();
//!
//! // ... hand reader/writer to the protocol client ...
//!
//! session.stop_server_process().await;
//! ```

pub mod catalog;
pub mod config;
pub mod connection;
pub mod downloader;
pub mod error;
pub mod platform;
pub mod session;
pub mod supervisor;

pub use catalog::{ArchiveCatalog, ArchiveDescriptor, ArchiveFormat};
pub use config::{ClientConfig, LauncherConfig};
pub use connection::{Backoff, ConnectionManager, ConnectionState, ConnectionStream};
pub use downloader::{
    BinaryProvisioner, FreshnessRecord, MetadataStore, ProgressCallback, ProvisionOutcome,
};
pub use error::{LauncherError, LauncherResult};
pub use platform::PlatformId;
pub use session::LauncherSession;
pub use supervisor::ProcessSupervisor;

/// Current version of the launcher (set at compile time)
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");
