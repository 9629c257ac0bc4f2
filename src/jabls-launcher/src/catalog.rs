//! Per-platform server archive descriptors.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{LauncherError, LauncherResult};
use crate::platform::PlatformId;

/// Base URL of the JabLS portable builds.
pub const JABLS_BUILDS_URL: &str = "https://builds.jabref.org/main";

/// Archive container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArchiveFormat {
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "tar.gz")]
    TarGz,
}

impl ArchiveFormat {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }
}

/// How to obtain and run the server for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveDescriptor {
    /// Platform this archive is built for.
    pub platform: PlatformId,
    /// Where the archive is downloaded from.
    pub download_url: String,
    /// Container format of the archive.
    pub archive_format: ArchiveFormat,
    /// Directory inside the extracted tree the server runs in.
    #[serde(default)]
    pub relative_working_dir: PathBuf,
    /// Executable file name inside the working directory.
    pub executable_name: String,
}

impl ArchiveDescriptor {
    /// Absolute working directory for a given tree root.
    pub fn working_dir(&self, tree_root: &Path) -> PathBuf {
        tree_root.join(&self.relative_working_dir)
    }

    /// Absolute executable path for a given tree root.
    pub fn executable_path(&self, tree_root: &Path) -> PathBuf {
        self.working_dir(tree_root).join(&self.executable_name)
    }
}

/// Immutable set of descriptors, at most one per platform.
#[derive(Debug, Clone)]
pub struct ArchiveCatalog {
    descriptors: Vec<ArchiveDescriptor>,
}

impl ArchiveCatalog {
    /// Build a catalog, rejecting duplicate platforms.
    pub fn new(descriptors: Vec<ArchiveDescriptor>) -> LauncherResult<Self> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.platform) {
                return Err(LauncherError::Config {
                    message: format!(
                        "More than one archive descriptor for platform \"{}\"",
                        descriptor.platform
                    ),
                });
            }
        }
        Ok(Self { descriptors })
    }

    /// The JabLS portable builds.
    pub fn jabls() -> Self {
        Self {
            descriptors: vec![
                jabls_portable(PlatformId::Windows, ArchiveFormat::Zip, "jabls.exe"),
                jabls_portable(PlatformId::MacosX64, ArchiveFormat::TarGz, "jabls"),
                jabls_portable(PlatformId::MacosArm64, ArchiveFormat::TarGz, "jabls"),
                jabls_portable(PlatformId::LinuxX64, ArchiveFormat::TarGz, "jabls"),
                jabls_portable(PlatformId::LinuxArm64, ArchiveFormat::TarGz, "jabls"),
            ],
        }
    }

    /// Find the descriptor for a platform.
    pub fn select(&self, platform: PlatformId) -> LauncherResult<&ArchiveDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.platform == platform)
            .ok_or(LauncherError::MissingArchiveDescriptor { platform })
    }

    /// All descriptors in catalog order.
    pub fn descriptors(&self) -> &[ArchiveDescriptor] {
        &self.descriptors
    }
}

fn jabls_portable(
    platform: PlatformId,
    archive_format: ArchiveFormat,
    executable_name: &str,
) -> ArchiveDescriptor {
    ArchiveDescriptor {
        platform,
        download_url: format!(
            "{}/jabls-portable_{}.{}",
            JABLS_BUILDS_URL,
            platform,
            archive_format.extension()
        ),
        archive_format,
        relative_working_dir: PathBuf::from("jabls").join("bin"),
        executable_name: executable_name.to_string(),
    }
}
