//! Archive extraction for the server downloader.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use crate::catalog::ArchiveFormat;
use crate::error::{LauncherError, LauncherResult};

/// Validate that a path does not escape the destination directory.
/// Prevents ZIP slip / path traversal attacks.
pub fn validate_path_safe(dest_dir: &Path, entry_name: &str) -> Result<PathBuf, String> {
    // Reject paths with null bytes
    if entry_name.contains('\0') {
        return Err("Path contains null byte".to_string());
    }

    let entry_path = Path::new(entry_name);
    if entry_path.is_absolute() {
        return Err(format!("Absolute path not allowed: {}", entry_name));
    }

    for component in entry_path.components() {
        match component {
            Component::ParentDir => {
                return Err(format!(
                    "Path traversal (parent directory) not allowed: {}",
                    entry_name
                ));
            }
            Component::Prefix(_) => {
                return Err(format!("Path prefix not allowed: {}", entry_name));
            }
            Component::RootDir => {
                return Err(format!("Root directory not allowed: {}", entry_name));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(dest_dir.join(entry_path))
}

fn invalid_input(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, message)
}

fn create_parent_dirs(outpath: &Path, dest_dir: &Path, entry_name: &str) -> std::io::Result<()> {
    if let Some(parent) = outpath.parent() {
        if !parent.starts_with(dest_dir) {
            return Err(invalid_input(format!(
                "Parent directory would escape destination: {}",
                entry_name
            )));
        }
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Resolve `path` through the symlinks already on disk and require the
/// result to stay inside `root`, which must be canonical.
///
/// The longest existing prefix is canonicalized; the remaining components do
/// not exist yet and are appended as they are. A `..` among them is
/// rejected, since a later entry could turn its predecessor into a symlink.
fn resolve_within(root: &Path, path: &Path, entry_name: &str) -> std::io::Result<PathBuf> {
    let components: Vec<Component<'_>> = path.components().collect();

    let mut split = components.len();
    let mut resolved = loop {
        if split == 0 {
            return Err(invalid_input(format!("Cannot resolve path of {}", entry_name)));
        }
        let prefix: PathBuf = components[..split].iter().collect();
        match prefix.canonicalize() {
            Ok(resolved) => break resolved,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => split -= 1,
            Err(e) => return Err(e),
        }
    };

    for component in &components[split..] {
        match component {
            Component::Normal(name) => resolved.push(name),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid_input(format!(
                    "Unresolvable path component in {}",
                    entry_name
                )));
            }
        }
    }

    if !resolved.starts_with(root) {
        return Err(invalid_input(format!(
            "{} escapes destination ({})",
            entry_name,
            resolved.display()
        )));
    }
    Ok(resolved)
}

/// Resolve the directory an entry lands in, create it, and return the
/// physical path to write to.
fn prepare_entry_path(root: &Path, outpath: &Path, entry_name: &str) -> std::io::Result<PathBuf> {
    let file_name = outpath
        .file_name()
        .ok_or_else(|| invalid_input(format!("Entry without a file name: {}", entry_name)))?;
    let parent = outpath.parent().unwrap_or(root);

    let parent = resolve_within(root, parent, entry_name)?;
    std::fs::create_dir_all(&parent)?;
    let target = parent.join(file_name);

    // Never write through whatever an earlier entry left at this path
    if let Ok(existing) = std::fs::symlink_metadata(&target) {
        if existing.is_dir() {
            return Err(invalid_input(format!(
                "Entry would replace a directory: {}",
                entry_name
            )));
        }
        std::fs::remove_file(&target)?;
    }
    Ok(target)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Extract every entry of a ZIP archive into `dest_dir`.
pub fn unpack_zip<R: Read + std::io::Seek>(reader: R, dest_dir: &Path) -> std::io::Result<()> {
    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        let entry_name = file.name().to_string();
        let outpath = validate_path_safe(dest_dir, &entry_name).map_err(invalid_input)?;

        if file.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }

        create_parent_dirs(&outpath, dest_dir, &entry_name)?;
        let mut outfile = std::fs::File::create(&outpath)?;
        std::io::copy(&mut file, &mut outfile)?;
        drop(outfile);

        if let Some(mode) = file.unix_mode() {
            apply_mode(&outpath, mode)?;
        }
    }
    Ok(())
}

/// Extract a tar archive in strict mode.
///
/// Unlike a lenient unpack, nothing is skipped: an unsafe path, a path or
/// link that resolves outside `dest_dir` (following links created by earlier
/// entries) or an unsupported entry type aborts the whole extraction.
pub fn strict_tar_unpack<R: Read>(
    archive: &mut tar::Archive<R>,
    dest_dir: &Path,
) -> std::io::Result<()> {
    std::fs::create_dir_all(dest_dir)?;
    let root = dest_dir.canonicalize()?;

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let entry_path = entry.path()?.into_owned();
        let entry_name = entry_path.to_string_lossy().to_string();

        let outpath = validate_path_safe(&root, &entry_name).map_err(invalid_input)?;
        let entry_type = entry.header().entry_type();

        match entry_type {
            tar::EntryType::Directory => {
                let dir = resolve_within(&root, &outpath, &entry_name)?;
                std::fs::create_dir_all(&dir)?;
            }
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                let target = prepare_entry_path(&root, &outpath, &entry_name)?;
                let mut outfile = std::fs::File::create(&target)?;
                std::io::copy(&mut entry, &mut outfile)?;
                drop(outfile);

                let mode = entry.header().mode()?;
                apply_mode(&target, mode)?;
            }
            tar::EntryType::Symlink => {
                let link_target = entry
                    .link_name()?
                    .ok_or_else(|| invalid_input(format!("Symlink without target: {}", entry_name)))?
                    .into_owned();
                if link_target.has_root() {
                    return Err(invalid_input(format!(
                        "Absolute symlink target not allowed: {} -> {}",
                        entry_name,
                        link_target.display()
                    )));
                }

                let link = prepare_entry_path(&root, &outpath, &entry_name)?;
                let link_dir = link.parent().unwrap_or(&root);
                resolve_within(&root, &link_dir.join(&link_target), &entry_name)?;
                create_symlink(&link_target, &link)?;
            }
            tar::EntryType::Link => {
                let source = entry
                    .link_name()?
                    .ok_or_else(|| invalid_input(format!("Hard link without target: {}", entry_name)))?
                    .into_owned();
                let source = validate_path_safe(&root, &source.to_string_lossy())
                    .map_err(invalid_input)?;
                let source = resolve_within(&root, &source, &entry_name)?;

                let link = prepare_entry_path(&root, &outpath, &entry_name)?;
                std::fs::hard_link(&source, &link)?;
            }
            // Metadata records consumed by the tar reader itself
            tar::EntryType::XGlobalHeader
            | tar::EntryType::XHeader
            | tar::EntryType::GNULongName
            | tar::EntryType::GNULongLink => {}
            other => {
                return Err(invalid_input(format!(
                    "Unsupported entry type {:?}: {}",
                    other, entry_name
                )));
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Extract `archive_path` into `dest_dir` according to `format`.
pub async fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
    format: ArchiveFormat,
) -> LauncherResult<()> {
    let archive_path = archive_path.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive_path)?;
        match format {
            ArchiveFormat::Zip => unpack_zip(std::io::BufReader::new(file), &dest_dir),
            ArchiveFormat::TarGz => {
                let gz = flate2::read::GzDecoder::new(std::io::BufReader::new(file));
                let mut archive = tar::Archive::new(gz);
                strict_tar_unpack(&mut archive, &dest_dir)
            }
        }
    })
    .await
    .map_err(|e| LauncherError::Extraction {
        message: format!("Join error: {}", e),
    })?
    .map_err(|e| LauncherError::Extraction {
        message: e.to_string(),
    })
}
