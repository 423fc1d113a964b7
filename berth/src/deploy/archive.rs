//! Uploaded archive extraction

use std::fs;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::EntryType;
use tracing::debug;

use crate::errors::DeployError;

/// Result of unpacking an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extracted {
    pub file_count: usize,
}

/// Unpack a `.tar.gz` into `dest` on a blocking thread.
///
/// Absolute paths, `..` components, links and special files are refused.
/// When everything sits under one top-level directory, that directory
/// becomes the root of `dest`.
pub async fn extract(archive: &Path, dest: &Path) -> Result<Extracted, DeployError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest))
        .await
        .map_err(|e| DeployError::Internal(format!("Extraction task failed: {}", e)))?
}

fn checked_path(path: &Path) -> Result<PathBuf, DeployError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(DeployError::Archive(format!(
                    "Entry escapes the archive root: {}",
                    path.display()
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(DeployError::Archive(format!(
                    "Absolute path in archive: {}",
                    path.display()
                )))
            }
        }
    }
    Ok(clean)
}

fn extract_blocking(archive: &Path, dest: &Path) -> Result<Extracted, DeployError> {
    let file = fs::File::open(archive).map_err(|e| {
        DeployError::Archive(format!("Cannot open {}: {}", archive.display(), e))
    })?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    fs::create_dir_all(dest)?;

    let mut file_count = 0;
    let entries = tar
        .entries()
        .map_err(|e| DeployError::Archive(format!("Unreadable archive: {}", e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| DeployError::Archive(format!("Corrupt archive entry: {}", e)))?;
        let raw = entry
            .path()
            .map_err(|e| DeployError::Archive(format!("Invalid entry path: {}", e)))?
            .into_owned();
        let relative = checked_path(&raw)?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = dest.join(&relative);
        match entry.header().entry_type() {
            EntryType::Directory => fs::create_dir_all(&target)?,
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                entry.unpack(&target).map_err(|e| {
                    DeployError::Archive(format!("Failed to unpack {}: {}", raw.display(), e))
                })?;
                file_count += 1;
            }
            // pax/gnu metadata records
            EntryType::XGlobalHeader | EntryType::XHeader | EntryType::GNULongName => {}
            other => {
                return Err(DeployError::Archive(format!(
                    "Unsupported entry type {:?}: {}",
                    other,
                    raw.display()
                )))
            }
        }
    }

    flatten_single_root(dest)?;
    debug!("Extracted {} files into {}", file_count, dest.display());
    Ok(Extracted { file_count })
}

/// Hoist the contents of a lone top-level directory into `dest`
fn flatten_single_root(dest: &Path) -> Result<(), DeployError> {
    let entries: Vec<fs::DirEntry> = fs::read_dir(dest)?.collect::<Result<_, _>>()?;
    if entries.len() != 1 || !entries[0].file_type()?.is_dir() {
        return Ok(());
    }

    let inner = entries[0].path();
    // rename out of the way first, a child may share the wrapper's name
    let hoisted = dest.join(".berth-extract-root");
    fs::rename(&inner, &hoisted)?;
    for child in fs::read_dir(&hoisted)? {
        let child = child?;
        fs::rename(child.path(), dest.join(child.file_name()))?;
    }
    fs::remove_dir(&hoisted)?;
    Ok(())
}
