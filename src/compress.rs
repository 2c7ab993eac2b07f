//! src/compress.rs
//! Release-archive extraction with an entry filter.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};
use tar::Archive;

use crate::error::PackError;

/// Resource bundle every Neutralino release ships next to its binaries.
pub const RESOURCES_BUNDLE: &str = "resources.neu";

/// Which release entries end up in the AppDir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseFilter {
    /// Everything except Windows executables and other platforms' binaries.
    AllButForeign { app_id: String },
    /// Exactly the architecture-specific binary and the resource bundle.
    BinaryAndResources { binary: String },
}

impl ReleaseFilter {
    /// `entry` is the archive-relative path with `/` separators.
    pub fn accepts(&self, entry: &str) -> bool {
        match self {
            ReleaseFilter::AllButForeign { app_id } => {
                let name = entry.rsplit('/').next().unwrap_or(entry);
                !name.to_ascii_lowercase().ends_with(".exe")
                    && !name.starts_with(&format!("{app_id}-mac_"))
                    && !name.starts_with(&format!("{app_id}-win_"))
            }
            ReleaseFilter::BinaryAndResources { binary } => {
                entry == binary || entry == RESOURCES_BUNDLE
            }
        }
    }
}

/// Extracts the entries of `archive` accepted by `filter` into `dest`.
///
/// `.tar.gz`/`.tgz` archives go through `tar`; anything else is read as zip.
/// Returns the paths written, in archive order. An archive that yields no files
/// is an error.
pub fn extract_archive<F>(archive: &Path, dest: &Path, filter: F) -> Result<Vec<PathBuf>, PackError>
where
    F: Fn(&str) -> bool,
{
    if !archive.is_file() {
        return Err(PackError::extract(archive, "release archive not found"));
    }
    fs::create_dir_all(dest).map_err(|e| PackError::extract(archive, e))?;

    let name = archive.to_string_lossy().to_ascii_lowercase();
    let written = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_gz(archive, dest, &filter)
    } else {
        extract_zip(archive, dest, &filter)
    }
    .map_err(|reason| PackError::extract(archive, reason))?;

    if written.is_empty() {
        return Err(PackError::extract(archive, "no entries matched the release filter"));
    }
    tracing::debug!(count = written.len(), dest = %dest.display(), "extracted release archive");
    Ok(written)
}

fn extract_zip(archive: &Path, dest: &Path, filter: &dyn Fn(&str) -> bool) -> Result<Vec<PathBuf>, String> {
    let file = File::open(archive).map_err(|e| e.to_string())?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| e.to_string())?;
    let mut written = Vec::new();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| e.to_string())?;
        if entry.is_dir() || !filter(entry.name()) {
            continue;
        }
        let relative = entry
            .enclosed_name()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| format!("unsafe entry path '{}'", entry.name()))?;
        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let mut out = File::create(&target).map_err(|e| format!("{}: {}", target.display(), e))?;
        io::copy(&mut entry, &mut out).map_err(|e| format!("{}: {}", target.display(), e))?;
        written.push(target);
    }
    Ok(written)
}

fn extract_tar_gz(archive: &Path, dest: &Path, filter: &dyn Fn(&str) -> bool) -> Result<Vec<PathBuf>, String> {
    let file = File::open(archive).map_err(|e| e.to_string())?;
    let reader = BufReader::new(file);
    let decompressor = GzDecoder::new(reader);
    let mut tarball = Archive::new(decompressor);
    let mut written = Vec::new();

    for entry in tarball.entries().map_err(|e| e.to_string())? {
        let mut entry = entry.map_err(|e| e.to_string())?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let relative = entry.path().map_err(|e| e.to_string())?.into_owned();
        let name = relative.to_string_lossy().trim_start_matches("./").to_string();
        if !filter(&name) {
            continue;
        }
        // Prevent directory traversal attacks.
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(format!("unsafe entry path '{}'", relative.display()));
        }
        if !entry.unpack_in(dest).map_err(|e| e.to_string())? {
            return Err(format!("unsafe entry path '{}'", relative.display()));
        }
        written.push(dest.join(&relative));
    }
    Ok(written)
}
