// src/appdir/mod.rs
// The staging tree (`<app>.AppDir`) mirroring the AppImage's on-disk layout.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::context::BuildContext;
use crate::error::{IoContext, PackError};

pub mod desktop;

/// Paths inside the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    pub root: PathBuf,
    pub bin_dir: PathBuf,
    pub app_id: String,
    /// Architecture-specific executable inside `bin_dir`.
    pub binary_name: String,
}

impl StagingLayout {
    /// Layout for `ctx` without touching the filesystem.
    pub fn for_context(ctx: &BuildContext) -> Self {
        StagingLayout {
            bin_dir: ctx.appdir.join("usr").join("bin"),
            root: ctx.appdir.clone(),
            app_id: ctx.app_id.clone(),
            binary_name: ctx.binary_name(),
        }
    }

    pub fn desktop_path(&self) -> PathBuf {
        self.root.join(format!("{}.desktop", self.app_id))
    }

    pub fn apprun_path(&self) -> PathBuf {
        self.root.join("AppRun")
    }

    pub fn binary_path(&self) -> PathBuf {
        self.bin_dir.join(&self.binary_name)
    }

    /// File count and total size of the staged tree.
    pub fn summary(&self) -> (usize, u64) {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .fold((0, 0), |(n, size), e| {
                (n + 1, size + e.metadata().map(|m| m.len()).unwrap_or(0))
            })
    }
}

/// Creates the staging root and its `usr/bin` subdirectory.
///
/// The root must not exist yet; a leftover from an earlier run has to be
/// removed first. Failures are reported, never rolled back here.
pub fn create_layout(ctx: &BuildContext) -> Result<StagingLayout, PackError> {
    let layout = StagingLayout::for_context(ctx);
    fs::create_dir(&layout.root)
        .io_context(|| format!("creating {}", layout.root.display()))?;
    fs::create_dir_all(&layout.bin_dir)
        .io_context(|| format!("creating {}", layout.bin_dir.display()))?;
    Ok(layout)
}

/// Recursively removes a staging directory. Returns whether anything was removed;
/// an absent directory is not an error.
pub fn remove_layout(root: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(root) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HostArch;

    fn ctx(root: &Path) -> BuildContext {
        let project = root.join("myapp");
        fs::create_dir_all(&project).unwrap();
        BuildContext::new(&project, None, HostArch::new("x86_64")).unwrap()
    }

    #[test]
    fn creates_root_and_bin_dir() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());

        let layout = create_layout(&c).unwrap();

        assert!(layout.bin_dir.is_dir());
        assert_eq!(layout.bin_dir, c.appdir.join("usr/bin"));
        assert_eq!(layout.desktop_path(), c.appdir.join("myapp.desktop"));
        assert_eq!(layout.binary_path(), c.appdir.join("usr/bin/myapp-linux_x64"));
        assert_eq!(layout.summary(), (0, 0));
    }

    #[test]
    fn existing_root_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        fs::create_dir(&c.appdir).unwrap();

        let err = create_layout(&c).unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let c = ctx(dir.path());
        let layout = create_layout(&c).unwrap();
        fs::write(layout.bin_dir.join("stale"), b"x").unwrap();

        assert!(remove_layout(&layout.root).unwrap());
        assert!(!layout.root.exists());
        assert!(!remove_layout(&layout.root).unwrap());
    }
}
