//! src/context.rs
//! Per-run build context, captured once at startup and read-only afterwards.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::config::ProjectConfig;
use crate::error::PackError;

/// Host machine name as reported by `uname -m` (e.g. `x86_64`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostArch(String);

impl HostArch {
    pub fn new(machine: impl Into<String>) -> Self {
        HostArch(machine.into())
    }

    /// Reads the running kernel's machine name.
    pub fn detect() -> Self {
        match nix::sys::utsname::uname() {
            Ok(uts) => HostArch(uts.machine().to_string_lossy().into_owned()),
            Err(e) => {
                tracing::warn!("uname failed ({e}), falling back to the compile-time arch");
                HostArch(std::env::consts::ARCH.to_string())
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Suffix Neutralino gives its Linux binaries for this machine.
    pub fn neutralino_suffix(&self) -> Option<&'static str> {
        match self.0.as_str() {
            "x86_64" | "amd64" => Some("x64"),
            "aarch64" | "arm64" => Some("arm64"),
            "armv7l" | "armv7" | "armhf" | "arm" => Some("armhf"),
            _ => None,
        }
    }
}

impl fmt::Display for HostArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable description of one packaging run.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub project_root: PathBuf,
    pub app_id: String,
    pub appdir: PathBuf,
    pub archive: PathBuf,
    pub icon: Option<PathBuf>,
    pub arch: HostArch,
}

impl BuildContext {
    /// Derives every path from the project root using the Neutralino conventions.
    pub fn new(
        project_root: &Path,
        icon: Option<PathBuf>,
        arch: HostArch,
    ) -> Result<Self, PackError> {
        let app_id = project_root
            .file_name()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                PackError::Configuration(format!(
                    "cannot derive an application name from {}",
                    project_root.display()
                ))
            })?
            .to_string();

        if arch.neutralino_suffix().is_none() {
            return Err(PackError::Configuration(format!(
                "unsupported host architecture '{arch}'"
            )));
        }

        Ok(BuildContext {
            appdir: project_root.join(format!("{app_id}.AppDir")),
            archive: project_root.join("dist").join(format!("{app_id}-release.zip")),
            icon: icon.map(|p| resolve_project_path(project_root, &p)),
            project_root: project_root.to_path_buf(),
            app_id,
            arch,
        })
    }

    /// Builds the context from a loaded project configuration.
    pub fn from_project(
        project_root: &Path,
        config: &ProjectConfig,
        arch: HostArch,
    ) -> Result<Self, PackError> {
        Self::new(project_root, config.icon.clone(), arch)
    }

    pub fn with_archive(mut self, archive: PathBuf) -> Self {
        self.archive = resolve_project_path(&self.project_root, &archive);
        self
    }

    /// Name of the Linux executable inside the release archive, e.g. `myapp-linux_x64`.
    pub fn binary_name(&self) -> String {
        let suffix = self.arch.neutralino_suffix().unwrap_or("x64");
        format!("{}-linux_{}", self.app_id, suffix)
    }

    /// Final image written next to the project, e.g. `myapp-x86_64.AppImage`.
    pub fn image_path(&self) -> PathBuf {
        self.project_root
            .join(format!("{}-{}.AppImage", self.app_id, self.arch))
    }
}

// Neutralino writes resource paths project-absolute ("/resources/icons/appIcon.png").
fn resolve_project_path(project_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        if path.exists() {
            return path.to_path_buf();
        }
        let relative: PathBuf = path
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        return project_root.join(relative);
    }
    project_root.join(path)
}
