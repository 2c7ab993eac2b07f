// src/tool/mod.rs
// External image builders: which one, where it lives, where it comes from.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::appdir::StagingLayout;
use crate::compress::ReleaseFilter;
use crate::context::BuildContext;

pub mod builder;
pub mod download;

/// Which third-party AppImage builder the run drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderKind {
    /// `linuxdeploy --appdir <dir> --output appimage`, configured through `ARCH`/`OUTPUT`.
    LinuxDeploy,
    /// `appimagetool <dir> <image>`, no extra environment.
    AppImageTool,
}

impl FromStr for BuilderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linuxdeploy" => Ok(BuilderKind::LinuxDeploy),
            "appimagetool" => Ok(BuilderKind::AppImageTool),
            other => Err(format!(
                "unknown builder '{other}' (expected linuxdeploy or appimagetool)"
            )),
        }
    }
}

impl fmt::Display for BuilderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl BuilderKind {
    pub fn name(&self) -> &'static str {
        match self {
            BuilderKind::LinuxDeploy => "linuxdeploy",
            BuilderKind::AppImageTool => "appimagetool",
        }
    }

    fn default_url(&self, arch: &str) -> String {
        match self {
            BuilderKind::LinuxDeploy => format!(
                "https://github.com/linuxdeploy/linuxdeploy/releases/download/continuous/linuxdeploy-{arch}.AppImage"
            ),
            BuilderKind::AppImageTool => format!(
                "https://github.com/AppImage/appimagetool/releases/download/continuous/appimagetool-{arch}.AppImage"
            ),
        }
    }

    /// Archive entries this builder needs in `usr/bin`. linuxdeploy bundles
    /// whatever it finds, so only foreign-platform executables are dropped;
    /// appimagetool packs the tree verbatim, so it gets exactly the binary
    /// and the resource bundle.
    pub fn release_filter(&self, ctx: &BuildContext) -> ReleaseFilter {
        match self {
            BuilderKind::LinuxDeploy => ReleaseFilter::AllButForeign {
                app_id: ctx.app_id.clone(),
            },
            BuilderKind::AppImageTool => ReleaseFilter::BinaryAndResources {
                binary: ctx.binary_name(),
            },
        }
    }

    /// Stderr lines shorter than this are banner noise and not forwarded.
    pub fn stderr_noise_threshold(&self) -> usize {
        match self {
            BuilderKind::LinuxDeploy => 0,
            BuilderKind::AppImageTool => 20,
        }
    }
}

/// A downloadable executable. Presence on disk is the only state tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTool {
    pub kind: BuilderKind,
    pub path: PathBuf,
    pub url: String,
}

impl ExternalTool {
    /// The builder for `ctx`'s architecture, stored in the project root.
    pub fn for_context(kind: BuilderKind, ctx: &BuildContext, url_override: Option<&str>) -> Self {
        let arch = ctx.arch.as_str();
        ExternalTool {
            kind,
            path: ctx.project_root.join(format!("{}-{arch}.AppImage", kind.name())),
            url: url_override
                .map(str::to_string)
                .unwrap_or_else(|| kind.default_url(arch)),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.kind.name().to_string())
    }

    pub fn is_present(&self) -> bool {
        self.path.is_file()
    }

    /// Command line and environment for building `layout` into `ctx.image_path()`.
    pub fn invocation(&self, ctx: &BuildContext, layout: &StagingLayout) -> builder::Invocation {
        let image = ctx.image_path();
        let (args, envs): (Vec<OsString>, Vec<(String, OsString)>) = match self.kind {
            BuilderKind::LinuxDeploy => (
                vec![
                    "--appdir".into(),
                    layout.root.clone().into_os_string(),
                    "--output".into(),
                    "appimage".into(),
                ],
                vec![
                    ("ARCH".to_string(), ctx.arch.as_str().into()),
                    ("OUTPUT".to_string(), image.into_os_string()),
                ],
            ),
            BuilderKind::AppImageTool => (
                vec![layout.root.clone().into_os_string(), image.into_os_string()],
                Vec::new(),
            ),
        };

        builder::Invocation {
            program: self.path.clone(),
            args,
            envs,
            current_dir: ctx.project_root.clone(),
            stderr_noise_threshold: self.kind.stderr_noise_threshold(),
        }
    }
}

/// Removes the tool file if present. Returns whether anything was deleted.
pub fn remove_tool(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
