//! src/appdir/desktop.rs
//! Launcher metadata: the `.desktop` entry, the `AppRun` entry point and the icon.

use std::fs;
use std::path::{Path, PathBuf};

use super::StagingLayout;
use crate::error::{IoContext, PackError};
use crate::perms;

/// Icon name used when the project configures none.
pub const DEFAULT_ICON_NAME: &str = "neu-appimage";
const DEFAULT_ICON_SVG: &str = include_str!("../../assets/neu-appimage.svg");

/// Where the AppDir icon comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconSource {
    File(PathBuf),
    Bundled,
}

/// The `[Desktop Entry]` section, serialized in a fixed key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopEntry {
    pub name: String,
    pub exec: String,
    /// Icon file name without extension.
    pub icon: Option<String>,
    pub kind: String,
    pub categories: String,
}

impl DesktopEntry {
    pub fn new(layout: &StagingLayout, icon: Option<&str>) -> Self {
        DesktopEntry {
            name: layout.app_id.clone(),
            exec: layout.binary_name.clone(),
            icon: icon.map(str::to_string),
            kind: "Application".to_string(),
            categories: "Utility".to_string(),
        }
    }

    /// Key/value pairs in serialization order. `Icon` is omitted when unset,
    /// which only direct callers can hit: a packaging run always resolves an
    /// icon name, the bundled `neu-appimage` one included, before writing.
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        let mut fields = vec![("Name", self.name.as_str()), ("Exec", self.exec.as_str())];
        if let Some(icon) = &self.icon {
            fields.push(("Icon", icon.as_str()));
        }
        fields.push(("Type", self.kind.as_str()));
        fields.push(("Categories", self.categories.as_str()));
        fields
    }

    pub fn render(&self) -> String {
        let mut out = String::from("[Desktop Entry]\n");
        for (key, value) in self.fields() {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }
}

/// Shell launcher that resolves its own location and execs the staged binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPointScript {
    /// Path of the executable relative to the AppDir root.
    pub target: String,
}

impl EntryPointScript {
    pub fn new(layout: &StagingLayout) -> Self {
        EntryPointScript {
            target: format!("usr/bin/{}", layout.binary_name),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "#!/bin/sh\n\
             SELF=$(readlink -f \"$0\")\n\
             HERE=${{SELF%/*}}\n\
             EXEC=\"${{HERE}}/{}\"\n\
             exec \"${{EXEC}}\" \"$@\"\n",
            self.target
        )
    }
}

/// Places the icon in the AppDir root and returns its name without extension.
pub fn install_icon(layout: &StagingLayout, source: &IconSource) -> Result<String, PackError> {
    match source {
        IconSource::File(path) => {
            let file_name = path.file_name().ok_or_else(|| {
                PackError::Configuration(format!("icon path {} has no file name", path.display()))
            })?;
            let dest = layout.root.join(file_name);
            fs::copy(path, &dest).io_context(|| format!("copying icon {}", path.display()))?;
            Ok(icon_name(path))
        }
        IconSource::Bundled => {
            let dest = layout.root.join(format!("{DEFAULT_ICON_NAME}.svg"));
            fs::write(&dest, DEFAULT_ICON_SVG)
                .io_context(|| format!("writing {}", dest.display()))?;
            Ok(DEFAULT_ICON_NAME.to_string())
        }
    }
}

fn icon_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Writes `<app>.desktop` into the AppDir root and marks it executable.
/// Pass `None` to leave the `Icon` key out.
pub fn write_desktop_entry(layout: &StagingLayout, icon: Option<&str>) -> Result<PathBuf, PackError> {
    let path = layout.desktop_path();
    fs::write(&path, DesktopEntry::new(layout, icon).render())
        .io_context(|| format!("writing {}", path.display()))?;
    perms::set_executable(&path).io_context(|| format!("chmod +x {}", path.display()))?;
    Ok(path)
}

/// Writes `AppRun` into the AppDir root and marks it executable.
pub fn write_entry_point_script(layout: &StagingLayout) -> Result<PathBuf, PackError> {
    let path = layout.apprun_path();
    fs::write(&path, EntryPointScript::new(layout).render())
        .io_context(|| format!("writing {}", path.display()))?;
    perms::set_executable(&path).io_context(|| format!("chmod +x {}", path.display()))?;
    Ok(path)
}
