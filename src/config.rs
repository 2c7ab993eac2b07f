// src/config.rs
// Loads tool settings from the user config and environment, and the project's
// neutralino.config.json; provides defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use colored::*;
use serde::Deserialize;

use crate::error::PackError;
use crate::tool::BuilderKind;

pub const PROJECT_CONFIG_FILE: &str = "neutralino.config.json";

/// What to do when the project configures no icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconPolicy {
    /// Warn and install the bundled default icon.
    #[default]
    Fallback,
    /// Warn and abort before staging.
    Strict,
}

impl FromStr for IconPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fallback" | "lenient" => Ok(IconPolicy::Fallback),
            "strict" => Ok(IconPolicy::Strict),
            other => Err(format!("unknown icon policy '{other}'")),
        }
    }
}

impl fmt::Display for IconPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IconPolicy::Fallback => f.write_str("fallback"),
            IconPolicy::Strict => f.write_str("strict"),
        }
    }
}

/// Tool settings for a packaging run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub builder: BuilderKind,
    /// Keep the downloaded builder around for the next run.
    pub keep_tool: bool,
    pub icon_policy: IconPolicy,
    /// Overrides the builder's download URL (mirrors, pinned releases).
    pub tool_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            builder: BuilderKind::LinuxDeploy,
            keep_tool: false,
            icon_policy: IconPolicy::Fallback,
            tool_url: None,
        }
    }
}

impl AppConfig {
    /// Defaults, then the user config file, then `NEU_APPIMAGE_*` variables from `vars`.
    pub fn load(vars: &BTreeMap<String, String>) -> Self {
        let mut cfg = AppConfig::default();

        let path = Self::user_config_path(vars);
        if path.exists() {
            match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|s| Self::from_toml_str(&s))
            {
                Ok(file_cfg) => cfg = file_cfg,
                Err(e) => eprintln!(
                    "{} failed to load {}: {}",
                    "WARNING".bold().yellow(),
                    path.display(),
                    e
                ),
            }
        }

        cfg.apply_env(vars);
        cfg
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Environment overrides (highest priority before CLI flags).
    pub fn apply_env(&mut self, vars: &BTreeMap<String, String>) {
        if let Some(v) = vars.get("NEU_APPIMAGE_BUILDER") {
            match v.parse() {
                Ok(kind) => self.builder = kind,
                Err(e) => eprintln!("{} NEU_APPIMAGE_BUILDER: {}", "WARNING".bold().yellow(), e),
            }
        }
        if let Some(v) = vars.get("NEU_APPIMAGE_KEEP_TOOL") {
            self.keep_tool = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = vars.get("NEU_APPIMAGE_ICON_POLICY") {
            match v.parse() {
                Ok(policy) => self.icon_policy = policy,
                Err(e) => eprintln!("{} NEU_APPIMAGE_ICON_POLICY: {}", "WARNING".bold().yellow(), e),
            }
        }
        if let Some(v) = vars.get("NEU_APPIMAGE_TOOL_URL") {
            if !v.trim().is_empty() {
                self.tool_url = Some(v.trim().to_string());
            }
        }
    }

    /// `$XDG_CONFIG_HOME/neu-appimage/config.toml` or `~/.config/neu-appimage/config.toml`.
    pub fn user_config_path(vars: &BTreeMap<String, String>) -> PathBuf {
        vars.get("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("~/.config").expand_home())
            .join("neu-appimage/config.toml")
    }
}

/// The slice of `neutralino.config.json` the packager consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub icon: Option<PathBuf>,
}

impl ProjectConfig {
    pub fn from_str(content: &str) -> Result<Self, PackError> {
        serde_json::from_str(content)
            .map_err(|e| PackError::Configuration(format!("invalid {PROJECT_CONFIG_FILE}: {e}")))
    }

    /// Reads `<project_root>/neutralino.config.json`. A missing file means this is
    /// not a Neutralino project.
    pub fn load(project_root: &Path) -> Result<Self, PackError> {
        let path = project_root.join(PROJECT_CONFIG_FILE);
        let content = fs::read_to_string(&path).map_err(|e| {
            PackError::Configuration(format!(
                "{} is not a neutralino app ({}: {})",
                project_root.display(),
                path.display(),
                e
            ))
        })?;
        let cfg = Self::from_str(&content)?;
        // An empty string is as good as no icon.
        Ok(ProjectConfig {
            icon: cfg.icon.filter(|p| !p.as_os_str().is_empty()),
        })
    }
}

// Small helper to expand leading ~ in paths
trait ExpandHome {
    fn expand_home(self) -> PathBuf;
}

impl ExpandHome for PathBuf {
    fn expand_home(self) -> PathBuf {
        let s = self.to_string_lossy().to_string();
        if let Some(rest) = s.strip_prefix("~/") {
            if let Some(home) = dirs_next::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(s)
    }
}
