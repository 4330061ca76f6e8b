//! Runtime configuration: defaults, environment overrides and TOML loading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default values.
pub mod defaults {
    /// Sub-directory of the application directory searched for plugins.
    pub const PLUGIN_SUBDIR: &str = "plugin";
    /// Whether discovery descends into sub-directories.
    pub const RECURSIVE: bool = false;
    /// Whether a failing plugin leaves the rest of the batch running.
    pub const CONTINUE_ON_ERROR: bool = true;
}

/// Environment variable names.
pub mod env_vars {
    use super::defaults;
    use std::path::PathBuf;

    /// Plugin directories, separated like `PATH`.
    pub const PLUGIN_DIR: &str = "JUSTPLUG_PLUGIN_DIR";
    pub const RECURSIVE: &str = "JUSTPLUG_RECURSIVE";

    /// Plugin directories from the environment, if set.
    pub fn plugin_dirs() -> Option<Vec<PathBuf>> {
        std::env::var_os(PLUGIN_DIR).map(|value| std::env::split_paths(&value).collect())
    }

    /// Recursion flag from the environment, or the default.
    pub fn recursive() -> bool {
        std::env::var(RECURSIVE)
            .ok()
            .and_then(|s| super::parse_flag(&s))
            .unwrap_or(defaults::RECURSIVE)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Directory containing the running executable.
pub fn app_directory() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directories scanned by [`PluginManager::load_configured`](crate::PluginManager::load_configured).
    pub plugin_dirs: Vec<PathBuf>,
    pub recursive: bool,
    /// When false, the first failure in a batch stops loading the remaining
    /// paths; they are reported as skipped.
    pub continue_on_error: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: vec![app_directory().join(defaults::PLUGIN_SUBDIR)],
            recursive: defaults::RECURSIVE,
            continue_on_error: defaults::CONTINUE_ON_ERROR,
        }
    }
}

impl ManagerConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dirs) = env_vars::plugin_dirs() {
            self.plugin_dirs = dirs;
        }
        if std::env::var_os(env_vars::RECURSIVE).is_some() {
            self.recursive = env_vars::recursive();
        }
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load a TOML file. Relative plugin directories are resolved against the
    /// file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            for dir in &mut config.plugin_dirs {
                if dir.is_relative() {
                    *dir = base.join(&*dir);
                }
            }
        }
        Ok(config)
    }

    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_dirs = vec![dir.into()];
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }
}
