//! Error types for the plugin runtime.

use std::path::PathBuf;

use semver::Version;

use crate::instance::PluginState;

pub use justplug_sdk::DispatchError;

/// Result type alias for plugin operations.
pub type Result<T, E = PluginError> = std::result::Result<T, E>;

/// Problems with a module's descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    /// The module does not export the descriptor symbol.
    #[error("Module exports no descriptor symbol '{0}'")]
    MissingSymbol(String),

    /// The descriptor is present but a field is missing or invalid.
    #[error("Malformed descriptor: {0}")]
    Malformed(String),
}

/// Plugin runtime errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    /// The module could not be opened.
    #[error("Cannot load {}: {}", .path.display(), .reason)]
    LoadError { path: PathBuf, reason: String },

    /// A required entry point is not exported.
    #[error("Symbol '{}' not found in {}", .symbol, .path.display())]
    SymbolNotFound { path: PathBuf, symbol: String },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The module was built against another interface version.
    #[error("Plugin '{name}' uses API {found}, host provides API {expected}")]
    IncompatibleApi {
        name: String,
        expected: u32,
        found: u32,
    },

    /// A declared dependency is missing, has the wrong version or failed itself.
    #[error("Plugin '{name}' has an unmet dependency on '{dependency}': {reason}")]
    UnmetDependency {
        name: String,
        dependency: String,
        reason: String,
    },

    /// The batch contains a dependency cycle.
    #[error("Dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// A plugin with the same name is already registered.
    #[error("Plugin '{name}' is already registered (version {existing})")]
    DuplicateName { name: String, existing: Version },

    /// Other loaded plugins still depend on this one.
    #[error("Plugin '{name}' is required by: {}", .dependents.join(", "))]
    HasDependents {
        name: String,
        dependents: Vec<String>,
    },

    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// A lifecycle hook reported a failure.
    #[error("Plugin '{name}' failed in {hook}: {reason}")]
    HookFailed {
        name: String,
        hook: &'static str,
        reason: String,
    },

    /// The plugin exists but is not in the Loaded state.
    #[error("Plugin '{0}' is not available")]
    TargetUnavailable(String),

    /// The module's create entry point returned no instance.
    #[error("Plugin '{0}' could not be instantiated")]
    CreateFailed(String),

    /// The lifecycle does not allow this state change.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: PluginState, to: PluginState },
}

impl PluginError {
    pub fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PluginError::LoadError {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn symbol_not_found(path: impl Into<PathBuf>, symbol: &str) -> Self {
        PluginError::SymbolNotFound {
            path: path.into(),
            symbol: symbol.to_string(),
        }
    }

    /// Short machine-readable kind, used in reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PluginError::LoadError { .. } => "load_error",
            PluginError::SymbolNotFound { .. } => "symbol_not_found",
            PluginError::Metadata(MetadataError::MissingSymbol(_)) => "missing_descriptor",
            PluginError::Metadata(MetadataError::Malformed(_)) => "malformed_metadata",
            PluginError::IncompatibleApi { .. } => "incompatible_api",
            PluginError::UnmetDependency { .. } => "unmet_dependency",
            PluginError::DependencyCycle(_) => "dependency_cycle",
            PluginError::DuplicateName { .. } => "duplicate_name",
            PluginError::HasDependents { .. } => "has_dependents",
            PluginError::NotFound(_) => "not_found",
            PluginError::HookFailed { .. } => "hook_failed",
            PluginError::TargetUnavailable(_) => "target_unavailable",
            PluginError::CreateFailed(_) => "create_failed",
            PluginError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PluginError::DependencyCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Dependency cycle: a -> b -> a");
        assert_eq!(err.kind(), "dependency_cycle");

        let err: PluginError = MetadataError::Malformed("empty name".into()).into();
        assert_eq!(err.to_string(), "Malformed descriptor: empty name");
        assert_eq!(err.kind(), "malformed_metadata");
    }

    #[test]
    fn test_has_dependents_message() {
        let err = PluginError::HasDependents {
            name: "core".into(),
            dependents: vec!["ui".into(), "net".into()],
        };
        assert_eq!(err.to_string(), "Plugin 'core' is required by: ui, net");
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = PluginError::InvalidTransition {
            from: PluginState::Unloaded,
            to: PluginState::Loaded,
        };
        assert_eq!(err.to_string(), "Invalid state transition: unloaded -> loaded");
        assert_eq!(err.kind(), "invalid_transition");
    }
}
