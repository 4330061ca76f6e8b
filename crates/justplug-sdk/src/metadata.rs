//! Owned plugin metadata.

use std::fmt::{self, Display, Formatter};

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::abi::PLUGIN_API_VERSION;

/// A dependency declared by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Name of the required plugin.
    pub name: String,
    /// Accepted versions of that plugin.
    pub version: VersionReq,
}

impl Dependency {
    pub fn new(name: impl Into<String>, version: VersionReq) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Dependency that accepts any version.
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, VersionReq::STAR)
    }

    pub fn is_satisfied_by(&self, version: &Version) -> bool {
        self.version.matches(version)
    }
}

/// Metadata copied out of a module's descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique plugin name (letters, digits and `_`, not starting with a digit).
    pub name: String,

    #[serde(default)]
    pub pretty_name: String,

    pub version: Version,

    /// Interface version the module was built against.
    pub api_version: u32,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub license: String,

    #[serde(default)]
    pub copyright: String,

    /// Declared dependencies, in declaration order.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            pretty_name: String::new(),
            version,
            api_version: PLUGIN_API_VERSION,
            author: String::new(),
            description: String::new(),
            url: String::new(),
            license: String::new(),
            copyright: String::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_api_version(mut self, api_version: u32) -> Self {
        self.api_version = api_version;
        self
    }

    pub fn with_pretty_name(mut self, pretty_name: impl Into<String>) -> Self {
        self.pretty_name = pretty_name.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Names of the declared dependencies, in declaration order.
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.name.as_str())
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.dependency_names().any(|d| d == name)
    }
}

impl Display for PluginMetadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)?;
        if !self.pretty_name.is_empty() {
            write!(f, " ({})", self.pretty_name)?;
        }
        Ok(())
    }
}

/// Returns true if `name` is usable as a plugin name: a C-style identifier.
pub fn is_valid_plugin_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
