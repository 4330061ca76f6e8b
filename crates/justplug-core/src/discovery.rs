//! Finding module files on disk.

use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::library::is_library_file;

/// Result of a directory scan.
///
/// Best effort: traversal errors are collected and the scan goes on.
/// `complete` is false as soon as anything could not be read, even if some
/// paths were found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Discovery {
    pub paths: Vec<PathBuf>,
    pub complete: bool,
    pub errors: Vec<String>,
}

impl Discovery {
    /// Combine two scans.
    pub fn merge(mut self, other: Discovery) -> Self {
        self.paths.extend(other.paths);
        self.complete &= other.complete;
        self.errors.extend(other.errors);
        self
    }
}

/// List the module files under `root`, sorted by file name per directory.
pub fn discover(root: impl AsRef<Path>, recursive: bool) -> Discovery {
    let root = root.as_ref();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut discovery = Discovery {
        complete: true,
        ..Default::default()
    };
    for entry in walker {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && is_library_file(entry.path()) {
                    discovery.paths.push(entry.into_path());
                }
            }
            Err(e) => {
                tracing::warn!("Plugin discovery under {}: {}", root.display(), e);
                discovery.complete = false;
                discovery.errors.push(e.to_string());
            }
        }
    }

    tracing::debug!(
        root = %root.display(),
        found = discovery.paths.len(),
        complete = discovery.complete,
        "Plugin discovery finished"
    );
    discovery
}
