//! Outcome records for batch loads and unloads.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::discovery::Discovery;
use crate::error::PluginError;

/// What happened to one path of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { name: String, load_index: u64 },
    Failed(PluginError),
    /// Not attempted because an earlier failure stopped the batch.
    Skipped,
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded { .. })
    }

    pub fn error(&self) -> Option<&PluginError> {
        match self {
            LoadOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadEntry {
    pub path: PathBuf,
    /// Plugin name, once the descriptor could be read.
    pub name: Option<String>,
    pub outcome: LoadOutcome,
}

/// Every path of a batch with its outcome, in the order given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub entries: Vec<LoadEntry>,
    /// Names in the order they were loaded.
    pub load_order: Vec<String>,
    /// Set when a dependency cycle rejected the batch.
    pub cycle: Option<Vec<String>>,
    /// Scan that produced the paths, for directory loads.
    pub discovery: Option<Discovery>,
}

impl LoadReport {
    pub(crate) fn with_paths(paths: &[PathBuf]) -> Self {
        Self {
            entries: paths
                .iter()
                .map(|path| LoadEntry {
                    path: path.clone(),
                    name: None,
                    outcome: LoadOutcome::Skipped,
                })
                .collect(),
            ..Default::default()
        }
    }

    pub(crate) fn set_name(&mut self, slot: usize, name: &str) {
        self.entries[slot].name = Some(name.to_string());
    }

    pub(crate) fn fail(&mut self, slot: usize, error: PluginError) {
        let entry = &mut self.entries[slot];
        tracing::warn!("Rejected plugin {}: {}", entry.path.display(), error);
        entry.outcome = LoadOutcome::Failed(error);
    }

    pub(crate) fn loaded(&mut self, slot: usize, name: &str, load_index: u64) {
        self.entries[slot].outcome = LoadOutcome::Loaded {
            name: name.to_string(),
            load_index,
        };
        self.load_order.push(name.to_string());
    }

    pub fn loaded_count(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_loaded()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &PluginError)> {
        self.entries
            .iter()
            .filter_map(|e| e.outcome.error().map(|err| (e.path.as_path(), err)))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &Path> {
        self.entries
            .iter()
            .filter(|e| e.outcome == LoadOutcome::Skipped)
            .map(|e| e.path.as_path())
    }

    /// True when every path loaded and the scan, if any, was complete.
    pub fn is_success(&self) -> bool {
        self.entries.iter().all(|e| e.outcome.is_loaded())
            && self.discovery.as_ref().map_or(true, |d| d.complete)
    }

    pub fn entry(&self, path: impl AsRef<Path>) -> Option<&LoadEntry> {
        self.entries.iter().find(|e| e.path == path.as_ref())
    }

    pub fn outcome_of(&self, name: &str) -> Option<&LoadOutcome> {
        self.entries
            .iter()
            .find(|e| e.name.as_deref() == Some(name))
            .map(|e| &e.outcome)
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} of {} plugin(s) loaded",
            self.loaded_count(),
            self.entries.len()
        )?;
        for entry in &self.entries {
            let name = entry.name.as_deref().unwrap_or("?");
            match &entry.outcome {
                LoadOutcome::Loaded { load_index, .. } => {
                    writeln!(f, "  [ok]   {} #{} ({})", name, load_index, entry.path.display())?
                }
                LoadOutcome::Failed(e) => {
                    writeln!(f, "  [fail] {} ({}): {}", name, entry.path.display(), e)?
                }
                LoadOutcome::Skipped => {
                    writeln!(f, "  [skip] {} ({})", name, entry.path.display())?
                }
            }
        }
        if let Some(discovery) = &self.discovery {
            for error in &discovery.errors {
                writeln!(f, "  [scan] {}", error)?;
            }
        }
        Ok(())
    }
}

/// Result of unloading one plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnloadEntry {
    pub name: String,
    /// Hook or close failure. The plugin is unloaded either way.
    pub error: Option<PluginError>,
}

/// Plugins unloaded by a batch, in unload order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnloadReport {
    pub entries: Vec<UnloadEntry>,
}

impl UnloadReport {
    pub fn order(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(|e| e.error.is_none())
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &PluginError)> {
        self.entries
            .iter()
            .filter_map(|e| e.error.as_ref().map(|err| (e.name.as_str(), err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_bookkeeping() {
        let paths = vec![PathBuf::from("a.so"), PathBuf::from("b.so"), PathBuf::from("c.so")];
        let mut report = LoadReport::with_paths(&paths);
        report.set_name(0, "a");
        report.loaded(0, "a", 1);
        report.fail(1, PluginError::NotFound("b".into()));

        assert_eq!(report.loaded_count(), 1);
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.skipped().collect::<Vec<_>>(), vec![Path::new("c.so")]);
        assert!(!report.is_success());
        assert!(report.outcome_of("a").unwrap().is_loaded());
        assert_eq!(report.load_order, vec!["a"]);
    }
}
