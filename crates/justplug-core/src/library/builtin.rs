//! Modules linked into the host binary.
//!
//! A [`StaticLoader`] maps paths to symbol tables registered at start-up, so a
//! host can ship plugins inside its own executable and drive them through the
//! same lifecycle as shared libraries.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use justplug_sdk::abi::RawDescriptor;
use justplug_sdk::entry;
use justplug_sdk::Plugin;
use parking_lot::{Mutex, RwLock};

use super::{Module, ModuleLoader};
use crate::error::{PluginError, Result};

/// Exported symbols of one static module.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    // Addresses are stored as integers to keep the table Send + Sync.
    symbols: HashMap<&'static str, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full export set of plugin `P`, request handler included.
    pub fn for_plugin<P: Plugin>(descriptor: &'static RawDescriptor) -> Self {
        entry::symbol_table::<P>(descriptor, true).into_iter().collect()
    }

    /// Export set of plugin `P` without the optional request handler.
    pub fn lifecycle_only<P: Plugin>(descriptor: &'static RawDescriptor) -> Self {
        entry::symbol_table::<P>(descriptor, false).into_iter().collect()
    }

    pub fn with_symbol(mut self, name: &'static str, address: *const c_void) -> Self {
        self.symbols.insert(name, address as usize);
        self
    }

    pub fn without_symbol(mut self, name: &str) -> Self {
        self.symbols.remove(name);
        self
    }

    pub fn get(&self, name: &str) -> Option<*const c_void> {
        self.symbols.get(name).map(|&address| address as *const c_void)
    }
}

impl FromIterator<(&'static str, *const c_void)> for SymbolTable {
    fn from_iter<I: IntoIterator<Item = (&'static str, *const c_void)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |table, (name, address)| table.with_symbol(name, address))
    }
}

#[derive(Debug, Default)]
struct LoaderStats {
    opened: Vec<PathBuf>,
    closed: Vec<PathBuf>,
}

/// Loader for modules registered in-process.
#[derive(Debug, Default)]
pub struct StaticLoader {
    modules: RwLock<HashMap<PathBuf, SymbolTable>>,
    stats: Arc<Mutex<LoaderStats>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(self, path: impl Into<PathBuf>, table: SymbolTable) -> Self {
        self.register(path, table);
        self
    }

    /// Make `table` available under `path`. Replaces any earlier registration.
    pub fn register(&self, path: impl Into<PathBuf>, table: SymbolTable) {
        self.modules.write().insert(path.into(), table);
    }

    /// Number of modules currently open.
    pub fn open_modules(&self) -> usize {
        let stats = self.stats.lock();
        stats.opened.len() - stats.closed.len()
    }

    /// Paths in the order they were closed.
    pub fn closed_paths(&self) -> Vec<PathBuf> {
        self.stats.lock().closed.clone()
    }

    /// Paths in the order they were opened.
    pub fn opened_paths(&self) -> Vec<PathBuf> {
        self.stats.lock().opened.clone()
    }
}

impl ModuleLoader for StaticLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn Module>> {
        let table = self
            .modules
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| PluginError::load(path, "no module registered at this path"))?;
        self.stats.lock().opened.push(path.to_path_buf());
        Ok(Box::new(StaticModule {
            path: path.to_path_buf(),
            table,
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct StaticModule {
    path: PathBuf,
    table: SymbolTable,
    stats: Arc<Mutex<LoaderStats>>,
}

impl Module for StaticModule {
    fn symbol(&self, name: &str) -> Result<*const c_void> {
        self.table
            .get(name)
            .ok_or_else(|| PluginError::symbol_not_found(&self.path, name))
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.stats.lock().closed.push(self.path.clone());
        Ok(())
    }
}
