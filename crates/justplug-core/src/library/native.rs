//! Native module loader using libloading.
//!
//! Loads shared libraries (.so, .dylib, .dll) built with the JustPlug SDK.

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use super::{is_library_file, library_extension, Module, ModuleLoader};
use crate::error::{PluginError, Result};

/// Loader for platform shared libraries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for NativeLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn Module>> {
        if !path.exists() {
            return Err(PluginError::load(path, "file does not exist"));
        }
        if !path.is_file() {
            return Err(PluginError::load(path, "not a regular file"));
        }
        if !is_library_file(path) {
            return Err(PluginError::load(
                path,
                format!("expected a .{} module", library_extension()),
            ));
        }

        // SAFETY: loading a library runs its initialisers. Modules are trusted
        // code by contract; the only guarantee given here is that open and
        // close are serialized by the caller.
        let library = unsafe { Library::new(path) }.map_err(|e| PluginError::load(path, e))?;

        Ok(Box::new(NativeModule {
            path: path.to_path_buf(),
            library,
        }))
    }
}

struct NativeModule {
    path: PathBuf,
    library: Library,
}

impl Module for NativeModule {
    fn symbol(&self, name: &str) -> Result<*const c_void> {
        // SAFETY: the symbol is only read as an address here; the caller
        // decides how to interpret it.
        let symbol: Symbol<*const c_void> = unsafe { self.library.get(name.as_bytes()) }
            .map_err(|_| PluginError::symbol_not_found(&self.path, name))?;
        Ok(*symbol)
    }

    fn close(self: Box<Self>) -> Result<()> {
        let NativeModule { path, library } = *self;
        library.close().map_err(|e| PluginError::load(path, e))
    }
}
