//! Library handles.
//!
//! A [`LibraryHandle`] owns one opened module. Modules are reached through the
//! [`ModuleLoader`] / [`Module`] pair so the same runtime can drive real shared
//! libraries ([`NativeLoader`]) and modules linked into the host binary
//! ([`StaticLoader`]).
//!
//! Opening and closing touch process-wide loader state, so both go through
//! [`LOADER_LOCK`].

mod builtin;
mod native;

use std::ffi::c_void;
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::{const_mutex, Mutex};

use crate::error::{PluginError, Result};

pub use builtin::{StaticLoader, SymbolTable};
pub use native::NativeLoader;

/// Serializes every open and close in the process.
pub static LOADER_LOCK: Mutex<()> = const_mutex(());

/// An opened module.
pub trait Module: Send + Sync {
    /// Address of an exported symbol. Never null on success.
    fn symbol(&self, name: &str) -> Result<*const c_void>;

    /// Unload the module. No address obtained from [`Module::symbol`] may be
    /// used afterwards.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens modules by path.
pub trait ModuleLoader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn Module>>;
}

/// Platform suffix of loadable modules, without the dot.
pub fn library_extension() -> &'static str {
    std::env::consts::DLL_EXTENSION
}

/// Whether `path` carries the platform's module suffix.
pub fn is_library_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(library_extension()))
        .unwrap_or(false)
}

/// One opened module and the path it came from.
///
/// Closed exactly once: explicitly with [`LibraryHandle::close`], or on drop.
pub struct LibraryHandle {
    path: PathBuf,
    module: Option<Box<dyn Module>>,
}

impl LibraryHandle {
    pub fn open(loader: &dyn ModuleLoader, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let module = {
            let _guard = LOADER_LOCK.lock();
            loader.open(path)?
        };
        tracing::debug!(path = %path.display(), "Opened module");
        Ok(Self {
            path: path.to_path_buf(),
            module: Some(module),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve an exported symbol. Fails with `SymbolNotFound` and no other
    /// effect when the module does not export `name`.
    pub fn resolve_symbol(&self, name: &str) -> Result<*const c_void> {
        let module = self
            .module
            .as_ref()
            .ok_or_else(|| PluginError::symbol_not_found(&self.path, name))?;
        let address = module.symbol(name)?;
        if address.is_null() {
            return Err(PluginError::symbol_not_found(&self.path, name));
        }
        Ok(address)
    }

    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        let Some(module) = self.module.take() else {
            return Ok(());
        };
        let result = {
            let _guard = LOADER_LOCK.lock();
            module.close()
        };
        tracing::debug!(path = %self.path.display(), "Closed module");
        result
    }
}

impl Drop for LibraryHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            tracing::warn!("Failed to close {}: {}", self.path.display(), e);
        }
    }
}

impl fmt::Debug for LibraryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryHandle")
            .field("path", &self.path)
            .field("open", &self.module.is_some())
            .finish()
    }
}
