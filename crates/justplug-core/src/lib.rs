//! Host-side plugin runtime for JustPlug.
//!
//! Opens plugin modules, reads their metadata, orders them by dependency,
//! drives their lifecycle and routes requests between the host and plugins.
//!
//! ```rust,ignore
//! use justplug_core::prelude::*;
//!
//! let manager = PluginManager::new(ManagerConfig::from_env());
//! let report = manager.load_configured();
//! println!("{}", report);
//!
//! let count = manager.request(&Request::PluginsCount)?;
//! manager.unload_all();
//! ```

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod graph;
pub mod instance;
pub mod library;
pub mod manager;
pub mod metadata;
pub mod registry;
pub mod report;

pub use config::ManagerConfig;
pub use discovery::{discover, Discovery};
pub use dispatch::{Envelope, RequestHandler};
pub use error::{ConfigError, MetadataError, PluginError, Result};
pub use graph::DependencyGraph;
pub use instance::{PluginState, StateTransition};
pub use library::{LibraryHandle, Module, ModuleLoader, NativeLoader, StaticLoader, SymbolTable};
pub use manager::PluginManager;
pub use registry::PluginSlot;
pub use report::{LoadEntry, LoadOutcome, LoadReport, UnloadEntry, UnloadReport};

pub use justplug_sdk::{
    opcode, Dependency, DispatchError, PluginMetadata, PluginRef, Reply, Request,
    PLUGIN_API_VERSION,
};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::ManagerConfig;
    pub use crate::dispatch::{Envelope, RequestHandler};
    pub use crate::error::{PluginError, Result};
    pub use crate::instance::PluginState;
    pub use crate::library::{StaticLoader, SymbolTable};
    pub use crate::manager::PluginManager;
    pub use crate::report::{LoadOutcome, LoadReport, UnloadReport};
    pub use justplug_sdk::{opcode, DispatchError, PluginMetadata, PluginRef, Reply, Request};
}
