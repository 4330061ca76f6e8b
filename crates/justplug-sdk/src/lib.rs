//! JustPlug SDK
//!
//! Everything a plugin module and the host need to agree on: the C ABI, the
//! metadata model, the request protocol and the [`export_plugin!`] macro.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use justplug_sdk::prelude::*;
//!
//! struct Greeter {
//!     host: Host,
//! }
//!
//! impl Plugin for Greeter {
//!     fn create(host: Host) -> Self {
//!         Greeter { host }
//!     }
//!
//!     fn loaded(&self) -> HookResult {
//!         let count = self.host.plugins_count()?;
//!         println!("{} plugins loaded", count);
//!         Ok(())
//!     }
//! }
//!
//! static DEPS: [RawDependency; 1] = [RawDependency::new("logger", "^1")];
//!
//! export_plugin!(
//!     Greeter,
//!     RawDescriptor::new("greeter", "0.1.0").with_dependencies(&DEPS)
//! );
//! ```

pub mod abi;
pub mod entry;
#[macro_use]
pub mod macros;
pub mod metadata;
pub mod plugin;
pub mod protocol;

pub use abi::PLUGIN_API_VERSION;
pub use metadata::{is_valid_plugin_name, Dependency, PluginMetadata};
pub use plugin::{HookError, HookResult, Host, Plugin};
pub use protocol::{opcode, DispatchError, PluginRef, Reply, Request};

/// Prelude module with common imports
pub mod prelude {
    pub use crate::abi::{RawDependency, RawDescriptor, PLUGIN_API_VERSION};
    pub use crate::export_plugin;
    pub use crate::metadata::{Dependency, PluginMetadata};
    pub use crate::plugin::{HookError, HookResult, Host, Plugin};
    pub use crate::protocol::{opcode, DispatchError, PluginRef, Reply, Request};
}
