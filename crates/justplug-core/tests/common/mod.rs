//! Common test utilities: in-process plugins and a manager wired to a
//! [`StaticLoader`].
#![allow(dead_code)]

use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use justplug_core::library::library_extension;
use justplug_core::{ManagerConfig, PluginManager, StaticLoader, SymbolTable};
use justplug_sdk::abi::RawDescriptor;
use justplug_sdk::prelude::*;

/// Echo: answers with `<name>:<input>`.
pub const OP_ECHO: u16 = opcode::USER_BASE;
/// Relay: input is a plugin name; finds it and sends it an echo of `ping`.
pub const OP_RELAY: u16 = opcode::USER_BASE + 1;
/// Answers with the plugin count the host reported during `loaded`.
pub const OP_SEEN_COUNT: u16 = opcode::USER_BASE + 2;
/// Sends an echo of `ping` through the reference kept by a [`Courier`].
pub const OP_CALL_KEPT: u16 = opcode::USER_BASE + 3;

/// Plugin a [`Courier`] looks up while it loads.
pub const COURIER_TARGET: &str = "keeper";

thread_local! {
    static EVENTS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

fn record(event: String) {
    EVENTS.with(|events| events.borrow_mut().push(event));
}

/// Lifecycle events recorded on this thread since the last call.
pub fn take_events() -> Vec<String> {
    EVENTS.with(|events| std::mem::take(&mut *events.borrow_mut()))
}

// ============================================================================
// Plugins
// ============================================================================

/// Records its hooks and answers the test opcodes.
pub struct Recorder {
    host: Host,
    name: Mutex<String>,
    seen_count: Mutex<usize>,
}

impl Recorder {
    fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }
}

impl Plugin for Recorder {
    fn create(host: Host) -> Self {
        Recorder {
            host,
            name: Mutex::new(String::new()),
            seen_count: Mutex::new(0),
        }
    }

    fn loaded(&self) -> HookResult {
        let me = self.host.plugin_info(None)?;
        let count = self.host.plugins_count()?;
        *self.name.lock().unwrap() = me.name.clone();
        *self.seen_count.lock().unwrap() = count;
        record(format!("loaded:{}", me.name));
        Ok(())
    }

    fn about_to_be_unloaded(&self) -> HookResult {
        record(format!("unloading:{}", self.name()));
        Ok(())
    }

    fn handle_request(
        &self,
        sender: &str,
        opcode: u16,
        input: &[u8],
    ) -> Result<Vec<u8>, DispatchError> {
        match opcode {
            OP_ECHO => {
                let input = String::from_utf8_lossy(input);
                Ok(format!("{}:{}:{}", self.name(), sender, input).into_bytes())
            }
            OP_RELAY => {
                let target = String::from_utf8_lossy(input).into_owned();
                let plugin = self.host.find_plugin(&target)?;
                self.host.call(&plugin, OP_ECHO, b"ping")
            }
            OP_SEEN_COUNT => Ok(self.seen_count.lock().unwrap().to_string().into_bytes()),
            op => Err(DispatchError::Unhandled(op)),
        }
    }
}

/// Looks up [`COURIER_TARGET`] in its `loaded` hook and keeps the reference.
pub struct Courier {
    host: Host,
    target: Mutex<Option<PluginRef>>,
}

impl Plugin for Courier {
    fn create(host: Host) -> Self {
        Courier {
            host,
            target: Mutex::new(None),
        }
    }

    fn loaded(&self) -> HookResult {
        let target = self.host.find_plugin(COURIER_TARGET)?;
        *self.target.lock().unwrap() = Some(target);
        Ok(())
    }

    fn handle_request(
        &self,
        _sender: &str,
        opcode: u16,
        _input: &[u8],
    ) -> Result<Vec<u8>, DispatchError> {
        let target = self.target.lock().unwrap().clone();
        match (opcode, target) {
            (OP_CALL_KEPT, Some(target)) => self.host.call(&target, OP_ECHO, b"ping"),
            (op, _) => Err(DispatchError::Unhandled(op)),
        }
    }
}

/// Refuses to start.
pub struct Refuser;

impl Plugin for Refuser {
    fn create(_host: Host) -> Self {
        Refuser
    }

    fn loaded(&self) -> HookResult {
        Err("refusing to start".into())
    }
}

/// Panics in its `loaded` hook.
pub struct Panicker;

impl Plugin for Panicker {
    fn create(_host: Host) -> Self {
        Panicker
    }

    fn loaded(&self) -> HookResult {
        panic!("boom");
    }
}

/// Panics while being constructed.
pub struct Stillborn;

impl Plugin for Stillborn {
    fn create(_host: Host) -> Self {
        panic!("cannot construct");
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Path a test module is registered under.
pub fn module_path(name: &str) -> PathBuf {
    PathBuf::from(format!("/plugins/{}.{}", name, library_extension()))
}

pub fn recorder(descriptor: &'static RawDescriptor) -> SymbolTable {
    SymbolTable::for_plugin::<Recorder>(descriptor)
}

/// Loader with one module per `(file name, table)` pair.
pub fn loader(modules: Vec<(&str, SymbolTable)>) -> Arc<StaticLoader> {
    let loader = StaticLoader::new();
    for (name, table) in modules {
        loader.register(module_path(name), table);
    }
    Arc::new(loader)
}

pub fn manager(loader: &Arc<StaticLoader>) -> PluginManager {
    manager_with(loader, ManagerConfig::default())
}

pub fn manager_with(loader: &Arc<StaticLoader>, config: ManagerConfig) -> PluginManager {
    let loader: Arc<StaticLoader> = Arc::clone(loader);
    PluginManager::with_loader(config, loader)
}

pub fn paths(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(|n| module_path(n)).collect()
}
