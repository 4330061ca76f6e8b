//! Registry of plugins known to a manager.
//!
//! Each plugin lives in a [`PluginSlot`]: metadata, library handle, instance,
//! lifecycle state and load index. The instance sits behind the slot's call
//! gate, a reader/writer lock that peer calls hold for reading and teardown
//! takes for writing, so an instance is never destroyed under a running call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use justplug_sdk::{DispatchError, PluginMetadata};
use parking_lot::{Mutex, RwLock};

use crate::error::{PluginError, Result};
use crate::instance::{PluginInstance, PluginState, StateMachine, StateTransition};
use crate::library::LibraryHandle;

/// One registry entry.
pub struct PluginSlot {
    metadata: PluginMetadata,
    path: PathBuf,
    load_index: u64,
    state: Mutex<StateMachine>,
    instance: RwLock<Option<PluginInstance>>,
    library: Mutex<Option<LibraryHandle>>,
}

impl PluginSlot {
    /// New entry in the `Loading` state.
    pub(crate) fn loading(metadata: PluginMetadata, library: LibraryHandle, load_index: u64) -> Self {
        let mut state = StateMachine::new();
        // Unloaded -> Loading is always valid.
        let _ = state.transition(PluginState::Loading, "validated");
        Self {
            path: library.path().to_path_buf(),
            metadata,
            load_index,
            state: Mutex::new(state),
            instance: RwLock::new(None),
            library: Mutex::new(Some(library)),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_index(&self) -> u64 {
        self.load_index
    }

    pub fn state(&self) -> PluginState {
        self.state.lock().current()
    }

    pub fn is_loaded(&self) -> bool {
        self.state().accepts_requests()
    }

    pub fn history(&self) -> Vec<StateTransition> {
        self.state.lock().history().to_vec()
    }

    pub(crate) fn transition(&self, to: PluginState, reason: &str) -> Result<()> {
        let mut state = self.state.lock();
        let from = state.current();
        state.transition(to, reason)?;
        tracing::debug!(plugin = %self.name(), %from, %to, "{}", reason);
        Ok(())
    }

    pub(crate) fn install(&self, instance: PluginInstance) {
        *self.instance.write() = Some(instance);
    }

    /// Run `f` with the instance while holding the call gate for reading.
    /// Returns `None` once the instance is gone.
    pub(crate) fn with_instance<R>(&self, f: impl FnOnce(&PluginInstance) -> R) -> Option<R> {
        let guard = self.instance.read_recursive();
        guard.as_ref().map(f)
    }

    /// Deliver a peer request if the plugin is Loaded.
    pub(crate) fn call(
        &self,
        sender: &str,
        opcode: u16,
        input: &[u8],
    ) -> std::result::Result<Vec<u8>, DispatchError> {
        let unavailable = || DispatchError::TargetUnavailable(self.name().to_string());
        if !self.is_loaded() {
            return Err(unavailable());
        }
        let guard = self.instance.read_recursive();
        let instance = guard.as_ref().ok_or_else(unavailable)?;
        if !self.is_loaded() {
            return Err(unavailable());
        }
        instance.handle_request(sender, opcode, input)
    }

    /// Wait for in-flight calls, then destroy the instance.
    pub(crate) fn destroy_instance(&self) {
        let instance = self.instance.write().take();
        drop(instance);
    }

    pub(crate) fn close_library(&self) -> Result<()> {
        match self.library.lock().take() {
            Some(library) => library.close(),
            None => Ok(()),
        }
    }
}

impl Drop for PluginSlot {
    fn drop(&mut self) {
        let Some(instance) = self.instance.get_mut().take() else {
            return;
        };
        tracing::warn!(plugin = %self.metadata.name, "Plugin dropped while loaded, tearing down");
        if let Err(e) = instance.about_to_be_unloaded() {
            tracing::warn!("{}", e);
        }
        drop(instance);
        if let Some(library) = self.library.get_mut().take() {
            if let Err(e) = library.close() {
                tracing::warn!("{}", e);
            }
        }
    }
}

impl std::fmt::Debug for PluginSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSlot")
            .field("name", &self.metadata.name)
            .field("version", &self.metadata.version.to_string())
            .field("load_index", &self.load_index)
            .field("state", &self.state())
            .finish()
    }
}

/// Name to entry map plus the load sequence.
#[derive(Debug, Default)]
pub struct Registry {
    slots: HashMap<String, Arc<PluginSlot>>,
    order: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, slot: Arc<PluginSlot>) -> Result<()> {
        if let Some(existing) = self.slots.get(slot.name()) {
            return Err(PluginError::DuplicateName {
                name: slot.name().to_string(),
                existing: existing.metadata().version.clone(),
            });
        }
        self.slots.insert(slot.name().to_string(), slot);
        Ok(())
    }

    /// Append to the load sequence once the plugin is Loaded.
    pub(crate) fn mark_loaded(&mut self, name: &str) {
        if !self.order.iter().any(|n| n == name) {
            self.order.push(name.to_string());
        }
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Arc<PluginSlot>> {
        self.order.retain(|n| n != name);
        self.slots.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<PluginSlot>> {
        self.slots.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of entries in the Loaded state.
    pub fn loaded_count(&self) -> usize {
        self.slots.values().filter(|s| s.is_loaded()).count()
    }

    /// Names in load order.
    pub fn load_order(&self) -> &[String] {
        &self.order
    }

    /// Loaded plugins that declare a dependency on `name`, in load order.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|n| self.slots.get(n))
            .filter(|s| s.is_loaded() && s.metadata().depends_on(name))
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn slots(&self) -> impl Iterator<Item = &Arc<PluginSlot>> {
        self.slots.values()
    }

    /// Take every entry out, in reverse load order first, then the rest.
    pub(crate) fn drain_for_teardown(&mut self) -> Vec<Arc<PluginSlot>> {
        let mut drained: Vec<_> = self
            .order
            .drain(..)
            .rev()
            .filter_map(|name| self.slots.remove(&name))
            .collect();
        drained.extend(self.slots.drain().map(|(_, slot)| slot));
        drained
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        // Reverse load order so dependents go before their dependencies.
        for slot in self.drain_for_teardown() {
            drop(slot);
        }
    }
}
