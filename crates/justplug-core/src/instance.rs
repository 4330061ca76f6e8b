//! Plugin instances and their lifecycle state.

use std::ffi::c_void;
use std::fmt;

use justplug_sdk::abi::{
    symbols, CreateFn, DestroyFn, HandleRequestFn, HookFn, RawHostApi, RawInstance, RawSink,
    RawSlice,
};
use justplug_sdk::DispatchError;
use serde::{Deserialize, Serialize};

use crate::dispatch::RequestContext;
use crate::error::{PluginError, Result};
use crate::library::LibraryHandle;

/// Lifecycle state of a plugin.
///
/// `Unloaded -> Loading -> Loaded -> Unloading -> Unloaded`. A failed load
/// goes back from `Loading` to `Unloaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Unloaded => "unloaded",
            PluginState::Loading => "loading",
            PluginState::Loaded => "loaded",
            PluginState::Unloading => "unloading",
        }
    }

    /// Whether requests may reach the instance.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, PluginState::Loaded)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plugin state transition record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: PluginState,
    pub to: PluginState,
    pub reason: String,
}

/// Plugin state machine for managing state transitions.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: PluginState,
    history: Vec<StateTransition>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: PluginState::Unloaded,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> PluginState {
        self.current
    }

    /// Move to `to`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, to: PluginState, reason: impl Into<String>) -> Result<()> {
        Self::validate_transition(self.current, to)?;
        self.history.push(StateTransition {
            from: self.current,
            to,
            reason: reason.into(),
        });
        self.current = to;
        Ok(())
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    fn validate_transition(from: PluginState, to: PluginState) -> Result<()> {
        use PluginState::*;
        match (from, to) {
            (Unloaded, Loading)
            | (Loading, Loaded)
            | (Loading, Unloaded)
            | (Loaded, Unloading)
            | (Unloading, Unloaded) => Ok(()),
            _ => Err(PluginError::InvalidTransition { from, to }),
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry points resolved from a module.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoints {
    pub create: CreateFn,
    pub destroy: DestroyFn,
    pub loaded: HookFn,
    pub about_to_be_unloaded: HookFn,
    pub handle_request: Option<HandleRequestFn>,
}

impl EntryPoints {
    /// Resolve every entry point up front so a module missing one is rejected
    /// before any of its code runs.
    pub fn resolve(handle: &LibraryHandle) -> Result<Self> {
        // SAFETY: each symbol is exported by the SDK with the matching
        // function type; resolve_symbol never returns null.
        unsafe {
            Ok(Self {
                create: cast(handle.resolve_symbol(symbols::CREATE)?),
                destroy: cast(handle.resolve_symbol(symbols::DESTROY)?),
                loaded: cast(handle.resolve_symbol(symbols::LOADED)?),
                about_to_be_unloaded: cast(handle.resolve_symbol(symbols::ABOUT_TO_BE_UNLOADED)?),
                handle_request: match handle.resolve_symbol(symbols::HANDLE_REQUEST) {
                    Ok(address) => Some(cast(address)),
                    Err(PluginError::SymbolNotFound { .. }) => None,
                    Err(e) => return Err(e),
                },
            })
        }
    }
}

unsafe fn cast<F: Copy>(address: *const c_void) -> F {
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*const c_void>());
    std::mem::transmute_copy(&address)
}

/// A live object created by a module's `create` entry point.
///
/// Dropping the instance calls the module's `destroy` exactly once.
pub struct PluginInstance {
    name: String,
    raw: RawInstance,
    entry: EntryPoints,
    // Must outlive `raw`: the instance holds a pointer to it.
    _context: Box<RequestContext>,
}

// SAFETY: plugins implement `Plugin: Send + Sync` and the SDK entry points only
// hand out shared references to the instance.
unsafe impl Send for PluginInstance {}
unsafe impl Sync for PluginInstance {}

impl PluginInstance {
    pub(crate) fn create(
        name: &str,
        entry: EntryPoints,
        context: Box<RequestContext>,
        host: RawHostApi,
    ) -> Result<Self> {
        // SAFETY: `host.context` points into `context`, which the instance keeps.
        let raw = unsafe { (entry.create)(host) };
        if raw.is_null() {
            return Err(PluginError::CreateFailed(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            raw,
            entry,
            _context: context,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_request_handler(&self) -> bool {
        self.entry.handle_request.is_some()
    }

    pub fn loaded(&self) -> Result<()> {
        self.run_hook("loaded", self.entry.loaded)
    }

    pub fn about_to_be_unloaded(&self) -> Result<()> {
        self.run_hook("about_to_be_unloaded", self.entry.about_to_be_unloaded)
    }

    fn run_hook(&self, hook: &'static str, f: HookFn) -> Result<()> {
        let mut error = None;
        // SAFETY: `raw` is live until drop; the sink outlives the call.
        let code = unsafe { f(self.raw, RawSink::collect_into(&mut error)) };
        if code == justplug_sdk::abi::status::OK {
            return Ok(());
        }
        let reason = error
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("status {}", code));
        Err(PluginError::HookFailed {
            name: self.name.clone(),
            hook,
            reason,
        })
    }

    /// Deliver a request. The answer is copied out before this returns.
    pub fn handle_request(
        &self,
        sender: &str,
        opcode: u16,
        input: &[u8],
    ) -> std::result::Result<Vec<u8>, DispatchError> {
        let Some(handle_request) = self.entry.handle_request else {
            return Err(DispatchError::Unhandled(opcode));
        };

        let mut output = None;
        // SAFETY: `raw` is live, the slices and the sink outlive the call.
        let code = unsafe {
            handle_request(
                self.raw,
                RawSlice::from_bytes(sender.as_bytes()),
                opcode,
                RawSlice::from_bytes(input),
                RawSink::collect_into(&mut output),
            )
        };
        let output = output.unwrap_or_default();
        match DispatchError::from_status(code, opcode, String::from_utf8_lossy(&output).into_owned())
        {
            None => Ok(output),
            Some(err) => Err(err),
        }
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        tracing::debug!(plugin = %self.name, "Destroying instance");
        // SAFETY: `raw` came from `create` of the same module and is not used
        // after this point.
        unsafe { (self.entry.destroy)(self.raw) };
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("name", &self.name)
            .field("handles_requests", &self.has_request_handler())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let mut machine = StateMachine::new();
        assert_eq!(machine.current(), PluginState::Unloaded);

        machine.transition(PluginState::Loading, "open").unwrap();
        machine.transition(PluginState::Loaded, "created").unwrap();
        machine.transition(PluginState::Unloading, "unload").unwrap();
        machine.transition(PluginState::Unloaded, "closed").unwrap();

        assert_eq!(machine.history().len(), 4);
        assert_eq!(machine.history()[1].to, PluginState::Loaded);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut machine = StateMachine::new();
        assert_eq!(
            machine.transition(PluginState::Loaded, "skip"),
            Err(PluginError::InvalidTransition {
                from: PluginState::Unloaded,
                to: PluginState::Loaded,
            })
        );
        assert!(machine.transition(PluginState::Unloading, "skip").is_err());
        assert_eq!(machine.current(), PluginState::Unloaded);

        machine.transition(PluginState::Loading, "open").unwrap();
        assert!(machine.transition(PluginState::Unloading, "skip").is_err());
        machine.transition(PluginState::Unloaded, "create failed").unwrap();
        assert!(machine.history().iter().all(|t| t.from != t.to));
    }

    #[test]
    fn test_only_loaded_accepts_requests() {
        assert!(PluginState::Loaded.accepts_requests());
        assert!(!PluginState::Loading.accepts_requests());
        assert!(!PluginState::Unloading.accepts_requests());
        assert!(!PluginState::Unloaded.accepts_requests());
    }
}
