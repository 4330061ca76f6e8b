//! Request dispatch.
//!
//! Requests without a target are answered by the host: built-in opcodes here,
//! user opcodes by handlers registered with
//! [`PluginManager::register_handler`](crate::PluginManager::register_handler).
//! Requests with a target go to that plugin's request handler, if it exports
//! one. Dispatch is synchronous and reentrant: no registry lock is held while
//! a handler runs, so handlers may send further requests.

use std::collections::HashMap;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use justplug_sdk::abi::{status, RawHostApi, RawRequest, RawSink, PLUGIN_API_VERSION};
use justplug_sdk::{opcode, DispatchError, PluginRef, Reply, Request};
use parking_lot::RwLock;

use crate::manager::ManagerShared;

/// A request on its way to the host or a plugin.
///
/// `input` is borrowed for the duration of the call only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub opcode: u16,
    /// `None` addresses the host.
    pub target: Option<PluginRef>,
    pub input: &'a [u8],
}

impl<'a> Envelope<'a> {
    pub fn to_host(opcode: u16, input: &'a [u8]) -> Self {
        Self {
            opcode,
            target: None,
            input,
        }
    }

    pub fn to_plugin(target: PluginRef, opcode: u16, input: &'a [u8]) -> Self {
        Self {
            opcode,
            target: Some(target),
            input,
        }
    }
}

/// Host-side handler for a user opcode.
pub trait RequestHandler: Send + Sync {
    /// `sender` is `None` when the host itself sent the request.
    fn handle(&self, sender: Option<&str>, input: &[u8]) -> Result<Vec<u8>, DispatchError>;
}

impl<F> RequestHandler for F
where
    F: Fn(Option<&str>, &[u8]) -> Result<Vec<u8>, DispatchError> + Send + Sync,
{
    fn handle(&self, sender: Option<&str>, input: &[u8]) -> Result<Vec<u8>, DispatchError> {
        self(sender, input)
    }
}

/// Registered host handlers.
#[derive(Default)]
pub(crate) struct Dispatcher {
    handlers: RwLock<HashMap<u16, Arc<dyn RequestHandler>>>,
}

impl Dispatcher {
    pub(crate) fn register(
        &self,
        op: u16,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), DispatchError> {
        if opcode::is_builtin(op) {
            return Err(DispatchError::Malformed(format!(
                "opcode {:#x} is reserved for built-in requests",
                op
            )));
        }
        self.handlers.write().insert(op, handler);
        Ok(())
    }

    pub(crate) fn unregister(&self, op: u16) -> bool {
        self.handlers.write().remove(&op).is_some()
    }

    fn handler(&self, op: u16) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.read().get(&op).cloned()
    }

    /// Route one request. The answer is owned by the caller.
    pub(crate) fn dispatch(
        &self,
        shared: &ManagerShared,
        sender: Option<&str>,
        envelope: Envelope<'_>,
    ) -> Result<Vec<u8>, DispatchError> {
        let op = envelope.opcode;
        tracing::debug!(
            opcode = op,
            name = opcode::name(op).unwrap_or("user"),
            sender = sender.unwrap_or("host"),
            target = %envelope.target.as_ref().map(|t| t.to_string()).unwrap_or_default(),
            "Dispatching request"
        );

        match envelope.target {
            Some(target) => to_plugin(shared, sender, &target, op, envelope.input),
            None if opcode::is_builtin(op) => {
                let request = Request::decode(op, envelope.input)?;
                builtin(shared, sender, request)?.encode()
            }
            None => {
                // Cloned out so the handler runs without the table lock.
                let handler = self.handler(op).ok_or(DispatchError::UnknownOpcode(op))?;
                handler.handle(sender, envelope.input)
            }
        }
    }
}

fn to_plugin(
    shared: &ManagerShared,
    sender: Option<&str>,
    target: &PluginRef,
    op: u16,
    input: &[u8],
) -> Result<Vec<u8>, DispatchError> {
    let unavailable = || DispatchError::TargetUnavailable(target.to_string());
    let slot = shared.registry.read().get(&target.name).ok_or_else(unavailable)?;
    if target.is_pinned() && slot.load_index() != target.load_index {
        return Err(unavailable());
    }
    slot.call(sender.unwrap_or_default(), op, input)
}

/// Answer a built-in request.
fn builtin(
    shared: &ManagerShared,
    sender: Option<&str>,
    request: Request,
) -> Result<Reply, DispatchError> {
    let subject = |name: Option<String>| {
        name.or_else(|| sender.map(str::to_string)).ok_or_else(|| {
            DispatchError::Malformed("a plugin name is required when the host asks".to_string())
        })
    };
    let lookup = |name: &str| {
        shared
            .registry
            .read()
            .get(name)
            .ok_or_else(|| DispatchError::NotFound(name.to_string()))
    };

    Ok(match request {
        Request::AppDirectory => Reply::AppDirectory(shared.app_dir.clone()),
        Request::PluginApi => Reply::PluginApi(PLUGIN_API_VERSION),
        Request::PluginsCount => Reply::PluginsCount(shared.registry.read().loaded_count()),
        Request::PluginInfo(name) => {
            Reply::PluginInfo(lookup(&subject(name)?)?.metadata().clone())
        }
        Request::PluginVersion(name) => {
            Reply::PluginVersion(lookup(&subject(name)?)?.metadata().version.clone())
        }
        Request::HasPlugin(name) => Reply::Flag(shared.registry.read().contains(&name)),
        Request::IsPluginLoaded(name) => Reply::Flag(
            shared
                .registry
                .read()
                .get(&name)
                .map_or(false, |slot| slot.is_loaded()),
        ),
        Request::FindPlugin(name) => {
            let slot = lookup(&name)?;
            if !slot.is_loaded() {
                return Err(DispatchError::TargetUnavailable(name));
            }
            Reply::Plugin(PluginRef::new(name, slot.load_index()))
        }
        Request::Custom { opcode: op, .. } => return Err(DispatchError::UnknownOpcode(op)),
    })
}

/// Per-instance state behind the `context` pointer of its [`RawHostApi`].
pub struct RequestContext {
    shared: Weak<ManagerShared>,
    sender: String,
}

impl RequestContext {
    pub(crate) fn new(shared: Weak<ManagerShared>, sender: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            shared,
            sender: sender.into(),
        })
    }

    /// Host API for the instance owning this context. Only valid while the
    /// boxed context is alive.
    pub(crate) fn host_api(&self) -> RawHostApi {
        RawHostApi {
            context: self as *const Self as *const c_void,
            request: host_request,
        }
    }
}

/// Entry point plugins call to send requests.
unsafe extern "C" fn host_request(
    context: *const c_void,
    request: *const RawRequest,
    output: RawSink,
) -> u16 {
    let Some(context) = (context as *const RequestContext).as_ref() else {
        output.send(b"missing request context");
        return status::FAILED;
    };
    let Some(request) = request.as_ref() else {
        output.send(b"missing request");
        return status::MALFORMED;
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let target = match request.target.to_str() {
            Ok("") => None,
            Ok(name) => Some(PluginRef::new(name, request.target_index)),
            Err(e) => {
                return Err(DispatchError::Malformed(format!(
                    "target name is not UTF-8: {}",
                    e
                )))
            }
        };
        let shared = context
            .shared
            .upgrade()
            .ok_or_else(|| DispatchError::TargetUnavailable("host is shutting down".into()))?;
        let envelope = Envelope {
            opcode: request.opcode,
            target,
            input: request.input.as_bytes(),
        };
        shared
            .dispatcher
            .dispatch(&shared, Some(&context.sender), envelope)
    }))
    .unwrap_or_else(|_| Err(DispatchError::Failed("host handler panicked".into())));

    match result {
        Ok(bytes) => {
            output.send(&bytes);
            status::OK
        }
        Err(err) => {
            tracing::debug!(sender = %context.sender, "Request failed: {}", err);
            output.send(err.detail().as_bytes());
            err.status()
        }
    }
}
