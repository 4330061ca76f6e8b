//! Plugin-side API: the [`Plugin`] trait and the [`Host`] client.

use std::path::PathBuf;

use semver::Version;

use crate::abi::{status, RawHostApi, RawRequest, RawSink, RawSlice};
use crate::metadata::PluginMetadata;
use crate::protocol::{DispatchError, PluginRef, Reply, Request};

/// Error returned from a lifecycle hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a lifecycle hook.
pub type HookResult = Result<(), HookError>;

/// Behaviour of a plugin instance.
///
/// Methods take `&self`: a hook may send a request that comes back into the
/// same instance, so state that changes needs interior mutability.
pub trait Plugin: Send + Sync + 'static {
    /// Build the instance. `host` stays valid until the instance is destroyed.
    fn create(host: Host) -> Self
    where
        Self: Sized;

    /// Called once the instance is registered as loaded. Every declared
    /// dependency is loaded at this point.
    fn loaded(&self) -> HookResult {
        Ok(())
    }

    /// Called right before the instance is destroyed and its module closed.
    /// Dependencies are still loaded.
    fn about_to_be_unloaded(&self) -> HookResult {
        Ok(())
    }

    /// Answer a request sent to this plugin by the host or another plugin.
    fn handle_request(
        &self,
        _sender: &str,
        opcode: u16,
        _input: &[u8],
    ) -> Result<Vec<u8>, DispatchError> {
        Err(DispatchError::Unhandled(opcode))
    }
}

/// Handle through which an instance talks to the host.
#[derive(Debug, Clone, Copy)]
pub struct Host {
    raw: RawHostApi,
}

impl Host {
    pub fn from_raw(raw: RawHostApi) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> RawHostApi {
        self.raw
    }

    /// Send a raw request. The returned bytes are a copy owned by the caller.
    pub fn send(
        &self,
        opcode: u16,
        target: Option<&PluginRef>,
        input: &[u8],
    ) -> Result<Vec<u8>, DispatchError> {
        let (target_name, target_index) = match target {
            Some(t) => (t.name.as_bytes(), t.load_index),
            None => (&[][..], 0),
        };
        let request = RawRequest {
            opcode,
            target: RawSlice::from_bytes(target_name),
            target_index,
            input: RawSlice::from_bytes(input),
        };

        let mut output = None;
        // SAFETY: `request` and `output` outlive the call; the host only
        // writes to the sink before returning.
        let code = unsafe {
            (self.raw.request)(self.raw.context, &request, RawSink::collect_into(&mut output))
        };
        let output = output.unwrap_or_default();

        if code == status::OK {
            return Ok(output);
        }
        let detail = String::from_utf8_lossy(&output).into_owned();
        Err(DispatchError::from_status(code, opcode, detail)
            .unwrap_or(DispatchError::Failed(format!("status {}", code))))
    }

    /// Send a typed request and decode the answer.
    pub fn request(&self, request: &Request) -> Result<Reply, DispatchError> {
        let output = self.send(request.opcode(), request.target(), &request.encode_input())?;
        Reply::decode(request.opcode(), &output)
    }

    pub fn app_directory(&self) -> Result<PathBuf, DispatchError> {
        match self.request(&Request::AppDirectory)? {
            Reply::AppDirectory(dir) => Ok(dir),
            other => Err(unexpected(other)),
        }
    }

    pub fn plugin_api(&self) -> Result<u32, DispatchError> {
        match self.request(&Request::PluginApi)? {
            Reply::PluginApi(api) => Ok(api),
            other => Err(unexpected(other)),
        }
    }

    pub fn plugins_count(&self) -> Result<usize, DispatchError> {
        match self.request(&Request::PluginsCount)? {
            Reply::PluginsCount(count) => Ok(count),
            other => Err(unexpected(other)),
        }
    }

    /// Metadata of `name`, or of the calling plugin when `name` is `None`.
    pub fn plugin_info(&self, name: Option<&str>) -> Result<PluginMetadata, DispatchError> {
        match self.request(&Request::PluginInfo(name.map(str::to_string)))? {
            Reply::PluginInfo(meta) => Ok(meta),
            other => Err(unexpected(other)),
        }
    }

    pub fn plugin_version(&self, name: Option<&str>) -> Result<Version, DispatchError> {
        match self.request(&Request::PluginVersion(name.map(str::to_string)))? {
            Reply::PluginVersion(version) => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    pub fn has_plugin(&self, name: &str) -> Result<bool, DispatchError> {
        match self.request(&Request::HasPlugin(name.to_string()))? {
            Reply::Flag(flag) => Ok(flag),
            other => Err(unexpected(other)),
        }
    }

    pub fn is_plugin_loaded(&self, name: &str) -> Result<bool, DispatchError> {
        match self.request(&Request::IsPluginLoaded(name.to_string()))? {
            Reply::Flag(flag) => Ok(flag),
            other => Err(unexpected(other)),
        }
    }

    /// Look up a loaded plugin. The returned reference is pinned to the
    /// current load: once that plugin is unloaded, requests to it fail with
    /// `TargetUnavailable` even if a plugin of the same name comes back.
    pub fn find_plugin(&self, name: &str) -> Result<PluginRef, DispatchError> {
        match self.request(&Request::FindPlugin(name.to_string()))? {
            Reply::Plugin(plugin) => Ok(plugin),
            other => Err(unexpected(other)),
        }
    }

    /// Send a user opcode to another plugin.
    pub fn call(&self, target: &PluginRef, opcode: u16, payload: &[u8]) -> Result<Vec<u8>, DispatchError> {
        self.send(opcode, Some(target), payload)
    }
}

fn unexpected(reply: Reply) -> DispatchError {
    DispatchError::Malformed(format!("unexpected reply: {:?}", reply))
}
