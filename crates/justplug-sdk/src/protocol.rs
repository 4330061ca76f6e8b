//! Typed request protocol.
//!
//! On the wire a request is an opcode, an optional target and a byte payload.
//! Each built-in opcode has a fixed JSON payload shape, recovered here as
//! [`Request`] and [`Reply`] variants. Opcodes from [`opcode::USER_BASE`] up
//! carry opaque bytes whose meaning is agreed between sender and handler.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::abi::status;
use crate::metadata::PluginMetadata;

/// Built-in opcodes answered by the host.
pub mod opcode {
    /// Directory of the host executable. Output: JSON string.
    pub const GET_APPDIRECTORY: u16 = 0;
    /// Host interface version. Output: JSON number.
    pub const GET_PLUGINAPI: u16 = 1;
    /// Number of loaded plugins. Output: JSON number.
    pub const GET_PLUGINSCOUNT: u16 = 2;
    /// Metadata of a plugin. Input: optional JSON string name, empty means
    /// the sender. Output: JSON metadata object.
    pub const GET_PLUGININFO: u16 = 3;
    /// Version of a plugin. Input as `GET_PLUGININFO`. Output: JSON string.
    pub const GET_PLUGINVERSION: u16 = 4;
    /// Whether a plugin is registered. Input: JSON string name. Output: JSON bool.
    pub const CHECK_PLUGIN: u16 = 5;
    /// Whether a plugin is loaded. Input: JSON string name. Output: JSON bool.
    pub const CHECK_PLUGINLOADED: u16 = 6;
    /// Handle to a loaded plugin. Input: JSON string name.
    /// Output: JSON `{"name", "load_index"}`.
    pub const FIND_PLUGIN: u16 = 7;

    /// First opcode available to plugins and host extensions.
    pub const USER_BASE: u16 = 0x100;

    pub fn is_builtin(op: u16) -> bool {
        op < USER_BASE
    }

    pub fn name(op: u16) -> Option<&'static str> {
        Some(match op {
            GET_APPDIRECTORY => "GET_APPDIRECTORY",
            GET_PLUGINAPI => "GET_PLUGINAPI",
            GET_PLUGINSCOUNT => "GET_PLUGINSCOUNT",
            GET_PLUGININFO => "GET_PLUGININFO",
            GET_PLUGINVERSION => "GET_PLUGINVERSION",
            CHECK_PLUGIN => "CHECK_PLUGIN",
            CHECK_PLUGINLOADED => "CHECK_PLUGINLOADED",
            FIND_PLUGIN => "FIND_PLUGIN",
            _ => return None,
        })
    }
}

/// Identity of a plugin as a request target.
///
/// `load_index` pins the reference to one particular load of the plugin; 0
/// means "whatever is currently loaded under this name".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginRef {
    pub name: String,
    #[serde(default)]
    pub load_index: u64,
}

impl PluginRef {
    pub fn new(name: impl Into<String>, load_index: u64) -> Self {
        Self {
            name: name.into(),
            load_index,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, 0)
    }

    pub fn is_pinned(&self) -> bool {
        self.load_index != 0
    }
}

impl Display for PluginRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_pinned() {
            write!(f, "{}#{}", self.name, self.load_index)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Failure of a dispatched request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Host-directed request with an opcode the host does not know.
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u16),

    /// The target has no handler for this request. A valid no-op answer.
    #[error("Request {0} was not handled")]
    Unhandled(u16),

    /// The target is not loaded (never was, not yet, or not anymore).
    #[error("Target unavailable: {0}")]
    TargetUnavailable(String),

    /// The envelope or its payload does not match the opcode's shape.
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// A plugin named in the payload does not exist.
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// The handler ran and reported a failure.
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl DispatchError {
    /// Wire status for this error.
    pub fn status(&self) -> u16 {
        match self {
            DispatchError::UnknownOpcode(_) => status::UNKNOWN_OPCODE,
            DispatchError::Unhandled(_) => status::UNHANDLED,
            DispatchError::TargetUnavailable(_) => status::TARGET_UNAVAILABLE,
            DispatchError::Malformed(_) => status::MALFORMED,
            DispatchError::NotFound(_) => status::NOT_FOUND,
            DispatchError::Failed(_) => status::FAILED,
        }
    }

    /// Text written to the output sink alongside a failing status.
    pub fn detail(&self) -> String {
        match self {
            DispatchError::UnknownOpcode(_) | DispatchError::Unhandled(_) => String::new(),
            DispatchError::TargetUnavailable(s)
            | DispatchError::Malformed(s)
            | DispatchError::NotFound(s)
            | DispatchError::Failed(s) => s.clone(),
        }
    }

    /// Rebuild an error from a wire status. Returns `None` for `OK`.
    pub fn from_status(code: u16, opcode: u16, detail: String) -> Option<Self> {
        Some(match code {
            status::OK => return None,
            status::UNKNOWN_OPCODE => DispatchError::UnknownOpcode(opcode),
            status::UNHANDLED => DispatchError::Unhandled(opcode),
            status::TARGET_UNAVAILABLE => DispatchError::TargetUnavailable(detail),
            status::MALFORMED => DispatchError::Malformed(detail),
            status::NOT_FOUND => DispatchError::NotFound(detail),
            other if detail.is_empty() => DispatchError::Failed(format!("status {}", other)),
            _ => DispatchError::Failed(detail),
        })
    }
}

/// A request in typed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    AppDirectory,
    PluginApi,
    PluginsCount,
    /// `None` asks about the sender itself.
    PluginInfo(Option<String>),
    PluginVersion(Option<String>),
    HasPlugin(String),
    IsPluginLoaded(String),
    FindPlugin(String),
    /// User opcode, to the host (`target: None`) or to a plugin.
    Custom {
        target: Option<PluginRef>,
        opcode: u16,
        payload: Vec<u8>,
    },
}

impl Request {
    pub fn opcode(&self) -> u16 {
        match self {
            Request::AppDirectory => opcode::GET_APPDIRECTORY,
            Request::PluginApi => opcode::GET_PLUGINAPI,
            Request::PluginsCount => opcode::GET_PLUGINSCOUNT,
            Request::PluginInfo(_) => opcode::GET_PLUGININFO,
            Request::PluginVersion(_) => opcode::GET_PLUGINVERSION,
            Request::HasPlugin(_) => opcode::CHECK_PLUGIN,
            Request::IsPluginLoaded(_) => opcode::CHECK_PLUGINLOADED,
            Request::FindPlugin(_) => opcode::FIND_PLUGIN,
            Request::Custom { opcode, .. } => *opcode,
        }
    }

    pub fn target(&self) -> Option<&PluginRef> {
        match self {
            Request::Custom { target, .. } => target.as_ref(),
            _ => None,
        }
    }

    /// Payload bytes for the wire.
    pub fn encode_input(&self) -> Vec<u8> {
        match self {
            Request::AppDirectory | Request::PluginApi | Request::PluginsCount => Vec::new(),
            Request::PluginInfo(name) | Request::PluginVersion(name) => {
                name.as_deref().map(encode_name).unwrap_or_default()
            }
            Request::HasPlugin(name) | Request::IsPluginLoaded(name) | Request::FindPlugin(name) => {
                encode_name(name)
            }
            Request::Custom { payload, .. } => payload.clone(),
        }
    }

    /// Decode a host-directed request.
    pub fn decode(op: u16, input: &[u8]) -> Result<Request, DispatchError> {
        Ok(match op {
            opcode::GET_APPDIRECTORY => Request::AppDirectory,
            opcode::GET_PLUGINAPI => Request::PluginApi,
            opcode::GET_PLUGINSCOUNT => Request::PluginsCount,
            opcode::GET_PLUGININFO => Request::PluginInfo(optional_name(input)?),
            opcode::GET_PLUGINVERSION => Request::PluginVersion(optional_name(input)?),
            opcode::CHECK_PLUGIN => Request::HasPlugin(required_name(op, input)?),
            opcode::CHECK_PLUGINLOADED => Request::IsPluginLoaded(required_name(op, input)?),
            opcode::FIND_PLUGIN => Request::FindPlugin(required_name(op, input)?),
            op if opcode::is_builtin(op) => return Err(DispatchError::UnknownOpcode(op)),
            op => Request::Custom {
                target: None,
                opcode: op,
                payload: input.to_vec(),
            },
        })
    }
}

fn encode_name(name: &str) -> Vec<u8> {
    serde_json::Value::String(name.to_string())
        .to_string()
        .into_bytes()
}

fn optional_name(input: &[u8]) -> Result<Option<String>, DispatchError> {
    if input.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice::<String>(input)
        .map(Some)
        .map_err(|e| DispatchError::Malformed(format!("expected a plugin name: {}", e)))
}

fn required_name(op: u16, input: &[u8]) -> Result<String, DispatchError> {
    optional_name(input)?.ok_or_else(|| {
        DispatchError::Malformed(format!(
            "{} requires a plugin name",
            opcode::name(op).unwrap_or("request")
        ))
    })
}

/// A successful answer in typed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    AppDirectory(PathBuf),
    PluginApi(u32),
    PluginsCount(usize),
    PluginInfo(PluginMetadata),
    PluginVersion(Version),
    Flag(bool),
    Plugin(PluginRef),
    Custom(Vec<u8>),
}

impl Reply {
    pub fn encode(&self) -> Result<Vec<u8>, DispatchError> {
        let encoded = match self {
            Reply::AppDirectory(dir) => serde_json::to_vec(&dir.to_string_lossy()),
            Reply::PluginApi(api) => serde_json::to_vec(api),
            Reply::PluginsCount(count) => serde_json::to_vec(count),
            Reply::PluginInfo(meta) => serde_json::to_vec(meta),
            Reply::PluginVersion(version) => serde_json::to_vec(version),
            Reply::Flag(flag) => serde_json::to_vec(flag),
            Reply::Plugin(plugin) => serde_json::to_vec(plugin),
            Reply::Custom(bytes) => return Ok(bytes.clone()),
        };
        encoded.map_err(|e| DispatchError::Failed(format!("cannot encode reply: {}", e)))
    }

    /// Decode the answer to a request with opcode `op`.
    pub fn decode(op: u16, output: &[u8]) -> Result<Reply, DispatchError> {
        fn json<T: serde::de::DeserializeOwned>(output: &[u8]) -> Result<T, DispatchError> {
            serde_json::from_slice(output)
                .map_err(|e| DispatchError::Malformed(format!("unexpected reply payload: {}", e)))
        }

        Ok(match op {
            opcode::GET_APPDIRECTORY => Reply::AppDirectory(PathBuf::from(json::<String>(output)?)),
            opcode::GET_PLUGINAPI => Reply::PluginApi(json(output)?),
            opcode::GET_PLUGINSCOUNT => Reply::PluginsCount(json(output)?),
            opcode::GET_PLUGININFO => Reply::PluginInfo(json(output)?),
            opcode::GET_PLUGINVERSION => Reply::PluginVersion(json(output)?),
            opcode::CHECK_PLUGIN | opcode::CHECK_PLUGINLOADED => Reply::Flag(json(output)?),
            opcode::FIND_PLUGIN => Reply::Plugin(json(output)?),
            _ => Reply::Custom(output.to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = DispatchError::TargetUnavailable("beta".into());
        let back = DispatchError::from_status(err.status(), 0x100, err.detail());
        assert_eq!(back, Some(err));

        assert_eq!(
            DispatchError::from_status(status::UNHANDLED, 0x101, String::new()),
            Some(DispatchError::Unhandled(0x101))
        );
        assert_eq!(DispatchError::from_status(status::OK, 0, String::new()), None);
        assert!(matches!(
            DispatchError::from_status(99, 0, String::new()),
            Some(DispatchError::Failed(_))
        ));
    }

    #[test]
    fn test_decode_builtin_requests() {
        assert_eq!(
            Request::decode(opcode::GET_PLUGININFO, b"").unwrap(),
            Request::PluginInfo(None)
        );
        assert_eq!(
            Request::decode(opcode::GET_PLUGININFO, br#""alpha""#).unwrap(),
            Request::PluginInfo(Some("alpha".into()))
        );
        assert_eq!(
            Request::decode(opcode::FIND_PLUGIN, &Request::FindPlugin("x".into()).encode_input())
                .unwrap(),
            Request::FindPlugin("x".into())
        );
    }

    #[test]
    fn test_missing_mandatory_name_is_malformed() {
        assert!(matches!(
            Request::decode(opcode::CHECK_PLUGIN, b""),
            Err(DispatchError::Malformed(_))
        ));
        assert!(matches!(
            Request::decode(opcode::CHECK_PLUGINLOADED, b"not json"),
            Err(DispatchError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_builtin_opcode() {
        assert_eq!(
            Request::decode(0x42, b""),
            Err(DispatchError::UnknownOpcode(0x42))
        );
        assert!(matches!(
            Request::decode(opcode::USER_BASE + 1, b"raw"),
            Ok(Request::Custom { target: None, .. })
        ));
    }

    #[test]
    fn test_reply_payload_shapes() {
        let bytes = Reply::Plugin(PluginRef::new("beta", 3)).encode().unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&bytes).unwrap(),
            serde_json::json!({"name": "beta", "load_index": 3})
        );

        let count = Reply::PluginsCount(2).encode().unwrap();
        assert_eq!(count, b"2");
        assert_eq!(
            Reply::decode(opcode::GET_PLUGINSCOUNT, &count).unwrap(),
            Reply::PluginsCount(2)
        );
    }

    #[test]
    fn test_plugin_ref_display() {
        assert_eq!(PluginRef::named("a").to_string(), "a");
        assert_eq!(PluginRef::new("a", 4).to_string(), "a#4");
    }
}
