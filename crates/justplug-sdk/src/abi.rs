//! C ABI shared between the host and plugin modules.
//!
//! Every module exports the same fixed set of symbols. Nothing here relies on
//! Rust trait objects crossing the boundary, so a module only has to agree
//! with the host on these `#[repr(C)]` layouts.
//!
//! ```c
//! // Static descriptor, read before any plugin code runs
//! const RawDescriptor justplug_descriptor;
//!
//! void*    justplug_create(RawHostApi host);
//! void     justplug_destroy(void* instance);
//! uint16_t justplug_loaded(void* instance, RawSink error);
//! uint16_t justplug_about_to_be_unloaded(void* instance, RawSink error);
//!
//! // Optional: only modules that accept peer requests export it
//! uint16_t justplug_handle_request(void* instance, RawSlice sender, uint16_t opcode,
//!                                  RawSlice input, RawSink output);
//! ```

use std::ffi::c_void;

/// Interface version implemented by this SDK.
/// A module whose descriptor declares another version is never instantiated.
pub const PLUGIN_API_VERSION: u32 = 1;

/// Exported symbol names.
pub mod symbols {
    pub const DESCRIPTOR: &str = "justplug_descriptor";
    pub const CREATE: &str = "justplug_create";
    pub const DESTROY: &str = "justplug_destroy";
    pub const LOADED: &str = "justplug_loaded";
    pub const ABOUT_TO_BE_UNLOADED: &str = "justplug_about_to_be_unloaded";
    pub const HANDLE_REQUEST: &str = "justplug_handle_request";

    /// Symbols a module must export to be loadable.
    pub const REQUIRED: [&str; 5] = [DESCRIPTOR, CREATE, DESTROY, LOADED, ABOUT_TO_BE_UNLOADED];
}

/// Status codes returned across the boundary.
pub mod status {
    pub const OK: u16 = 0;
    pub const UNKNOWN_OPCODE: u16 = 1;
    pub const UNHANDLED: u16 = 2;
    pub const TARGET_UNAVAILABLE: u16 = 3;
    pub const MALFORMED: u16 = 4;
    pub const NOT_FOUND: u16 = 5;
    pub const FAILED: u16 = 6;
}

/// Borrowed byte range (`ptr` + `len`).
///
/// A null pointer or zero length is the empty slice.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawSlice {
    pub ptr: *const u8,
    pub len: usize,
}

// SAFETY: a RawSlice only ever points at immutable data.
unsafe impl Send for RawSlice {}
unsafe impl Sync for RawSlice {}

impl RawSlice {
    pub const EMPTY: RawSlice = RawSlice {
        ptr: std::ptr::null(),
        len: 0,
    };

    pub const fn from_static(s: &'static str) -> Self {
        Self {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    /// Borrow `bytes` for the duration of one call.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ptr.is_null() || self.len == 0
    }

    /// # Safety
    /// `ptr` must be null or valid for reads of `len` bytes for `'a`.
    pub unsafe fn as_bytes<'a>(&self) -> &'a [u8] {
        if self.is_empty() {
            &[]
        } else {
            std::slice::from_raw_parts(self.ptr, self.len)
        }
    }

    /// # Safety
    /// Same contract as [`RawSlice::as_bytes`].
    pub unsafe fn to_str<'a>(&self) -> Result<&'a str, std::str::Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }
}

/// One declared dependency: plugin name plus a semver requirement
/// (empty requirement matches any version).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawDependency {
    pub name: RawSlice,
    pub version: RawSlice,
}

unsafe impl Sync for RawDependency {}

impl RawDependency {
    pub const fn new(name: &'static str, version: &'static str) -> Self {
        Self {
            name: RawSlice::from_static(name),
            version: RawSlice::from_static(version),
        }
    }
}

/// Fixed-layout descriptor exported as `justplug_descriptor`.
#[repr(C)]
#[derive(Debug)]
pub struct RawDescriptor {
    pub api_version: u32,
    pub name: RawSlice,
    pub pretty_name: RawSlice,
    pub version: RawSlice,
    pub author: RawSlice,
    pub description: RawSlice,
    pub url: RawSlice,
    pub license: RawSlice,
    pub copyright: RawSlice,
    pub dependencies: *const RawDependency,
    pub dependencies_len: usize,
}

// SAFETY: descriptors are immutable statics.
unsafe impl Sync for RawDescriptor {}

impl RawDescriptor {
    pub const fn new(name: &'static str, version: &'static str) -> Self {
        Self {
            api_version: PLUGIN_API_VERSION,
            name: RawSlice::from_static(name),
            pretty_name: RawSlice::EMPTY,
            version: RawSlice::from_static(version),
            author: RawSlice::EMPTY,
            description: RawSlice::EMPTY,
            url: RawSlice::EMPTY,
            license: RawSlice::EMPTY,
            copyright: RawSlice::EMPTY,
            dependencies: std::ptr::null(),
            dependencies_len: 0,
        }
    }

    pub const fn with_api_version(mut self, api_version: u32) -> Self {
        self.api_version = api_version;
        self
    }

    pub const fn with_pretty_name(mut self, pretty_name: &'static str) -> Self {
        self.pretty_name = RawSlice::from_static(pretty_name);
        self
    }

    pub const fn with_author(mut self, author: &'static str) -> Self {
        self.author = RawSlice::from_static(author);
        self
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = RawSlice::from_static(description);
        self
    }

    pub const fn with_url(mut self, url: &'static str) -> Self {
        self.url = RawSlice::from_static(url);
        self
    }

    pub const fn with_license(mut self, license: &'static str) -> Self {
        self.license = RawSlice::from_static(license);
        self
    }

    pub const fn with_copyright(mut self, copyright: &'static str) -> Self {
        self.copyright = RawSlice::from_static(copyright);
        self
    }

    pub const fn with_dependencies(mut self, dependencies: &'static [RawDependency]) -> Self {
        self.dependencies = dependencies.as_ptr();
        self.dependencies_len = dependencies.len();
        self
    }

    /// # Safety
    /// `dependencies` must be null or valid for `dependencies_len` elements.
    pub unsafe fn dependencies(&self) -> &[RawDependency] {
        if self.dependencies.is_null() || self.dependencies_len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(self.dependencies, self.dependencies_len)
        }
    }
}

/// Output channel handed to a callee.
///
/// The callee calls `write` at most once, during the call, with a buffer it
/// owns. The caller copies what it needs before `write` returns; the buffer
/// is gone once the call is over.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawSink {
    pub user: *mut c_void,
    pub write: unsafe extern "C" fn(user: *mut c_void, data: *const u8, len: usize),
}

impl RawSink {
    /// Sink that copies the first write into `slot` and ignores later ones.
    pub fn collect_into(slot: &mut Option<Vec<u8>>) -> Self {
        Self {
            user: slot as *mut Option<Vec<u8>> as *mut c_void,
            write: collect_first_write,
        }
    }

    /// Sink that drops everything written to it.
    pub fn discard() -> Self {
        Self {
            user: std::ptr::null_mut(),
            write: discard_write,
        }
    }

    /// # Safety
    /// The sink must still be inside the call it was handed to.
    pub unsafe fn send(&self, data: &[u8]) {
        (self.write)(self.user, data.as_ptr(), data.len());
    }
}

unsafe extern "C" fn collect_first_write(user: *mut c_void, data: *const u8, len: usize) {
    if user.is_null() {
        return;
    }
    let slot = &mut *(user as *mut Option<Vec<u8>>);
    if slot.is_none() {
        let bytes = if data.is_null() || len == 0 {
            Vec::new()
        } else {
            std::slice::from_raw_parts(data, len).to_vec()
        };
        *slot = Some(bytes);
    }
}

unsafe extern "C" fn discard_write(_user: *mut c_void, _data: *const u8, _len: usize) {}

/// Request as it crosses the boundary.
///
/// An empty `target` addresses the host. `target_index` pins the request to
/// one load of the target (0 accepts whichever load is current).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawRequest {
    pub opcode: u16,
    pub target: RawSlice,
    pub target_index: u64,
    pub input: RawSlice,
}

/// Host entry point handed to every instance at creation.
pub type HostRequestFn =
    unsafe extern "C" fn(context: *const c_void, request: *const RawRequest, output: RawSink) -> u16;

/// The host side of the boundary as seen by one instance.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawHostApi {
    pub context: *const c_void,
    pub request: HostRequestFn,
}

// SAFETY: the host guarantees its request context is thread-safe.
unsafe impl Send for RawHostApi {}
unsafe impl Sync for RawHostApi {}

/// Opaque instance pointer owned by the module that created it.
pub type RawInstance = *mut c_void;

pub type CreateFn = unsafe extern "C" fn(host: RawHostApi) -> RawInstance;
pub type DestroyFn = unsafe extern "C" fn(instance: RawInstance);
pub type HookFn = unsafe extern "C" fn(instance: RawInstance, error: RawSink) -> u16;
pub type HandleRequestFn = unsafe extern "C" fn(
    instance: RawInstance,
    sender: RawSlice,
    opcode: u16,
    input: RawSlice,
    output: RawSink,
) -> u16;
