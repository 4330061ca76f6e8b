//! Generic `extern "C"` entry points backing the exported symbols.
//!
//! [`export_plugin!`](crate::export_plugin) instantiates these for one plugin
//! type under the fixed symbol names. [`symbol_table`] exposes the same
//! functions by address, for hosts that link plugins statically.

use std::any::Any;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use crate::abi::{
    status, symbols, CreateFn, DestroyFn, HandleRequestFn, HookFn, RawDescriptor, RawHostApi,
    RawInstance, RawSink, RawSlice,
};
use crate::plugin::{Host, HookResult, Plugin};
use crate::protocol::DispatchError;

/// Allocate an instance of `P`. Returns null if construction panics.
///
/// # Safety
/// `host` must stay valid until [`destroy`] is called on the result.
pub unsafe extern "C" fn create<P: Plugin>(host: RawHostApi) -> RawInstance {
    match panic::catch_unwind(AssertUnwindSafe(|| P::create(Host::from_raw(host)))) {
        Ok(plugin) => Box::into_raw(Box::new(plugin)) as RawInstance,
        Err(_) => ptr::null_mut(),
    }
}

/// Free an instance created by [`create`].
///
/// # Safety
/// `instance` must come from `create::<P>` and must not be used afterwards.
pub unsafe extern "C" fn destroy<P: Plugin>(instance: RawInstance) {
    if instance.is_null() {
        return;
    }
    let plugin = Box::from_raw(instance as *mut P);
    let _ = panic::catch_unwind(AssertUnwindSafe(move || drop(plugin)));
}

/// # Safety
/// `instance` must come from `create::<P>`; `error` must be a live sink.
pub unsafe extern "C" fn loaded<P: Plugin>(instance: RawInstance, error: RawSink) -> u16 {
    run_hook::<P>(instance, error, |plugin| plugin.loaded())
}

/// # Safety
/// Same contract as [`loaded`].
pub unsafe extern "C" fn about_to_be_unloaded<P: Plugin>(
    instance: RawInstance,
    error: RawSink,
) -> u16 {
    run_hook::<P>(instance, error, |plugin| plugin.about_to_be_unloaded())
}

/// # Safety
/// `instance` must come from `create::<P>`, the slices must be valid for the
/// call and `output` must be a live sink.
pub unsafe extern "C" fn handle_request<P: Plugin>(
    instance: RawInstance,
    sender: RawSlice,
    opcode: u16,
    input: RawSlice,
    output: RawSink,
) -> u16 {
    let Some(plugin) = (instance as *const P).as_ref() else {
        output.send(b"null instance");
        return status::FAILED;
    };
    let sender = String::from_utf8_lossy(sender.as_bytes());
    let input = input.as_bytes();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        plugin.handle_request(&sender, opcode, input)
    }))
    .unwrap_or_else(|payload| Err(DispatchError::Failed(panic_message(&*payload))));

    match result {
        Ok(bytes) => {
            output.send(&bytes);
            status::OK
        }
        Err(err) => {
            output.send(err.detail().as_bytes());
            err.status()
        }
    }
}

unsafe fn run_hook<P: Plugin>(
    instance: RawInstance,
    error: RawSink,
    hook: impl FnOnce(&P) -> HookResult,
) -> u16 {
    let Some(plugin) = (instance as *const P).as_ref() else {
        error.send(b"null instance");
        return status::FAILED;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| hook(plugin))) {
        Ok(Ok(())) => status::OK,
        Ok(Err(err)) => {
            error.send(err.to_string().as_bytes());
            status::FAILED
        }
        Err(payload) => {
            error.send(panic_message(&*payload).as_bytes());
            status::FAILED
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Exported symbols of plugin `P` by name, as a dynamic module would expose
/// them. `with_requests` controls whether the optional request handler is
/// included.
pub fn symbol_table<P: Plugin>(
    descriptor: &'static RawDescriptor,
    with_requests: bool,
) -> Vec<(&'static str, *const c_void)> {
    let mut table = vec![
        (
            symbols::DESCRIPTOR,
            descriptor as *const RawDescriptor as *const c_void,
        ),
        (symbols::CREATE, create::<P> as CreateFn as *const c_void),
        (symbols::DESTROY, destroy::<P> as DestroyFn as *const c_void),
        (symbols::LOADED, loaded::<P> as HookFn as *const c_void),
        (
            symbols::ABOUT_TO_BE_UNLOADED,
            about_to_be_unloaded::<P> as HookFn as *const c_void,
        ),
    ];
    if with_requests {
        table.push((
            symbols::HANDLE_REQUEST,
            handle_request::<P> as HandleRequestFn as *const c_void,
        ));
    }
    table
}
