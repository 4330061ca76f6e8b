//! Declarative macros for plugin modules.

/// Export a plugin type and its descriptor under the fixed symbol names.
///
/// The descriptor must be a constant [`RawDescriptor`](crate::abi::RawDescriptor)
/// expression. Append `, without_requests` to leave out the optional request
/// handler; the host then answers requests to this plugin with `Unhandled`.
///
/// # Example
///
/// ```rust,ignore
/// use justplug_sdk::prelude::*;
///
/// struct Hello;
///
/// impl Plugin for Hello {
///     fn create(_host: Host) -> Self {
///         Hello
///     }
/// }
///
/// export_plugin!(
///     Hello,
///     RawDescriptor::new("hello", "1.0.0").with_pretty_name("Hello")
/// );
/// ```
#[macro_export]
macro_rules! export_plugin {
    (@lifecycle $plugin:ty, $descriptor:expr) => {
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static justplug_descriptor: $crate::abi::RawDescriptor = $descriptor;

        #[no_mangle]
        pub unsafe extern "C" fn justplug_create(
            host: $crate::abi::RawHostApi,
        ) -> $crate::abi::RawInstance {
            $crate::entry::create::<$plugin>(host)
        }

        #[no_mangle]
        pub unsafe extern "C" fn justplug_destroy(instance: $crate::abi::RawInstance) {
            $crate::entry::destroy::<$plugin>(instance)
        }

        #[no_mangle]
        pub unsafe extern "C" fn justplug_loaded(
            instance: $crate::abi::RawInstance,
            error: $crate::abi::RawSink,
        ) -> u16 {
            $crate::entry::loaded::<$plugin>(instance, error)
        }

        #[no_mangle]
        pub unsafe extern "C" fn justplug_about_to_be_unloaded(
            instance: $crate::abi::RawInstance,
            error: $crate::abi::RawSink,
        ) -> u16 {
            $crate::entry::about_to_be_unloaded::<$plugin>(instance, error)
        }
    };
    ($plugin:ty, $descriptor:expr, without_requests) => {
        $crate::export_plugin!(@lifecycle $plugin, $descriptor);
    };
    ($plugin:ty, $descriptor:expr $(,)?) => {
        $crate::export_plugin!(@lifecycle $plugin, $descriptor);

        #[no_mangle]
        pub unsafe extern "C" fn justplug_handle_request(
            instance: $crate::abi::RawInstance,
            sender: $crate::abi::RawSlice,
            opcode: u16,
            input: $crate::abi::RawSlice,
            output: $crate::abi::RawSink,
        ) -> u16 {
            $crate::entry::handle_request::<$plugin>(instance, sender, opcode, input, output)
        }
    };
}
