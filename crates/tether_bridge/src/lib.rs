//! Tether Bridge - connects a stack-based host scripting runtime to the
//! tether script evaluator.
//!
//! Each host session gets one [`Instance`]: an evaluator, a
//! [`SharedRegistry`] of functions the host can invoke by name, a
//! cancellation token and a host-call lock. The [`Bridge`] keeps the
//! instances and answers the host's four operations:
//!
//! | Operation | Host arguments | Result |
//! |---|---|---|
//! | `new` | none | none |
//! | `exec` | source text | none, or a host error |
//! | `shutdown` | none | none |
//! | `invoke` | function name, values... | the function's results, or a host error |
//!
//! Within evaluated source, `bridge.call_host(name, args...)` calls a host
//! global, `bridge.register(name, f)` makes `f` invocable from the host,
//! and `context.global` is the instance's cancellation context.
//!
//! The host is reached only through [`HostStack`]. [`MemoryHost`] is a
//! complete in-memory implementation.

mod boundary;
mod call;
mod config;
mod error;
mod evaluator;
mod host;
mod instance;
mod marshal;
mod memory_host;
mod registry;
mod value;

pub use boundary::{Bridge, GC_PROXY_FIELD};
pub use call::{host_to_native, native_to_host, pack_results};
pub use config::{BridgeConfig, DEFAULT_MODULE_META};
pub use error::BridgeError;
pub use evaluator::{script_evaluator, Evaluator, EvaluatorFactory};
pub use host::{Entrypoint, HostId, HostStack, HostType, MULTRET};
pub use instance::{HostLock, Instance, InstanceId, InstanceTable};
pub use marshal::{push_value, read_value, read_values, to_native, to_value};
pub use memory_host::{HostFn, HostValue, MemoryHost};
pub use registry::{FunctionRegistry, SharedRegistry};
pub use value::Value;

pub use tether_native::{CancelToken, Exports, NativeFunction, NativeType, NativeValue, Signature};

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Call this once at startup. Safe to call multiple times.
/// Enable with `RUST_LOG=tether_bridge=debug` or `RUST_LOG=tether_bridge=trace`.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        // Only initialize if RUST_LOG is set
        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
