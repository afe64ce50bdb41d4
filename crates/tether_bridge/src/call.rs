//! The call bridge.
//!
//! Host -> native calls read a name and arguments off the host stack and
//! run the instance's registry. Native -> host calls push a named host
//! global and its arguments and run it in protected mode. The instance's
//! host-call lock is held only while the host stack is read or written, so
//! the native side may call back from other threads while it runs. Results
//! are counted from the stack depth recorded before anything was pushed.

use tether_native::{NativeType, NativeValue};

use crate::error::BridgeError;
use crate::host::{HostStack, MULTRET};
use crate::instance::{HostLock, Instance};
use crate::marshal::{push_value, read_value, read_values, to_native, to_value};
use crate::value::Value;

/// Run `invoke(name, args...)` from the current host frame.
///
/// Returns how many results were pushed.
pub fn host_to_native<H: HostStack>(instance: &Instance<H>, host: &H) -> Result<i32, BridgeError> {
    let (name, args) = {
        let _guard = instance.host_lock.lock();
        let name = match read_value(host, 1) {
            Value::Str(name) => name,
            other => {
                return Err(BridgeError::BadArgument {
                    entrypoint: "invoke",
                    message: format!("expected a function name, got {other}"),
                });
            }
        };
        let args: Vec<NativeValue> = read_values(host, 2).into_iter().map(to_native).collect();
        (name, args)
    };
    tracing::debug!(instance = %instance.id, %name, args = args.len(), "host -> native");

    let results = instance.registry.call(&name, &args)?;
    let count = i32::try_from(results.len()).map_err(|_| BridgeError::CallFailed {
        name: name.clone(),
        message: "too many results".to_string(),
    })?;
    let _guard = instance.host_lock.lock();
    for result in &results {
        push_value(host, &to_value(result));
    }
    Ok(count)
}

/// Call host global `name` with `args`.
///
/// No results give `Nil`, one gives the value itself, more give a list of
/// them in order. The host stack is back at its starting depth on return.
pub fn native_to_host<H: HostStack>(
    host: &H,
    lock: &HostLock,
    name: &str,
    args: &[NativeValue],
) -> Result<NativeValue, BridgeError> {
    let nargs = i32::try_from(args.len()).map_err(|_| BridgeError::HostCallFailed {
        name: name.to_string(),
        message: "too many arguments".to_string(),
    })?;

    let _guard = lock.lock();
    let base = host.top();
    tracing::debug!(%name, args = args.len(), depth = base, "native -> host");

    host.get_global(name);
    if !host.is_function(base + 1) {
        host.set_top(base);
        return Err(BridgeError::NotCallable {
            name: name.to_string(),
        });
    }
    for arg in args {
        push_value(host, &to_value(arg));
    }
    if let Err(message) = host.pcall(nargs, MULTRET) {
        host.set_top(base);
        return Err(BridgeError::HostCallFailed {
            name: name.to_string(),
            message,
        });
    }

    let results: Vec<NativeValue> = read_values(host, base + 1).into_iter().map(to_native).collect();
    host.set_top(base);
    Ok(pack_results(results))
}

/// Collapse host results into the single value a native caller sees.
pub fn pack_results(mut results: Vec<NativeValue>) -> NativeValue {
    match results.len() {
        0 => NativeValue::Nil,
        1 => results.pop().unwrap_or(NativeValue::Nil),
        _ => NativeValue::list(NativeType::Any, results),
    }
}
