//! Tether Lua - the Tether bridge as a loadable Lua 5.4 module.
//!
//! `require("tether")` calls [`luaopen_tether`], which starts the first
//! interpreter for the loading state and returns the module table:
//!
//! ```lua
//! local tether = require("tether")
//! tether.exec([[
//!     fn answer() -> int { 42 }
//!     bridge.register("answer", answer);
//! ]])
//! print(tether.invoke("answer"))  --> 42.0
//! tether.shutdown()
//! ```
//!
//! # Errors
//!
//! Bridge errors are raised as Lua errors carrying the error text. The
//! error is raised only after every Rust value of the failing call has been
//! dropped, and panics are caught before they reach Lua.

#![allow(
    unsafe_code,
    reason = "Lua C API entry points and stack calls require unsafe"
)]

mod stack;

use std::ffi::c_int;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

use mlua_sys::{lua_State, lua_error, lua_pushlstring};
use tether_bridge::{Bridge, BridgeConfig, Entrypoint};

pub use stack::LuaStack;

static BRIDGE: OnceLock<Bridge<LuaStack>> = OnceLock::new();

/// The process-wide bridge, configured from the environment on first use.
fn bridge() -> &'static Bridge<LuaStack> {
    BRIDGE.get_or_init(|| Bridge::new(BridgeConfig::from_env()))
}

/// Module loader called by `require("tether")`.
#[no_mangle]
pub unsafe extern "C-unwind" fn luaopen_tether(state: *mut lua_State) -> c_int {
    tether_bridge::init_tracing();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let host = LuaStack::new(state);
        let host_id = host.host_id();
        tracing::debug!(host = %host_id, "opening tether module");
        bridge().open(host_id, &host)
    }));
    match outcome {
        Ok(pushed) => pushed,
        Err(_) => raise(state, "tether: panic while opening the module".to_string()),
    }
}

unsafe extern "C-unwind" fn tether_new(state: *mut lua_State) -> c_int {
    run(state, Entrypoint::New)
}

unsafe extern "C-unwind" fn tether_exec(state: *mut lua_State) -> c_int {
    run(state, Entrypoint::Exec)
}

unsafe extern "C-unwind" fn tether_shutdown(state: *mut lua_State) -> c_int {
    run(state, Entrypoint::Shutdown)
}

unsafe extern "C-unwind" fn tether_invoke(state: *mut lua_State) -> c_int {
    run(state, Entrypoint::Invoke)
}

/// Dispatch `entry` and translate failures into a Lua error.
unsafe fn run(state: *mut lua_State, entry: Entrypoint) -> c_int {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let host = LuaStack::new(state);
        bridge()
            .dispatch(host.host_id(), entry, &host)
            .map_err(|e| e.to_string())
    }));
    match outcome {
        Ok(Ok(count)) => count,
        Ok(Err(message)) => raise(state, message),
        Err(_) => raise(state, format!("tether: panic in `{entry}`")),
    }
}

/// Push `message` and raise it. Never returns.
unsafe fn raise(state: *mut lua_State, message: String) -> c_int {
    lua_pushlstring(state, message.as_ptr().cast(), message.len());
    drop(message);
    lua_error(state)
}
