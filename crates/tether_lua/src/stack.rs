//! [`HostStack`] over the raw Lua C API.

use std::ffi::{c_int, CStr, CString};
use std::sync::atomic::{AtomicU64, Ordering};

use mlua_sys::{
    lua_CFunction, lua_State, lua_createtable, lua_getfield, lua_getglobal, lua_gettop, lua_newuserdatauv,
    lua_pcall, lua_pop, lua_pushboolean, lua_pushcfunction, lua_pushinteger, lua_pushlstring,
    lua_pushnil, lua_pushnumber, lua_pushvalue, lua_setfield, lua_setmetatable, lua_settop,
    lua_toboolean, lua_tointegerx, lua_tolstring, lua_tonumberx, lua_type, luaL_getmetatable,
    luaL_newmetatable, luaL_tolstring, LUA_OK, LUA_REGISTRYINDEX, LUA_TBOOLEAN, LUA_TFUNCTION,
    LUA_TLIGHTUSERDATA, LUA_TNIL, LUA_TNUMBER, LUA_TSTRING, LUA_TTABLE, LUA_TTHREAD,
    LUA_TUSERDATA,
};
use tether_bridge::{Entrypoint, HostId, HostStack, HostType};

use crate::{tether_exec, tether_invoke, tether_new, tether_shutdown};

/// Registry field holding the state's [`HostId`].
const HOST_ID_KEY: &CStr = c"tether.host_id";

static NEXT_HOST_ID: AtomicU64 = AtomicU64::new(1);

/// Handle onto a Lua state.
///
/// An instance keeps the handle of the state that called `new` and calls
/// back through it, so that state must outlive its instance.
#[derive(Copy, Clone)]
pub struct LuaStack {
    state: *mut lua_State,
}

// SAFETY: a Lua state is not thread-safe. The bridge touches one only from
// its own thread inside an entrypoint, or from a callback holding the
// instance's host-call lock. Argument reads and result pushes of `exec` and
// `invoke` take that lock as well; while the evaluator runs, the host thread
// is parked in the entrypoint and leaves the state to those callbacks.
unsafe impl Send for LuaStack {}
// SAFETY: see `Send`; every method is a plain stack operation.
unsafe impl Sync for LuaStack {}

impl LuaStack {
    /// # Safety
    ///
    /// `state` must be a valid Lua state for as long as the handle is used.
    pub unsafe fn new(state: *mut lua_State) -> Self {
        LuaStack { state }
    }

    /// Identity of this state, issued on first request and kept in the
    /// registry so every coroutine of the state shares it.
    pub fn host_id(&self) -> HostId {
        // SAFETY: registry access on a valid state; the stack is balanced.
        unsafe {
            lua_getfield(self.state, LUA_REGISTRYINDEX, HOST_ID_KEY.as_ptr());
            let mut is_integer: c_int = 0;
            let stored = lua_tointegerx(self.state, -1, &mut is_integer);
            lua_pop(self.state, 1);
            if is_integer != 0 {
                if let Ok(id) = u64::try_from(stored) {
                    return HostId(id);
                }
            }
            let id = NEXT_HOST_ID.fetch_add(1, Ordering::Relaxed);
            lua_pushinteger(self.state, i64::try_from(id).unwrap_or(i64::MAX));
            lua_setfield(self.state, LUA_REGISTRYINDEX, HOST_ID_KEY.as_ptr());
            HostId(id)
        }
    }

    /// Copy the string at the top of the stack and pop it.
    unsafe fn pop_string(&self, ptr: *const std::ffi::c_char, len: usize) -> String {
        let text = if ptr.is_null() {
            String::new()
        } else {
            let bytes = std::slice::from_raw_parts(ptr.cast::<u8>(), len);
            String::from_utf8_lossy(bytes).into_owned()
        };
        lua_pop(self.state, 1);
        text
    }
}

/// Lua type tag to [`HostType`].
pub(crate) fn host_type_of(tag: c_int) -> HostType {
    match tag {
        LUA_TNIL => HostType::Nil,
        LUA_TBOOLEAN => HostType::Boolean,
        LUA_TLIGHTUSERDATA => HostType::LightUserdata,
        LUA_TNUMBER => HostType::Number,
        LUA_TSTRING => HostType::String,
        LUA_TTABLE => HostType::Table,
        LUA_TFUNCTION => HostType::Function,
        LUA_TUSERDATA => HostType::Userdata,
        LUA_TTHREAD => HostType::Thread,
        _ => HostType::None,
    }
}

impl HostStack for LuaStack {
    fn top(&self) -> i32 {
        // SAFETY: valid state.
        unsafe { lua_gettop(self.state) }
    }

    fn set_top(&self, top: i32) {
        // SAFETY: valid state; Lua fills new slots with nil.
        unsafe { lua_settop(self.state, top) }
    }

    fn host_type(&self, idx: i32) -> HostType {
        // SAFETY: lua_type accepts any acceptable index.
        host_type_of(unsafe { lua_type(self.state, idx) })
    }

    fn to_boolean(&self, idx: i32) -> bool {
        // SAFETY: valid state.
        unsafe { lua_toboolean(self.state, idx) != 0 }
    }

    fn to_number(&self, idx: i32) -> f64 {
        // SAFETY: a null out-pointer is allowed.
        unsafe { lua_tonumberx(self.state, idx, std::ptr::null_mut()) }
    }

    fn to_str(&self, idx: i32) -> Option<String> {
        if !matches!(self.host_type(idx), HostType::String | HostType::Number) {
            return None;
        }
        // SAFETY: converting a copy leaves the original slot untouched.
        unsafe {
            lua_pushvalue(self.state, idx);
            let mut len = 0usize;
            let ptr = lua_tolstring(self.state, -1, &mut len);
            Some(self.pop_string(ptr, len))
        }
    }

    fn render(&self, idx: i32) -> String {
        // SAFETY: luaL_tolstring pushes exactly one string.
        unsafe {
            let mut len = 0usize;
            let ptr = luaL_tolstring(self.state, idx, &mut len);
            self.pop_string(ptr, len)
        }
    }

    fn push_nil(&self) {
        // SAFETY: valid state.
        unsafe { lua_pushnil(self.state) }
    }

    fn push_boolean(&self, b: bool) {
        // SAFETY: valid state.
        unsafe { lua_pushboolean(self.state, c_int::from(b)) }
    }

    fn push_number(&self, n: f64) {
        // SAFETY: valid state.
        unsafe { lua_pushnumber(self.state, n) }
    }

    fn push_str(&self, s: &str) {
        // SAFETY: Lua copies the bytes; embedded NULs are allowed.
        unsafe {
            lua_pushlstring(self.state, s.as_ptr().cast(), s.len());
        }
    }

    fn push_copy(&self, idx: i32) {
        // SAFETY: valid state.
        unsafe { lua_pushvalue(self.state, idx) }
    }

    fn get_global(&self, name: &str) -> HostType {
        let Ok(name) = CString::new(name) else {
            self.push_nil();
            return HostType::Nil;
        };
        // SAFETY: valid state and NUL-terminated name.
        host_type_of(unsafe { lua_getglobal(self.state, name.as_ptr()) })
    }

    fn pcall(&self, nargs: i32, nresults: i32) -> Result<(), String> {
        // SAFETY: the caller pushed a function and `nargs` arguments.
        let status = unsafe { lua_pcall(self.state, nargs, nresults, 0) };
        if status == LUA_OK {
            return Ok(());
        }
        let message = self.to_str(-1).unwrap_or_else(|| self.render(-1));
        self.pop(1);
        Err(message)
    }

    fn new_table(&self) {
        // SAFETY: valid state.
        unsafe { lua_createtable(self.state, 0, 0) }
    }

    fn set_field(&self, idx: i32, name: &str) {
        let Ok(name) = CString::new(name) else {
            self.pop(1);
            return;
        };
        // SAFETY: a value is on top and `idx` names a table.
        unsafe { lua_setfield(self.state, idx, name.as_ptr()) }
    }

    fn push_entrypoint(&self, entry: Entrypoint) {
        let function: lua_CFunction = match entry {
            Entrypoint::New => tether_new,
            Entrypoint::Exec => tether_exec,
            Entrypoint::Shutdown => tether_shutdown,
            Entrypoint::Invoke => tether_invoke,
        };
        // SAFETY: valid state; the functions follow the lua_CFunction ABI.
        unsafe { lua_pushcfunction(self.state, function) }
    }

    fn new_metatable(&self, name: &str) -> bool {
        let Ok(name) = CString::new(name) else {
            self.new_table();
            return true;
        };
        // SAFETY: valid state and NUL-terminated name.
        unsafe { luaL_newmetatable(self.state, name.as_ptr()) != 0 }
    }

    fn get_metatable(&self, name: &str) -> HostType {
        let Ok(name) = CString::new(name) else {
            self.push_nil();
            return HostType::Nil;
        };
        // SAFETY: valid state and NUL-terminated name.
        host_type_of(unsafe { luaL_getmetatable(self.state, name.as_ptr()) })
    }

    fn set_metatable(&self, idx: i32) {
        // SAFETY: a table (or nil) is on top.
        unsafe {
            lua_setmetatable(self.state, idx);
        }
    }

    fn new_userdata(&self) {
        // SAFETY: a zero-sized block with no user values.
        unsafe {
            lua_newuserdatauv(self.state, 0, 0);
        }
    }
}
