//! A complete host stack kept in memory.
//!
//! `MemoryHost` behaves like a small stack-based embedding runtime: a value
//! stack with call frames, globals, tables, host functions written as
//! closures, userdata with metatables, and a collector that runs `__gc`
//! finalizers for unreachable userdata. Module entrypoints dispatch into an
//! attached [`Bridge`].
//!
//! It also watches its own invariants. A host function that starts while
//! another thread is inside one, or a frame that is not where its call left
//! it, counts as a violation (see [`MemoryHost::violations`]). Entrypoints
//! are not host functions: while one runs, its thread is parked in the
//! bridge and callbacks from other threads may use the stack.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::boundary::Bridge;
use crate::host::{Entrypoint, HostId, HostStack, HostType, MULTRET};
use crate::marshal::{push_value, read_values};
use crate::value::Value;

/// A host function: reads its arguments from the current frame, pushes its
/// results and returns how many it pushed.
pub type HostFn = dyn Fn(&MemoryHost) -> Result<i32, String> + Send + Sync;

static NEXT_HOST_ID: AtomicU64 = AtomicU64::new(1);

/// A value stored by the in-memory host.
#[derive(Clone)]
pub enum HostValue {
    Nil,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
    Table(usize),
    Userdata(usize),
    Function(Arc<HostFn>),
    Entrypoint(Entrypoint),
}

impl HostValue {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&MemoryHost) -> Result<i32, String> + Send + Sync + 'static,
    {
        HostValue::Function(Arc::new(f))
    }

    fn host_type(&self) -> HostType {
        match self {
            HostValue::Nil => HostType::Nil,
            HostValue::Bool(_) => HostType::Boolean,
            HostValue::Number(_) => HostType::Number,
            HostValue::Str(_) => HostType::String,
            HostValue::Table(_) => HostType::Table,
            HostValue::Userdata(_) => HostType::Userdata,
            HostValue::Function(_) | HostValue::Entrypoint(_) => HostType::Function,
        }
    }

    fn type_name(&self) -> &'static str {
        match self.host_type() {
            HostType::None | HostType::Nil => "nil",
            HostType::Boolean => "boolean",
            HostType::Number => "number",
            HostType::String => "string",
            HostType::Table => "table",
            HostType::Function => "function",
            HostType::LightUserdata | HostType::Userdata => "userdata",
            HostType::Thread => "thread",
        }
    }

    fn render(&self) -> String {
        match self {
            HostValue::Nil => "nil".to_string(),
            HostValue::Bool(b) => b.to_string(),
            HostValue::Number(n) => format_number(*n),
            HostValue::Str(s) => s.to_string(),
            HostValue::Table(id) => format!("table: {:#010x}", address(*id)),
            HostValue::Userdata(id) => format!("userdata: {:#010x}", address(*id)),
            HostValue::Function(f) => format!("function: {:p}", Arc::as_ptr(f)),
            HostValue::Entrypoint(entry) => format!("function: builtin: {entry}"),
        }
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::Str(s.into())
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

fn address(id: usize) -> usize {
    0x1000 + id * 0x40
}

/// Numbers print the way the host's `tostring` prints floats.
fn format_number(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{sign}inf")
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.1}")
    } else {
        format!("{n}")
    }
}

#[derive(Default)]
struct Table {
    fields: FxHashMap<String, HostValue>,
    metatable: Option<usize>,
}

#[derive(Default)]
struct Userdata {
    metatable: Option<usize>,
    finalized: bool,
}

#[derive(Default)]
struct State {
    stack: Vec<HostValue>,
    /// Base slot of each active call frame.
    frames: Vec<usize>,
    globals: FxHashMap<String, HostValue>,
    tables: Vec<Table>,
    userdata: Vec<Userdata>,
    metatables: FxHashMap<String, usize>,
}

impl State {
    fn base(&self) -> usize {
        self.frames.last().copied().unwrap_or(0)
    }

    fn top(&self) -> i32 {
        i32::try_from(self.stack.len().saturating_sub(self.base())).unwrap_or(i32::MAX)
    }

    /// Absolute slot for a frame-relative index.
    fn slot(&self, idx: i32) -> Option<usize> {
        let base = self.base();
        let len = self.stack.len();
        let abs = match idx {
            0 => return None,
            1.. => base + usize::try_from(idx).ok()? - 1,
            _ => len.checked_sub(usize::try_from(idx.unsigned_abs()).ok()?)?,
        };
        (abs >= base && abs < len).then_some(abs)
    }

    fn get(&self, idx: i32) -> Option<&HostValue> {
        self.slot(idx).and_then(|abs| self.stack.get(abs))
    }

    fn value(&self, idx: i32) -> HostValue {
        self.get(idx).cloned().unwrap_or(HostValue::Nil)
    }

    fn new_table(&mut self) -> usize {
        self.tables.push(Table::default());
        self.tables.len() - 1
    }

    fn field(&self, table: &HostValue, name: &str) -> HostValue {
        match table {
            HostValue::Table(id) => self
                .tables
                .get(*id)
                .and_then(|t| t.fields.get(name))
                .cloned()
                .unwrap_or(HostValue::Nil),
            _ => HostValue::Nil,
        }
    }

    fn finalizer(&self, metatable: Option<usize>) -> Option<HostValue> {
        let gc = self.tables.get(metatable?)?.fields.get("__gc")?;
        Some(gc.clone())
    }

    /// Mark everything reachable from the stack, globals and registered
    /// metatables. Returns the set of live userdata.
    fn reachable_userdata(&self) -> Vec<bool> {
        let mut tables = vec![false; self.tables.len()];
        let mut userdata = vec![false; self.userdata.len()];
        let mut work: Vec<HostValue> = self.stack.clone();
        work.extend(self.globals.values().cloned());
        work.extend(self.metatables.values().map(|id| HostValue::Table(*id)));

        while let Some(value) = work.pop() {
            match value {
                HostValue::Table(id) => {
                    let (Some(seen), Some(table)) = (tables.get_mut(id), self.tables.get(id)) else {
                        continue;
                    };
                    if *seen {
                        continue;
                    }
                    *seen = true;
                    work.extend(table.fields.values().cloned());
                    work.extend(table.metatable.map(HostValue::Table));
                }
                HostValue::Userdata(id) => {
                    let (Some(seen), Some(data)) = (userdata.get_mut(id), self.userdata.get(id))
                    else {
                        continue;
                    };
                    if !*seen {
                        *seen = true;
                        work.extend(data.metatable.map(HostValue::Table));
                    }
                }
                _ => {}
            }
        }
        userdata
    }
}

struct Inner {
    id: HostId,
    state: Mutex<State>,
    bridge: RwLock<Option<Weak<Bridge<MemoryHost>>>>,
    /// Threads currently running a host function, outermost first.
    in_call: Mutex<Vec<ThreadId>>,
    violations: AtomicUsize,
}

/// Handle onto an in-memory host state. Clones share the state.
#[derive(Clone)]
pub struct MemoryHost {
    inner: Arc<Inner>,
}

impl MemoryHost {
    pub fn new() -> Self {
        MemoryHost {
            inner: Arc::new(Inner {
                id: HostId(NEXT_HOST_ID.fetch_add(1, Ordering::Relaxed)),
                state: Mutex::new(State::default()),
                bridge: RwLock::new(None),
                in_call: Mutex::new(Vec::new()),
                violations: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> HostId {
        self.inner.id
    }

    /// Route module entrypoints to `bridge`.
    ///
    /// Only a weak reference is kept: instances hold host handles, so a
    /// strong one would keep the bridge alive forever.
    pub fn attach(&self, bridge: &Arc<Bridge<MemoryHost>>) {
        *self.inner.bridge.write() = Some(Arc::downgrade(bridge));
    }

    pub fn push(&self, value: HostValue) {
        self.inner.state.lock().stack.push(value);
    }

    /// Pop the top value into global `name`.
    pub fn set_global(&self, name: &str) {
        let mut state = self.inner.state.lock();
        let value = if state.top() > 0 {
            state.stack.pop().unwrap_or(HostValue::Nil)
        } else {
            HostValue::Nil
        };
        match value {
            HostValue::Nil => state.globals.remove(name),
            value => state.globals.insert(name.to_string(), value),
        };
    }

    /// Define global `name` as a host function.
    pub fn register<F>(&self, name: &str, f: F)
    where
        F: Fn(&MemoryHost) -> Result<i32, String> + Send + Sync + 'static,
    {
        self.inner
            .state
            .lock()
            .globals
            .insert(name.to_string(), HostValue::function(f));
    }

    /// Push `t[name]` for the table at `idx`.
    pub fn get_field(&self, idx: i32, name: &str) -> HostType {
        let mut state = self.inner.state.lock();
        let table = state.value(idx);
        let value = state.field(&table, name);
        let ty = value.host_type();
        state.stack.push(value);
        ty
    }

    /// Call global function `name` with `args` and collect every result.
    pub fn call_global(&self, name: &str, args: &[Value]) -> Result<Vec<Value>, String> {
        let func = self.inner.state.lock().globals.get(name).cloned();
        self.call_value(func.unwrap_or(HostValue::Nil), args)
    }

    /// Call `module.field(args...)` where `module` is a global table.
    pub fn call_field(&self, module: &str, field: &str, args: &[Value]) -> Result<Vec<Value>, String> {
        let func = {
            let state = self.inner.state.lock();
            let table = state.globals.get(module).cloned().unwrap_or(HostValue::Nil);
            state.field(&table, field)
        };
        self.call_value(func, args)
    }

    fn call_value(&self, func: HostValue, args: &[Value]) -> Result<Vec<Value>, String> {
        let base = self.top();
        self.push(func);
        for arg in args {
            push_value(self, arg);
        }
        let nargs = i32::try_from(args.len()).map_err(|_| "too many arguments".to_string())?;
        self.pcall(nargs, MULTRET)?;
        let results = read_values(self, base + 1);
        self.set_top(base);
        Ok(results)
    }

    /// Run `__gc` for every unreachable userdata not yet finalized.
    ///
    /// Returns the number of finalizers run. Finalizer errors are logged
    /// and otherwise ignored.
    pub fn collect_garbage(&self) -> usize {
        let pending: Vec<(usize, HostValue)> = {
            let mut state = self.inner.state.lock();
            let live = state.reachable_userdata();
            let mut pending = Vec::new();
            for id in 0..state.userdata.len() {
                if live.get(id).copied().unwrap_or(true) {
                    continue;
                }
                let Some(data) = state.userdata.get(id) else {
                    continue;
                };
                if data.finalized {
                    continue;
                }
                let gc = state.finalizer(data.metatable);
                if let Some(data) = state.userdata.get_mut(id) {
                    data.finalized = true;
                }
                pending.extend(gc.map(|gc| (id, gc)));
            }
            pending
        };

        let count = pending.len();
        for (id, gc) in pending {
            tracing::trace!(userdata = id, "running finalizer");
            self.push(gc);
            self.push(HostValue::Userdata(id));
            if let Err(error) = self.pcall(1, 0) {
                tracing::warn!(%error, "error in finalizer");
            }
        }
        count
    }

    /// Invariant violations observed so far.
    pub fn violations(&self) -> usize {
        self.inner.violations.load(Ordering::SeqCst)
    }

    fn violation(&self, what: &str) {
        tracing::warn!(host = %self.id(), what, "host invariant violated");
        self.inner.violations.fetch_add(1, Ordering::SeqCst);
    }

    fn enter_call(&self) -> CallScope<'_> {
        let me = thread::current().id();
        let mut in_call = self.inner.in_call.lock();
        if in_call.iter().any(|t| *t != me) {
            drop(in_call);
            self.violation("call overlaps a call on another thread");
            in_call = self.inner.in_call.lock();
        }
        in_call.push(me);
        CallScope { host: self, thread: me }
    }

    fn dispatch(&self, entry: Entrypoint) -> Result<i32, String> {
        let bridge = self.inner.bridge.read().as_ref().and_then(Weak::upgrade);
        let Some(bridge) = bridge else {
            return Err(format!("`{entry}` called on a host with no bridge"));
        };
        bridge.dispatch(self.id(), entry, self).map_err(|e| e.to_string())
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

struct CallScope<'a> {
    host: &'a MemoryHost,
    thread: ThreadId,
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        let mut in_call = self.host.inner.in_call.lock();
        if let Some(pos) = in_call.iter().rposition(|t| *t == self.thread) {
            in_call.remove(pos);
        }
    }
}

impl HostStack for MemoryHost {
    fn top(&self) -> i32 {
        self.inner.state.lock().top()
    }

    fn set_top(&self, top: i32) {
        let mut state = self.inner.state.lock();
        let len = state.base() + usize::try_from(top).unwrap_or(0);
        state.stack.resize(len, HostValue::Nil);
    }

    fn host_type(&self, idx: i32) -> HostType {
        self.inner
            .state
            .lock()
            .get(idx)
            .map_or(HostType::None, HostValue::host_type)
    }

    fn to_boolean(&self, idx: i32) -> bool {
        !matches!(
            self.inner.state.lock().get(idx),
            None | Some(HostValue::Nil | HostValue::Bool(false))
        )
    }

    fn to_number(&self, idx: i32) -> f64 {
        match self.inner.state.lock().get(idx) {
            Some(HostValue::Number(n)) => *n,
            Some(HostValue::Str(s)) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    fn to_str(&self, idx: i32) -> Option<String> {
        match self.inner.state.lock().get(idx)? {
            HostValue::Str(s) => Some(s.to_string()),
            HostValue::Number(n) => Some(format_number(*n)),
            _ => None,
        }
    }

    fn render(&self, idx: i32) -> String {
        self.inner.state.lock().value(idx).render()
    }

    fn push_nil(&self) {
        self.push(HostValue::Nil);
    }

    fn push_boolean(&self, b: bool) {
        self.push(HostValue::Bool(b));
    }

    fn push_number(&self, n: f64) {
        self.push(HostValue::Number(n));
    }

    fn push_str(&self, s: &str) {
        self.push(HostValue::Str(s.into()));
    }

    fn push_copy(&self, idx: i32) {
        let mut state = self.inner.state.lock();
        let value = state.value(idx);
        state.stack.push(value);
    }

    fn get_global(&self, name: &str) -> HostType {
        let mut state = self.inner.state.lock();
        let value = state.globals.get(name).cloned().unwrap_or(HostValue::Nil);
        let ty = value.host_type();
        state.stack.push(value);
        ty
    }

    fn pcall(&self, nargs: i32, nresults: i32) -> Result<(), String> {
        let (func, func_pos) = {
            let mut state = self.inner.state.lock();
            let nargs = usize::try_from(nargs).unwrap_or(0);
            let base = state.base();
            let Some(func_pos) = state
                .stack
                .len()
                .checked_sub(nargs + 1)
                .filter(|pos| *pos >= base)
            else {
                return Err("attempt to call with an incomplete frame".to_string());
            };
            let func = state.stack.get(func_pos).cloned().unwrap_or(HostValue::Nil);
            state.frames.push(func_pos + 1);
            (func, func_pos)
        };

        let outcome = match func {
            HostValue::Function(f) => {
                let _scope = self.enter_call();
                f(self)
            }
            HostValue::Entrypoint(entry) => self.dispatch(entry),
            other => Err(format!("attempt to call a {} value", other.type_name())),
        };

        let mut state = self.inner.state.lock();
        let frame = state.frames.pop();
        let len = state.stack.len();
        if frame != Some(func_pos + 1) || len <= func_pos {
            drop(state);
            self.violation("call frame moved during a call");
            state = self.inner.state.lock();
        }

        match outcome {
            Ok(count) => {
                let available = state.stack.len().saturating_sub(func_pos + 1);
                let count = usize::try_from(count).unwrap_or(0).min(available);
                let split = state.stack.len() - count;
                let mut results = state.stack.split_off(split);
                state.stack.truncate(func_pos);
                if let Ok(wanted) = usize::try_from(nresults) {
                    results.resize(wanted, HostValue::Nil);
                }
                state.stack.extend(results);
                Ok(())
            }
            Err(message) => {
                state.stack.truncate(func_pos);
                Err(message)
            }
        }
    }

    fn new_table(&self) {
        let mut state = self.inner.state.lock();
        let id = state.new_table();
        state.stack.push(HostValue::Table(id));
    }

    fn set_field(&self, idx: i32, name: &str) {
        let mut state = self.inner.state.lock();
        let target = state.value(idx);
        let value = if state.top() > 0 {
            state.stack.pop().unwrap_or(HostValue::Nil)
        } else {
            HostValue::Nil
        };
        if let HostValue::Table(id) = target {
            if let Some(table) = state.tables.get_mut(id) {
                match value {
                    HostValue::Nil => table.fields.remove(name),
                    value => table.fields.insert(name.to_string(), value),
                };
            }
        }
    }

    fn push_entrypoint(&self, entry: Entrypoint) {
        self.push(HostValue::Entrypoint(entry));
    }

    fn new_metatable(&self, name: &str) -> bool {
        let mut state = self.inner.state.lock();
        let (id, created) = match state.metatables.get(name) {
            Some(id) => (*id, false),
            None => {
                let id = state.new_table();
                state.metatables.insert(name.to_string(), id);
                (id, true)
            }
        };
        state.stack.push(HostValue::Table(id));
        created
    }

    fn get_metatable(&self, name: &str) -> HostType {
        let mut state = self.inner.state.lock();
        let value = state
            .metatables
            .get(name)
            .map_or(HostValue::Nil, |id| HostValue::Table(*id));
        let ty = value.host_type();
        state.stack.push(value);
        ty
    }

    fn set_metatable(&self, idx: i32) {
        let mut state = self.inner.state.lock();
        let target = state.value(idx);
        let metatable = match state.stack.pop() {
            Some(HostValue::Table(id)) => Some(id),
            _ => None,
        };
        match target {
            HostValue::Table(id) => {
                if let Some(table) = state.tables.get_mut(id) {
                    table.metatable = metatable;
                }
            }
            HostValue::Userdata(id) => {
                if let Some(data) = state.userdata.get_mut(id) {
                    data.metatable = metatable;
                }
            }
            _ => {}
        }
    }

    fn new_userdata(&self) {
        let mut state = self.inner.state.lock();
        state.userdata.push(Userdata::default());
        let id = state.userdata.len() - 1;
        state.stack.push(HostValue::Userdata(id));
    }
}
