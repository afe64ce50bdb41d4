//! The host collaborator surface.
//!
//! [`HostStack`] is the slice of a stack-based embedding API the bridge
//! needs. Indices follow the host convention: positive indices count from
//! the bottom of the current frame starting at 1, negative ones from the
//! top starting at -1.

use std::fmt;

/// Result count asking a call to keep every result.
pub const MULTRET: i32 = -1;

/// Type tag of a host stack slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HostType {
    /// Index past the top of the stack.
    None,
    Nil,
    Boolean,
    LightUserdata,
    Number,
    String,
    Table,
    Function,
    Userdata,
    Thread,
}

impl HostType {
    /// Whether values of this type cross the bridge as their rendered text.
    pub fn is_composite(self) -> bool {
        matches!(
            self,
            HostType::LightUserdata
                | HostType::Table
                | HostType::Function
                | HostType::Userdata
                | HostType::Thread
        )
    }
}

/// A host operation exposed by the module table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Entrypoint {
    New,
    Exec,
    Shutdown,
    Invoke,
}

impl Entrypoint {
    pub const ALL: [Entrypoint; 4] = [
        Entrypoint::New,
        Entrypoint::Exec,
        Entrypoint::Shutdown,
        Entrypoint::Invoke,
    ];

    /// Field name in the module table.
    pub fn name(self) -> &'static str {
        match self {
            Entrypoint::New => "new",
            Entrypoint::Exec => "exec",
            Entrypoint::Shutdown => "shutdown",
            Entrypoint::Invoke => "invoke",
        }
    }
}

impl fmt::Display for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque identity of a host session, issued by the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId(pub u64);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host#{}", self.0)
    }
}

/// Stack-based host embedding API.
///
/// Implementations are cheap handles onto one host state. Methods take
/// `&self` so a handle can be shared with callbacks the evaluator runs on
/// other threads; callers serialize access with the instance's host-call
/// lock.
///
/// Only protected calls are exposed. An unprotected host call raises by
/// unwinding through the host, which must never happen across Rust frames.
pub trait HostStack: Clone + Send + Sync + 'static {
    /// Index of the top slot, which is also the number of slots in the frame.
    fn top(&self) -> i32;

    /// Grow with nils or shrink to exactly `top` slots.
    fn set_top(&self, top: i32);

    fn pop(&self, n: i32) {
        self.set_top(self.top() - n);
    }

    fn host_type(&self, idx: i32) -> HostType;

    fn is_function(&self, idx: i32) -> bool {
        self.host_type(idx) == HostType::Function
    }

    /// Host truthiness: everything but `nil` and `false` is true.
    fn to_boolean(&self, idx: i32) -> bool;

    /// Numeric value, or 0 when the slot is not convertible.
    fn to_number(&self, idx: i32) -> f64;

    /// Text of a string or number slot.
    fn to_str(&self, idx: i32) -> Option<String>;

    /// The host's own `tostring` rendering of any slot.
    fn render(&self, idx: i32) -> String;

    fn push_nil(&self);
    fn push_boolean(&self, b: bool);
    fn push_number(&self, n: f64);
    fn push_str(&self, s: &str);

    /// Push a copy of the value at `idx`.
    fn push_copy(&self, idx: i32);

    /// Push the named global and return its type.
    fn get_global(&self, name: &str) -> HostType;

    /// Call the function below `nargs` arguments in protected mode.
    ///
    /// The function and its arguments are popped. On success `nresults`
    /// results are pushed (all of them for [`MULTRET`]). On failure nothing
    /// is pushed and the error value's text is returned.
    fn pcall(&self, nargs: i32, nresults: i32) -> Result<(), String>;

    fn new_table(&self);

    /// `t[name] = v` where `t` is at `idx` and `v` is popped from the top.
    fn set_field(&self, idx: i32, name: &str);

    /// Push a host function that runs `entry` through the bridge.
    fn push_entrypoint(&self, entry: Entrypoint);

    /// Push the metatable registered under `name`, creating it if needed.
    ///
    /// Returns `true` when the metatable was created by this call.
    fn new_metatable(&self, name: &str) -> bool;

    /// Push the metatable registered under `name`, or nil.
    fn get_metatable(&self, name: &str) -> HostType;

    /// Pop a table and make it the metatable of the value at `idx`.
    fn set_metatable(&self, idx: i32);

    /// Push a new host-managed resource with no payload.
    fn new_userdata(&self);
}
