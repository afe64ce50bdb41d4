//! Native functions callable from the host by name.
//!
//! Registration only ever adds or overwrites. Each entry's
//! [`Signature`](tether_native::Signature) is the descriptor calls are
//! validated against before the body runs.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tether_native::{NativeFunction, NativeValue};

use crate::error::BridgeError;

/// Name to callable map.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: FxHashMap<String, NativeFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `name`, returning the function it replaced.
    pub fn register(&mut self, name: impl Into<String>, function: NativeFunction) -> Option<NativeFunction> {
        let name = name.into();
        tracing::debug!(%name, signature = %function.signature(), "registering function");
        self.functions.insert(name, function)
    }

    pub fn get(&self, name: &str) -> Option<&NativeFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

/// A [`FunctionRegistry`] shared between the evaluator and the boundary.
///
/// The lock is held only to look an entry up or store one, never while a
/// function runs, so registered functions may register others.
pub struct SharedRegistry(Arc<RwLock<FunctionRegistry>>);

impl SharedRegistry {
    pub fn new(registry: FunctionRegistry) -> Self {
        SharedRegistry(Arc::new(RwLock::new(registry)))
    }

    pub fn register(&self, name: impl Into<String>, function: NativeFunction) -> Option<NativeFunction> {
        self.0.write().register(name, function)
    }

    pub fn get(&self, name: &str) -> Option<NativeFunction> {
        self.0.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.read().contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Validate `args` against the entry's signature and run it.
    ///
    /// Results come back in order; an empty vector means no value.
    pub fn call(&self, name: &str, args: &[NativeValue]) -> Result<Vec<NativeValue>, BridgeError> {
        let Some(function) = self.get(name) else {
            return Err(BridgeError::NotFound {
                name: name.to_string(),
            });
        };
        function
            .signature()
            .check(args)
            .map_err(|e| BridgeError::from_signature(name, e))?;
        tracing::trace!(%name, args = args.len(), "calling registered function");
        function
            .call_unchecked(args)
            .map_err(|message| BridgeError::CallFailed {
                name: name.to_string(),
                message,
            })
    }

    /// Whether both handles share one registry.
    pub fn ptr_eq(&self, other: &SharedRegistry) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Clone for SharedRegistry {
    fn clone(&self) -> Self {
        SharedRegistry(Arc::clone(&self.0))
    }
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self::new(FunctionRegistry::new())
    }
}

impl fmt::Debug for SharedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedRegistry({:?})", &*self.0.read())
    }
}
