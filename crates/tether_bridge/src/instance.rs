//! Interpreter instances and the process-wide instance table.
//!
//! An [`Instance`] bundles one evaluator, one registry, one cancellation
//! token and one host-call lock for a host session. The [`InstanceTable`]
//! owns every live instance, keyed by the host-issued [`HostId`]. Each
//! instance also carries an [`InstanceId`] issued in creation order, so a
//! replaced instance is never mistaken for its successor.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use rustc_hash::FxHashMap;
use tether_native::CancelToken;

use crate::evaluator::Evaluator;
use crate::host::{HostId, HostStack};
use crate::registry::SharedRegistry;

/// Serializes host-stack access of an instance, in both directions.
///
/// Held only while the stack is read or written, never while native code
/// or the evaluator runs. Reentrant so a host -> native -> host chain on the host thread does not
/// deadlock, while callbacks from other threads wait their turn.
pub type HostLock = ReentrantMutex<()>;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Creation-ordered identity of an instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub(crate) fn next() -> Self {
        InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance#{}", self.0)
    }
}

pub struct Instance<H> {
    pub(crate) id: InstanceId,
    pub(crate) host_id: HostId,
    pub(crate) host: H,
    pub(crate) evaluator: Box<dyn Evaluator>,
    pub(crate) registry: SharedRegistry,
    pub(crate) token: CancelToken,
    pub(crate) host_lock: Arc<HostLock>,
}

impl<H: HostStack> Instance<H> {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn host_lock(&self) -> &Arc<HostLock> {
        &self.host_lock
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn evaluator(&self) -> &dyn Evaluator {
        self.evaluator.as_ref()
    }
}

impl<H> fmt::Debug for Instance<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("host_id", &self.host_id)
            .field("registry", &self.registry)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Every live instance, one per host session.
///
/// The table lock is held only for the map operation itself. Callers get
/// an `Arc<Instance>` and work on it after the lock is released, so no
/// instance's host-call lock is ever taken under the table lock.
pub struct InstanceTable<H> {
    instances: Mutex<FxHashMap<HostId, Arc<Instance<H>>>>,
}

impl<H> InstanceTable<H> {
    pub fn new() -> Self {
        InstanceTable {
            instances: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn get(&self, host_id: HostId) -> Option<Arc<Instance<H>>> {
        self.instances.lock().get(&host_id).cloned()
    }

    /// Store `instance`, returning the one it displaced.
    pub fn insert(&self, instance: Arc<Instance<H>>) -> Option<Arc<Instance<H>>> {
        self.instances.lock().insert(instance.host_id, instance)
    }

    pub fn remove(&self, host_id: HostId) -> Option<Arc<Instance<H>>> {
        self.instances.lock().remove(&host_id)
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }
}

impl<H> Default for InstanceTable<H> {
    fn default() -> Self {
        Self::new()
    }
}
