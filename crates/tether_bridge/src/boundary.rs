//! The boundary adapter.
//!
//! A [`Bridge`] owns the instance table and answers the four host
//! operations. Hosts route every entrypoint call through
//! [`Bridge::dispatch`] and build the module with [`Bridge::open`].

use std::sync::Arc;

use tether_native::{CancelToken, Exports, NativeType, NativeValue, Signature};

use crate::call::{host_to_native, native_to_host};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::evaluator::{script_evaluator, Evaluator, EvaluatorFactory};
use crate::host::{Entrypoint, HostId, HostStack, HostType};
use crate::instance::{HostLock, Instance, InstanceId, InstanceTable};
use crate::registry::SharedRegistry;

/// Module field holding the resource whose finalizer shuts the instance down.
pub const GC_PROXY_FIELD: &str = "__gc_proxy";

pub struct Bridge<H> {
    config: BridgeConfig,
    /// Parent of every instance token; cancelled when the bridge goes away.
    root: CancelToken,
    table: InstanceTable<H>,
    factory: Box<EvaluatorFactory>,
}

impl<H: HostStack> Bridge<H> {
    /// A bridge whose instances evaluate tether script.
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_evaluator(config, script_evaluator)
    }

    /// A bridge whose instances use evaluators built by `factory`.
    pub fn with_evaluator<F>(config: BridgeConfig, factory: F) -> Self
    where
        F: Fn(&BridgeConfig) -> Box<dyn Evaluator> + Send + Sync + 'static,
    {
        Bridge {
            config,
            root: CancelToken::new(),
            table: InstanceTable::new(),
            factory: Box::new(factory),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The live instance for `host_id`, if any.
    pub fn instance(&self, host_id: HostId) -> Option<Arc<Instance<H>>> {
        self.table.get(host_id)
    }

    pub fn instance_count(&self) -> usize {
        self.table.len()
    }

    /// Start a fresh instance for `host_id`.
    ///
    /// An existing instance is cancelled and discarded first, taking its
    /// registry with it.
    #[tracing::instrument(level = "debug", skip_all, fields(host = %host_id))]
    pub fn create(&self, host_id: HostId, host: &H) -> InstanceId {
        if let Some(previous) = self.table.remove(host_id) {
            retire(&previous, "replaced");
        }

        let token = self.root.child();
        let registry = SharedRegistry::default();
        let host_lock = Arc::new(HostLock::new(()));
        let evaluator = (self.factory)(&self.config);
        evaluator.install(bridge_exports(host, &host_lock, &registry, &token));

        let id = InstanceId::next();
        let instance = Arc::new(Instance {
            id,
            host_id,
            host: host.clone(),
            evaluator,
            registry,
            token,
            host_lock,
        });
        // A concurrent create for the same host may have won the race.
        if let Some(displaced) = self.table.insert(instance) {
            retire(&displaced, "replaced");
        }
        tracing::debug!(instance = %id, "interpreter initialized");
        id
    }

    /// Evaluate `source` on the instance for `host_id`.
    ///
    /// Does nothing when there is no instance. A failed evaluation leaves
    /// the instance active. The host-call lock is not held while the
    /// evaluator runs; its callbacks take it for each host call.
    pub fn exec(&self, host_id: HostId, source: &str) -> Result<(), BridgeError> {
        match self.table.get(host_id) {
            Some(instance) => self.exec_on(&instance, source),
            None => {
                tracing::debug!(host = %host_id, "exec without an instance");
                Ok(())
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(instance = %instance.id, bytes = source.len()))]
    fn exec_on(&self, instance: &Instance<H>, source: &str) -> Result<(), BridgeError> {
        if self.config.log_source {
            tracing::debug!(source, "submitted source");
        }
        instance.evaluator.evaluate(source).map_err(|message| {
            tracing::debug!(%message, "evaluation failed");
            BridgeError::EvaluationFailed { message }
        })
    }

    /// Cancel and discard the instance for `host_id`.
    ///
    /// Returns whether there was one. Calling it again is a no-op.
    #[tracing::instrument(level = "debug", skip_all, fields(host = %host_id))]
    pub fn shutdown(&self, host_id: HostId) -> bool {
        match self.table.remove(host_id) {
            Some(instance) => {
                retire(&instance, "shut down");
                true
            }
            None => false,
        }
    }

    /// Run `invoke(name, args...)` from the current host frame.
    #[tracing::instrument(level = "debug", skip_all, fields(host = %host_id))]
    pub fn invoke(&self, host_id: HostId, host: &H) -> Result<i32, BridgeError> {
        match self.table.get(host_id) {
            Some(instance) => host_to_native(&instance, host),
            None => Ok(0),
        }
    }

    /// Answer one host entrypoint call, returning the number of results
    /// left on the host stack.
    pub fn dispatch(&self, host_id: HostId, entry: Entrypoint, host: &H) -> Result<i32, BridgeError> {
        match entry {
            Entrypoint::New => {
                self.create(host_id, host);
                Ok(0)
            }
            Entrypoint::Exec => {
                let Some(instance) = self.table.get(host_id) else {
                    return Ok(0);
                };
                let source = {
                    let _guard = instance.host_lock.lock();
                    match host.host_type(1) {
                        HostType::String | HostType::Number => host.to_str(1).unwrap_or_default(),
                        other => {
                            return Err(BridgeError::BadArgument {
                                entrypoint: "exec",
                                message: format!("expected source text, got {other:?}"),
                            });
                        }
                    }
                };
                self.exec_on(&instance, &source).map(|()| 0)
            }
            Entrypoint::Shutdown => {
                self.shutdown(host_id);
                Ok(0)
            }
            Entrypoint::Invoke => self.invoke(host_id, host),
        }
    }

    /// Create the first instance for `host_id` and push the module table.
    ///
    /// The table holds the four entrypoints and a resource under
    /// [`GC_PROXY_FIELD`] whose finalizer runs `shutdown`. Returns 1, the
    /// number of values pushed.
    pub fn open(&self, host_id: HostId, host: &H) -> i32 {
        self.create(host_id, host);

        host.new_table();
        for entry in Entrypoint::ALL {
            host.push_entrypoint(entry);
            host.set_field(-2, entry.name());
        }

        if host.new_metatable(&self.config.module_meta) {
            host.push_entrypoint(Entrypoint::Shutdown);
            host.set_field(-2, "__gc");
        }
        host.pop(1);

        host.new_userdata();
        host.get_metatable(&self.config.module_meta);
        host.set_metatable(-2);
        host.set_field(-2, GC_PROXY_FIELD);
        1
    }
}

impl<H> Drop for Bridge<H> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

fn retire<H>(instance: &Instance<H>, why: &'static str) {
    instance.token.cancel();
    tracing::debug!(instance = %instance.id, why, "interpreter cancelled");
}

/// The symbol space every new instance gets: the host callback, the
/// registration handle and the instance's cancellation context.
fn bridge_exports<H: HostStack>(
    host: &H,
    host_lock: &Arc<HostLock>,
    registry: &SharedRegistry,
    token: &CancelToken,
) -> Exports {
    let mut exports = Exports::new();
    let host = host.clone();
    let lock = Arc::clone(host_lock);
    let registry = registry.clone();
    exports
        .package("bridge")
        .function(
            "call_host",
            Signature::variadic(vec![NativeType::Str, NativeType::Any], vec![NativeType::Any]),
            move |args| match args {
                [NativeValue::Str(name), rest @ ..] => native_to_host(&host, &lock, name, rest)
                    .map(|value| vec![value])
                    .map_err(|e| e.to_string()),
                _ => Err("call_host needs a function name".to_string()),
            },
        )
        .function(
            "register",
            Signature::new(vec![NativeType::Str, NativeType::Func], vec![]),
            move |args| match args {
                [NativeValue::Str(name), NativeValue::Func(function)] => {
                    registry.register(name.to_string(), function.clone());
                    Ok(vec![])
                }
                _ => Err("register needs a name and a function".to_string()),
            },
        );
    exports
        .package("context")
        .insert("global", NativeValue::Context(token.clone()));
    exports
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests;
