use parking_lot::Mutex;

use super::*;
use crate::config::DEFAULT_MODULE_META;
use crate::memory_host::MemoryHost;
use crate::value::Value;
use pretty_assertions::assert_eq;

/// Remembers what it was given; fails on the source text `fail`.
#[derive(Default)]
struct Recorder {
    installed: Mutex<Vec<String>>,
    sources: Mutex<Vec<String>>,
}

struct RecordingEvaluator(Arc<Recorder>);

impl Evaluator for RecordingEvaluator {
    fn install(&self, exports: Exports) {
        let mut installed = self.0.installed.lock();
        for (path, package) in exports.into_packages() {
            let mut names: Vec<String> = package.iter().map(|(name, _)| format!("{path}.{name}")).collect();
            names.sort();
            installed.extend(names);
        }
    }

    fn evaluate(&self, source: &str) -> Result<(), String> {
        self.0.sources.lock().push(source.to_string());
        if source == "fail" {
            Err("1:1: runtime error: nope".to_string())
        } else {
            Ok(())
        }
    }
}

fn recording_bridge() -> (Arc<Bridge<MemoryHost>>, Arc<Recorder>, MemoryHost) {
    let recorder = Arc::new(Recorder::default());
    let shared = Arc::clone(&recorder);
    let bridge = Arc::new(Bridge::with_evaluator(BridgeConfig::default(), move |_| {
        Box::new(RecordingEvaluator(Arc::clone(&shared))) as Box<dyn Evaluator>
    }));
    let host = MemoryHost::new();
    host.attach(&bridge);
    (bridge, recorder, host)
}

#[test]
fn create_installs_the_bridge_symbols() {
    let (bridge, recorder, host) = recording_bridge();
    bridge.create(host.id(), &host);
    let mut installed = recorder.installed.lock().clone();
    installed.sort();
    assert_eq!(
        installed,
        vec![
            "bridge.call_host".to_string(),
            "bridge.register".to_string(),
            "context.global".to_string(),
        ]
    );
}

#[test]
fn absent_instances_ignore_operations() {
    let (bridge, recorder, host) = recording_bridge();
    assert_eq!(bridge.exec(host.id(), "anything"), Ok(()));
    assert!(!bridge.shutdown(host.id()));
    host.push_str("name");
    assert_eq!(bridge.dispatch(host.id(), Entrypoint::Invoke, &host), Ok(0));
    assert_eq!(bridge.dispatch(host.id(), Entrypoint::Exec, &host), Ok(0));
    assert!(recorder.sources.lock().is_empty());
}

#[test]
fn shutdown_cancels_and_is_idempotent() {
    let (bridge, _, host) = recording_bridge();
    bridge.create(host.id(), &host);
    let instance = bridge.instance(host.id()).unwrap();
    assert!(bridge.shutdown(host.id()));
    assert!(instance.token().is_cancelled());
    assert!(!bridge.shutdown(host.id()));
    assert_eq!(bridge.instance_count(), 0);
}

#[test]
fn replacement_issues_a_new_generation() {
    let (bridge, _, host) = recording_bridge();
    let first = bridge.create(host.id(), &host);
    let old = bridge.instance(host.id()).unwrap();
    let second = bridge.create(host.id(), &host);
    assert!(second > first);
    assert!(old.token().is_cancelled());
    let current = bridge.instance(host.id()).unwrap();
    assert_eq!(current.id(), second);
    assert!(!current.token().is_cancelled());
    assert!(!current.registry().ptr_eq(old.registry()));
    assert_eq!(bridge.instance_count(), 1);
}

#[test]
fn evaluation_failures_are_prefixed() {
    let (bridge, recorder, host) = recording_bridge();
    bridge.create(host.id(), &host);
    let err = bridge.exec(host.id(), "fail").unwrap_err();
    assert_eq!(err.to_string(), "execution failed: 1:1: runtime error: nope");
    // Still active.
    assert_eq!(bridge.exec(host.id(), "ok"), Ok(()));
    assert_eq!(*recorder.sources.lock(), vec!["fail".to_string(), "ok".to_string()]);
}

#[test]
fn exec_needs_source_text() {
    let (bridge, recorder, host) = recording_bridge();
    bridge.create(host.id(), &host);
    host.new_table();
    assert!(matches!(
        bridge.dispatch(host.id(), Entrypoint::Exec, &host),
        Err(BridgeError::BadArgument { entrypoint: "exec", .. })
    ));
    host.set_top(0);
    host.push_number(3.0);
    assert_eq!(bridge.dispatch(host.id(), Entrypoint::Exec, &host), Ok(0));
    assert_eq!(*recorder.sources.lock(), vec!["3.0".to_string()]);
}

#[test]
fn open_builds_the_module_table() {
    let (bridge, _, host) = recording_bridge();
    assert_eq!(bridge.open(host.id(), &host), 1);
    assert_eq!(host.top(), 1);
    assert!(bridge.instance(host.id()).is_some());

    for entry in Entrypoint::ALL {
        assert_eq!(host.get_field(1, entry.name()), HostType::Function);
        host.pop(1);
    }
    assert_eq!(host.get_field(1, GC_PROXY_FIELD), HostType::Userdata);
    host.pop(1);
    assert_eq!(host.get_metatable(DEFAULT_MODULE_META), HostType::Table);
    assert_eq!(host.get_field(-1, "__gc"), HostType::Function);
}

#[test]
fn module_entrypoints_reach_the_bridge() {
    let (bridge, recorder, host) = recording_bridge();
    bridge.open(host.id(), &host);
    host.set_global("tether");

    host.call_field("tether", "exec", &[Value::str("ok")]).unwrap();
    assert_eq!(*recorder.sources.lock(), vec!["ok".to_string()]);

    let err = host.call_field("tether", "exec", &[Value::str("fail")]).unwrap_err();
    assert!(err.starts_with("execution failed"));

    host.call_field("tether", "shutdown", &[]).unwrap();
    assert!(bridge.instance(host.id()).is_none());
    host.call_field("tether", "exec", &[Value::str("ignored")]).unwrap();
    assert_eq!(recorder.sources.lock().len(), 2);

    host.call_field("tether", "new", &[]).unwrap();
    assert!(bridge.instance(host.id()).is_some());
}

#[test]
fn finalizer_shuts_the_instance_down() {
    let (bridge, _, host) = recording_bridge();
    bridge.open(host.id(), &host);
    let instance = bridge.instance(host.id()).unwrap();
    assert_eq!(host.collect_garbage(), 0);

    host.set_top(0);
    assert_eq!(host.collect_garbage(), 1);
    assert!(bridge.instance(host.id()).is_none());
    assert!(instance.token().is_cancelled());
}

#[test]
fn instance_tokens_derive_from_the_bridge() {
    let (bridge, _recorder, host) = recording_bridge();
    bridge.create(host.id(), &host);
    let instance = bridge.instance(host.id()).unwrap();
    let token = instance.token().clone();
    assert!(!token.is_cancelled());

    drop(bridge);
    assert!(token.is_cancelled());
    assert!(instance.token().is_cancelled());
}
