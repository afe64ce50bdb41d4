//! Callbacks into the host from several threads.

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Tests can panic")]

mod common;

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use common::{exec, open};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tether_bridge::{
    Bridge, BridgeConfig, Evaluator, Exports, HostStack, MemoryHost, NativeFunction, NativeValue,
};

/// Host global `slow_echo` returns its argument after a short pause.
fn slow_echo(host: &MemoryHost) {
    host.register("slow_echo", |host| {
        let value = host.to_number(1);
        thread::sleep(Duration::from_millis(1));
        host.push_number(value);
        Ok(1)
    });
}

#[test]
fn host_calls_from_many_threads_are_serialized() {
    let (bridge, host) = open();
    slow_echo(&host);
    exec(
        &host,
        r#"fn relay(x: float) -> float { float(bridge.call_host("slow_echo", x)) }
           bridge.register("relay", relay);"#,
    )
    .unwrap();
    let relay = bridge.instance(host.id()).unwrap().registry().get("relay").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let relay = relay.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    let x = f64::from(t * 100 + i);
                    assert_eq!(
                        relay.invoke(&[NativeValue::Float(x)]).unwrap(),
                        vec![NativeValue::Float(x)]
                    );
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(host.violations(), 0);
    assert_eq!(host.top(), 0);
}

#[test]
fn host_thread_reentry_does_not_deadlock() {
    let (bridge, host) = open();
    slow_echo(&host);
    host.register("outer", |host| {
        // host -> native -> host while the host-call lock is held
        host.get_global("tether");
        host.get_field(-1, "invoke");
        host.push_str("relay");
        host.push_number(5.0);
        host.pcall(2, 1)?;
        let value = host.to_number(-1);
        host.set_top(0);
        host.push_number(value * 2.0);
        Ok(1)
    });
    exec(
        &host,
        r#"fn relay(x: float) -> float { float(bridge.call_host("slow_echo", x)) }
           bridge.register("relay", relay);
           fn outer() -> float { float(bridge.call_host("outer")) }
           bridge.register("outer", outer);"#,
    )
    .unwrap();
    let outer = bridge.instance(host.id()).unwrap().registry().get("outer").unwrap();
    assert_eq!(outer.invoke(&[]).unwrap(), vec![NativeValue::Float(10.0)]);
    assert_eq!(host.violations(), 0);
}

/// Evaluates each chunk by sending it to host global `ping` from a worker
/// thread and waiting for the answer.
#[derive(Default)]
struct ThreadedEvaluator {
    call_host: Mutex<Option<NativeFunction>>,
}

impl Evaluator for ThreadedEvaluator {
    fn install(&self, exports: Exports) {
        if let Some(NativeValue::Func(call_host)) =
            exports.get("bridge").and_then(|package| package.get("call_host"))
        {
            *self.call_host.lock() = Some(call_host.clone());
        }
    }

    fn evaluate(&self, source: &str) -> Result<(), String> {
        let call_host = self
            .call_host
            .lock()
            .clone()
            .ok_or("bridge.call_host is not installed")?;
        let (done_tx, done_rx) = mpsc::channel();
        let chunk = NativeValue::string(source);
        thread::spawn(move || {
            let result = call_host
                .invoke(&[NativeValue::string("ping"), chunk])
                .map_err(|e| e.to_string());
            done_tx.send(result).ok();
        });
        match done_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(result) => result.map(drop),
            Err(_) => Err("worker callback did not finish".to_string()),
        }
    }
}

#[test]
fn worker_thread_callbacks_complete_while_exec_waits() {
    let bridge = Arc::new(Bridge::with_evaluator(BridgeConfig::new(), |_| {
        Box::new(ThreadedEvaluator::default()) as Box<dyn Evaluator>
    }));
    let host = MemoryHost::new();
    host.attach(&bridge);
    assert_eq!(bridge.open(host.id(), &host), 1);
    host.set_global("tether");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    host.register("ping", move |host| {
        sink.lock().push(host.to_str(1).unwrap_or_default());
        host.push_str("pong");
        Ok(1)
    });

    exec(&host, "first").unwrap();
    exec(&host, "second").unwrap();
    assert_eq!(*seen.lock(), vec!["first".to_string(), "second".to_string()]);
    assert_eq!(host.violations(), 0);
    assert_eq!(host.top(), 0);
}

#[test]
fn host_lock_is_not_held_across_other_hosts() {
    let (bridge, host) = open();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    host.register("block", move |_| {
        entered_tx.send(()).ok();
        release_rx.lock().recv().ok();
        Ok(0)
    });
    exec(
        &host,
        r#"fn block() { bridge.call_host("block"); }
           bridge.register("block", block);"#,
    )
    .unwrap();
    let block = bridge.instance(host.id()).unwrap().registry().get("block").unwrap();
    let worker = thread::spawn(move || block.invoke(&[]).unwrap());
    entered_rx.recv().unwrap();

    // Another host opens and shuts down while the first is inside a host call.
    let other = MemoryHost::new();
    other.attach(&bridge);
    bridge.open(other.id(), &other);
    other.set_global("tether");
    exec(&other, "let x = 1;").unwrap();
    assert!(bridge.shutdown(other.id()));

    release_tx.send(()).unwrap();
    worker.join().unwrap();
    assert!(bridge.instance(host.id()).is_some());
}
