// Shared setup for the integration tests; not every test file uses every helper.
#![allow(dead_code, reason = "each test crate uses a different subset")]

use std::sync::Arc;

use parking_lot::Mutex;
use tether_bridge::{Bridge, BridgeConfig, HostStack, MemoryHost, Value};

/// A bridge with its module opened on a fresh host as global `tether`.
pub fn open() -> (Arc<Bridge<MemoryHost>>, MemoryHost) {
    let bridge = Arc::new(Bridge::new(BridgeConfig::new()));
    let host = MemoryHost::new();
    host.attach(&bridge);
    assert_eq!(bridge.open(host.id(), &host), 1);
    host.set_global("tether");
    (bridge, host)
}

pub fn exec(host: &MemoryHost, source: &str) -> Result<(), String> {
    host.call_field("tether", "exec", &[Value::str(source)]).map(drop)
}

pub fn invoke(host: &MemoryHost, name: &str, args: &[Value]) -> Result<Vec<Value>, String> {
    let mut all = vec![Value::str(name)];
    all.extend_from_slice(args);
    host.call_field("tether", "invoke", &all)
}

/// Register host global `record`, which stores its arguments.
pub fn recorder(host: &MemoryHost) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    host.register("record", move |host| {
        sink.lock().extend(tether_bridge::read_values(host, 1));
        Ok(0)
    });
    seen
}

/// Register host global `add`, which returns the sum of two numbers.
pub fn host_add(host: &MemoryHost) {
    host.register("add", |host| {
        let sum = host.to_number(1) + host.to_number(2);
        host.push_number(sum);
        Ok(1)
    });
}
