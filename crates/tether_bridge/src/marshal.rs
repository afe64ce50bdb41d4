//! Value marshaling between the host stack and the native side.
//!
//! Both directions are total. Every native number widens to `f64` with no
//! range or precision check; 64-bit integers beyond 2^53 round.

use tether_native::NativeValue;

use crate::host::{HostStack, HostType};
use crate::value::Value;

/// Read the slot at `idx` without popping it.
pub fn read_value<H: HostStack>(host: &H, idx: i32) -> Value {
    match host.host_type(idx) {
        HostType::None | HostType::Nil => Value::Nil,
        HostType::Boolean => Value::Bool(host.to_boolean(idx)),
        HostType::Number => Value::Number(host.to_number(idx)),
        HostType::String => match host.to_str(idx) {
            Some(s) => Value::Str(s),
            None => Value::Opaque(host.render(idx)),
        },
        HostType::LightUserdata
        | HostType::Table
        | HostType::Function
        | HostType::Userdata
        | HostType::Thread => Value::Opaque(host.render(idx)),
    }
}

/// Read every slot from `from` to the top of the frame.
pub fn read_values<H: HostStack>(host: &H, from: i32) -> Vec<Value> {
    (from..=host.top()).map(|idx| read_value(host, idx)).collect()
}

pub fn push_value<H: HostStack>(host: &H, value: &Value) {
    match value {
        Value::Nil => host.push_nil(),
        Value::Bool(b) => host.push_boolean(*b),
        Value::Number(n) => host.push_number(*n),
        Value::Str(s) | Value::Opaque(s) => host.push_str(s),
    }
}

/// Host value to native value. Rendered composites become strings.
pub fn to_native(value: Value) -> NativeValue {
    match value {
        Value::Nil => NativeValue::Nil,
        Value::Bool(b) => NativeValue::Bool(b),
        Value::Number(n) => NativeValue::Float(n),
        Value::Str(s) | Value::Opaque(s) => NativeValue::string(s),
    }
}

/// Native value to host value.
///
/// Lists, functions and contexts have no host counterpart and cross as
/// their rendering.
pub fn to_value(value: &NativeValue) -> Value {
    match value {
        NativeValue::Nil => Value::Nil,
        NativeValue::Bool(b) => Value::Bool(*b),
        NativeValue::Str(s) => Value::Str(s.to_string()),
        NativeValue::Int(..) | NativeValue::Uint(..) | NativeValue::F32(_) | NativeValue::Float(_) => {
            Value::Number(value.as_f64().unwrap_or_default())
        }
        NativeValue::List(..) | NativeValue::Func(_) | NativeValue::Context(_) => {
            Value::Opaque(value.to_string())
        }
    }
}

#[cfg(test)]
mod tests;
