use super::*;
use crate::memory_host::{HostValue, MemoryHost};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use tether_native::{CancelToken, IntWidth, NativeFunction, NativeType, Signature};

fn through_host(value: &Value) -> Value {
    let host = MemoryHost::new();
    push_value(&host, value);
    read_value(&host, -1)
}

#[test]
fn scalars_cross_unchanged() {
    for value in [
        Value::Nil,
        Value::Bool(true),
        Value::Bool(false),
        Value::Number(-0.5),
        Value::str("hello"),
        Value::str(""),
    ] {
        assert_eq!(through_host(&value), value);
        assert_eq!(to_value(&to_native(value.clone())), value);
    }
}

#[test]
fn absence_is_nil_on_both_sides() {
    assert!(to_native(Value::Nil).is_nil());
    assert_eq!(to_value(&NativeValue::Nil), Value::Nil);
    let host = MemoryHost::new();
    assert_eq!(read_value(&host, 1), Value::Nil);
}

#[test]
fn composites_cross_as_their_rendering() {
    let host = MemoryHost::new();
    host.new_table();
    host.push(HostValue::function(|_| Ok(0)));
    host.new_userdata();
    for idx in 1..=3 {
        let rendered = host.render(idx);
        assert_eq!(read_value(&host, idx), Value::Opaque(rendered.clone()));
        assert_eq!(to_native(read_value(&host, idx)), NativeValue::string(rendered));
    }
}

#[test]
fn opaque_values_push_as_text() {
    let host = MemoryHost::new();
    push_value(&host, &Value::Opaque("table: 0x1".to_string()));
    assert_eq!(read_value(&host, -1), Value::str("table: 0x1"));
}

#[test]
fn native_numbers_widen_to_f64() {
    let cases = [
        (NativeValue::Int(-8, IntWidth::W8), -8.0),
        (NativeValue::uint(7), 7.0),
        (NativeValue::F32(0.5), 0.5),
        (NativeValue::Float(1e300), 1e300),
    ];
    for (native, expected) in cases {
        assert_eq!(to_value(&native), Value::Number(expected));
    }
    // Widening is lossy past 2^53.
    assert_eq!(
        to_value(&NativeValue::int(i64::MAX)),
        Value::Number(2f64.powi(63))
    );
    assert_eq!(to_native(Value::Number(3.0)), NativeValue::Float(3.0));
}

#[test]
fn native_composites_cross_as_their_rendering() {
    let list = NativeValue::list(NativeType::Str, vec![NativeValue::string("a")]);
    assert_eq!(to_value(&list), Value::Opaque(list.to_string()));

    let func = NativeValue::Func(NativeFunction::new(
        "f",
        Signature::new(vec![], vec![]),
        |_| Ok(vec![]),
    ));
    assert_eq!(to_value(&func), Value::Opaque(func.to_string()));

    let ctx = NativeValue::Context(CancelToken::new());
    assert!(matches!(to_value(&ctx), Value::Opaque(_)));
}

#[test]
fn read_values_reads_to_the_top() {
    let host = MemoryHost::new();
    host.push_str("name");
    host.push_number(1.0);
    host.push_boolean(true);
    assert_eq!(
        read_values(&host, 2),
        vec![Value::Number(1.0), Value::Bool(true)]
    );
    assert_eq!(read_values(&host, 4), vec![]);
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Nil),
        any::<bool>().prop_map(Value::Bool),
        any::<f64>()
            .prop_filter("NaN never equals itself", |n| !n.is_nan())
            .prop_map(Value::Number),
        ".*".prop_map(Value::Str),
    ]
}

proptest! {
    #[test]
    fn scalars_round_trip(value in scalar()) {
        prop_assert_eq!(through_host(&value), value.clone());
        prop_assert_eq!(to_value(&to_native(value.clone())), value);
    }
}
