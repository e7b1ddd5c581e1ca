//! Unit tests for guest values

use core_types::{ByteOrder, MemoryBlock, ObjectRef, Value};

#[test]
fn test_default_is_null() {
    assert_eq!(Value::default(), Value::Null);
}

#[test]
fn test_conversions() {
    assert_eq!(Value::from(5i32), Value::Int(5));
    assert_eq!(Value::from(5i64), Value::Long(5));
    assert_eq!(Value::from(true), Value::Boolean(true));
    assert_eq!(Value::from(1.0f32).as_float(), Some(1.0));
    assert_eq!(Value::from(1.0f64).as_double(), Some(1.0));
}

#[test]
fn test_references_compare_by_address() {
    let block = MemoryBlock::new(0x40, 16, ByteOrder::Little);
    let a = Value::Reference(ObjectRef::new(block.clone()));
    let b = Value::Reference(ObjectRef::new(block));
    assert_eq!(a, b);
    assert_ne!(a, Value::Null);
}

#[test]
fn test_type_names() {
    assert_eq!(Value::Top.type_name(), "top");
    assert_eq!(Value::ReturnAddress(3).type_name(), "returnAddress");
    assert_eq!(Value::Char(1).type_name(), "char");
}

#[test]
fn test_debug_shows_address() {
    let obj = ObjectRef::new(MemoryBlock::new(0x40, 16, ByteOrder::Little));
    assert_eq!(format!("{:?}", Value::Reference(obj)), "Reference(0x40)");
}
