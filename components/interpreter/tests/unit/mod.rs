//! Unit tests for interpreter components

use std::sync::Arc;

use core_types::{Value, VmError};
use interpreter::{normalize, Hooks, Intercept, Invocation, Locals, MonitorTable, Stack, VmConfig};
use memory_manager::SafepointBarrier;

// ============================================================================
// Stack Tests
// ============================================================================

#[test]
fn test_stack_wide_values_take_two_slots() {
    let stack = Stack::new(4);
    stack.push(Value::Int(1)).unwrap();
    stack.push_wide(Value::Double(2.5)).unwrap();
    assert_eq!(stack.len(), 3);
    assert_eq!(stack.snapshot()[2], Value::Top);
    assert_eq!(stack.pop_double().unwrap(), 2.5);
    assert_eq!(stack.pop_int().unwrap(), 1);
    assert!(stack.is_empty());
}

#[test]
fn test_stack_wide_marker_then_value() {
    let stack = Stack::new(2);
    stack.push_wide(Value::Long(7)).unwrap();
    assert_eq!(stack.pop_slot().unwrap(), Value::Top);
    assert_eq!(stack.pop_slot().unwrap(), Value::Long(7));
    assert!(matches!(stack.pop_slot(), Err(VmError::StackUnderflow)));
}

#[test]
fn test_stack_rejects_mixed_widths() {
    let stack = Stack::new(4);
    assert!(matches!(
        stack.push(Value::Long(1)),
        Err(VmError::SlotDiscipline(_))
    ));
    assert!(matches!(
        stack.push_wide(Value::Int(1)),
        Err(VmError::SlotDiscipline(_))
    ));

    stack.push_wide(Value::Long(7)).unwrap();
    assert!(matches!(stack.pop(), Err(VmError::SlotDiscipline(_))));
    assert!(matches!(stack.peek(), Err(VmError::SlotDiscipline(_))));
    assert_eq!(stack.pop_long().unwrap(), 7);

    stack.push(Value::Int(1)).unwrap();
    stack.push(Value::Int(2)).unwrap();
    assert!(matches!(stack.pop_wide(), Err(VmError::SlotDiscipline(_))));
}

#[test]
fn test_stack_bounds() {
    let stack = Stack::new(2);
    assert!(matches!(stack.pop(), Err(VmError::StackUnderflow)));
    stack.push(Value::Int(1)).unwrap();
    assert!(matches!(
        stack.push_wide(Value::Long(2)),
        Err(VmError::StackOverflow(2))
    ));
    stack.push(Value::Null).unwrap();
    assert!(matches!(
        stack.push(Value::Int(3)),
        Err(VmError::StackOverflow(2))
    ));
    assert_eq!(stack.pop_reference().unwrap(), None);
}

#[test]
fn test_stack_push_value_normalizes() {
    let stack = Stack::new(4);
    stack.push_value(Value::Boolean(true)).unwrap();
    stack.push_value(Value::Char(65)).unwrap();
    stack.push_value(Value::Long(-1)).unwrap();
    assert_eq!(stack.len(), 4);
    assert_eq!(stack.pop_value(true).unwrap(), Value::Long(-1));
    assert_eq!(stack.pop_value(false).unwrap(), Value::Int(65));
    assert_eq!(stack.pop_value(false).unwrap(), Value::Int(1));
}

#[test]
fn test_stack_clear() {
    let stack = Stack::new(3);
    stack.push(Value::Int(1)).unwrap();
    stack.push_wide(Value::Long(2)).unwrap();
    stack.clear();
    assert!(stack.is_empty());
    assert_eq!(stack.max(), 3);
}

#[test]
fn test_normalize() {
    assert_eq!(normalize(Value::Byte(-2)), Value::Int(-2));
    assert_eq!(normalize(Value::Short(300)), Value::Int(300));
    assert_eq!(normalize(Value::Boolean(false)), Value::Int(0));
    assert_eq!(normalize(Value::Float(1.5)), Value::Float(1.5));
    assert_eq!(normalize(Value::Null), Value::Null);
}

// ============================================================================
// Locals Tests
// ============================================================================

#[test]
fn test_locals_arguments_layout() {
    let locals = Locals::with_arguments(
        5,
        &[Value::Int(1), Value::Long(2), Value::Double(3.0)],
    )
    .unwrap();
    assert_eq!(locals.get(0).unwrap(), Value::Int(1));
    assert_eq!(locals.get_wide(1).unwrap(), Value::Long(2));
    assert_eq!(locals.get_wide(3).unwrap(), Value::Double(3.0));
}

#[test]
fn test_locals_too_small_for_arguments() {
    let result = Locals::with_arguments(1, &[Value::Long(2)]);
    assert!(matches!(result, Err(VmError::LocalOutOfRange { .. })));
}

#[test]
fn test_locals_discipline() {
    let locals = Locals::new(3);
    assert!(matches!(locals.get(0), Err(VmError::SlotDiscipline(_))));

    locals.set_wide(0, Value::Long(9)).unwrap();
    assert!(matches!(locals.get(0), Err(VmError::SlotDiscipline(_))));
    assert!(matches!(locals.get(1), Err(VmError::SlotDiscipline(_))));
    assert!(matches!(locals.get_wide(1), Err(VmError::SlotDiscipline(_))));

    locals.set(1, Value::Int(4)).unwrap();
    assert!(matches!(locals.get_wide(0), Err(VmError::SlotDiscipline(_))));
    assert!(matches!(
        locals.set(3, Value::Int(0)),
        Err(VmError::LocalOutOfRange { index: 3, max: 3 })
    ));
    assert!(matches!(
        locals.set_wide(2, Value::Double(0.0)),
        Err(VmError::LocalOutOfRange { .. })
    ));
}

// ============================================================================
// Hooks Tests
// ============================================================================

#[test]
fn test_hooks_interceptor_registry() {
    let hooks = Hooks::new();
    assert!(!hooks.is_intercepted("a/B", "m", "()V"));
    let previous = hooks.intercept(
        "a/B",
        "m",
        "()V",
        Arc::new(|_: &Invocation<'_>| Ok(Intercept::NotHandled)),
    );
    assert!(previous.is_none());
    assert!(hooks.is_intercepted("a/B", "m", "()V"));
    assert!(!hooks.is_intercepted("a/B", "m", "()I"));

    let replaced = hooks.intercept(
        "a/B",
        "m",
        "()V",
        Arc::new(|_: &Invocation<'_>| Ok(Intercept::Handled(None))),
    );
    assert!(replaced.is_some());
    assert!(hooks.remove_interceptor("a/B", "m", "()V").is_some());
    assert!(hooks.remove_interceptor("a/B", "m", "()V").is_none());
}

// ============================================================================
// Monitor Tests
// ============================================================================

#[test]
fn test_monitor_reentry_counts() {
    let table = MonitorTable::new();
    let barrier = SafepointBarrier::new();
    let monitor = table.monitor(0x40);
    monitor.enter(1, &barrier);
    monitor.enter(1, &barrier);
    assert_eq!(monitor.owner(), Some(1));
    assert_eq!(monitor.count(), 2);
    assert!(!monitor.try_enter(2));

    monitor.exit(1, 0x40).unwrap();
    assert_eq!(monitor.owner(), Some(1));
    monitor.exit(1, 0x40).unwrap();
    assert_eq!(monitor.owner(), None);
    assert!(monitor.try_enter(2));
}

#[test]
fn test_monitor_exit_by_non_owner() {
    let table = MonitorTable::new();
    let barrier = SafepointBarrier::new();
    let monitor = table.monitor(0x80);
    assert!(monitor.exit(1, 0x80).is_err());
    monitor.enter(1, &barrier);
    assert!(monitor.exit(2, 0x80).is_err());
    assert_eq!(monitor.owner(), Some(1));
}

#[test]
fn test_monitor_table_shares_monitors() {
    let table = MonitorTable::new();
    assert!(table.is_empty());
    let first = table.monitor(8);
    let again = table.monitor(8);
    assert!(Arc::ptr_eq(&first, &again));
    table.monitor(16);
    assert_eq!(table.len(), 2);
    table.remove(8);
    assert!(table.get(8).is_none());
    assert!(table.get(16).is_some());
}

// ============================================================================
// Config Tests
// ============================================================================

#[test]
fn test_config_defaults() {
    let config = VmConfig::default();
    assert_eq!(config.max_call_depth, 1024);
    assert!(!config.gc_stats);
    assert_eq!(config.thread_stack_size, 16 * 1024 * 1024);
}

#[test]
fn test_config_json_round_trip() {
    let config = VmConfig {
        max_call_depth: 32,
        gc_stats: true,
        ..VmConfig::default()
    };
    let text = serde_json::to_string(&config).unwrap();
    let parsed: VmConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, config);

    let partial: VmConfig = serde_json::from_str(r#"{"gc_stats": true}"#).unwrap();
    assert_eq!(partial.max_call_depth, 1024);
    assert!(partial.gc_stats);
}
