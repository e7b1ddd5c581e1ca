//! Contract tests for interpreter API
//!
//! These tests pin down the public surface embedders rely on.

use std::sync::Arc;

use bytecode_system::{AccessFlags, ClassBuilder, Opcode};
use class_linker::MemoryClassSource;
use core_types::Value;
use interpreter::{
    ExecResult, ExecutionError, Hooks, Monitor, MonitorTable, Task, ThreadAttachment, Vm,
    VmConfig, VmJoinHandle, VmThread,
};

fn assert_send_sync<T: Send + Sync>() {}
fn assert_send<T: Send>() {}

/// The VM and its parts are shared across host threads
#[test]
fn test_shared_types_are_thread_safe() {
    assert_send_sync::<Vm>();
    assert_send_sync::<VmThread>();
    assert_send_sync::<Hooks>();
    assert_send_sync::<Monitor>();
    assert_send_sync::<MonitorTable>();
    assert_send_sync::<ExecutionError>();
    assert_send::<ThreadAttachment>();
    assert_send::<VmJoinHandle<i32>>();
    assert_send::<Task>();
}

/// Vm::new() boots the built-in class library
#[test]
fn test_vm_new_contract() {
    let vm = Vm::new(VmConfig::default()).unwrap();
    let main = vm.attach_thread("main").unwrap();
    for name in [
        "java/lang/Object",
        "java/lang/String",
        "java/lang/Thread",
        "java/lang/OutOfMemoryError",
        "java.lang.System",
    ] {
        assert!(vm.find_class(main.thread(), name).is_ok(), "{}", name);
    }
    assert!(vm.linker().class_count() > 0);
}

/// Vm::attach_thread() registers the calling thread until the attachment drops
#[test]
fn test_attach_thread_contract() {
    let vm = Vm::new(VmConfig::default()).unwrap();
    let attachment = vm.attach_thread("embedder").unwrap();
    assert_eq!(attachment.thread().name(), "embedder");
    assert!(attachment.thread().object().is_some());
    assert_eq!(
        vm.current_thread().map(|thread| thread.id()),
        Some(attachment.thread().id())
    );
    drop(attachment);
    assert!(vm.threads().is_empty());
}

/// Vm::define_class() + invoke_static() run guest code and return its result
#[test]
fn test_define_and_invoke_contract() {
    let mut class = ClassBuilder::new("contract/Sum");
    let mut add = class.method(AccessFlags::PUBLIC | AccessFlags::STATIC, "add", "(JI)J");
    add.op(Opcode::Lload0)
        .op(Opcode::Iload2)
        .op(Opcode::I2l)
        .op(Opcode::Ladd)
        .op(Opcode::Lreturn)
        .maxs(4, 3);
    add.finish().unwrap();

    let vm = Vm::new(VmConfig::default()).unwrap();
    let main = vm.attach_thread("main").unwrap();
    let defined = vm.define_class(main.thread(), &class.to_bytes()).unwrap();
    assert_eq!(defined.name(), "contract/Sum");

    let result: ExecResult<Option<Value>> = vm.invoke_static(
        main.thread(),
        "contract/Sum",
        "add",
        "(JI)J",
        &[Value::Long(40), Value::Int(2)],
    );
    assert_eq!(result.unwrap(), Some(Value::Long(42)));
}

/// Vm::with_class_source() resolves application classes lazily
#[test]
fn test_class_source_contract() {
    let mut class = ClassBuilder::new("contract/Lazy");
    let mut get = class.method(AccessFlags::PUBLIC | AccessFlags::STATIC, "get", "()Z");
    get.iconst(1).op(Opcode::Ireturn).maxs(1, 0);
    get.finish().unwrap();
    let source = MemoryClassSource::new();
    source.insert("contract/Lazy", class.to_bytes());

    let vm = Vm::with_class_source(VmConfig::default(), Arc::new(source)).unwrap();
    let main = vm.attach_thread("main").unwrap();
    let before = vm.linker().class_count();
    let result = vm
        .invoke_static(main.thread(), "contract.Lazy", "get", "()Z", &[])
        .unwrap();
    assert_eq!(result, Some(Value::Boolean(true)));
    assert!(vm.linker().class_count() > before);
}

/// Guest exceptions come back as ExecutionError::Guest, never as panics
#[test]
fn test_guest_exception_contract() {
    let vm = Vm::new(VmConfig::default()).unwrap();
    let main = vm.attach_thread("main").unwrap();
    let exception = vm
        .new_exception(main.thread(), "java/lang/IllegalStateException", Some("bad state"))
        .unwrap();
    assert_eq!(
        vm.describe_exception(&exception).unwrap(),
        "java.lang.IllegalStateException: bad state"
    );
    let error = ExecutionError::Guest(exception.clone());
    assert!(!error.is_fatal());
    assert_eq!(error.exception(), Some(&exception));
}

/// Strings cross the embedding boundary as guest objects
#[test]
fn test_string_contract() {
    let vm = Vm::new(VmConfig::default()).unwrap();
    let main = vm.attach_thread("main").unwrap();
    let string = vm.new_string(main.thread(), "héllo ☃").unwrap();
    assert_eq!(vm.read_string(&string).unwrap(), "héllo ☃");
    let length = vm
        .invoke_virtual(main.thread(), &string, "length", "()I", &[])
        .unwrap();
    assert_eq!(length, Some(Value::Int(7)));
}
