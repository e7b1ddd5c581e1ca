//! Program entry, output, clocks and the collector

use std::sync::Arc;

use bytecode_system::{ArrayKind, ClassBuilder, Opcode, ValueKind};
use core_types::Value;
use interpreter::{TimeSource, VmConfig};
use memory_manager::HeapConfig;

use super::{describe, public_static, vm_with, vm_with_config, SharedBuffer};

const PRINT_STREAM: &str = "java/io/PrintStream";
const OUT: &str = "Ljava/io/PrintStream;";

fn program() -> ClassBuilder {
    let mut class = ClassBuilder::new("t/Main");
    class.source_file("Main.java");
    let mut main = class.method(public_static(), "main", "([Ljava/lang/String;)V");
    main.field(Opcode::Getstatic, "java/lang/System", "out", OUT)
        .ldc_string("hello")
        .invoke(Opcode::Invokevirtual, PRINT_STREAM, "println", "(Ljava/lang/String;)V")
        .field(Opcode::Getstatic, "java/lang/System", "out", OUT)
        .load(ValueKind::Reference, 0)
        .op(Opcode::Arraylength)
        .invoke(Opcode::Invokevirtual, PRINT_STREAM, "println", "(I)V")
        .field(Opcode::Getstatic, "java/lang/System", "out", OUT)
        .load(ValueKind::Reference, 0)
        .iconst(1)
        .op(Opcode::Aaload)
        .invoke(Opcode::Invokevirtual, PRINT_STREAM, "print", "(Ljava/lang/String;)V")
        .op(Opcode::Return)
        .maxs(3, 1);
    main.finish().unwrap();
    class
}

#[test]
fn test_run_main_prints() {
    let vm = vm_with(vec![program()]);
    let output = SharedBuffer::default();
    vm.set_output(Box::new(output.clone()));
    vm.run_main("t.Main", &["first".to_string(), "second".to_string()])
        .unwrap();
    assert_eq!(output.contents(), "hello\n2\nsecond");
    assert!(vm.current_thread().is_none());
}

#[test]
fn test_run_main_reports_failure() {
    let mut class = ClassBuilder::new("t/Crash");
    class.source_file("Crash.java");
    let mut main = class.method(public_static(), "main", "([Ljava/lang/String;)V");
    main.line(3)
        .op(Opcode::AconstNull)
        .op(Opcode::Arraylength)
        .op(Opcode::Pop)
        .op(Opcode::Return)
        .maxs(1, 1);
    main.finish().unwrap();

    let vm = vm_with(vec![class]);
    let error = vm.run_main("t.Crash", &[]).unwrap_err();
    let text = describe(&vm, &error);
    assert!(text.starts_with("java.lang.NullPointerException"));
    assert!(text.contains("\tat t.Crash.main(Crash.java:3)"));
}

#[test]
fn test_run_main_requires_main() {
    let vm = vm_with(vec![ClassBuilder::new("t/Empty")]);
    let error = vm.run_main("t.Empty", &[]).unwrap_err();
    assert!(describe(&vm, &error).starts_with("java.lang.NoSuchMethodError"));
}

struct FixedClock;

impl TimeSource for FixedClock {
    fn current_time_millis(&self) -> i64 {
        1_700_000_000_000
    }

    fn nano_time(&self) -> i64 {
        42
    }
}

#[test]
fn test_time_source_replaced() {
    let mut class = ClassBuilder::new("t/Clock");
    let mut now = class.method(public_static(), "now", "()J");
    now.invoke(Opcode::Invokestatic, "java/lang/System", "currentTimeMillis", "()J")
        .op(Opcode::Lreturn)
        .maxs(2, 0);
    now.finish().unwrap();
    let mut nanos = class.method(public_static(), "nanos", "()J");
    nanos
        .invoke(Opcode::Invokestatic, "java/lang/System", "nanoTime", "()J")
        .op(Opcode::Lreturn)
        .maxs(2, 0);
    nanos.finish().unwrap();

    let vm = vm_with(vec![class]);
    vm.set_time_source(Arc::new(FixedClock));
    let main = vm.attach_thread("main").unwrap();
    let thread = main.thread();
    assert_eq!(
        vm.invoke_static(thread, "t/Clock", "now", "()J", &[]).unwrap(),
        Some(Value::Long(1_700_000_000_000))
    );
    assert_eq!(
        vm.invoke_static(thread, "t/Clock", "nanos", "()J", &[]).unwrap(),
        Some(Value::Long(42))
    );
}

fn churn() -> ClassBuilder {
    let mut class = ClassBuilder::new("t/Churn");
    let mut run = class.method(public_static(), "run", "(I)V");
    let top = run.new_label();
    let done = run.new_label();
    run.bind(top)
        .load(ValueKind::Int, 0)
        .branch(Opcode::Ifle, done)
        .type_op(Opcode::New, "java/lang/Object")
        .op(Opcode::Dup)
        .invoke(Opcode::Invokespecial, "java/lang/Object", "<init>", "()V")
        .op(Opcode::Pop)
        .iinc(0, -1)
        .goto(top)
        .bind(done)
        .op(Opcode::Return)
        .maxs(2, 1);
    run.finish().unwrap();

    let mut hog = class.method(public_static(), "hog", "()I");
    hog.iconst(4_000_000)
        .newarray(ArrayKind::Int)
        .op(Opcode::Arraylength)
        .op(Opcode::Ireturn)
        .maxs(1, 0);
    hog.finish().unwrap();

    let mut collect = class.method(public_static(), "collect", "()V");
    collect
        .invoke(Opcode::Invokestatic, "java/lang/System", "gc", "()V")
        .op(Opcode::Return)
        .maxs(0, 0);
    collect.finish().unwrap();
    class
}

#[test]
fn test_collection_frees_garbage() {
    let config = VmConfig {
        gc_stats: true,
        ..VmConfig::default()
    };
    let vm = vm_with_config(config, vec![churn()]);
    let main = vm.attach_thread("main").unwrap();
    vm.invoke_static(main.thread(), "t/Churn", "run", "(I)V", &[Value::Int(2000)])
        .unwrap();

    vm.collect_garbage().unwrap();
    let freed: usize = vm.gc_history().iter().map(|stats| stats.freed_objects).sum();
    assert!(freed >= 2000, "freed only {} objects", freed);

    let settled = vm.collect_garbage().unwrap();
    assert_eq!(settled.freed_objects, 0);
    assert_eq!(vm.gc_history().len(), 2);
}

#[test]
fn test_guest_requested_collection() {
    let vm = vm_with(vec![churn()]);
    let main = vm.attach_thread("main").unwrap();
    let thread = main.thread();
    vm.invoke_static(thread, "t/Churn", "run", "(I)V", &[Value::Int(500)])
        .unwrap();
    let before = vm.heap_stats().total_frees;
    vm.invoke_static(thread, "t/Churn", "collect", "()V", &[]).unwrap();
    assert!(vm.heap_stats().total_frees >= before + 500);
}

#[test]
fn test_handles_pin_objects() {
    let vm = vm_with(vec![]);
    let main = vm.attach_thread("main").unwrap();
    vm.collect_garbage().unwrap();

    let object = vm
        .new_instance(main.thread(), "java/lang/Object", "()V", &[])
        .unwrap();
    assert_eq!(main.thread().held_count(), 0);
    let handle = vm.make_handle(&object);
    let pinned = vm.collect_garbage().unwrap();
    assert_eq!(pinned.freed_objects, 0);
    assert!(pinned.pinned_objects >= 1);
    assert!(vm.gc().is_pinned(&object));

    assert!(vm.release_handle(&handle));
    let released = vm.collect_garbage().unwrap();
    assert_eq!(released.freed_objects, 1);
}

#[test]
fn test_heap_exhaustion_raises_out_of_memory() {
    let config = VmConfig {
        heap: HeapConfig {
            max_heap_size: 4 * 1024 * 1024,
            ..HeapConfig::default()
        },
        ..VmConfig::default()
    };
    let vm = vm_with_config(config, vec![churn()]);
    let main = vm.attach_thread("main").unwrap();
    let thread = main.thread();
    let error = vm
        .invoke_static(thread, "t/Churn", "hog", "()I", &[])
        .unwrap_err();
    assert!(describe(&vm, &error).starts_with("java.lang.OutOfMemoryError: Java heap space"));

    vm.invoke_static(thread, "t/Churn", "run", "(I)V", &[Value::Int(10)])
        .unwrap();
}

#[test]
fn test_identity_hash_is_stable() {
    let vm = vm_with(vec![]);
    let main = vm.attach_thread("main").unwrap();
    let thread = main.thread();
    let object = vm.new_instance(thread, "java/lang/Object", "()V", &[]).unwrap();
    let first = vm.invoke_virtual(thread, &object, "hashCode", "()I", &[]).unwrap();
    let second = vm.invoke_virtual(thread, &object, "hashCode", "()I", &[]).unwrap();
    assert_eq!(first, second);
}
