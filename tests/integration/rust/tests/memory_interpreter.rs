//! Memory Manager to Interpreter Integration Tests
//!
//! Tests the integration between memory_manager and interpreter components.
//! Verifies reachability, handle pinning and heap layout options through
//! programs running on the VM.

use bytecode_system::{AccessFlags, ArrayKind, ClassBuilder, Opcode, ValueKind};
use core_types::{AddressWidth, ByteOrder, Value};
use integration_tests::{boot, default_constructor, public_static};
use interpreter::VmConfig;
use memory_manager::HeapConfig;

const NODE: &str = "m/Node";
const NODE_TYPE: &str = "Lm/Node;";

/// Singly linked list whose head lives in a static field.
fn node_class() -> ClassBuilder {
    let mut class = ClassBuilder::new(NODE);
    class
        .field(AccessFlags::PUBLIC, "next", NODE_TYPE)
        .field(AccessFlags::PUBLIC, "value", "J")
        .field(public_static(), "head", NODE_TYPE);
    default_constructor(&mut class, "java/lang/Object");

    // build(n): head = n fresh nodes, values n..1
    let mut build = class.method(public_static(), "build", "(I)V");
    let top = build.new_label();
    let done = build.new_label();
    build
        .op(Opcode::AconstNull)
        .store(ValueKind::Reference, 1)
        .bind(top)
        .load(ValueKind::Int, 0)
        .branch(Opcode::Ifle, done)
        .type_op(Opcode::New, NODE)
        .op(Opcode::Dup)
        .invoke(Opcode::Invokespecial, NODE, "<init>", "()V")
        .store(ValueKind::Reference, 2)
        .load(ValueKind::Reference, 2)
        .load(ValueKind::Reference, 1)
        .field(Opcode::Putfield, NODE, "next", NODE_TYPE)
        .load(ValueKind::Reference, 2)
        .load(ValueKind::Int, 0)
        .op(Opcode::I2l)
        .field(Opcode::Putfield, NODE, "value", "J")
        .load(ValueKind::Reference, 2)
        .store(ValueKind::Reference, 1)
        .iinc(0, -1)
        .goto(top)
        .bind(done)
        .load(ValueKind::Reference, 1)
        .field(Opcode::Putstatic, NODE, "head", NODE_TYPE)
        .op(Opcode::Return)
        .maxs(3, 3);
    build.finish().unwrap();

    // sum(): walks the list from head
    let mut sum = class.method(public_static(), "sum", "()J");
    let top = sum.new_label();
    let done = sum.new_label();
    sum.lconst(0)
        .store(ValueKind::Long, 0)
        .field(Opcode::Getstatic, NODE, "head", NODE_TYPE)
        .store(ValueKind::Reference, 2)
        .bind(top)
        .load(ValueKind::Reference, 2)
        .branch(Opcode::Ifnull, done)
        .load(ValueKind::Long, 0)
        .load(ValueKind::Reference, 2)
        .field(Opcode::Getfield, NODE, "value", "J")
        .op(Opcode::Ladd)
        .store(ValueKind::Long, 0)
        .load(ValueKind::Reference, 2)
        .field(Opcode::Getfield, NODE, "next", NODE_TYPE)
        .store(ValueKind::Reference, 2)
        .goto(top)
        .bind(done)
        .load(ValueKind::Long, 0)
        .op(Opcode::Lreturn)
        .maxs(4, 3);
    sum.finish().unwrap();

    let mut clear = class.method(public_static(), "clear", "()V");
    clear
        .op(Opcode::AconstNull)
        .field(Opcode::Putstatic, NODE, "head", NODE_TYPE)
        .op(Opcode::Return)
        .maxs(1, 0);
    clear.finish().unwrap();

    // garbage(n): n unreachable int arrays
    let mut garbage = class.method(public_static(), "garbage", "(I)V");
    let top = garbage.new_label();
    let done = garbage.new_label();
    garbage
        .bind(top)
        .load(ValueKind::Int, 0)
        .branch(Opcode::Ifle, done)
        .iconst(16)
        .newarray(ArrayKind::Int)
        .op(Opcode::Pop)
        .iinc(0, -1)
        .goto(top)
        .bind(done)
        .op(Opcode::Return)
        .maxs(1, 1);
    garbage.finish().unwrap();
    class
}

fn heap(address_width: AddressWidth, byte_order: ByteOrder) -> VmConfig {
    VmConfig {
        heap: HeapConfig {
            address_width,
            byte_order,
            ..HeapConfig::default()
        },
        ..VmConfig::default()
    }
}

/// Test: Objects reachable from a static survive; the rest is reclaimed
#[test]
fn test_reachable_objects_survive_collection() {
    let vm = boot(VmConfig::default(), &[node_class()]);
    let main = vm.attach_thread("main").unwrap();
    let thread = main.thread();

    vm.invoke_static(thread, NODE, "build", "(I)V", &[Value::Int(100)]).unwrap();
    vm.invoke_static(thread, NODE, "garbage", "(I)V", &[Value::Int(300)]).unwrap();

    let first = vm.collect_garbage().unwrap();
    assert!(first.freed_objects >= 300, "freed {}", first.freed_objects);
    assert_eq!(
        vm.invoke_static(thread, NODE, "sum", "()J", &[]).unwrap(),
        Some(Value::Long(5050))
    );

    let second = vm.collect_garbage().unwrap();
    assert_eq!(second.freed_objects, 0);
    assert_eq!(second.live_objects, first.live_objects);

    vm.invoke_static(thread, NODE, "clear", "()V", &[]).unwrap();
    let third = vm.collect_garbage().unwrap();
    assert_eq!(third.freed_objects, 100);
    assert_eq!(third.live_objects, first.live_objects - 100);
}

/// Test: A handle keeps an otherwise unreachable object across many cycles
#[test]
fn test_handle_pins_across_cycles() {
    let vm = boot(VmConfig::default(), &[node_class()]);
    let main = vm.attach_thread("main").unwrap();
    let thread = main.thread();
    vm.collect_garbage().unwrap();

    let node = vm.new_instance(thread, NODE, "()V", &[]).unwrap();
    let handle = vm.make_handle(&node);
    for _ in 0..5 {
        vm.invoke_static(thread, NODE, "garbage", "(I)V", &[Value::Int(10)]).unwrap();
        let stats = vm.collect_garbage().unwrap();
        assert_eq!(stats.freed_objects, 10);
        assert!(vm.gc().is_pinned(&node));
    }
    assert_eq!(
        vm.invoke_virtual(thread, &node, "hashCode", "()I", &[]).unwrap(),
        vm.invoke_virtual(thread, &node, "hashCode", "()I", &[]).unwrap()
    );

    assert!(vm.release_handle(&handle));
    assert!(!vm.gc().is_pinned(&node));
    assert_eq!(vm.collect_garbage().unwrap().freed_objects, 1);
}

/// Test: Handles taken and released from other threads never race a cycle
#[test]
fn test_handle_churn_during_collections() {
    let vm = boot(VmConfig::default(), &[node_class()]);
    let main = vm.attach_thread("main").unwrap();
    let thread = main.thread();
    vm.collect_garbage().unwrap();

    let nodes: Vec<_> = (0..4)
        .map(|_| vm.new_instance(thread, NODE, "()V", &[]).unwrap())
        .collect();
    let kept: Vec<_> = nodes.iter().map(|node| vm.make_handle(node)).collect();

    let churners: Vec<_> = nodes
        .iter()
        .cloned()
        .map(|node| {
            let vm = vm.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let extra = vm.make_handle(&node);
                    assert!(!vm.release_handle(&extra));
                }
            })
        })
        .collect();
    for _ in 0..20 {
        assert_eq!(vm.collect_garbage().unwrap().freed_objects, 0);
    }
    for churner in churners {
        churner.join().unwrap();
    }

    for (node, handle) in nodes.iter().zip(&kept) {
        assert_eq!(handle.acquisitions(), 1);
        assert!(vm.release_handle(handle));
        assert!(!vm.gc().is_pinned(node));
    }
    assert_eq!(vm.collect_garbage().unwrap().freed_objects, 4);
}

/// Test: The same program gives the same answers under every heap layout
#[test]
fn test_programs_agree_across_heap_layouts() {
    for (width, order) in [
        (AddressWidth::W64, ByteOrder::Little),
        (AddressWidth::W64, ByteOrder::Big),
        (AddressWidth::W32, ByteOrder::Little),
        (AddressWidth::W32, ByteOrder::Big),
    ] {
        let vm = boot(heap(width, order), &[node_class()]);
        let main = vm.attach_thread("main").unwrap();
        let thread = main.thread();
        vm.invoke_static(thread, NODE, "build", "(I)V", &[Value::Int(40)]).unwrap();
        vm.collect_garbage().unwrap();
        assert_eq!(
            vm.invoke_static(thread, NODE, "sum", "()J", &[]).unwrap(),
            Some(Value::Long(820)),
            "{:?} {:?}",
            width,
            order
        );
    }
}

/// Test: Narrow references make instances smaller
#[test]
fn test_address_width_shrinks_instances() {
    let pair = || {
        let mut class = ClassBuilder::new("m/Pair");
        class
            .field(AccessFlags::PUBLIC, "first", "Ljava/lang/Object;")
            .field(AccessFlags::PUBLIC, "second", "Ljava/lang/Object;");
        class
    };
    let wide = boot(heap(AddressWidth::W64, ByteOrder::Little), &[pair()]);
    let narrow = boot(heap(AddressWidth::W32, ByteOrder::Little), &[pair()]);
    let wide_main = wide.attach_thread("main").unwrap();
    let narrow_main = narrow.attach_thread("main").unwrap();

    let wide_pair = wide.find_class(wide_main.thread(), "m/Pair").unwrap();
    let narrow_pair = narrow.find_class(narrow_main.thread(), "m/Pair").unwrap();
    assert!(narrow_pair.instance_size() < wide_pair.instance_size());
    assert_eq!(narrow_pair.reference_offsets().len(), 2);
    assert_eq!(
        wide_pair.declared_field("first").unwrap().offset(),
        narrow_pair.declared_field("first").unwrap().offset()
    );
}

/// Test: Live bytes never exceed the configured heap
#[test]
fn test_heap_limit_is_respected() {
    let config = VmConfig {
        heap: HeapConfig {
            max_heap_size: 4 * 1024 * 1024,
            ..HeapConfig::default()
        },
        ..VmConfig::default()
    };
    let vm = boot(config, &[node_class()]);
    let main = vm.attach_thread("main").unwrap();
    vm.invoke_static(main.thread(), NODE, "garbage", "(I)V", &[Value::Int(100_000)])
        .unwrap();

    let stats = vm.heap_stats();
    assert!(stats.used_bytes <= stats.max_bytes);
    assert!(stats.total_frees > 0);
}
