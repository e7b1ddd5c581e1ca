//! Class-file to Linker Integration Tests
//!
//! Tests the integration between bytecode_system and class_linker.
//! Verifies that assembled class files parse back, decode, and link into
//! stable field layouts and virtual tables.

use bytecode_system::{
    decode, AccessFlags, ClassBuilder, ClassFile, ConstantValue, Instruction, Opcode, MAGIC,
};
use core_types::Value;
use integration_tests::{boot, default_constructor, public_static};
use interpreter::VmConfig;

fn hierarchy() -> Vec<ClassBuilder> {
    let mut a = ClassBuilder::new("h/A");
    a.field(AccessFlags::PUBLIC, "count", "I")
        .field(AccessFlags::PUBLIC, "total", "J")
        .field(AccessFlags::PUBLIC, "label", "Ljava/lang/String;");
    default_constructor(&mut a, "java/lang/Object");
    let mut id = a.method(AccessFlags::PUBLIC, "id", "()I");
    id.iconst(1).op(Opcode::Ireturn).maxs(1, 1);
    id.finish().unwrap();
    let mut name = a.method(AccessFlags::PUBLIC, "name", "()I");
    name.iconst(10).op(Opcode::Ireturn).maxs(1, 1);
    name.finish().unwrap();

    let mut b = ClassBuilder::new("h/B");
    b.extends(Some("h/A"))
        .field(AccessFlags::PUBLIC, "flag", "Z")
        .field(AccessFlags::PUBLIC, "next", "Lh/B;")
        .field(AccessFlags::PUBLIC, "ratio", "D");
    default_constructor(&mut b, "h/A");
    let mut id = b.method(AccessFlags::PUBLIC, "id", "()I");
    id.iconst(2).op(Opcode::Ireturn).maxs(1, 1);
    id.finish().unwrap();

    let mut c = ClassBuilder::new("h/C");
    c.extends(Some("h/B")).field(AccessFlags::PUBLIC, "tail", "S");
    default_constructor(&mut c, "h/B");

    vec![a, b, c]
}

/// Test: Assembled bytes parse back into the same declarations
#[test]
fn test_class_file_round_trip() {
    let mut class = ClassBuilder::new("p/Shape");
    class
        .source_file("Shape.java")
        .field(AccessFlags::PRIVATE, "sides", "I")
        .constant_field(
            public_static() | AccessFlags::FINAL,
            "NAME",
            "Ljava/lang/String;",
            ConstantValue::String("shape"),
        );
    let mut area = class.method(AccessFlags::PUBLIC, "area", "(II)J");
    area.line(4)
        .op(Opcode::Iload1)
        .op(Opcode::Iload2)
        .op(Opcode::Imul)
        .op(Opcode::I2l)
        .op(Opcode::Lreturn)
        .maxs(2, 3);
    area.finish().unwrap();
    class.declare_method(AccessFlags::PUBLIC | AccessFlags::NATIVE, "draw", "()V");

    let bytes = class.to_bytes();
    assert_eq!(&bytes[..4], &MAGIC.to_be_bytes());

    let parsed = ClassFile::parse(&bytes).unwrap();
    assert_eq!(parsed.this_class, "p/Shape");
    assert_eq!(parsed.super_class.as_deref(), Some("java/lang/Object"));
    assert_eq!(parsed.source_file.as_deref(), Some("Shape.java"));
    assert!(parsed.field("NAME").unwrap().constant_value.is_some());
    assert!(parsed.method("draw", "()V").unwrap().code.is_none());

    let code = parsed.method("area", "(II)J").unwrap().code.as_ref().unwrap();
    assert_eq!((code.max_stack, code.max_locals), (2, 3));
    assert_eq!(code.line_at(0), Some(4));
    let decoded = decode(&code.code).unwrap();
    assert_eq!(decoded.instructions.len(), 5);
    assert!(matches!(decoded.instructions.last(), Some(Instruction::Return(_))));
}

/// Test: Inherited fields keep the offsets computed for the superclass
#[test]
fn test_layout_stable_under_subclassing() {
    let vm = boot(VmConfig::default(), &hierarchy());
    let main = vm.attach_thread("main").unwrap();
    let a = vm.find_class(main.thread(), "h/A").unwrap();
    let b = vm.find_class(main.thread(), "h/B").unwrap();
    let c = vm.find_class(main.thread(), "h/C").unwrap();

    for (name, descriptor) in [("count", "I"), ("total", "J"), ("label", "Ljava/lang/String;")] {
        let in_a = a.find_field(name, descriptor).unwrap().1.offset();
        let in_b = b.find_field(name, descriptor).unwrap().1.offset();
        let in_c = c.find_field(name, descriptor).unwrap().1.offset();
        assert_eq!(in_a, in_b, "{} moved in h/B", name);
        assert_eq!(in_a, in_c, "{} moved in h/C", name);
    }
    for (name, descriptor) in [("flag", "Z"), ("next", "Lh/B;"), ("ratio", "D")] {
        let in_b = b.find_field(name, descriptor).unwrap().1.offset();
        assert!(in_b >= a.instance_size(), "{} overlaps h/A", name);
        assert_eq!(c.find_field(name, descriptor).unwrap().1.offset(), in_b);
    }
    let tail = c.find_field("tail", "S").unwrap().1.offset();
    assert!(tail >= b.instance_size());
    assert!(a.instance_size() <= b.instance_size());
    assert!(b.instance_size() <= c.instance_size());

    for class in [&a, &b, &c] {
        for offset in a.reference_offsets() {
            assert!(class.reference_offsets().contains(offset));
        }
    }
}

/// Test: A -> B -> C, B overrides, C inherits B's table slot
#[test]
fn test_vtable_slot_inheritance() {
    let vm = boot(VmConfig::default(), &hierarchy());
    let main = vm.attach_thread("main").unwrap();
    let thread = main.thread();
    let a = vm.find_class(thread, "h/A").unwrap();
    let b = vm.find_class(thread, "h/B").unwrap();
    let c = vm.find_class(thread, "h/C").unwrap();

    let slot = a.vtable_lookup("id", "()I").unwrap().vtable_index();
    assert!(slot.is_some());
    assert_eq!(b.vtable_lookup("id", "()I").unwrap().vtable_index(), slot);

    let resolved = c.vtable_lookup("id", "()I").unwrap();
    assert_eq!(resolved.class_name(), "h/B");
    assert_eq!(resolved.vtable_index(), slot);
    assert_eq!(c.vtable_lookup("name", "()I").unwrap().class_name(), "h/A");
    assert_eq!(c.vtable().len(), a.vtable().len());

    let instance = vm.new_instance(thread, "h/C", "()V", &[]).unwrap();
    assert_eq!(
        vm.invoke_virtual(thread, &instance, "id", "()I", &[]).unwrap(),
        Some(Value::Int(2))
    );
    assert_eq!(
        vm.invoke_virtual(thread, &instance, "name", "()I", &[]).unwrap(),
        Some(Value::Int(10))
    );
}

/// Test: Static final constants are visible without running code
#[test]
fn test_constant_fields_link() {
    let mut class = ClassBuilder::new("k/Limits");
    class
        .constant_field(public_static() | AccessFlags::FINAL, "MAX", "J", ConstantValue::Long(1 << 40))
        .constant_field(public_static() | AccessFlags::FINAL, "RATE", "D", ConstantValue::Double(0.5));
    let mut max = class.method(public_static(), "max", "()J");
    max.field(Opcode::Getstatic, "k/Limits", "MAX", "J")
        .op(Opcode::Lreturn)
        .maxs(2, 0);
    max.finish().unwrap();

    let vm = boot(VmConfig::default(), &[class]);
    let main = vm.attach_thread("main").unwrap();
    assert_eq!(
        vm.invoke_static(main.thread(), "k/Limits", "max", "()J", &[]).unwrap(),
        Some(Value::Long(1 << 40))
    );
    let linked = vm.find_class(main.thread(), "k/Limits").unwrap();
    assert!(linked.is_initialized());
    assert!(linked.declared_field("RATE").unwrap().constant().is_some());
}
