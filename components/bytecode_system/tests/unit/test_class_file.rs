//! Tests for class-file parsing and serialization

use bytecode_system::{
    AccessFlags, ClassBuilder, ClassFile, Constant, ConstantValue, Opcode, ValueKind,
};

fn sample() -> ClassBuilder {
    let mut class = ClassBuilder::new("pkg/Sample");
    class
        .implements("java/lang/Runnable")
        .source_file("Sample.java")
        .field(AccessFlags::PRIVATE, "count", "I")
        .field(AccessFlags::PRIVATE, "next", "Lpkg/Sample;")
        .constant_field(AccessFlags::PUBLIC | AccessFlags::FINAL, "LIMIT", "J", ConstantValue::Long(1 << 33))
        .declare_method(AccessFlags::PUBLIC | AccessFlags::NATIVE, "poke", "()V");

    let mut run = class.method(AccessFlags::PUBLIC, "run", "()V");
    let start = run.new_label();
    let end = run.new_label();
    let handler = run.new_label();
    let done = run.new_label();
    run.line(7)
        .bind(start)
        .load(ValueKind::Reference, 0)
        .invoke(Opcode::Invokevirtual, "pkg/Sample", "poke", "()V")
        .bind(end)
        .goto(done)
        .bind(handler)
        .line(9)
        .op(Opcode::Pop)
        .bind(done)
        .op(Opcode::Return)
        .try_catch(start, end, handler, Some("java/lang/RuntimeException"))
        .maxs(1, 1);
    run.finish().unwrap();
    class
}

#[test]
fn test_roundtrip_preserves_structure() {
    let built = sample().build();
    let parsed = ClassFile::parse(&built.to_bytes()).unwrap();

    assert_eq!(parsed.this_class, "pkg/Sample");
    assert_eq!(parsed.super_class.as_deref(), Some("java/lang/Object"));
    assert_eq!(parsed.interfaces, vec!["java/lang/Runnable".to_string()]);
    assert_eq!(parsed.source_file.as_deref(), Some("Sample.java"));
    assert_eq!(parsed.fields.len(), 3);
    assert_eq!(parsed.methods, built.methods);
}

#[test]
fn test_constant_value_attribute() {
    let parsed = ClassFile::parse(&sample().to_bytes()).unwrap();
    let field = parsed.field("LIMIT").unwrap();
    assert!(field.access.is_static());
    let index = field.constant_value.unwrap();
    assert_eq!(parsed.constant_pool.get(index), Ok(&Constant::Long(1 << 33)));
}

#[test]
fn test_code_attribute_contents() {
    let parsed = ClassFile::parse(&sample().to_bytes()).unwrap();
    let run = parsed.method("run", "()V").unwrap();
    let code = run.code.as_ref().unwrap();
    assert_eq!(code.max_locals, 1);
    assert_eq!(code.exception_table.len(), 1);
    let handler = code.exception_table[0];
    assert_eq!(handler.start_pc, 0);
    assert_eq!(handler.end_pc, 4);
    assert_eq!(handler.handler_pc, 7);
    assert_eq!(
        parsed.constant_pool.class_name(handler.catch_type),
        Ok("java/lang/RuntimeException")
    );
    assert_eq!(code.line_at(0), Some(7));
    assert_eq!(code.line_at(7), Some(9));

    let poke = parsed.method("poke", "()V").unwrap();
    assert!(poke.access.is_native());
    assert!(poke.code.is_none());
}

#[test]
fn test_root_class_has_no_super() {
    let mut class = ClassBuilder::new("java/lang/Object");
    class.extends(None);
    let parsed = ClassFile::parse(&class.to_bytes()).unwrap();
    assert_eq!(parsed.super_class, None);
}
