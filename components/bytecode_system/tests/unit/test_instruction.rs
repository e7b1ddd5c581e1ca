//! Tests for decoding assembled code

use bytecode_system::{
    decode, AccessFlags, ArrayKind, ClassBuilder, Condition, Instruction, MethodBuilder,
    NumericKind, Opcode, ValueKind,
};

fn assemble(build: impl FnOnce(&mut MethodBuilder<'_>)) -> Vec<Instruction> {
    let mut class = ClassBuilder::new("t/Decode");
    let mut method = class.method(AccessFlags::STATIC, "m", "()V");
    build(&mut method);
    method.finish().unwrap();
    let file = class.build();
    let code = file.methods[0].code.as_ref().unwrap();
    decode(&code.code).unwrap().instructions
}

#[test]
fn test_wide_locals() {
    let instructions = assemble(|m| {
        m.load(ValueKind::Double, 300).store(ValueKind::Reference, 5);
    });
    assert_eq!(
        instructions,
        vec![
            Instruction::Load(ValueKind::Double, 300),
            Instruction::Store(ValueKind::Reference, 5),
        ]
    );
}

#[test]
fn test_compare_branches() {
    let instructions = assemble(|m| {
        let target = m.new_label();
        m.op(Opcode::Iconst0)
            .op(Opcode::Iconst1)
            .branch(Opcode::IfIcmpge, target)
            .op(Opcode::AconstNull)
            .branch(Opcode::Ifnonnull, target)
            .bind(target)
            .op(Opcode::Return);
    });
    assert_eq!(
        instructions[2],
        Instruction::IfIcmp {
            condition: Condition::Ge,
            target: 5
        }
    );
    assert_eq!(
        instructions[4],
        Instruction::IfNull {
            is_null: false,
            target: 5
        }
    );
}

#[test]
fn test_switches_resolve_to_indices() {
    let instructions = assemble(|m| {
        let a = m.new_label();
        let b = m.new_label();
        let other = m.new_label();
        m.op(Opcode::Iconst1)
            .table_switch(0, other, &[a, b])
            .bind(a)
            .op(Opcode::Nop)
            .bind(b)
            .op(Opcode::Nop)
            .bind(other)
            .op(Opcode::Iconst2)
            .lookup_switch(other, &[(100, b), (-7, a)])
            .op(Opcode::Return);
    });
    assert_eq!(
        instructions[1],
        Instruction::TableSwitch {
            default: 4,
            low: 0,
            targets: vec![2, 3]
        }
    );
    assert_eq!(
        instructions[5],
        Instruction::LookupSwitch {
            default: 4,
            pairs: vec![(-7, 2), (100, 3)]
        }
    );
}

#[test]
fn test_arrays_and_types() {
    let instructions = assemble(|m| {
        m.iconst(3)
            .newarray(ArrayKind::Boolean)
            .op(Opcode::Baload)
            .type_op(Opcode::Checkcast, "java/lang/String")
            .multianewarray("[[I", 2)
            .op(Opcode::L2d)
            .op(Opcode::Dcmpg);
    });
    assert_eq!(instructions[1], Instruction::NewArray(ArrayKind::Boolean));
    assert_eq!(instructions[2], Instruction::ArrayLoad(ArrayKind::Byte));
    assert!(matches!(instructions[3], Instruction::CheckCast(_)));
    assert!(matches!(
        instructions[4],
        Instruction::MultiANewArray { dimensions: 2, .. }
    ));
    assert_eq!(
        instructions[5],
        Instruction::Convert(NumericKind::Long, NumericKind::Double)
    );
    assert_eq!(instructions[6], Instruction::Dcmp { nan_result: 1 });
}

#[test]
fn test_large_constants_use_pool() {
    let instructions = assemble(|m| {
        m.lconst(1 << 40).dconst(0.5).fconst(-0.0);
    });
    assert!(matches!(instructions[0], Instruction::Ldc2(_)));
    assert!(matches!(instructions[1], Instruction::Ldc2(_)));
    assert!(matches!(instructions[2], Instruction::Ldc(_)));
}
