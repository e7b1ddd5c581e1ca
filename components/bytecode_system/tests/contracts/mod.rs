//! Contract tests for bytecode_system
//! Verifies the public surface the class linker relies on

use bytecode_system::{
    decode, AccessFlags, ClassBuilder, ClassFile, ClassFormatError, FieldType, Instruction,
    MethodDescriptor, Opcode,
};

/// Test parse contract: malformed input is an error, never a panic
#[test]
fn contract_parse_rejects_garbage() {
    assert!(ClassFile::parse(&[]).is_err());
    assert!(ClassFile::parse(&[0xCA, 0xFE, 0xBA, 0xBE]).is_err());
    assert!(matches!(
        ClassFile::parse(b"not a class"),
        Err(ClassFormatError::BadMagic(_))
    ));
}

/// Test decode contract: unknown opcodes are reported with their offset
#[test]
fn contract_decode_unknown_opcode() {
    assert_eq!(
        decode(&[0x00, 0xfe]),
        Err(ClassFormatError::UnknownOpcode {
            opcode: 0xfe,
            offset: 1
        })
    );
}

/// Test decode contract: every instruction has a recorded byte offset
#[test]
fn contract_decode_offsets_align() {
    let mut class = ClassBuilder::new("c/Offsets");
    let mut m = class.method(AccessFlags::STATIC, "f", "()I");
    m.iconst(1000).iconst(2).op(Opcode::Iadd).op(Opcode::Ireturn).maxs(2, 0);
    m.finish().unwrap();
    let file = class.build();
    let decoded = decode(&file.methods[0].code.as_ref().unwrap().code).unwrap();
    assert_eq!(decoded.offsets, vec![0, 3, 4, 5]);
    assert_eq!(decoded.instructions.len(), decoded.offsets.len());
    assert_eq!(decoded.instructions[3], Instruction::Return(Some(bytecode_system::ValueKind::Int)));
}

/// Test descriptor contract: slot counting treats long and double as wide
#[test]
fn contract_descriptor_slots() {
    let desc = MethodDescriptor::parse("(JDLjava/lang/Object;[JZ)V").unwrap();
    assert_eq!(desc.parameter_slots(), 7);
    assert!(FieldType::parse("[J").unwrap().is_reference());
}
