//! Tests for the Opcode table

use bytecode_system::Opcode;

#[test]
fn test_load_family_is_contiguous() {
    assert_eq!(Opcode::Iload0.byte() + 4, Opcode::Lload0.byte());
    assert_eq!(Opcode::Aload3.byte() + 1, Opcode::Iaload.byte());
    assert_eq!(Opcode::Istore0.byte() + 19, Opcode::Astore3.byte());
}

#[test]
fn test_undefined_bytes() {
    for byte in 0xcau8..=0xff {
        assert!(Opcode::from_byte(byte).is_none(), "byte {:#x}", byte);
    }
}

#[test]
fn test_display_uses_mnemonic() {
    assert_eq!(Opcode::Dup2X1.to_string(), "dup2_x1");
    assert_eq!(Opcode::Multianewarray.to_string(), "multianewarray");
}
