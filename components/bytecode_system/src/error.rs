//! Class-file format errors.

use thiserror::Error;

/// Structural problems found while reading or assembling class files.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassFormatError {
    /// Input ended before a complete item was read
    #[error("unexpected end of class data at offset {0}")]
    UnexpectedEof(usize),

    /// Magic number is not 0xCAFEBABE
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    /// Constant pool tag byte is not defined
    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownTag {
        /// Tag byte
        tag: u8,
        /// Pool index
        index: u16,
    },

    /// Constant pool index is out of range or points at the wrong kind of entry
    #[error("constant pool index {index}: expected {expected}")]
    BadConstant {
        /// Pool index
        index: u16,
        /// What the reader expected to find
        expected: &'static str,
    },

    /// String data is not valid modified UTF-8
    #[error("malformed modified UTF-8 string")]
    BadUtf8,

    /// Field or method descriptor does not parse
    #[error("malformed descriptor {0:?}")]
    BadDescriptor(String),

    /// Opcode byte is not defined
    #[error("unknown opcode {opcode:#04x} at bytecode offset {offset}")]
    UnknownOpcode {
        /// Opcode byte
        opcode: u8,
        /// Byte offset in the code array
        offset: usize,
    },

    /// Branch or handler target is not the start of an instruction
    #[error("target {0} is not an instruction boundary")]
    BadBranchTarget(i64),

    /// Operand value is invalid for the instruction
    #[error("invalid operand at bytecode offset {offset}: {detail}")]
    BadOperand {
        /// Byte offset in the code array
        offset: usize,
        /// What was wrong
        detail: String,
    },

    /// A label was used by the assembler but never placed
    #[error("label {0} was never bound")]
    UnboundLabel(usize),

    /// A branch distance does not fit in 16 bits
    #[error("branch from {from} to {to} is out of range")]
    BranchOutOfRange {
        /// Source offset
        from: usize,
        /// Target offset
        to: usize,
    },
}

/// Result alias for class-file operations.
pub type FormatResult<T> = Result<T, ClassFormatError>;
