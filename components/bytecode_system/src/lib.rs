//! Class-file format for the VM
//!
//! This crate reads and writes class files and turns method bodies into
//! typed instructions for the interpreter.
//!
//! # Features
//!
//! - Constant pool with interning
//! - Field and method descriptor parsing
//! - Class-file parsing and serialization
//! - Bytecode decoding with branch targets remapped to instruction indices
//! - An assembler ([`ClassBuilder`]) with labels, exception ranges and line tables
//!
//! # Example
//!
//! ```
//! use bytecode_system::{decode, AccessFlags, ClassBuilder, ClassFile, Instruction, Opcode};
//!
//! let mut class = ClassBuilder::new("demo/Answer");
//! let mut m = class.method(AccessFlags::PUBLIC | AccessFlags::STATIC, "get", "()I");
//! m.iconst(42).op(Opcode::Ireturn).maxs(1, 0);
//! m.finish().unwrap();
//!
//! let parsed = ClassFile::parse(&class.to_bytes()).unwrap();
//! let code = parsed.method("get", "()I").unwrap().code.as_ref().unwrap();
//! let decoded = decode(&code.code).unwrap();
//! assert_eq!(decoded.instructions[0], Instruction::Iconst(42));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod bytes;
pub mod class_file;
pub mod constant_pool;
pub mod descriptor;
pub mod error;
pub mod instruction;
pub mod opcode;

// Re-export main types at crate root
pub use builder::{ClassBuilder, ConstantValue, Label, MethodBuilder};
pub use bytes::{decode_modified_utf8, encode_modified_utf8, ByteReader, ByteWriter};
pub use class_file::{
    AccessFlags, ClassFile, CodeAttribute, ExceptionHandler, FieldInfo, LineNumber, MethodInfo,
    DEFAULT_MAJOR_VERSION, MAGIC,
};
pub use constant_pool::{Constant, ConstantPool, MemberRef};
pub use descriptor::{FieldType, MethodDescriptor};
pub use error::{ClassFormatError, FormatResult};
pub use instruction::{
    decode, ArrayKind, BinaryOp, Condition, DecodedCode, Instruction, Narrowing, NumericKind,
    ValueKind,
};
pub use opcode::Opcode;
