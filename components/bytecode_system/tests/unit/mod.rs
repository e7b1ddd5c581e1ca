//! Unit tests for bytecode_system

mod test_class_file;
mod test_instruction;
mod test_opcode;
