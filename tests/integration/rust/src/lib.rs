//! Integration test suite for the Corten VM
//!
//! This crate provides integration tests that verify components work
//! together correctly across component boundaries.

use std::sync::Arc;

use bytecode_system::{AccessFlags, ClassBuilder, Opcode};
use class_linker::MemoryClassSource;
use interpreter::{Vm, VmConfig};

/// Re-export components for test convenience
pub mod components {
    pub use bytecode_system;
    pub use class_linker;
    pub use core_types;
    pub use interpreter;
    pub use memory_manager;
    pub use vm_cli;
}

/// Class source holding the assembled `classes`.
pub fn source_of(classes: &[ClassBuilder]) -> MemoryClassSource {
    let source = MemoryClassSource::new();
    for class in classes {
        let file = class.build();
        source.insert(&file.this_class, file.to_bytes());
    }
    source
}

/// Boots a VM with `config` that also sees `classes`.
pub fn boot(config: VmConfig, classes: &[ClassBuilder]) -> Arc<Vm> {
    match Vm::with_class_source(config, Arc::new(source_of(classes))) {
        Ok(vm) => vm,
        Err(error) => panic!("vm failed to boot: {}", error),
    }
}

/// `public static`
pub fn public_static() -> AccessFlags {
    AccessFlags::PUBLIC | AccessFlags::STATIC
}

/// Adds `<init>()V` chaining to `super_class`.
pub fn default_constructor(class: &mut ClassBuilder, super_class: &str) {
    let mut init = class.method(AccessFlags::PUBLIC, "<init>", "()V");
    init.op(Opcode::Aload0)
        .invoke(Opcode::Invokespecial, super_class, "<init>", "()V")
        .op(Opcode::Return)
        .maxs(1, 1);
    if let Err(error) = init.finish() {
        panic!("constructor of {} does not assemble: {}", super_class, error);
    }
}
