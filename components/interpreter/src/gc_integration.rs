//! The VM's view of the heap for the collector
//!
//! [`VmObjectGraph`] tells [`MarkAndSweep`](memory_manager::MarkAndSweep)
//! where the roots are and how to find the references inside each object.
//! It runs while every mutator is parked, so it reads frames and registries
//! through their own short-lived locks.

use class_linker::object_model::{
    array_length, element_offset, object_kind, read_reference, ObjectKind,
};
use core_types::{ObjectRef, VmError};
use memory_manager::ObjectGraph;

use crate::vm::Vm;

/// Roots and object structure of one VM.
pub(crate) struct VmObjectGraph<'a> {
    vm: &'a Vm,
}

impl<'a> VmObjectGraph<'a> {
    pub(crate) fn new(vm: &'a Vm) -> Self {
        Self { vm }
    }
}

impl ObjectGraph for VmObjectGraph<'_> {
    fn for_each_root(&self, visit: &mut dyn FnMut(ObjectRef)) {
        let linker = self.vm.linker();
        for loader in linker.loaders() {
            if let Some(object) = loader.loader_object() {
                visit(object.clone());
            }
        }
        // Every class mirror, primitive ones included, plus resolved
        // string constants.
        for class in linker.classes() {
            if let Some(mirror) = class.mirror() {
                visit(mirror.clone());
            }
            if let Some(pool) = class.constant_pool() {
                pool.for_each_string(&mut |string| visit(string.clone()));
            }
        }
        self.vm
            .for_each_interned(&mut |handle| visit(handle.object().clone()));
        for thread in self.vm.threads() {
            if let Some(object) = thread.object() {
                visit(object.clone());
            }
            for frame in thread.frames() {
                frame.for_each_reference(&mut |object| visit(object.clone()));
            }
            thread.for_each_held(&mut |object| visit(object.clone()));
        }
    }

    fn for_each_reference(
        &self,
        object: &ObjectRef,
        visit: &mut dyn FnMut(ObjectRef),
    ) -> Result<(), VmError> {
        let linker = self.vm.linker();
        let allocator = linker.allocator().as_ref();
        let class = linker.class_of(object)?;
        let mut report = |offset: usize| -> Result<(), VmError> {
            if let Some(target) = read_reference(object, offset, allocator)? {
                visit(target);
            }
            Ok(())
        };

        match object_kind(object)? {
            ObjectKind::Instance => {
                for offset in class.reference_offsets() {
                    report(*offset)?;
                }
            }
            ObjectKind::Array => {
                let element = class.element_kind().ok_or_else(|| VmError::HeapCorruption {
                    address: object.address(),
                    detail: format!("array header names {}", class.name()),
                })?;
                if element.is_reference() {
                    let size = element.size(linker.address_width());
                    for index in 0..array_length(object)? {
                        report(element_offset(index, size))?;
                    }
                }
            }
            ObjectKind::Mirror => {
                for offset in class.reference_offsets() {
                    report(*offset)?;
                }
                let target = linker.mirror_target(object)?;
                let base = linker.mirror_layout()?.static_base;
                for offset in target.static_reference_offsets() {
                    report(base + offset)?;
                }
            }
        }
        Ok(())
    }

    fn on_free(&self, address: u64) {
        self.vm.monitors.remove(address);
        self.vm.forget_backtrace(address);
    }
}
