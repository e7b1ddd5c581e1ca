//! Contract tests for class_linker
//! Verifies the guarantees the interpreter and the collector rely on

use std::sync::Arc;

use class_linker::{boot_image, ClassLinker, LoaderId, ObjectKind};
use memory_manager::{HeapConfig, SimpleAllocator};

fn linker() -> ClassLinker {
    let heap = Arc::new(SimpleAllocator::new(HeapConfig::default()));
    let linker = ClassLinker::new(heap, Arc::new(boot_image().unwrap()));
    linker.bootstrap().unwrap();
    linker
}

/// Test identity contract: one class per (loader, name)
#[test]
fn contract_load_is_idempotent() {
    let linker = linker();
    let first = linker.load_class(LoaderId::BOOT, "java/lang/Thread").unwrap();
    let second = linker.load_class(LoaderId::BOOT, "java/lang/Thread").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&linker.class_by_id(first.id()).unwrap(), &first));
}

/// Test mirror contract: mirrors are heap objects of kind Mirror
#[test]
fn contract_mirrors_are_heap_objects() {
    let linker = linker();
    let string = linker.load_class(LoaderId::BOOT, "java/lang/String").unwrap();
    let mirror = string.mirror().unwrap();
    assert_eq!(
        class_linker::object_model::object_kind(mirror),
        Ok(ObjectKind::Mirror)
    );
    assert!(linker.allocator().resolve(mirror.address()).is_some());
}

/// Test hierarchy contract: every boot exception is a Throwable
#[test]
fn contract_boot_exceptions_are_throwable() {
    let linker = linker();
    let throwable = linker.load_class(LoaderId::BOOT, "java/lang/Throwable").unwrap();
    for (name, _) in class_linker::EXCEPTION_HIERARCHY {
        let class = linker.load_class(LoaderId::BOOT, name).unwrap();
        assert!(class.is_subclass_of(&throwable), "{}", name);
        assert!(class.declared_method("<init>", "(Ljava/lang/String;)V").is_some());
    }
}

/// Test layout contract: reference offsets cover every reference field
#[test]
fn contract_reference_offsets_complete() {
    let linker = linker();
    let throwable = linker.load_class(LoaderId::BOOT, "java/lang/Throwable").unwrap();
    let references: Vec<usize> = throwable
        .fields()
        .iter()
        .filter(|f| !f.is_static() && f.kind().is_reference())
        .map(|f| f.offset())
        .collect();
    for offset in references {
        assert!(throwable.reference_offsets().contains(&offset));
    }
}
