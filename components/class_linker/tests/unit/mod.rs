//! Unit tests for class_linker

mod test_linking;

use std::sync::Arc;

use bytecode_system::ClassBuilder;
use class_linker::{boot_image, ClassLinker, CompositeClassSource, MemoryClassSource};
use memory_manager::{HeapConfig, SimpleAllocator};

/// Bootstrapped linker whose boot loader also sees `classes`.
pub fn linker_with(classes: Vec<ClassBuilder>) -> ClassLinker {
    let app = MemoryClassSource::new();
    for class in classes {
        let file = class.build();
        app.insert(&file.this_class, file.to_bytes());
    }
    let source = CompositeClassSource::new()
        .with(Arc::new(boot_image().unwrap()))
        .with(Arc::new(app));
    let heap = Arc::new(SimpleAllocator::new(HeapConfig::default()));
    let linker = ClassLinker::new(heap, Arc::new(source));
    linker.bootstrap().unwrap();
    linker
}
