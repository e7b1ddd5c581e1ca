//! Contract tests verifying the memory_manager API the VM depends on.

use std::sync::Arc;

use core_types::{AddressWidth, ByteOrder, ObjectRef, VmError};
use memory_manager::{
    GcStats, HeapConfig, MarkAndSweep, MemoryAllocator, ObjectGraph, SafepointBarrier,
    SimpleAllocator, GC_HEADER_SIZE,
};

struct NoRoots;

impl ObjectGraph for NoRoots {
    fn for_each_root(&self, _visit: &mut dyn FnMut(ObjectRef)) {}

    fn for_each_reference(
        &self,
        _object: &ObjectRef,
        _visit: &mut dyn FnMut(ObjectRef),
    ) -> Result<(), VmError> {
        Ok(())
    }
}

/// Test MemoryAllocator contract: allocate(size) -> Option<MemoryBlock>, None when exhausted
#[test]
fn contract_allocate_or_out_of_memory() {
    let heap = SimpleAllocator::new(HeapConfig {
        max_heap_size: 64,
        ..HeapConfig::default()
    });
    let block = heap.allocate(64).expect("fits");
    assert_eq!(block.size(), 64);
    assert!(heap.allocate(1).is_none());
}

/// Test MemoryAllocator contract: free(address) -> false for unknown or freed blocks
#[test]
fn contract_free_reports_unknown() {
    let heap = SimpleAllocator::new(HeapConfig::default());
    let address = heap.allocate(8).unwrap().address();
    assert!(heap.free(address));
    assert!(!heap.free(address));
}

/// Test allocator contract: configured width and byte order are honoured
#[test]
fn contract_allocator_reports_configuration() {
    let heap = SimpleAllocator::new(HeapConfig {
        max_heap_size: 1024,
        address_width: AddressWidth::W32,
        byte_order: ByteOrder::Big,
    });
    assert_eq!(heap.address_width(), AddressWidth::W32);
    assert_eq!(heap.byte_order(), ByteOrder::Big);
    assert_eq!(heap.allocate(4).unwrap().data().byte_order(), ByteOrder::Big);
}

/// Test collector contract: at least one header byte is reserved
#[test]
fn contract_reserved_header() {
    assert!(GC_HEADER_SIZE >= 1);
}

/// Test collector contract: collect(graph) -> GcStats, freeing everything unrooted
#[test]
fn contract_collect_frees_unrooted() {
    let heap = Arc::new(SimpleAllocator::new(HeapConfig::default()));
    let gc = MarkAndSweep::new(heap.clone(), Arc::new(SafepointBarrier::new()));
    for _ in 0..4 {
        heap.allocate(16).unwrap();
    }
    let stats: GcStats = gc.collect(&NoRoots).unwrap();
    assert_eq!(stats.freed_objects, 4);
    assert_eq!(gc.last_stats().freed_objects, 4);
}

/// Test handle contract: make_handle is idempotent per object
#[test]
fn contract_make_handle_idempotent() {
    let heap = Arc::new(SimpleAllocator::new(HeapConfig::default()));
    let gc = MarkAndSweep::new(heap.clone(), Arc::new(SafepointBarrier::new()));
    let object = ObjectRef::new(heap.allocate(16).unwrap());
    let first = gc.make_handle(&object);
    let second = gc.make_handle(&object);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.acquisitions(), 2);
    assert!(gc.is_pinned(&object));
}
