//! Heap allocation.
//!
//! The allocator is the only component that knows which address ranges are
//! in use. It hands out zero-filled [`MemoryBlock`]s, resolves addresses read
//! out of object fields back to blocks, and reclaims blocks the collector
//! proves unreachable.

use std::collections::BTreeMap;

use core_types::{AddressWidth, ByteOrder, MemoryBlock};
use log::trace;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Allocation granule. Every block starts on a multiple of this.
pub const ALLOCATION_ALIGNMENT: usize = 8;

/// First address handed out; address 0 is the null reference.
const HEAP_BASE: u64 = ALLOCATION_ALIGNMENT as u64;

/// Heap configuration.
///
/// # Example
///
/// ```
/// use memory_manager::HeapConfig;
///
/// let config: HeapConfig = serde_json::from_str(r#"{"max_heap_size": 1048576}"#).unwrap();
/// assert_eq!(config.max_heap_size, 1 << 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Upper bound on live bytes
    pub max_heap_size: usize,
    /// Width of references stored in objects
    pub address_width: AddressWidth,
    /// Byte order of multi-byte fields
    pub byte_order: ByteOrder,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            max_heap_size: 64 * 1024 * 1024,
            address_width: AddressWidth::W64,
            byte_order: ByteOrder::Little,
        }
    }
}

/// Snapshot of allocator occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Live blocks
    pub live_blocks: usize,
    /// Bytes held by live blocks
    pub used_bytes: usize,
    /// Configured limit
    pub max_bytes: usize,
    /// Blocks handed out since creation
    pub total_allocations: u64,
    /// Blocks reclaimed since creation
    pub total_frees: u64,
}

/// Allocator contract used by the linker, the interpreter and the collector.
pub trait MemoryAllocator: Send + Sync {
    /// Allocates a zero-filled block, or `None` when the heap is exhausted.
    fn allocate(&self, size: usize) -> Option<MemoryBlock>;

    /// Releases the block at `address`.
    ///
    /// Returns `false` if the address is unknown or already free. Callers treat
    /// that as a fatal invariant violation.
    fn free(&self, address: u64) -> bool;

    /// Looks up the live block starting at `address`.
    fn resolve(&self, address: u64) -> Option<MemoryBlock>;

    /// Visits every live block in address order.
    ///
    /// The visitor must not call back into the allocator.
    fn for_each_block(&self, visit: &mut dyn FnMut(&MemoryBlock));

    /// Current occupancy.
    fn stats(&self) -> HeapStats;

    /// Width of stored references.
    fn address_width(&self) -> AddressWidth;

    /// Byte order of block accessors.
    fn byte_order(&self) -> ByteOrder;
}

struct AllocatorState {
    blocks: BTreeMap<u64, MemoryBlock>,
    /// Released addresses, keyed by rounded block size
    free_lists: BTreeMap<usize, Vec<u64>>,
    next_address: u64,
    used_bytes: usize,
    total_allocations: u64,
    total_frees: u64,
}

/// Address-map allocator with exact-size address reuse.
///
/// # Example
///
/// ```
/// use memory_manager::{HeapConfig, MemoryAllocator, SimpleAllocator};
///
/// let heap = SimpleAllocator::new(HeapConfig::default());
/// let block = heap.allocate(24).unwrap();
/// assert_eq!(heap.resolve(block.address()), Some(block.clone()));
/// assert!(heap.free(block.address()));
/// assert!(!heap.free(block.address()));
/// ```
pub struct SimpleAllocator {
    config: HeapConfig,
    state: Mutex<AllocatorState>,
}

impl SimpleAllocator {
    /// Creates an empty heap.
    pub fn new(config: HeapConfig) -> Self {
        SimpleAllocator {
            config,
            state: Mutex::new(AllocatorState {
                blocks: BTreeMap::new(),
                free_lists: BTreeMap::new(),
                next_address: HEAP_BASE,
                used_bytes: 0,
                total_allocations: 0,
                total_frees: 0,
            }),
        }
    }

    /// Heap configuration.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }
}

fn round_up(size: usize) -> usize {
    (size.max(1) + ALLOCATION_ALIGNMENT - 1) & !(ALLOCATION_ALIGNMENT - 1)
}

impl MemoryAllocator for SimpleAllocator {
    fn allocate(&self, size: usize) -> Option<MemoryBlock> {
        let rounded = round_up(size);
        let mut state = self.state.lock();
        if state.used_bytes + rounded > self.config.max_heap_size {
            return None;
        }

        let reused = state.free_lists.get_mut(&rounded).and_then(Vec::pop);
        let address = match reused {
            Some(address) => address,
            None => {
                let address = state.next_address;
                let end = address.checked_add(rounded as u64)?;
                if end > self.config.address_width.max_address() {
                    return None;
                }
                state.next_address = end;
                address
            }
        };

        let block = MemoryBlock::new(address, size, self.config.byte_order);
        state.blocks.insert(address, block.clone());
        state.used_bytes += rounded;
        state.total_allocations += 1;
        trace!("allocated {} bytes at {:#x}", size, address);
        Some(block)
    }

    fn free(&self, address: u64) -> bool {
        let mut state = self.state.lock();
        let Some(block) = state.blocks.remove(&address) else {
            return false;
        };
        let rounded = round_up(block.size());
        state.used_bytes -= rounded;
        state.total_frees += 1;
        state.free_lists.entry(rounded).or_default().push(address);
        trace!("freed {} bytes at {:#x}", block.size(), address);
        true
    }

    fn resolve(&self, address: u64) -> Option<MemoryBlock> {
        self.state.lock().blocks.get(&address).cloned()
    }

    fn for_each_block(&self, visit: &mut dyn FnMut(&MemoryBlock)) {
        let state = self.state.lock();
        for block in state.blocks.values() {
            visit(block);
        }
    }

    fn stats(&self) -> HeapStats {
        let state = self.state.lock();
        HeapStats {
            live_blocks: state.blocks.len(),
            used_bytes: state.used_bytes,
            max_bytes: self.config.max_heap_size,
            total_allocations: state.total_allocations,
            total_frees: state.total_frees,
        }
    }

    fn address_width(&self) -> AddressWidth {
        self.config.address_width
    }

    fn byte_order(&self) -> ByteOrder {
        self.config.byte_order
    }
}

impl std::fmt::Debug for SimpleAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleAllocator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
