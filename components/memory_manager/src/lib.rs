//! Memory Manager - heap allocation and garbage collection
//!
//! This component provides:
//! - The [`MemoryAllocator`] contract and a [`SimpleAllocator`] implementation
//! - A stop-the-world [`MarkAndSweep`] collector driven by an [`ObjectGraph`]
//! - [`GcHandle`] pins that keep objects alive across cycles
//! - The cooperative [`SafepointBarrier`] mutators poll at safe points
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use memory_manager::{HeapConfig, MarkAndSweep, MemoryAllocator, SafepointBarrier, SimpleAllocator};
//!
//! let heap = Arc::new(SimpleAllocator::new(HeapConfig::default()));
//! let gc = MarkAndSweep::new(heap.clone(), Arc::new(SafepointBarrier::new()));
//! assert_eq!(gc.reserved_header_size(), 1);
//! assert_eq!(heap.stats().live_blocks, 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gc;
pub mod heap;
pub mod safepoint;

// Re-export main types
pub use gc::{
    mark_of, GcHandle, GcStats, MarkAndSweep, MarkState, ObjectGraph, GC_HEADER_SIZE, MARK_OFFSET,
};
pub use heap::{HeapConfig, HeapStats, MemoryAllocator, SimpleAllocator, ALLOCATION_ALIGNMENT};
pub use safepoint::SafepointBarrier;
