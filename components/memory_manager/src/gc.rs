//! Mark-and-sweep garbage collector.
//!
//! Every heap object reserves its first byte ([`GC_HEADER_SIZE`]) for the
//! collector's mark:
//!
//! - `None` - not reached (yet) in the current cycle
//! - `Set`  - reached in the current cycle
//! - `Ref`  - pinned by a [`GcHandle`]; persists across cycles
//!
//! A cycle stops the world, marks from the roots the [`ObjectGraph`]
//! reports, traces outgoing references transitively, frees every object
//! still unmarked, and resets `Set` marks for the next cycle.
//!
//! The collector knows nothing about object layouts. The embedding VM
//! supplies root enumeration and reference tracing through [`ObjectGraph`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use core_types::{ObjectRef, VmError};
use log::{debug, info};
use parking_lot::Mutex;

use crate::heap::MemoryAllocator;
use crate::safepoint::SafepointBarrier;

/// Bytes reserved at the start of every object for the mark.
pub const GC_HEADER_SIZE: usize = 1;

/// Offset of the mark byte.
pub const MARK_OFFSET: usize = 0;

/// Collector mark stored in an object's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MarkState {
    /// Not reached
    None = 0,
    /// Reached this cycle
    Set = 1,
    /// Pinned by a handle
    Ref = 2,
}

impl MarkState {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(MarkState::None),
            1 => Some(MarkState::Set),
            2 => Some(MarkState::Ref),
            _ => None,
        }
    }
}

/// Reads the mark of an object.
pub fn mark_of(object: &ObjectRef) -> Result<MarkState, VmError> {
    let byte = object.data().read_u8(MARK_OFFSET);
    MarkState::from_byte(byte).ok_or_else(|| VmError::HeapCorruption {
        address: object.address(),
        detail: format!("invalid mark byte {}", byte),
    })
}

fn set_mark(object: &ObjectRef, mark: MarkState) {
    object.data().write_u8(MARK_OFFSET, mark as u8);
}

/// Roots and reference structure of the heap, supplied by the VM.
pub trait ObjectGraph {
    /// Reports every root: loader objects, class mirrors, primitive
    /// mirrors, thread objects and live frame slots.
    fn for_each_root(&self, visit: &mut dyn FnMut(ObjectRef));

    /// Reports the objects `object` references directly.
    fn for_each_reference(
        &self,
        object: &ObjectRef,
        visit: &mut dyn FnMut(ObjectRef),
    ) -> Result<(), VmError>;

    /// Called for every object right before its block is freed.
    fn on_free(&self, _address: u64) {}
}

/// External pin keeping one object reachable until released.
pub struct GcHandle {
    object: ObjectRef,
    acquisitions: AtomicUsize,
}

impl GcHandle {
    /// The pinned object.
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// Outstanding acquisitions of this handle.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for GcHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcHandle")
            .field("object", &self.object)
            .field("acquisitions", &self.acquisitions())
            .finish()
    }
}

/// Statistics of one collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Objects that survived
    pub live_objects: usize,
    /// Objects marked through `Set` this cycle
    pub marked_objects: usize,
    /// Objects pinned by handles
    pub pinned_objects: usize,
    /// Objects reclaimed
    pub freed_objects: usize,
    /// Bytes reclaimed
    pub freed_bytes: usize,
    /// Wall time of the cycle, pause included
    pub duration: Duration,
}

/// Stop-the-world mark-and-sweep collector.
pub struct MarkAndSweep {
    allocator: Arc<dyn MemoryAllocator>,
    barrier: Arc<SafepointBarrier>,
    handles: Mutex<HashMap<u64, Arc<GcHandle>>>,
    cycles: AtomicUsize,
    last: Mutex<GcStats>,
}

impl MarkAndSweep {
    /// Creates a collector over `allocator`, pausing mutators via `barrier`.
    pub fn new(allocator: Arc<dyn MemoryAllocator>, barrier: Arc<SafepointBarrier>) -> Self {
        MarkAndSweep {
            allocator,
            barrier,
            handles: Mutex::new(HashMap::new()),
            cycles: AtomicUsize::new(0),
            last: Mutex::new(GcStats::default()),
        }
    }

    /// The safe-point barrier used to pause mutators.
    pub fn barrier(&self) -> &Arc<SafepointBarrier> {
        &self.barrier
    }

    /// Bytes reserved in front of every object.
    pub fn reserved_header_size(&self) -> usize {
        GC_HEADER_SIZE
    }

    /// Completed cycles.
    pub fn cycles(&self) -> usize {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Statistics of the most recent cycle.
    pub fn last_stats(&self) -> GcStats {
        *self.last.lock()
    }

    /// Pins `object`, returning the same handle on repeated requests.
    ///
    /// The object's mark becomes `Ref` immediately.
    pub fn make_handle(&self, object: &ObjectRef) -> Arc<GcHandle> {
        let mut handles = self.handles.lock();
        let handle = handles
            .entry(object.address())
            .or_insert_with(|| {
                Arc::new(GcHandle {
                    object: object.clone(),
                    acquisitions: AtomicUsize::new(0),
                })
            })
            .clone();
        handle.acquisitions.fetch_add(1, Ordering::AcqRel);
        set_mark(object, MarkState::Ref);
        handle
    }

    /// Releases one acquisition of `handle`. Waits for a cycle in progress.
    ///
    /// When the last acquisition is released the pin is dropped and the mark
    /// reset to `None`; the next cycle re-marks the object if it is still
    /// reachable. Returns `true` if the pin was dropped.
    pub fn release_handle(&self, handle: &GcHandle) -> bool {
        let mut handles = self.handles.lock();
        let previous = handle.acquisitions.fetch_sub(1, Ordering::AcqRel);
        if previous > 1 {
            return false;
        }
        if previous == 0 {
            handle.acquisitions.store(0, Ordering::Release);
            return false;
        }
        handles.remove(&handle.object.address());
        set_mark(&handle.object, MarkState::None);
        true
    }

    /// True if `object` is currently pinned.
    pub fn is_pinned(&self, object: &ObjectRef) -> bool {
        self.handles.lock().contains_key(&object.address())
    }

    /// Runs one full collection cycle.
    ///
    /// Concurrent calls are serialized by the barrier.
    ///
    /// Fails only on an invariant violation (corrupt mark, free of an unknown
    /// block); such failures are never retried.
    pub fn collect(&self, graph: &dyn ObjectGraph) -> Result<GcStats, VmError> {
        let started = Instant::now();
        let mut stats = self.barrier.stop_the_world(|| self.mark_and_sweep(graph))?;
        stats.duration = started.elapsed();

        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "gc #{}: {} live, {} freed ({} bytes) in {:?}",
            cycle, stats.live_objects, stats.freed_objects, stats.freed_bytes, stats.duration
        );
        *self.last.lock() = stats;
        Ok(stats)
    }

    fn mark_and_sweep(&self, graph: &dyn ObjectGraph) -> Result<GcStats, VmError> {
        let mut stats = GcStats::default();
        let mut worklist: Vec<ObjectRef> = Vec::new();

        // Held for the whole cycle: handles cannot change marks mid-sweep.
        let handles = self.handles.lock();
        graph.for_each_root(&mut |root| worklist.push(root));

        let roots = std::mem::take(&mut worklist);
        for root in roots {
            if mark(&root)? {
                stats.marked_objects += 1;
                worklist.push(root);
            }
        }

        // Pinned objects keep their own referents alive too.
        for handle in handles.values() {
            worklist.push(handle.object.clone());
        }
        stats.pinned_objects = handles.len();

        while let Some(object) = worklist.pop() {
            let mut failure = None;
            graph.for_each_reference(&object, &mut |child| match mark(&child) {
                Ok(true) => {
                    stats.marked_objects += 1;
                    worklist.push(child);
                }
                Ok(false) => {}
                Err(err) => failure = Some(err),
            })?;
            if let Some(err) = failure {
                return Err(err);
            }
        }

        self.sweep(graph, &mut stats)?;
        drop(handles);
        debug!(
            "mark: {} marked, {} pinned",
            stats.marked_objects, stats.pinned_objects
        );
        Ok(stats)
    }

    fn sweep(&self, graph: &dyn ObjectGraph, stats: &mut GcStats) -> Result<(), VmError> {
        let mut unreachable: Vec<(u64, usize)> = Vec::new();
        let mut corrupt = None;
        self.allocator.for_each_block(&mut |block| {
            let byte = block.data().read_u8(MARK_OFFSET);
            match MarkState::from_byte(byte) {
                Some(MarkState::None) => unreachable.push((block.address(), block.size())),
                Some(MarkState::Set) => {
                    block.data().write_u8(MARK_OFFSET, MarkState::None as u8);
                    stats.live_objects += 1;
                }
                Some(MarkState::Ref) => stats.live_objects += 1,
                None => {
                    corrupt.get_or_insert(VmError::HeapCorruption {
                        address: block.address(),
                        detail: format!("invalid mark byte {}", byte),
                    });
                }
            }
        });
        if let Some(err) = corrupt {
            return Err(err);
        }

        for (address, size) in unreachable {
            graph.on_free(address);
            if !self.allocator.free(address) {
                return Err(VmError::InvalidFree(address));
            }
            stats.freed_objects += 1;
            stats.freed_bytes += size;
        }
        Ok(())
    }
}

/// Marks `object` as reached. Returns `true` if it was previously unmarked.
fn mark(object: &ObjectRef) -> Result<bool, VmError> {
    match mark_of(object)? {
        MarkState::None => {
            set_mark(object, MarkState::Set);
            Ok(true)
        }
        MarkState::Set | MarkState::Ref => Ok(false),
    }
}

impl std::fmt::Debug for MarkAndSweep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkAndSweep")
            .field("cycles", &self.cycles())
            .field("handles", &self.handles.lock().len())
            .finish()
    }
}
