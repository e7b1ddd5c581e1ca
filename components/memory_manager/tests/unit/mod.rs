//! Unit tests for the heap, collector and safe-point barrier
//!
//! The test graph models objects of 32 bytes whose words 1..4 hold
//! outgoing addresses (0 = none).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use core_types::{ObjectRef, VmError};
use memory_manager::{
    mark_of, HeapConfig, MarkAndSweep, MarkState, MemoryAllocator, ObjectGraph, SafepointBarrier,
    SimpleAllocator,
};

const SLOTS: [usize; 3] = [8, 16, 24];

struct TestGraph {
    heap: Arc<SimpleAllocator>,
    roots: parking_lot::Mutex<Vec<u64>>,
}

impl TestGraph {
    fn new(heap: Arc<SimpleAllocator>) -> Self {
        TestGraph {
            heap,
            roots: parking_lot::Mutex::new(Vec::new()),
        }
    }

    fn object(&self) -> u64 {
        self.heap.allocate(32).unwrap().address()
    }

    fn link(&self, from: u64, slot: usize, to: u64) {
        self.heap
            .resolve(from)
            .unwrap()
            .data()
            .write_u64(SLOTS[slot], to);
    }

    fn alive(&self, address: u64) -> bool {
        self.heap.resolve(address).is_some()
    }
}

impl ObjectGraph for TestGraph {
    fn for_each_root(&self, visit: &mut dyn FnMut(ObjectRef)) {
        for address in self.roots.lock().iter() {
            if let Some(block) = self.heap.resolve(*address) {
                visit(ObjectRef::new(block));
            }
        }
    }

    fn for_each_reference(
        &self,
        object: &ObjectRef,
        visit: &mut dyn FnMut(ObjectRef),
    ) -> Result<(), VmError> {
        for offset in SLOTS {
            let target = object.data().read_u64(offset);
            if target != 0 {
                let block = self.heap.resolve(target).ok_or(VmError::HeapCorruption {
                    address: target,
                    detail: "dangling".to_string(),
                })?;
                visit(ObjectRef::new(block));
            }
        }
        Ok(())
    }
}

fn setup() -> (TestGraph, MarkAndSweep) {
    let heap = Arc::new(SimpleAllocator::new(HeapConfig::default()));
    let gc = MarkAndSweep::new(heap.clone(), Arc::new(SafepointBarrier::new()));
    (TestGraph::new(heap), gc)
}

#[test]
fn test_transitive_closure_survives() {
    let (graph, gc) = setup();
    let a = graph.object();
    let b = graph.object();
    let c = graph.object();
    let d = graph.object();
    graph.link(a, 0, b);
    graph.link(b, 2, c);
    graph.link(c, 1, a);
    graph.roots.lock().push(a);

    let stats = gc.collect(&graph).unwrap();
    assert!(graph.alive(a) && graph.alive(b) && graph.alive(c));
    assert!(!graph.alive(d));
    assert_eq!(stats.freed_objects, 1);
    assert_eq!(stats.freed_bytes, 32);
}

#[test]
fn test_marks_reset_between_cycles() {
    let (graph, gc) = setup();
    let a = graph.object();
    let b = graph.object();
    graph.link(a, 0, b);
    graph.roots.lock().push(a);
    gc.collect(&graph).unwrap();

    let obj = ObjectRef::new(graph.heap.resolve(b).unwrap());
    assert_eq!(mark_of(&obj).unwrap(), MarkState::None);
    drop(obj);

    graph.roots.lock().clear();
    let stats = gc.collect(&graph).unwrap();
    assert_eq!(stats.freed_objects, 2);
    assert_eq!(graph.heap.stats().live_blocks, 0);
    assert_eq!(gc.cycles(), 2);
}

#[test]
fn test_handle_keeps_subgraph_alive_across_cycles() {
    let (graph, gc) = setup();
    let pinned = graph.object();
    let child = graph.object();
    graph.link(pinned, 1, child);

    let handle = {
        let obj = ObjectRef::new(graph.heap.resolve(pinned).unwrap());
        gc.make_handle(&obj)
    };
    for _ in 0..5 {
        gc.collect(&graph).unwrap();
        assert!(graph.alive(pinned));
        assert!(graph.alive(child));
    }
    assert_eq!(mark_of(handle.object()).unwrap(), MarkState::Ref);
    assert!(gc.release_handle(&handle));
    drop(handle);

    gc.collect(&graph).unwrap();
    assert!(!graph.alive(pinned));
    assert!(!graph.alive(child));
}

#[test]
fn test_released_handle_still_reachable_survives() {
    let (graph, gc) = setup();
    let a = graph.object();
    graph.roots.lock().push(a);
    let handle = gc.make_handle(&ObjectRef::new(graph.heap.resolve(a).unwrap()));
    gc.release_handle(&handle);
    drop(handle);
    gc.collect(&graph).unwrap();
    assert!(graph.alive(a));
}

#[test]
fn test_dangling_reference_is_fatal() {
    let (graph, gc) = setup();
    let a = graph.object();
    graph.link(a, 0, 0xfff0);
    graph.roots.lock().push(a);
    assert!(gc.collect(&graph).is_err());
}

#[test]
fn test_collection_pauses_running_mutators() {
    let (graph, gc) = setup();
    let graph = Arc::new(graph);
    let gc = Arc::new(gc);
    let stop = Arc::new(AtomicBool::new(false));

    let mutators: Vec<_> = (0..3)
        .map(|_| {
            let graph = Arc::clone(&graph);
            let barrier = Arc::clone(gc.barrier());
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                barrier.register();
                let mut kept = 0;
                while !stop.load(Ordering::Acquire) {
                    barrier.poll();
                    let address = graph.object();
                    graph.roots.lock().push(address);
                    kept += 1;
                    if kept > 50 {
                        graph.roots.lock().clear();
                        kept = 0;
                    }
                }
                barrier.unregister();
            })
        })
        .collect();

    for _ in 0..10 {
        gc.collect(&*graph).unwrap();
    }
    stop.store(true, Ordering::Release);
    for mutator in mutators {
        mutator.join().unwrap();
    }
    assert_eq!(gc.barrier().pause_count(), 10);
}
