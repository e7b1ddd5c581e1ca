//! Guest threads
//!
//! A [`VmThread`] is the VM's record of one logical thread: its guest
//! `java/lang/Thread` object, its backtrace of live frames and its queue
//! of deferred tasks. Host threads join the VM with
//! [`Vm::attach_thread`](crate::Vm::attach_thread) or are created by
//! [`Vm::spawn_thread`](crate::Vm::spawn_thread).
//!
//! An attached thread that is not executing inside the VM sits in a safe
//! region, so an idle embedder thread never delays a collection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use core_types::{ObjectRef, StackTraceElement, Value, VmError};
use crossbeam::queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::context::ExecutionContext;
use crate::error::{ExecResult, ExecutionError};
use crate::vm::Vm;

/// Work submitted to a thread and run by it at its next safe point.
pub type Task = Box<dyn FnOnce(&Vm, &Arc<VmThread>) + Send>;

/// One logical guest thread.
pub struct VmThread {
    id: u64,
    name: String,
    host: OnceLock<ThreadId>,
    object: OnceLock<ObjectRef>,
    frames: Mutex<Vec<Arc<ExecutionContext>>>,
    /// Objects the VM holds outside any frame, e.g. between two allocations
    held: Mutex<Vec<ObjectRef>>,
    tasks: SegQueue<Task>,
    /// Nesting of embedding entry points on this thread
    pub(crate) entries: AtomicUsize,
    /// Set while a `StackOverflowError` is being built
    pub(crate) reserve: AtomicBool,
    finished: Mutex<bool>,
    finished_cond: Condvar,
}

impl VmThread {
    pub(crate) fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            host: OnceLock::new(),
            object: OnceLock::new(),
            frames: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            tasks: SegQueue::new(),
            entries: AtomicUsize::new(0),
            reserve: AtomicBool::new(false),
            finished: Mutex::new(false),
            finished_cond: Condvar::new(),
        }
    }

    /// VM-wide thread id, starting at 1.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host thread running this thread, once attached.
    pub fn host(&self) -> Option<ThreadId> {
        self.host.get().copied()
    }

    pub(crate) fn bind_host(&self) -> Result<(), VmError> {
        self.host
            .set(thread::current().id())
            .map_err(|_| VmError::Internal(format!("thread {} attached twice", self.id)))
    }

    /// The guest `java/lang/Thread` object.
    pub fn object(&self) -> Option<&ObjectRef> {
        self.object.get()
    }

    pub(crate) fn set_object(&self, object: ObjectRef) {
        let _ = self.object.set(object);
    }

    /// Number of frames on the backtrace.
    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    pub(crate) fn push_frame(&self, frame: Arc<ExecutionContext>) {
        self.frames.lock().push(frame);
    }

    pub(crate) fn pop_frame(&self) -> Option<Arc<ExecutionContext>> {
        self.frames.lock().pop()
    }

    /// Roots `object` until the enclosing [`HeldScope`] or entry point ends.
    pub(crate) fn hold(&self, object: &ObjectRef) {
        self.held.lock().push(object.clone());
    }

    /// Roots every reference in `values`.
    pub(crate) fn hold_values(&self, values: &[Value]) {
        let mut held = self.held.lock();
        for value in values {
            if let Some(Some(object)) = value.as_reference() {
                held.push(object.clone());
            }
        }
    }

    /// Number of objects held outside frames.
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    pub(crate) fn release_held(&self, base: usize) {
        self.held.lock().truncate(base);
    }

    pub(crate) fn for_each_held(&self, visit: &mut dyn FnMut(&ObjectRef)) {
        for object in self.held.lock().iter() {
            visit(object);
        }
    }

    /// Opens a scope whose holds are dropped with it.
    pub(crate) fn held_scope(&self) -> HeldScope<'_> {
        HeldScope {
            thread: self,
            base: self.held_count(),
        }
    }

    /// Copy of the backtrace, outermost frame first.
    pub fn frames(&self) -> Vec<Arc<ExecutionContext>> {
        self.frames.lock().clone()
    }

    /// Current stack trace, innermost frame first.
    pub fn stack_trace(&self) -> Vec<StackTraceElement> {
        self.frames
            .lock()
            .iter()
            .rev()
            .map(|frame| frame.stack_trace_element())
            .collect()
    }

    /// Queues `task` for this thread.
    pub fn submit(&self, task: Task) {
        self.tasks.push(task);
    }

    /// Tasks waiting to run.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn next_task(&self) -> Option<Task> {
        self.tasks.pop()
    }

    /// True once the thread has detached.
    pub fn is_finished(&self) -> bool {
        *self.finished.lock()
    }

    pub(crate) fn mark_finished(&self) {
        *self.finished.lock() = true;
        self.finished_cond.notify_all();
    }

    /// Blocks until the thread detaches.
    pub fn wait_finished(&self) {
        let mut finished = self.finished.lock();
        while !*finished {
            self.finished_cond.wait(&mut finished);
        }
    }
}

impl std::fmt::Debug for VmThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmThread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("depth", &self.depth())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

/// Attachment of the calling host thread; detaches when dropped.
pub struct ThreadAttachment {
    vm: Arc<Vm>,
    thread: Arc<VmThread>,
}

impl ThreadAttachment {
    pub(crate) fn new(vm: Arc<Vm>, thread: Arc<VmThread>) -> Self {
        Self { vm, thread }
    }

    /// The attached thread.
    pub fn thread(&self) -> &Arc<VmThread> {
        &self.thread
    }

    /// The virtual machine.
    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }
}

impl Drop for ThreadAttachment {
    fn drop(&mut self) {
        self.vm.detach(&self.thread);
    }
}

impl std::fmt::Debug for ThreadAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ThreadAttachment({})", self.thread.id())
    }
}

/// Handle to a thread started with [`Vm::spawn_thread`](crate::Vm::spawn_thread).
pub struct VmJoinHandle<R> {
    vm: Arc<Vm>,
    handle: JoinHandle<ExecResult<R>>,
}

impl<R> VmJoinHandle<R> {
    pub(crate) fn new(vm: Arc<Vm>, handle: JoinHandle<ExecResult<R>>) -> Self {
        Self { vm, handle }
    }

    /// Waits for the thread and returns its result. The wait is a safe
    /// region when the caller is attached.
    pub fn join(self) -> ExecResult<R> {
        let handle = self.handle;
        let joined = self.vm.gc().barrier().in_safe_region(|| handle.join());
        joined.unwrap_or_else(|_| {
            Err(ExecutionError::Fatal(VmError::Internal(
                "vm thread panicked".to_string(),
            )))
        })
    }

    /// True once the thread has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Holds taken inside one instruction or one VM operation.
pub(crate) struct HeldScope<'a> {
    thread: &'a VmThread,
    base: usize,
}

impl Drop for HeldScope<'_> {
    fn drop(&mut self) {
        self.thread.release_held(self.base);
    }
}

/// Keeps the calling thread out of its idle safe region while alive.
///
/// The outermost entry also drops every hold taken under it, so objects
/// handed back to the embedder are pinned only by explicit handles.
pub(crate) struct Entry<'a> {
    vm: &'a Vm,
    thread: Arc<VmThread>,
    base: Option<usize>,
}

impl<'a> Entry<'a> {
    pub(crate) fn new(vm: &'a Vm, thread: Arc<VmThread>) -> Self {
        let mut base = None;
        if thread.entries.fetch_add(1, Ordering::AcqRel) == 0 {
            base = Some(thread.held_count());
            vm.gc().barrier().leave_safe_region();
            vm.run_tasks(&thread);
        }
        Self { vm, thread, base }
    }

    pub(crate) fn thread(&self) -> &Arc<VmThread> {
        &self.thread
    }
}

impl Drop for Entry<'_> {
    fn drop(&mut self) {
        if self.thread.entries.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(base) = self.base {
                self.thread.release_held(base);
            }
            self.vm.gc().barrier().enter_safe_region();
        }
    }
}
