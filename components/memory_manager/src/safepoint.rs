//! Stop-the-world safe-point barrier.
//!
//! Mutator threads register with the barrier and poll it at safe points
//! (method entry/exit, allocation, backward branches). A collector calls
//! [`SafepointBarrier::stop_the_world`], which raises a flag and waits until
//! every other registered thread is parked, runs its closure, then releases
//! them all.
//!
//! Threads about to block for a long time (monitor entry, `Object.wait`,
//! joining another thread) enter a *safe region*: they count as parked until
//! they leave it, and leaving blocks while a pause is in progress.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use log::debug;
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MutatorState {
    Running,
    Parked,
}

#[derive(Debug, Default)]
struct BarrierState {
    mutators: HashMap<ThreadId, MutatorState>,
    /// Safe-region nesting per parked thread
    safe_depth: HashMap<ThreadId, usize>,
    stop_requested: bool,
}

impl BarrierState {
    fn others_running(&self, me: ThreadId) -> bool {
        self.mutators
            .iter()
            .any(|(id, state)| *id != me && *state == MutatorState::Running)
    }
}

/// Cooperative stop-the-world barrier.
pub struct SafepointBarrier {
    requested: AtomicBool,
    state: Mutex<BarrierState>,
    cond: Condvar,
    pauses: AtomicU64,
}

impl SafepointBarrier {
    /// Creates a barrier with no registered mutators.
    pub fn new() -> Self {
        SafepointBarrier {
            requested: AtomicBool::new(false),
            state: Mutex::new(BarrierState::default()),
            cond: Condvar::new(),
            pauses: AtomicU64::new(0),
        }
    }

    /// Registers the calling host thread as a running mutator.
    ///
    /// Blocks while a pause is in progress. Returns `false` if the thread was
    /// already registered.
    pub fn register(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.mutators.contains_key(&me) {
            return false;
        }
        while state.stop_requested {
            self.cond.wait(&mut state);
        }
        state.mutators.insert(me, MutatorState::Running);
        true
    }

    /// Removes the calling thread from the barrier.
    pub fn unregister(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        state.mutators.remove(&me);
        state.safe_depth.remove(&me);
        self.cond.notify_all();
    }

    /// True if the calling thread is registered.
    pub fn is_registered(&self) -> bool {
        self.state.lock().mutators.contains_key(&thread::current().id())
    }

    /// Number of registered mutators.
    pub fn mutator_count(&self) -> usize {
        self.state.lock().mutators.len()
    }

    /// True while a collector has requested a pause.
    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Number of completed pauses.
    pub fn pause_count(&self) -> u64 {
        self.pauses.load(Ordering::Relaxed)
    }

    /// Safe point. Parks the caller for the duration of a pending pause.
    #[inline]
    pub fn poll(&self) {
        if self.requested.load(Ordering::Acquire) {
            self.park_slow();
        }
    }

    #[cold]
    fn park_slow(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.mutators.get(&me) != Some(&MutatorState::Running) {
            return;
        }
        state.mutators.insert(me, MutatorState::Parked);
        self.cond.notify_all();
        while state.stop_requested {
            self.cond.wait(&mut state);
        }
        state.mutators.insert(me, MutatorState::Running);
    }

    /// Marks the calling thread as parked until [`leave_safe_region`].
    ///
    /// Safe regions nest; only the outermost leave resumes the thread.
    ///
    /// [`leave_safe_region`]: SafepointBarrier::leave_safe_region
    pub fn enter_safe_region(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if !state.mutators.contains_key(&me) {
            return;
        }
        *state.safe_depth.entry(me).or_insert(0) += 1;
        state.mutators.insert(me, MutatorState::Parked);
        self.cond.notify_all();
    }

    /// Leaves a safe region, waiting out any pause in progress.
    pub fn leave_safe_region(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if !state.mutators.contains_key(&me) {
            return;
        }
        let depth = state.safe_depth.get(&me).copied().unwrap_or(0);
        if depth > 1 {
            state.safe_depth.insert(me, depth - 1);
            return;
        }
        state.safe_depth.remove(&me);
        while state.stop_requested {
            self.cond.wait(&mut state);
        }
        state.mutators.insert(me, MutatorState::Running);
    }

    /// Runs `f` inside a safe region.
    pub fn in_safe_region<R>(&self, f: impl FnOnce() -> R) -> R {
        self.enter_safe_region();
        let _leave = LeaveGuard(self);
        f()
    }

    /// Pauses every other registered mutator, runs `f`, and resumes them.
    ///
    /// The caller may itself be a registered mutator; it is treated as parked
    /// while waiting for a concurrent pause to finish.
    pub fn stop_the_world<R>(&self, f: impl FnOnce() -> R) -> R {
        let me = thread::current().id();
        let mut state = self.state.lock();

        while state.stop_requested {
            let was = state.mutators.get(&me).copied();
            if was == Some(MutatorState::Running) {
                state.mutators.insert(me, MutatorState::Parked);
                self.cond.notify_all();
            }
            self.cond.wait(&mut state);
            if let Some(previous) = was {
                state.mutators.insert(me, previous);
            }
        }

        state.stop_requested = true;
        self.requested.store(true, Ordering::Release);
        while state.others_running(me) {
            self.cond.wait(&mut state);
        }
        debug!(
            "world stopped ({} mutators registered)",
            state.mutators.len()
        );
        drop(state);

        let _resume = ResumeGuard(self);
        f()
    }

    fn resume(&self) {
        let mut state = self.state.lock();
        state.stop_requested = false;
        self.requested.store(false, Ordering::Release);
        self.pauses.fetch_add(1, Ordering::Relaxed);
        self.cond.notify_all();
    }
}

impl Default for SafepointBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SafepointBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafepointBarrier")
            .field("stop_requested", &self.is_stop_requested())
            .field("mutators", &self.mutator_count())
            .field("pauses", &self.pause_count())
            .finish()
    }
}

struct ResumeGuard<'a>(&'a SafepointBarrier);

impl Drop for ResumeGuard<'_> {
    fn drop(&mut self) {
        self.0.resume();
    }
}

struct LeaveGuard<'a>(&'a SafepointBarrier);

impl Drop for LeaveGuard<'_> {
    fn drop(&mut self) {
        self.0.leave_safe_region();
    }
}
