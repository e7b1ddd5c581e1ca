//! Object monitors
//!
//! Every object can act as a reentrant lock with a wait set. Monitors are
//! created on first use and kept in a table keyed by object address; the
//! collector drops the entry when the object is freed.
//!
//! Blocking operations take the safe-point barrier so a thread waiting for
//! a monitor never holds up a collection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use core_types::VmError;
use log::trace;
use memory_manager::SafepointBarrier;
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct MonitorState {
    owner: Option<u64>,
    count: usize,
}

/// Reentrant lock plus wait set of one object.
#[derive(Debug, Default)]
pub struct Monitor {
    state: Mutex<MonitorState>,
    entry: Condvar,
    signal: Condvar,
}

impl Monitor {
    /// Creates an unowned monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Owning thread id.
    pub fn owner(&self) -> Option<u64> {
        self.state.lock().owner
    }

    /// Recursion count of the owner.
    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// Takes the monitor if it is free or already held by `thread`.
    pub fn try_enter(&self, thread: u64) -> bool {
        let mut state = self.state.lock();
        match state.owner {
            None => {
                state.owner = Some(thread);
                state.count = 1;
                true
            }
            Some(owner) if owner == thread => {
                state.count += 1;
                true
            }
            Some(_) => false,
        }
    }

    /// Acquires the monitor, blocking inside a safe region while another
    /// thread owns it.
    pub fn enter(&self, thread: u64, barrier: &SafepointBarrier) {
        if self.try_enter(thread) {
            return;
        }
        barrier.in_safe_region(|| {
            let mut state = self.state.lock();
            while state.owner.is_some() {
                self.entry.wait(&mut state);
            }
            state.owner = Some(thread);
            state.count = 1;
        });
    }

    /// Releases one level of ownership.
    pub fn exit(&self, thread: u64, address: u64) -> Result<(), VmError> {
        let mut state = self.state.lock();
        if state.owner != Some(thread) {
            return Err(VmError::MonitorNotOwned { thread, address });
        }
        state.count -= 1;
        if state.count == 0 {
            state.owner = None;
            self.entry.notify_one();
        }
        Ok(())
    }

    /// Releases the monitor completely, waits for a notification or the
    /// timeout (`None` waits indefinitely), then reacquires it with the
    /// saved recursion count.
    pub fn wait(
        &self,
        thread: u64,
        address: u64,
        timeout: Option<Duration>,
        barrier: &SafepointBarrier,
    ) -> Result<(), VmError> {
        barrier.in_safe_region(|| {
            let mut state = self.state.lock();
            if state.owner != Some(thread) {
                return Err(VmError::MonitorNotOwned { thread, address });
            }
            let saved = state.count;
            state.owner = None;
            state.count = 0;
            self.entry.notify_one();

            match timeout {
                Some(duration) => {
                    self.signal.wait_for(&mut state, duration);
                }
                None => self.signal.wait(&mut state),
            }

            while state.owner.is_some() {
                self.entry.wait(&mut state);
            }
            state.owner = Some(thread);
            state.count = saved;
            Ok(())
        })
    }

    /// Wakes one waiter.
    pub fn notify(&self, thread: u64, address: u64) -> Result<(), VmError> {
        let state = self.state.lock();
        if state.owner != Some(thread) {
            return Err(VmError::MonitorNotOwned { thread, address });
        }
        self.signal.notify_one();
        Ok(())
    }

    /// Wakes every waiter.
    pub fn notify_all(&self, thread: u64, address: u64) -> Result<(), VmError> {
        let state = self.state.lock();
        if state.owner != Some(thread) {
            return Err(VmError::MonitorNotOwned { thread, address });
        }
        self.signal.notify_all();
        Ok(())
    }
}

/// Monitors of the objects that have used one.
#[derive(Debug, Default)]
pub struct MonitorTable {
    monitors: Mutex<HashMap<u64, Arc<Monitor>>>,
}

impl MonitorTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Monitor of the object at `address`, created on first use.
    pub fn monitor(&self, address: u64) -> Arc<Monitor> {
        self.monitors
            .lock()
            .entry(address)
            .or_insert_with(|| {
                trace!("monitor created for {:#x}", address);
                Arc::new(Monitor::new())
            })
            .clone()
    }

    /// Monitor of `address` if one exists.
    pub fn get(&self, address: u64) -> Option<Arc<Monitor>> {
        self.monitors.lock().get(&address).cloned()
    }

    /// Drops the monitor of a freed object.
    pub fn remove(&self, address: u64) {
        self.monitors.lock().remove(&address);
    }

    /// Number of monitors in use.
    pub fn len(&self) -> usize {
        self.monitors.lock().len()
    }

    /// True if no object has a monitor.
    pub fn is_empty(&self) -> bool {
        self.monitors.lock().is_empty()
    }
}
