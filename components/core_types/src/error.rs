//! Host-fatal error type.
//!
//! A [`VmError`] means the virtual machine itself is in an inconsistent state.
//! These errors abort the enclosing operation and propagate to the embedder;
//! they are never turned into exceptions the hosted program could catch.

use thiserror::Error;

/// Invariant violations and unrecoverable VM failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// The allocator was asked to free an address it does not own
    #[error("free of unknown or already released block at {0:#x}")]
    InvalidFree(u64),

    /// Memory needed for VM bookkeeping could not be allocated
    #[error("internal allocation of {size} bytes failed: {context}")]
    InternalAllocation {
        /// Requested size
        size: usize,
        /// What the allocation was for
        context: String,
    },

    /// Object header or layout is not what the VM wrote
    #[error("heap corruption at {address:#x}: {detail}")]
    HeapCorruption {
        /// Address of the damaged object
        address: u64,
        /// Description of the inconsistency
        detail: String,
    },

    /// A thread released a monitor it does not hold
    #[error("thread {thread} released monitor of {address:#x} it does not own")]
    MonitorNotOwned {
        /// Releasing thread
        thread: u64,
        /// Address of the monitor's object
        address: u64,
    },

    /// Wide/narrow slot pairing was broken
    #[error("slot discipline violated: {0}")]
    SlotDiscipline(String),

    /// Operand stack grew beyond the declared maximum
    #[error("operand stack overflow (max {0})")]
    StackOverflow(usize),

    /// Pop from an empty operand stack
    #[error("operand stack underflow")]
    StackUnderflow,

    /// Local variable index outside the declared table
    #[error("local variable {index} out of range (max {max})")]
    LocalOutOfRange {
        /// Requested index
        index: usize,
        /// Table size
        max: usize,
    },

    /// A class the VM cannot run without is missing
    #[error("bootstrap class {0} is missing")]
    MissingBootClass(String),

    /// Linking failed in a way the guest cannot observe
    #[error("link failure: {0}")]
    Link(String),

    /// Instruction or feature the VM does not implement
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The current thread is not attached to this VM
    #[error("thread is not attached to the virtual machine")]
    ThreadNotAttached,

    /// Anything else that indicates a broken VM invariant
    #[error("internal error: {0}")]
    Internal(String),
}
