//! Execution errors.
//!
//! Interpretation ends in one of two ways besides a normal return: a guest
//! exception the hosted program may still catch further up, or a host-fatal
//! [`VmError`] that aborts the whole call chain.

use core_types::{ObjectRef, VmError};
use thiserror::Error;

/// Abnormal completion of an invocation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// A guest exception object in flight
    #[error("guest exception {0:?}")]
    Guest(ObjectRef),

    /// The VM is in an inconsistent state
    #[error(transparent)]
    Fatal(#[from] VmError),
}

impl ExecutionError {
    /// The exception object of a guest error.
    pub fn exception(&self) -> Option<&ObjectRef> {
        match self {
            ExecutionError::Guest(object) => Some(object),
            ExecutionError::Fatal(_) => None,
        }
    }

    /// True for host-fatal errors.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutionError::Fatal(_))
    }
}

/// Result alias used throughout the interpreter.
pub type ExecResult<T> = Result<T, ExecutionError>;
