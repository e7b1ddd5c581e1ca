//! Core value types, memory model and host-fatal errors.
//!
//! This crate provides the foundational types shared by every component of
//! the virtual machine.
//!
//! # Overview
//!
//! - [`Value`] - Tagged representation of guest values
//! - [`ObjectRef`] - Reference to a heap-resident object
//! - [`MemoryBlock`] / [`MemoryData`] - Addressable byte storage
//! - [`VmError`] - Host-fatal invariant violations
//! - [`StackTraceElement`] - Backtrace frame information
//!
//! # Examples
//!
//! ```
//! use core_types::{ByteOrder, MemoryBlock, ObjectRef, Value};
//!
//! let block = MemoryBlock::new(0x10, 16, ByteOrder::Little);
//! block.data().write_i32(8, 42);
//!
//! let obj = ObjectRef::new(block);
//! assert_eq!(obj.data().read_i32(8), 42);
//! assert!(Value::Reference(obj).is_reference());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod memory;
mod source;
mod value;

pub use error::VmError;
pub use memory::{AddressWidth, ByteOrder, MemoryBlock, MemoryData};
pub use source::{StackTraceElement, NATIVE_LINE, UNKNOWN_LINE};
pub use value::{ObjectRef, Value};
