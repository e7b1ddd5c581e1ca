//! Execution engine for class-file bytecode
//!
//! This crate runs linked methods on top of `class_linker` and
//! `memory_manager`:
//! - Per-activation [`ExecutionContext`] with a wide-value aware [`Stack`]
//!   and [`Locals`]
//! - Instruction dispatch with exception-table search
//! - Invocation protocol with synchronized methods, observers and
//!   interceptors ([`Hooks`])
//! - Reentrant object monitors with wait/notify
//! - Guest threads, stop-the-world safe points and deferred task queues
//! - Root enumeration for the mark-and-sweep collector
//! - Intrinsic natives for the boot image
//!
//! # Example
//!
//! ```
//! use bytecode_system::{AccessFlags, ClassBuilder, Opcode};
//! use core_types::Value;
//! use interpreter::{Vm, VmConfig};
//!
//! let mut class = ClassBuilder::new("demo/Answer");
//! let mut m = class.method(AccessFlags::PUBLIC | AccessFlags::STATIC, "get", "()I");
//! m.iconst(42).op(Opcode::Ireturn).maxs(1, 0);
//! m.finish().unwrap();
//!
//! let vm = Vm::new(VmConfig::default()).unwrap();
//! let main = vm.attach_thread("main").unwrap();
//! vm.define_class(main.thread(), &class.to_bytes()).unwrap();
//! let result = vm
//!     .invoke_static(main.thread(), "demo/Answer", "get", "()I", &[])
//!     .unwrap();
//! assert_eq!(result, Some(Value::Int(42)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
mod dispatch;
pub mod error;
mod gc_integration;
pub mod hooks;
mod invocation;
pub mod monitor;
pub mod natives;
mod strings;
pub mod thread;
mod throwable;
pub mod vm;

// Re-export main types at crate root
pub use config::VmConfig;
pub use context::{normalize, ExecutionContext, Locals, Stack};
pub use error::{ExecResult, ExecutionError};
pub use hooks::{
    Hooks, Intercept, Interceptor, Invocation, MethodHook, Observer, PostObserver,
};
pub use monitor::{Monitor, MonitorTable};
pub use natives::{NativeFn, SystemTimeSource, TimeSource};
pub use thread::{Task, ThreadAttachment, VmJoinHandle, VmThread};
pub use vm::Vm;
