//! Class Linker - the type model and class linking
//!
//! This component provides:
//! - [`JavaClass`], [`JavaField`] and [`JavaMethod`], the linked type model
//! - [`ClassLinker`], which loads, links and resolves classes per loader
//! - The heap object layout ([`object_model`]) shared with the interpreter
//!   and the collector's object graph
//! - Class byte sources and the built-in [`boot_image`]
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use class_linker::{boot_image, ClassLinker, LoaderId};
//! use memory_manager::{HeapConfig, SimpleAllocator};
//!
//! let heap = Arc::new(SimpleAllocator::new(HeapConfig::default()));
//! let linker = ClassLinker::new(heap, Arc::new(boot_image().unwrap()));
//! linker.bootstrap().unwrap();
//!
//! let string = linker.load_class(LoaderId::BOOT, "java/lang/String").unwrap();
//! assert!(string.mirror().is_some());
//! assert_eq!(string.super_class().unwrap().name(), "java/lang/Object");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod boot_image;
pub mod class;
pub mod error;
pub mod inline_cache;
pub mod layout;
pub mod linker;
pub mod loader;
pub mod member;
pub mod object_model;
pub mod runtime_pool;
pub mod source;

// Re-export main types at crate root
pub use boot_image::{boot_image, EXCEPTION_HIERARCHY};
pub use class::{ClassId, ClassKind, InitAction, InitState, JavaClass};
pub use error::{LinkError, LinkResult};
pub use inline_cache::{InlineCache, POLYMORPHIC_LIMIT};
pub use layout::{assign_slots, is_virtual, layout_fields, FieldLayout};
pub use linker::{ClassLinker, PRIMITIVES};
pub use loader::{ClassLoaderData, LoadEntry, LoaderId};
pub use member::{
    qualified_name, FieldConstant, FieldKind, HandlerEntry, JavaField, JavaMethod, MethodCode,
};
pub use object_model::{MirrorLayout, ObjectKind};
pub use runtime_pool::{CallSiteCache, Resolved, RuntimeConstantPool};
pub use source::{ClassSource, CompositeClassSource, DirectoryClassSource, MemoryClassSource};
