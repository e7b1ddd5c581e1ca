//! Link errors.

use bytecode_system::ClassFormatError;
use core_types::VmError;
use thiserror::Error;

/// Failures while loading, linking or resolving classes and members.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// No source provides the class
    #[error("class not found: {0}")]
    ClassNotFound(String),

    /// Class bytes do not parse
    #[error("malformed class {name}: {source}")]
    Format {
        /// Requested class
        name: String,
        /// Parse failure
        #[source]
        source: ClassFormatError,
    },

    /// The bytes define a different class than requested
    #[error("class {expected} was defined as {found}")]
    WrongName {
        /// Requested name
        expected: String,
        /// Name found in the class file
        found: String,
    },

    /// A class is its own superclass or superinterface
    #[error("class circularity at {0}")]
    Circularity(String),

    /// The loader already defined a class with this name
    #[error("duplicate definition of {0}")]
    Duplicate(String),

    /// A superclass is an interface, an interface is a class, or similar
    #[error("incompatible class change: {0}")]
    IncompatibleClassChange(String),

    /// Field resolution failed
    #[error("no such field {class}.{name}")]
    NoSuchField {
        /// Class searched
        class: String,
        /// Field name
        name: String,
    },

    /// Method resolution failed
    #[error("no such method {class}.{name}{descriptor}")]
    NoSuchMethod {
        /// Class searched
        class: String,
        /// Method name
        name: String,
        /// Method descriptor
        descriptor: String,
    },

    /// Host-fatal failure underneath the linker
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl LinkError {
    /// Guest exception class that reports this error, or `None` when the
    /// error is host-fatal.
    pub fn guest_class(&self) -> Option<&'static str> {
        match self {
            LinkError::ClassNotFound(_) => Some("java/lang/NoClassDefFoundError"),
            LinkError::IncompatibleClassChange(_) => Some("java/lang/IncompatibleClassChangeError"),
            LinkError::NoSuchField { .. } => Some("java/lang/NoSuchFieldError"),
            LinkError::NoSuchMethod { .. } => Some("java/lang/NoSuchMethodError"),
            LinkError::Format { .. }
            | LinkError::WrongName { .. }
            | LinkError::Circularity(_)
            | LinkError::Duplicate(_)
            | LinkError::Vm(_) => None,
        }
    }

    /// Converts to a host-fatal error.
    pub fn into_vm_error(self) -> VmError {
        match self {
            LinkError::Vm(error) => error,
            other => VmError::Link(other.to_string()),
        }
    }
}

/// Result alias for linker operations.
pub type LinkResult<T> = Result<T, LinkError>;
