//! Guest value representation.
//!
//! This module provides the [`Value`] enum that every operand-stack slot,
//! local variable and field read produces, plus [`ObjectRef`], the handle
//! to a heap-resident object.

use std::fmt;

use crate::memory::MemoryBlock;

/// Reference to a heap object.
///
/// An `ObjectRef` never aliases a primitive value; it wraps the block the
/// allocator handed out for the object.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef(MemoryBlock);

impl ObjectRef {
    /// Wraps an allocated block.
    pub fn new(block: MemoryBlock) -> Self {
        ObjectRef(block)
    }

    /// Heap address of the object.
    pub fn address(&self) -> u64 {
        self.0.address()
    }

    /// Underlying memory block.
    pub fn block(&self) -> &MemoryBlock {
        &self.0
    }

    /// Byte-level accessors for the object's storage.
    pub fn data(&self) -> &crate::memory::MemoryData {
        self.0.data()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:#x})", self.address())
    }
}

/// Any value the execution engine manipulates.
///
/// Long and double values are *wide*: they occupy two stack or local slots,
/// the second of which holds [`Value::Top`].
///
/// # Examples
///
/// ```
/// use core_types::Value;
///
/// assert!(Value::Long(1).is_wide());
/// assert!(!Value::Int(1).is_wide());
/// assert_eq!(Value::Char('A' as u16).as_int(), Some(65));
/// ```
#[derive(Clone, Default)]
pub enum Value {
    /// 32-bit signed integer
    Int(i32),
    /// 64-bit signed integer (wide)
    Long(i64),
    /// 32-bit IEEE 754 float
    Float(f32),
    /// 64-bit IEEE 754 double (wide)
    Double(f64),
    /// 16-bit signed integer
    Short(i16),
    /// 8-bit signed integer
    Byte(i8),
    /// UTF-16 code unit
    Char(u16),
    /// Boolean
    Boolean(bool),
    /// Non-null object reference
    Reference(ObjectRef),
    /// The null reference
    #[default]
    Null,
    /// Continuation marker occupying the second slot of a wide value
    Top,
    /// Return address pushed by `jsr`, as an instruction index
    ReturnAddress(usize),
}

impl Value {
    /// True if this value occupies two slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    /// True for the continuation marker.
    pub fn is_top(&self) -> bool {
        matches!(self, Value::Top)
    }

    /// True for references and null.
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Reference(_) | Value::Null)
    }

    /// Integer view of int-like values (int, short, byte, char, boolean).
    pub fn as_int(&self) -> Option<i32> {
        match *self {
            Value::Int(v) => Some(v),
            Value::Short(v) => Some(v as i32),
            Value::Byte(v) => Some(v as i32),
            Value::Char(v) => Some(v as i32),
            Value::Boolean(v) => Some(v as i32),
            _ => None,
        }
    }

    /// Long view.
    pub fn as_long(&self) -> Option<i64> {
        match *self {
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Float view.
    pub fn as_float(&self) -> Option<f32> {
        match *self {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Double view.
    pub fn as_double(&self) -> Option<f64> {
        match *self {
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Reference view. `Some(None)` is the null reference.
    pub fn as_reference(&self) -> Option<Option<&ObjectRef>> {
        match self {
            Value::Reference(obj) => Some(Some(obj)),
            Value::Null => Some(None),
            _ => None,
        }
    }

    /// Converts an optional object into a reference value.
    pub fn from_object(object: Option<ObjectRef>) -> Self {
        match object {
            Some(obj) => Value::Reference(obj),
            None => Value::Null,
        }
    }

    /// Short type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Short(_) => "short",
            Value::Byte(_) => "byte",
            Value::Char(_) => "char",
            Value::Boolean(_) => "boolean",
            Value::Reference(_) => "reference",
            Value::Null => "null",
            Value::Top => "top",
            Value::ReturnAddress(_) => "returnAddress",
        }
    }
}

impl PartialEq for Value {
    /// Floating point values compare by bit pattern so NaN equals itself.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Reference(a), Value::Reference(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Top, Value::Top) => true,
            (Value::ReturnAddress(a), Value::ReturnAddress(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Value::Long(v) => f.debug_tuple("Long").field(v).finish(),
            Value::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Value::Double(v) => f.debug_tuple("Double").field(v).finish(),
            Value::Short(v) => f.debug_tuple("Short").field(v).finish(),
            Value::Byte(v) => f.debug_tuple("Byte").field(v).finish(),
            Value::Char(v) => f.debug_tuple("Char").field(v).finish(),
            Value::Boolean(v) => f.debug_tuple("Boolean").field(v).finish(),
            Value::Reference(obj) => write!(f, "Reference({:#x})", obj.address()),
            Value::Null => write!(f, "Null"),
            Value::Top => write!(f, "Top"),
            Value::ReturnAddress(v) => f.debug_tuple("ReturnAddress").field(v).finish(),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Reference(obj)
    }
}
