//! Fields and methods of linked classes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytecode_system::{
    decode, AccessFlags, ClassFormatError, CodeAttribute, FieldType, FormatResult, Instruction,
    MethodDescriptor,
};
use core_types::{AddressWidth, Value};

use crate::class::JavaClass;

/// Storage kind of a field or array element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// `Z`, one byte
    Boolean,
    /// `B`
    Byte,
    /// `C`, UTF-16 code unit
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// Object or array reference, address-width sized
    Reference,
}

impl FieldKind {
    /// Storage kind of a descriptor type.
    pub fn of(ty: &FieldType) -> FieldKind {
        match ty {
            FieldType::Boolean => FieldKind::Boolean,
            FieldType::Byte => FieldKind::Byte,
            FieldType::Char => FieldKind::Char,
            FieldType::Short => FieldKind::Short,
            FieldType::Int => FieldKind::Int,
            FieldType::Long => FieldKind::Long,
            FieldType::Float => FieldKind::Float,
            FieldType::Double => FieldKind::Double,
            FieldType::Object(_) | FieldType::Array(_) => FieldKind::Reference,
        }
    }

    /// Bytes occupied in an object.
    pub fn size(self, width: AddressWidth) -> usize {
        match self {
            FieldKind::Boolean | FieldKind::Byte => 1,
            FieldKind::Char | FieldKind::Short => 2,
            FieldKind::Int | FieldKind::Float => 4,
            FieldKind::Long | FieldKind::Double => 8,
            FieldKind::Reference => width.bytes(),
        }
    }

    /// True for references.
    pub fn is_reference(self) -> bool {
        self == FieldKind::Reference
    }

    /// Value of a freshly allocated field of this kind.
    pub fn default_value(self) -> Value {
        match self {
            FieldKind::Long => Value::Long(0),
            FieldKind::Float => Value::Float(0.0),
            FieldKind::Double => Value::Double(0.0),
            FieldKind::Reference => Value::Null,
            _ => Value::Int(0),
        }
    }

    /// Descriptor character.
    pub fn descriptor(self) -> char {
        match self {
            FieldKind::Boolean => 'Z',
            FieldKind::Byte => 'B',
            FieldKind::Char => 'C',
            FieldKind::Short => 'S',
            FieldKind::Int => 'I',
            FieldKind::Long => 'J',
            FieldKind::Float => 'F',
            FieldKind::Double => 'D',
            FieldKind::Reference => 'L',
        }
    }
}

/// Initial value of a static field from its `ConstantValue` attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldConstant {
    /// int-like
    Int(i32),
    /// long
    Long(i64),
    /// float
    Float(f32),
    /// double
    Double(f64),
    /// String literal
    String(String),
}

/// A field of a linked class.
#[derive(Debug, Clone)]
pub struct JavaField {
    pub(crate) class_name: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) field_type: FieldType,
    pub(crate) kind: FieldKind,
    pub(crate) access: AccessFlags,
    pub(crate) offset: usize,
    pub(crate) constant: Option<FieldConstant>,
}

impl JavaField {
    /// Declaring class.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Simple name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Parsed descriptor.
    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    /// Storage kind.
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Flags.
    pub fn access(&self) -> AccessFlags {
        self.access
    }

    /// True for static fields.
    pub fn is_static(&self) -> bool {
        self.access.is_static()
    }

    /// Byte offset: from the object start for instance fields, from the
    /// start of the static region for static fields.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// `ConstantValue` initializer.
    pub fn constant(&self) -> Option<&FieldConstant> {
        self.constant.as_ref()
    }
}

/// Exception table entry with instruction-index bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerEntry {
    /// First covered instruction
    pub start: usize,
    /// One past the last covered instruction
    pub end: usize,
    /// Handler instruction
    pub handler: usize,
    /// Class constant of the caught type; `None` catches everything
    pub catch_type: Option<u16>,
}

impl HandlerEntry {
    /// True if the handler's range covers instruction `index`.
    pub fn covers(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

/// Decoded body of a method.
#[derive(Debug, Clone)]
pub struct MethodCode {
    /// Declared operand stack depth
    pub max_stack: usize,
    /// Declared local variable slots
    pub max_locals: usize,
    /// Instructions; branch targets are indices into this list
    pub instructions: Vec<Instruction>,
    /// Handlers in declaration order
    pub handlers: Vec<HandlerEntry>,
    lines: Vec<(usize, u16)>,
}

impl MethodCode {
    /// Decodes a `Code` attribute.
    pub fn from_attribute(code: &CodeAttribute) -> FormatResult<Self> {
        let decoded = decode(&code.code)?;
        let index = |pc: u16| {
            decoded
                .index_of(pc as usize)
                .ok_or(ClassFormatError::BadBranchTarget(pc as i64))
        };

        let mut handlers = Vec::with_capacity(code.exception_table.len());
        for entry in &code.exception_table {
            handlers.push(HandlerEntry {
                start: index(entry.start_pc)?,
                end: index(entry.end_pc)?,
                handler: index(entry.handler_pc)?,
                catch_type: (entry.catch_type != 0).then_some(entry.catch_type),
            });
        }

        let mut lines: Vec<(usize, u16)> = code
            .line_numbers
            .iter()
            .filter_map(|entry| {
                decoded
                    .index_covering(entry.start_pc as usize)
                    .map(|i| (i, entry.line))
            })
            .collect();
        lines.sort_by_key(|(i, _)| *i);

        Ok(MethodCode {
            max_stack: code.max_stack as usize,
            max_locals: code.max_locals as usize,
            instructions: decoded.instructions,
            handlers,
            lines,
        })
    }

    /// Source line of instruction `index`.
    pub fn line_at(&self, index: usize) -> Option<u16> {
        match self.lines.binary_search_by_key(&index, |(i, _)| *i) {
            Ok(found) => Some(self.lines[found].1),
            Err(0) => None,
            Err(next) => Some(self.lines[next - 1].1),
        }
    }
}

/// A method of a linked class.
pub struct JavaMethod {
    pub(crate) owner: Weak<JavaClass>,
    pub(crate) class_name: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) signature: MethodDescriptor,
    pub(crate) access: AccessFlags,
    pub(crate) code: Option<MethodCode>,
    pub(crate) vtable_index: Option<usize>,
    pub(crate) invocations: AtomicU64,
}

impl JavaMethod {
    /// Declaring class, while it is alive.
    pub fn owner(&self) -> Option<Arc<JavaClass>> {
        self.owner.upgrade()
    }

    /// Internal name of the declaring class.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Simple name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor text.
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Parsed descriptor.
    pub fn signature(&self) -> &MethodDescriptor {
        &self.signature
    }

    /// Flags.
    pub fn access(&self) -> AccessFlags {
        self.access
    }

    /// `ACC_STATIC`
    pub fn is_static(&self) -> bool {
        self.access.is_static()
    }

    /// `ACC_NATIVE`
    pub fn is_native(&self) -> bool {
        self.access.is_native()
    }

    /// `ACC_ABSTRACT`
    pub fn is_abstract(&self) -> bool {
        self.access.is_abstract()
    }

    /// `ACC_SYNCHRONIZED`
    pub fn is_synchronized(&self) -> bool {
        self.access.is_synchronized()
    }

    /// `ACC_PRIVATE`
    pub fn is_private(&self) -> bool {
        self.access.is_private()
    }

    /// True for constructors.
    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    /// Decoded body, if the method has one.
    pub fn code(&self) -> Option<&MethodCode> {
        self.code.as_ref()
    }

    /// Virtual table slot; `None` for static, private and constructor methods.
    pub fn vtable_index(&self) -> Option<usize> {
        self.vtable_index
    }

    /// Argument slots including the receiver.
    pub fn argument_slots(&self) -> usize {
        self.signature.parameter_slots() + usize::from(!self.is_static())
    }

    /// `owner.name(descriptor)`, the key hooks are registered under.
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.class_name, &self.name, &self.descriptor)
    }

    /// Counts one invocation and returns the new total.
    pub fn record_invocation(&self) -> u64 {
        self.invocations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Invocations so far.
    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Same name and descriptor.
    pub fn matches(&self, name: &str, descriptor: &str) -> bool {
        self.name == name && self.descriptor == descriptor
    }
}

/// Hook key for a method.
pub fn qualified_name(class: &str, name: &str, descriptor: &str) -> String {
    format!("{}.{}{}", class, name, descriptor)
}

impl fmt::Debug for JavaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JavaMethod({})", self.qualified_name())
    }
}
