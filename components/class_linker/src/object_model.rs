//! Object header and field storage.
//!
//! Layout of every heap object:
//!
//! | Offset | Content |
//! |--------|---------|
//! | 0 | collector mark byte |
//! | 1 | [`ObjectKind`] |
//! | 4..8 | [`ClassId`] of the object's class |
//! | 8.. | instance fields |
//!
//! Arrays store their length at 8..12 and elements from 16. Mirrors
//! (`java/lang/Class` objects) append the described class's id and its
//! static region after the `Class` instance fields; see [`MirrorLayout`].

use core_types::{AddressWidth, ObjectRef, Value, VmError};
use memory_manager::{MemoryAllocator, ALLOCATION_ALIGNMENT};

use crate::class::ClassId;
use crate::member::FieldKind;

/// Offset of the object kind byte.
pub const KIND_OFFSET: usize = 1;
/// Offset of the class id.
pub const CLASS_ID_OFFSET: usize = 4;
/// First byte of instance fields.
pub const INSTANCE_BASE: usize = 8;
/// Offset of an array's length.
pub const ARRAY_LENGTH_OFFSET: usize = 8;
/// First byte of array elements.
pub const ARRAY_BASE: usize = 16;

/// Kind byte of an object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectKind {
    /// Class instance
    Instance = 1,
    /// Array
    Array = 2,
    /// `java/lang/Class` object carrying a static region
    Mirror = 3,
}

impl ObjectKind {
    fn from_byte(byte: u8) -> Option<ObjectKind> {
        match byte {
            1 => Some(ObjectKind::Instance),
            2 => Some(ObjectKind::Array),
            3 => Some(ObjectKind::Mirror),
            _ => None,
        }
    }
}

/// Rounds `size` up to the allocation alignment.
pub fn align(size: usize) -> usize {
    (size + ALLOCATION_ALIGNMENT - 1) & !(ALLOCATION_ALIGNMENT - 1)
}

/// Placement of the described-class id and static region inside mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorLayout {
    /// Offset of the described class's id
    pub class_id_offset: usize,
    /// First byte of the static region
    pub static_base: usize,
}

impl MirrorLayout {
    /// Layout for mirrors whose `java/lang/Class` instances are
    /// `class_instance_size` bytes.
    pub fn new(class_instance_size: usize) -> Self {
        let class_id_offset = align(class_instance_size);
        Self {
            class_id_offset,
            static_base: class_id_offset + 8,
        }
    }

    /// Size of a mirror carrying `static_size` bytes of statics.
    pub fn mirror_size(&self, static_size: usize) -> usize {
        self.static_base + static_size
    }
}

/// Writes kind and class id into a fresh object.
pub fn write_header(object: &ObjectRef, kind: ObjectKind, class: ClassId) {
    let data = object.data();
    data.write_u8(KIND_OFFSET, kind as u8);
    data.write_u32(CLASS_ID_OFFSET, class.0);
}

fn check_span(object: &ObjectRef, offset: usize, len: usize) -> Result<(), VmError> {
    if offset + len > object.block().size() {
        return Err(VmError::HeapCorruption {
            address: object.address(),
            detail: format!(
                "access of {} bytes at offset {} in a {}-byte object",
                len,
                offset,
                object.block().size()
            ),
        });
    }
    Ok(())
}

/// Kind byte of an object.
pub fn object_kind(object: &ObjectRef) -> Result<ObjectKind, VmError> {
    check_span(object, 0, INSTANCE_BASE)?;
    let byte = object.data().read_u8(KIND_OFFSET);
    ObjectKind::from_byte(byte).ok_or_else(|| VmError::HeapCorruption {
        address: object.address(),
        detail: format!("invalid object kind {}", byte),
    })
}

/// Class id from an object header.
pub fn class_id(object: &ObjectRef) -> Result<ClassId, VmError> {
    check_span(object, 0, INSTANCE_BASE)?;
    Ok(ClassId(object.data().read_u32(CLASS_ID_OFFSET)))
}

/// Bytes needed for an array.
pub fn array_size(length: usize, element_size: usize) -> usize {
    ARRAY_BASE + length * element_size
}

/// Offset of element `index`.
pub fn element_offset(index: usize, element_size: usize) -> usize {
    ARRAY_BASE + index * element_size
}

/// Length of an array object.
pub fn array_length(object: &ObjectRef) -> Result<usize, VmError> {
    check_span(object, 0, ARRAY_BASE)?;
    let length = object.data().read_i32(ARRAY_LENGTH_OFFSET);
    usize::try_from(length).map_err(|_| VmError::HeapCorruption {
        address: object.address(),
        detail: format!("negative array length {}", length),
    })
}

/// Sets the length of a fresh array.
pub fn write_array_length(object: &ObjectRef, length: usize) {
    object.data().write_i32(ARRAY_LENGTH_OFFSET, length as i32);
}

/// Reads a reference slot, resolving the stored address.
pub fn read_reference(
    object: &ObjectRef,
    offset: usize,
    allocator: &dyn MemoryAllocator,
) -> Result<Option<ObjectRef>, VmError> {
    let width = allocator.address_width();
    check_span(object, offset, width.bytes())?;
    let address = object.data().read_address(offset, width);
    if address == 0 {
        return Ok(None);
    }
    allocator
        .resolve(address)
        .map(|block| Some(ObjectRef::new(block)))
        .ok_or_else(|| VmError::HeapCorruption {
            address: object.address(),
            detail: format!("dangling reference {:#x} at offset {}", address, offset),
        })
}

/// Stores a reference slot.
pub fn write_reference(
    object: &ObjectRef,
    offset: usize,
    target: Option<&ObjectRef>,
    width: AddressWidth,
) -> Result<(), VmError> {
    check_span(object, offset, width.bytes())?;
    let address = target.map(ObjectRef::address).unwrap_or(0);
    object.data().write_address(offset, address, width);
    Ok(())
}

/// Reads a field or element of `kind`. Narrow integral kinds are widened
/// to `Value::Int` the way loads push them.
pub fn read_value(
    object: &ObjectRef,
    offset: usize,
    kind: FieldKind,
    allocator: &dyn MemoryAllocator,
) -> Result<Value, VmError> {
    if kind == FieldKind::Reference {
        return read_reference(object, offset, allocator).map(Value::from_object);
    }
    check_span(object, offset, kind.size(allocator.address_width()))?;
    let data = object.data();
    Ok(match kind {
        FieldKind::Boolean => Value::Int(data.read_u8(offset) as i32),
        FieldKind::Byte => Value::Int(data.read_i8(offset) as i32),
        FieldKind::Char => Value::Int(data.read_u16(offset) as i32),
        FieldKind::Short => Value::Int(data.read_i16(offset) as i32),
        FieldKind::Int => Value::Int(data.read_i32(offset)),
        FieldKind::Long => Value::Long(data.read_i64(offset)),
        FieldKind::Float => Value::Float(data.read_f32(offset)),
        FieldKind::Double => Value::Double(data.read_f64(offset)),
        FieldKind::Reference => Value::Null,
    })
}

/// Writes a field or element of `kind`, narrowing int values to the
/// storage width. A value of the wrong computational type is an invariant
/// violation.
pub fn write_value(
    object: &ObjectRef,
    offset: usize,
    kind: FieldKind,
    value: &Value,
    width: AddressWidth,
) -> Result<(), VmError> {
    let mismatch = || {
        VmError::Internal(format!(
            "cannot store {} into a {:?} slot",
            value.type_name(),
            kind
        ))
    };
    if kind == FieldKind::Reference {
        let target = value.as_reference().ok_or_else(mismatch)?;
        return write_reference(object, offset, target, width);
    }
    check_span(object, offset, kind.size(width))?;
    let data = object.data();
    match kind {
        FieldKind::Boolean => data.write_u8(offset, (value.as_int().ok_or_else(mismatch)? & 1) as u8),
        FieldKind::Byte => data.write_i8(offset, value.as_int().ok_or_else(mismatch)? as i8),
        FieldKind::Char => data.write_u16(offset, value.as_int().ok_or_else(mismatch)? as u16),
        FieldKind::Short => data.write_i16(offset, value.as_int().ok_or_else(mismatch)? as i16),
        FieldKind::Int => data.write_i32(offset, value.as_int().ok_or_else(mismatch)?),
        FieldKind::Long => data.write_i64(offset, value.as_long().ok_or_else(mismatch)?),
        FieldKind::Float => data.write_f32(offset, value.as_float().ok_or_else(mismatch)?),
        FieldKind::Double => data.write_f64(offset, value.as_double().ok_or_else(mismatch)?),
        FieldKind::Reference => {}
    }
    Ok(())
}
