//! Field layout and virtual table construction.
//!
//! New instance fields go after the superclass's instance size, in
//! declaration order, each aligned to its own size. Inherited offsets are
//! never moved. Statics get an independent region starting at zero.

use std::sync::Arc;

use core_types::AddressWidth;

use crate::member::{FieldKind, JavaMethod};

/// Offsets assigned to a run of fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    /// Offset of each field, in input order
    pub offsets: Vec<usize>,
    /// End of the last field
    pub size: usize,
}

/// Lays out fields of `kinds` starting at `base`.
///
/// # Example
///
/// ```
/// use class_linker::{layout_fields, FieldKind};
/// use core_types::AddressWidth;
///
/// let layout = layout_fields(8, &[FieldKind::Byte, FieldKind::Long, FieldKind::Short], AddressWidth::W64);
/// assert_eq!(layout.offsets, vec![8, 16, 24]);
/// assert_eq!(layout.size, 26);
/// ```
pub fn layout_fields(base: usize, kinds: &[FieldKind], width: AddressWidth) -> FieldLayout {
    let mut cursor = base;
    let mut offsets = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let size = kind.size(width);
        cursor = (cursor + size - 1) / size * size;
        offsets.push(cursor);
        cursor += size;
    }
    FieldLayout {
        offsets,
        size: cursor,
    }
}

/// Methods that take a virtual table slot.
pub fn is_virtual(static_: bool, private: bool, name: &str) -> bool {
    !static_ && !private && name != "<init>" && name != "<clinit>"
}

/// Slot for each declared method: the overridden superclass slot, a fresh
/// slot appended after the inherited table, or `None` for non-virtual
/// methods.
pub fn assign_slots(super_vtable: &[Arc<JavaMethod>], declared: &[(&str, &str, bool)]) -> Vec<Option<usize>> {
    let mut next = super_vtable.len();
    declared
        .iter()
        .map(|(name, descriptor, is_virtual)| {
            if !is_virtual {
                return None;
            }
            let inherited = super_vtable
                .iter()
                .position(|m| m.matches(name, descriptor));
            Some(inherited.unwrap_or_else(|| {
                next += 1;
                next - 1
            }))
        })
        .collect()
}
