//! Class-file constant pool.
//!
//! Entries are stored at their class-file indices; index 0 and the slot after
//! every long or double are [`Constant::Unusable`].

use crate::bytes::{decode_modified_utf8, encode_modified_utf8, ByteReader, ByteWriter};
use crate::error::{ClassFormatError, FormatResult};

/// Constant pool tags.
pub mod tag {
    #![allow(missing_docs)]
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELD_REF: u8 = 9;
    pub const METHOD_REF: u8 = 10;
    pub const INTERFACE_METHOD_REF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// One constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Placeholder for index 0 and the upper half of wide constants
    Unusable,
    /// Modified UTF-8 text
    Utf8(String),
    /// `int` literal
    Integer(i32),
    /// `float` literal
    Float(f32),
    /// `long` literal (occupies two indices)
    Long(i64),
    /// `double` literal (occupies two indices)
    Double(f64),
    /// Class reference (name index)
    Class(u16),
    /// String literal (utf8 index)
    String(u16),
    /// Field reference
    FieldRef {
        /// Class index
        class: u16,
        /// NameAndType index
        name_and_type: u16,
    },
    /// Class method reference
    MethodRef {
        /// Class index
        class: u16,
        /// NameAndType index
        name_and_type: u16,
    },
    /// Interface method reference
    InterfaceMethodRef {
        /// Class index
        class: u16,
        /// NameAndType index
        name_and_type: u16,
    },
    /// Name and descriptor pair
    NameAndType {
        /// Name index
        name: u16,
        /// Descriptor index
        descriptor: u16,
    },
    /// Method handle
    MethodHandle {
        /// Reference kind (1..=9)
        kind: u8,
        /// Referenced member index
        reference: u16,
    },
    /// Method type (descriptor index)
    MethodType(u16),
    /// Dynamically computed constant
    Dynamic {
        /// Bootstrap method attribute index
        bootstrap: u16,
        /// NameAndType index
        name_and_type: u16,
    },
    /// Dynamically computed call site
    InvokeDynamic {
        /// Bootstrap method attribute index
        bootstrap: u16,
        /// NameAndType index
        name_and_type: u16,
    },
    /// Module name (utf8 index)
    Module(u16),
    /// Package name (utf8 index)
    Package(u16),
}

impl Constant {
    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }

    /// Equality used for deduplication; floats compare by bits.
    fn same_as(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            (Constant::Unusable, _) | (_, Constant::Unusable) => false,
            _ => self == other,
        }
    }
}

/// A symbolic member reference resolved to strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    /// Internal name of the owning class
    pub class: String,
    /// Member name
    pub name: String,
    /// Member descriptor
    pub descriptor: String,
}

/// The constant pool of one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// Creates a pool containing only the reserved index 0.
    pub fn new() -> Self {
        ConstantPool {
            entries: vec![Constant::Unusable],
        }
    }

    /// Parses `constant_pool_count` and the entries that follow.
    pub fn parse(reader: &mut ByteReader<'_>) -> FormatResult<Self> {
        let count = reader.u2()?;
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(Constant::Unusable);
        let mut index: u16 = 1;
        while index < count {
            let tag = reader.u1()?;
            let constant = match tag {
                tag::UTF8 => {
                    let len = reader.u2()? as usize;
                    Constant::Utf8(decode_modified_utf8(reader.read_bytes(len)?)?)
                }
                tag::INTEGER => Constant::Integer(reader.i4()?),
                tag::FLOAT => Constant::Float(f32::from_bits(reader.u4()?)),
                tag::LONG => Constant::Long(reader.u8()? as i64),
                tag::DOUBLE => Constant::Double(f64::from_bits(reader.u8()?)),
                tag::CLASS => Constant::Class(reader.u2()?),
                tag::STRING => Constant::String(reader.u2()?),
                tag::FIELD_REF => Constant::FieldRef {
                    class: reader.u2()?,
                    name_and_type: reader.u2()?,
                },
                tag::METHOD_REF => Constant::MethodRef {
                    class: reader.u2()?,
                    name_and_type: reader.u2()?,
                },
                tag::INTERFACE_METHOD_REF => Constant::InterfaceMethodRef {
                    class: reader.u2()?,
                    name_and_type: reader.u2()?,
                },
                tag::NAME_AND_TYPE => Constant::NameAndType {
                    name: reader.u2()?,
                    descriptor: reader.u2()?,
                },
                tag::METHOD_HANDLE => Constant::MethodHandle {
                    kind: reader.u1()?,
                    reference: reader.u2()?,
                },
                tag::METHOD_TYPE => Constant::MethodType(reader.u2()?),
                tag::DYNAMIC => Constant::Dynamic {
                    bootstrap: reader.u2()?,
                    name_and_type: reader.u2()?,
                },
                tag::INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap: reader.u2()?,
                    name_and_type: reader.u2()?,
                },
                tag::MODULE => Constant::Module(reader.u2()?),
                tag::PACKAGE => Constant::Package(reader.u2()?),
                _ => return Err(ClassFormatError::UnknownTag { tag, index }),
            };
            let wide = constant.is_wide();
            entries.push(constant);
            index += 1;
            if wide {
                entries.push(Constant::Unusable);
                index += 1;
            }
        }
        Ok(ConstantPool { entries })
    }

    /// Writes `constant_pool_count` and every entry.
    pub fn write(&self, writer: &mut ByteWriter) {
        writer.u2(self.entries.len() as u16);
        for constant in &self.entries {
            match constant {
                Constant::Unusable => {}
                Constant::Utf8(text) => {
                    let bytes = encode_modified_utf8(text);
                    writer.u1(tag::UTF8);
                    writer.u2(bytes.len() as u16);
                    writer.bytes(&bytes);
                }
                Constant::Integer(v) => {
                    writer.u1(tag::INTEGER);
                    writer.u4(*v as u32);
                }
                Constant::Float(v) => {
                    writer.u1(tag::FLOAT);
                    writer.u4(v.to_bits());
                }
                Constant::Long(v) => {
                    writer.u1(tag::LONG);
                    writer.u8(*v as u64);
                }
                Constant::Double(v) => {
                    writer.u1(tag::DOUBLE);
                    writer.u8(v.to_bits());
                }
                Constant::Class(i) => {
                    writer.u1(tag::CLASS);
                    writer.u2(*i);
                }
                Constant::String(i) => {
                    writer.u1(tag::STRING);
                    writer.u2(*i);
                }
                Constant::FieldRef { class, name_and_type } => {
                    writer.u1(tag::FIELD_REF);
                    writer.u2(*class);
                    writer.u2(*name_and_type);
                }
                Constant::MethodRef { class, name_and_type } => {
                    writer.u1(tag::METHOD_REF);
                    writer.u2(*class);
                    writer.u2(*name_and_type);
                }
                Constant::InterfaceMethodRef { class, name_and_type } => {
                    writer.u1(tag::INTERFACE_METHOD_REF);
                    writer.u2(*class);
                    writer.u2(*name_and_type);
                }
                Constant::NameAndType { name, descriptor } => {
                    writer.u1(tag::NAME_AND_TYPE);
                    writer.u2(*name);
                    writer.u2(*descriptor);
                }
                Constant::MethodHandle { kind, reference } => {
                    writer.u1(tag::METHOD_HANDLE);
                    writer.u1(*kind);
                    writer.u2(*reference);
                }
                Constant::MethodType(i) => {
                    writer.u1(tag::METHOD_TYPE);
                    writer.u2(*i);
                }
                Constant::Dynamic { bootstrap, name_and_type } => {
                    writer.u1(tag::DYNAMIC);
                    writer.u2(*bootstrap);
                    writer.u2(*name_and_type);
                }
                Constant::InvokeDynamic { bootstrap, name_and_type } => {
                    writer.u1(tag::INVOKE_DYNAMIC);
                    writer.u2(*bootstrap);
                    writer.u2(*name_and_type);
                }
                Constant::Module(i) => {
                    writer.u1(tag::MODULE);
                    writer.u2(*i);
                }
                Constant::Package(i) => {
                    writer.u1(tag::PACKAGE);
                    writer.u2(*i);
                }
            }
        }
    }

    /// Number of index slots, including index 0.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if only the reserved slot exists.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Entry at `index`.
    pub fn get(&self, index: u16) -> FormatResult<&Constant> {
        match self.entries.get(index as usize) {
            Some(Constant::Unusable) | None => Err(ClassFormatError::BadConstant {
                index,
                expected: "usable entry",
            }),
            Some(constant) => Ok(constant),
        }
    }

    /// Text of a `Utf8` entry.
    pub fn utf8(&self, index: u16) -> FormatResult<&str> {
        match self.get(index)? {
            Constant::Utf8(text) => Ok(text),
            _ => Err(ClassFormatError::BadConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// Internal name referenced by a `Class` entry.
    pub fn class_name(&self, index: u16) -> FormatResult<&str> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            _ => Err(ClassFormatError::BadConstant {
                index,
                expected: "Class",
            }),
        }
    }

    /// Name and descriptor of a `NameAndType` entry.
    pub fn name_and_type(&self, index: u16) -> FormatResult<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(ClassFormatError::BadConstant {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Resolves a field, method or interface method reference to strings.
    pub fn member_ref(&self, index: u16) -> FormatResult<MemberRef> {
        let (class, name_and_type) = match self.get(index)? {
            Constant::FieldRef { class, name_and_type }
            | Constant::MethodRef { class, name_and_type }
            | Constant::InterfaceMethodRef { class, name_and_type } => (*class, *name_and_type),
            _ => {
                return Err(ClassFormatError::BadConstant {
                    index,
                    expected: "member reference",
                })
            }
        };
        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok(MemberRef {
            class: self.class_name(class)?.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    /// Adds `constant` unless an identical entry exists; returns its index.
    pub fn intern(&mut self, constant: Constant) -> u16 {
        if let Some(index) = self.entries.iter().position(|c| c.same_as(&constant)) {
            return index as u16;
        }
        let index = self.entries.len() as u16;
        let wide = constant.is_wide();
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        index
    }

    /// Interns a `Utf8` entry.
    pub fn utf8_index(&mut self, text: &str) -> u16 {
        self.intern(Constant::Utf8(text.to_string()))
    }

    /// Interns a `Class` entry.
    pub fn class_index(&mut self, name: &str) -> u16 {
        let name = self.utf8_index(name);
        self.intern(Constant::Class(name))
    }

    /// Interns a `String` entry.
    pub fn string_index(&mut self, text: &str) -> u16 {
        let utf8 = self.utf8_index(text);
        self.intern(Constant::String(utf8))
    }

    /// Interns a `NameAndType` entry.
    pub fn name_and_type_index(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8_index(name);
        let descriptor = self.utf8_index(descriptor);
        self.intern(Constant::NameAndType { name, descriptor })
    }

    /// Interns a `FieldRef` entry.
    pub fn field_ref_index(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class_index(class);
        let name_and_type = self.name_and_type_index(name, descriptor);
        self.intern(Constant::FieldRef { class, name_and_type })
    }

    /// Interns a `MethodRef` entry.
    pub fn method_ref_index(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class_index(class);
        let name_and_type = self.name_and_type_index(name, descriptor);
        self.intern(Constant::MethodRef { class, name_and_type })
    }

    /// Interns an `InterfaceMethodRef` entry.
    pub fn interface_method_ref_index(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class_index(class);
        let name_and_type = self.name_and_type_index(name, descriptor);
        self.intern(Constant::InterfaceMethodRef { class, name_and_type })
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}
