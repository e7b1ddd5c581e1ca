//! Class-file structure: parsing and serialization.

use std::fmt;
use std::ops::BitOr;

use log::trace;

use crate::bytes::{ByteReader, ByteWriter};
use crate::constant_pool::{Constant, ConstantPool};
use crate::error::{ClassFormatError, FormatResult};

/// Class-file magic number.
pub const MAGIC: u32 = 0xCAFE_BABE;

/// Major version written by the assembler (Java 8).
pub const DEFAULT_MAJOR_VERSION: u16 = 52;

/// Access and property flags of classes, fields and methods.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessFlags(pub u16);

impl AccessFlags {
    /// `ACC_PUBLIC`
    pub const PUBLIC: AccessFlags = AccessFlags(0x0001);
    /// `ACC_PRIVATE`
    pub const PRIVATE: AccessFlags = AccessFlags(0x0002);
    /// `ACC_PROTECTED`
    pub const PROTECTED: AccessFlags = AccessFlags(0x0004);
    /// `ACC_STATIC`
    pub const STATIC: AccessFlags = AccessFlags(0x0008);
    /// `ACC_FINAL`
    pub const FINAL: AccessFlags = AccessFlags(0x0010);
    /// `ACC_SYNCHRONIZED` on methods, `ACC_SUPER` on classes
    pub const SYNCHRONIZED: AccessFlags = AccessFlags(0x0020);
    /// `ACC_SUPER`
    pub const SUPER: AccessFlags = AccessFlags(0x0020);
    /// `ACC_VOLATILE`
    pub const VOLATILE: AccessFlags = AccessFlags(0x0040);
    /// `ACC_TRANSIENT`
    pub const TRANSIENT: AccessFlags = AccessFlags(0x0080);
    /// `ACC_NATIVE`
    pub const NATIVE: AccessFlags = AccessFlags(0x0100);
    /// `ACC_INTERFACE`
    pub const INTERFACE: AccessFlags = AccessFlags(0x0200);
    /// `ACC_ABSTRACT`
    pub const ABSTRACT: AccessFlags = AccessFlags(0x0400);

    /// No flags.
    pub const fn empty() -> Self {
        AccessFlags(0)
    }

    /// True if every bit of `other` is set.
    pub fn contains(self, other: AccessFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// `ACC_STATIC`
    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    /// `ACC_NATIVE`
    pub fn is_native(self) -> bool {
        self.contains(Self::NATIVE)
    }

    /// `ACC_ABSTRACT`
    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    /// `ACC_SYNCHRONIZED`
    pub fn is_synchronized(self) -> bool {
        self.contains(Self::SYNCHRONIZED)
    }

    /// `ACC_INTERFACE`
    pub fn is_interface(self) -> bool {
        self.contains(Self::INTERFACE)
    }

    /// `ACC_PRIVATE`
    pub fn is_private(self) -> bool {
        self.contains(Self::PRIVATE)
    }

    /// `ACC_PUBLIC`
    pub fn is_public(self) -> bool {
        self.contains(Self::PUBLIC)
    }

    /// `ACC_FINAL`
    pub fn is_final(self) -> bool {
        self.contains(Self::FINAL)
    }
}

impl BitOr for AccessFlags {
    type Output = AccessFlags;

    fn bitor(self, rhs: AccessFlags) -> AccessFlags {
        AccessFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for AccessFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessFlags({:#06x})", self.0)
    }
}

/// One exception table entry. Offsets are bytecode offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of the protected range (inclusive)
    pub start_pc: u16,
    /// End of the protected range (exclusive)
    pub end_pc: u16,
    /// Handler entry point
    pub handler_pc: u16,
    /// Class constant of the caught type; 0 catches everything
    pub catch_type: u16,
}

/// One `LineNumberTable` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    /// First bytecode offset of the line
    pub start_pc: u16,
    /// Source line
    pub line: u16,
}

/// The `Code` attribute of a method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeAttribute {
    /// Operand stack depth in slots
    pub max_stack: u16,
    /// Local variable slots, parameters included
    pub max_locals: u16,
    /// Raw bytecode
    pub code: Vec<u8>,
    /// Handlers in declaration order
    pub exception_table: Vec<ExceptionHandler>,
    /// Line table, possibly empty
    pub line_numbers: Vec<LineNumber>,
}

impl CodeAttribute {
    /// Source line covering bytecode `offset`.
    pub fn line_at(&self, offset: usize) -> Option<u16> {
        self.line_numbers
            .iter()
            .filter(|entry| entry.start_pc as usize <= offset)
            .max_by_key(|entry| entry.start_pc)
            .map(|entry| entry.line)
    }
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Flags
    pub access: AccessFlags,
    /// Simple name
    pub name: String,
    /// Field descriptor
    pub descriptor: String,
    /// `ConstantValue` pool index for static finals
    pub constant_value: Option<u16>,
}

/// A method declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Flags
    pub access: AccessFlags,
    /// Simple name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Body; absent for native and abstract methods
    pub code: Option<CodeAttribute>,
}

/// A parsed class file.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version
    pub major_version: u16,
    /// Constant pool
    pub constant_pool: ConstantPool,
    /// Class flags
    pub access: AccessFlags,
    /// Internal name of this class
    pub this_class: String,
    /// Internal name of the superclass; `None` only for the root class
    pub super_class: Option<String>,
    /// Direct superinterfaces
    pub interfaces: Vec<String>,
    /// Declared fields
    pub fields: Vec<FieldInfo>,
    /// Declared methods
    pub methods: Vec<MethodInfo>,
    /// `SourceFile` attribute
    pub source_file: Option<String>,
}

impl ClassFile {
    /// Parses class-file bytes. Unknown attributes are skipped.
    pub fn parse(bytes: &[u8]) -> FormatResult<ClassFile> {
        let mut reader = ByteReader::new(bytes);
        let magic = reader.u4()?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let minor_version = reader.u2()?;
        let major_version = reader.u2()?;
        let constant_pool = ConstantPool::parse(&mut reader)?;
        let access = AccessFlags(reader.u2()?);
        let this_class = constant_pool.class_name(reader.u2()?)?.to_string();
        let super_index = reader.u2()?;
        let super_class = if super_index == 0 {
            None
        } else {
            Some(constant_pool.class_name(super_index)?.to_string())
        };

        let interface_count = reader.u2()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(constant_pool.class_name(reader.u2()?)?.to_string());
        }

        let field_count = reader.u2()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(parse_field(&mut reader, &constant_pool)?);
        }

        let method_count = reader.u2()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(parse_method(&mut reader, &constant_pool)?);
        }

        let mut source_file = None;
        let attribute_count = reader.u2()?;
        for _ in 0..attribute_count {
            let name = constant_pool.utf8(reader.u2()?)?;
            let length = reader.u4()? as usize;
            if name == "SourceFile" {
                source_file = Some(constant_pool.utf8(reader.u2()?)?.to_string());
            } else {
                reader.skip(length)?;
            }
        }

        trace!(
            "parsed class {} ({} fields, {} methods)",
            this_class,
            fields.len(),
            methods.len()
        );

        Ok(ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            source_file,
        })
    }

    /// Serializes to class-file bytes. Names missing from the pool are
    /// interned into a copy of it.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut pool = self.constant_pool.clone();
        let this_class = pool.class_index(&self.this_class);
        let super_class = self
            .super_class
            .as_deref()
            .map(|name| pool.class_index(name))
            .unwrap_or(0);
        let interfaces: Vec<u16> = self.interfaces.iter().map(|i| pool.class_index(i)).collect();

        let mut body = ByteWriter::new();
        body.u2(self.access.0);
        body.u2(this_class);
        body.u2(super_class);
        body.u2(interfaces.len() as u16);
        for index in interfaces {
            body.u2(index);
        }

        body.u2(self.fields.len() as u16);
        for field in &self.fields {
            body.u2(field.access.0);
            body.u2(pool.utf8_index(&field.name));
            body.u2(pool.utf8_index(&field.descriptor));
            match field.constant_value {
                Some(index) => {
                    body.u2(1);
                    body.u2(pool.utf8_index("ConstantValue"));
                    body.u4(2);
                    body.u2(index);
                }
                None => body.u2(0),
            }
        }

        body.u2(self.methods.len() as u16);
        for method in &self.methods {
            body.u2(method.access.0);
            body.u2(pool.utf8_index(&method.name));
            body.u2(pool.utf8_index(&method.descriptor));
            match &method.code {
                Some(code) => {
                    body.u2(1);
                    write_code(&mut body, &mut pool, code);
                }
                None => body.u2(0),
            }
        }

        match &self.source_file {
            Some(file) => {
                body.u2(1);
                body.u2(pool.utf8_index("SourceFile"));
                body.u4(2);
                body.u2(pool.utf8_index(file));
            }
            None => body.u2(0),
        }

        let mut out = ByteWriter::new();
        out.u4(MAGIC);
        out.u2(self.minor_version);
        out.u2(self.major_version);
        pool.write(&mut out);
        out.bytes(&body.into_bytes());
        out.into_bytes()
    }

    /// Method declared with `name` and `descriptor`.
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Field declared with `name`.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }
}

fn write_code(body: &mut ByteWriter, pool: &mut ConstantPool, code: &CodeAttribute) {
    let code_name = pool.utf8_index("Code");
    let lines_name = if code.line_numbers.is_empty() {
        None
    } else {
        Some(pool.utf8_index("LineNumberTable"))
    };

    let mut attr = ByteWriter::new();
    attr.u2(code.max_stack);
    attr.u2(code.max_locals);
    attr.u4(code.code.len() as u32);
    attr.bytes(&code.code);
    attr.u2(code.exception_table.len() as u16);
    for handler in &code.exception_table {
        attr.u2(handler.start_pc);
        attr.u2(handler.end_pc);
        attr.u2(handler.handler_pc);
        attr.u2(handler.catch_type);
    }
    match lines_name {
        Some(name) => {
            attr.u2(1);
            attr.u2(name);
            attr.u4(2 + 4 * code.line_numbers.len() as u32);
            attr.u2(code.line_numbers.len() as u16);
            for entry in &code.line_numbers {
                attr.u2(entry.start_pc);
                attr.u2(entry.line);
            }
        }
        None => attr.u2(0),
    }

    let attr = attr.into_bytes();
    body.u2(code_name);
    body.u4(attr.len() as u32);
    body.bytes(&attr);
}

fn parse_field(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> FormatResult<FieldInfo> {
    let access = AccessFlags(reader.u2()?);
    let name = pool.utf8(reader.u2()?)?.to_string();
    let descriptor = pool.utf8(reader.u2()?)?.to_string();
    let mut constant_value = None;
    let attribute_count = reader.u2()?;
    for _ in 0..attribute_count {
        let attr_name = pool.utf8(reader.u2()?)?;
        let length = reader.u4()? as usize;
        if attr_name == "ConstantValue" {
            let index = reader.u2()?;
            match pool.get(index)? {
                Constant::Integer(_)
                | Constant::Float(_)
                | Constant::Long(_)
                | Constant::Double(_)
                | Constant::String(_) => constant_value = Some(index),
                _ => {
                    return Err(ClassFormatError::BadConstant {
                        index,
                        expected: "constant value",
                    })
                }
            }
        } else {
            reader.skip(length)?;
        }
    }
    Ok(FieldInfo {
        access,
        name,
        descriptor,
        constant_value,
    })
}

fn parse_method(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> FormatResult<MethodInfo> {
    let access = AccessFlags(reader.u2()?);
    let name = pool.utf8(reader.u2()?)?.to_string();
    let descriptor = pool.utf8(reader.u2()?)?.to_string();
    let mut code = None;
    let attribute_count = reader.u2()?;
    for _ in 0..attribute_count {
        let attr_name = pool.utf8(reader.u2()?)?;
        let length = reader.u4()? as usize;
        if attr_name == "Code" {
            code = Some(parse_code(reader, pool)?);
        } else {
            reader.skip(length)?;
        }
    }
    Ok(MethodInfo {
        access,
        name,
        descriptor,
        code,
    })
}

fn parse_code(reader: &mut ByteReader<'_>, pool: &ConstantPool) -> FormatResult<CodeAttribute> {
    let max_stack = reader.u2()?;
    let max_locals = reader.u2()?;
    let code_length = reader.u4()? as usize;
    let code = reader.read_bytes(code_length)?.to_vec();

    let handler_count = reader.u2()?;
    let mut exception_table = Vec::with_capacity(handler_count as usize);
    for _ in 0..handler_count {
        exception_table.push(ExceptionHandler {
            start_pc: reader.u2()?,
            end_pc: reader.u2()?,
            handler_pc: reader.u2()?,
            catch_type: reader.u2()?,
        });
    }

    let mut line_numbers = Vec::new();
    let attribute_count = reader.u2()?;
    for _ in 0..attribute_count {
        let attr_name = pool.utf8(reader.u2()?)?;
        let length = reader.u4()? as usize;
        if attr_name == "LineNumberTable" {
            let count = reader.u2()?;
            for _ in 0..count {
                line_numbers.push(LineNumber {
                    start_pc: reader.u2()?,
                    line: reader.u2()?,
                });
            }
        } else {
            reader.skip(length)?;
        }
    }

    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_table,
        line_numbers,
    })
}
