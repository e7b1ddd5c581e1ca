//! Class assembler.
//!
//! [`ClassBuilder`] produces [`ClassFile`]s in memory. It is how the boot
//! image is made and how tests write guest code without a compiler.
//!
//! # Example
//!
//! ```
//! use bytecode_system::{AccessFlags, ClassBuilder, ClassFile, Opcode, ValueKind};
//!
//! let mut class = ClassBuilder::new("demo/Math");
//! let mut add = class.method(AccessFlags::PUBLIC | AccessFlags::STATIC, "add", "(II)I");
//! add.load(ValueKind::Int, 0)
//!     .load(ValueKind::Int, 1)
//!     .op(Opcode::Iadd)
//!     .op(Opcode::Ireturn)
//!     .maxs(2, 2);
//! add.finish().unwrap();
//!
//! let bytes = class.to_bytes();
//! let parsed = ClassFile::parse(&bytes).unwrap();
//! assert!(parsed.method("add", "(II)I").is_some());
//! ```

use crate::bytes::ByteWriter;
use crate::class_file::{
    AccessFlags, ClassFile, CodeAttribute, ExceptionHandler, FieldInfo, LineNumber, MethodInfo,
    DEFAULT_MAJOR_VERSION,
};
use crate::constant_pool::{Constant, ConstantPool};
use crate::descriptor::MethodDescriptor;
use crate::error::{ClassFormatError, FormatResult};
use crate::instruction::{ArrayKind, ValueKind};
use crate::opcode::Opcode;

/// A position in the code under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Builds one class.
#[derive(Debug)]
pub struct ClassBuilder {
    pool: ConstantPool,
    access: AccessFlags,
    name: String,
    super_class: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
    source_file: Option<String>,
}

impl ClassBuilder {
    /// Starts a public class extending `java/lang/Object`.
    pub fn new(name: &str) -> Self {
        Self {
            pool: ConstantPool::new(),
            access: AccessFlags::PUBLIC | AccessFlags::SUPER,
            name: name.to_string(),
            super_class: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        }
    }

    /// Sets the superclass; `None` declares a root class.
    pub fn extends(&mut self, super_class: Option<&str>) -> &mut Self {
        self.super_class = super_class.map(str::to_string);
        self
    }

    /// Adds a direct superinterface.
    pub fn implements(&mut self, interface: &str) -> &mut Self {
        self.interfaces.push(interface.to_string());
        self
    }

    /// Replaces the class flags.
    pub fn access(&mut self, access: AccessFlags) -> &mut Self {
        self.access = access;
        self
    }

    /// Marks the class as an interface.
    pub fn interface(&mut self) -> &mut Self {
        self.access = AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT;
        self
    }

    /// Sets the `SourceFile` attribute.
    pub fn source_file(&mut self, file: &str) -> &mut Self {
        self.source_file = Some(file.to_string());
        self
    }

    /// Declares a field.
    pub fn field(&mut self, access: AccessFlags, name: &str, descriptor: &str) -> &mut Self {
        self.fields.push(FieldInfo {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            constant_value: None,
        });
        self
    }

    /// Declares a static field with a `ConstantValue` attribute.
    pub fn constant_field(
        &mut self,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        value: ConstantValue<'_>,
    ) -> &mut Self {
        let index = match value {
            ConstantValue::Int(v) => self.pool.intern(Constant::Integer(v)),
            ConstantValue::Long(v) => self.pool.intern(Constant::Long(v)),
            ConstantValue::Float(v) => self.pool.intern(Constant::Float(v)),
            ConstantValue::Double(v) => self.pool.intern(Constant::Double(v)),
            ConstantValue::String(v) => self.pool.string_index(v),
        };
        self.fields.push(FieldInfo {
            access: access | AccessFlags::STATIC,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            constant_value: Some(index),
        });
        self
    }

    /// Declares a method without a body (native or abstract).
    pub fn declare_method(&mut self, access: AccessFlags, name: &str, descriptor: &str) -> &mut Self {
        self.methods.push(MethodInfo {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: None,
        });
        self
    }

    /// Starts a method with a body. Call [`MethodBuilder::finish`] to add it.
    pub fn method(&mut self, access: AccessFlags, name: &str, descriptor: &str) -> MethodBuilder<'_> {
        MethodBuilder {
            class: self,
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: ByteWriter::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            lines: Vec::new(),
            max_stack: 0,
            max_locals: 0,
            error: None,
        }
    }

    /// Mutable access to the pool, for constants used by raw code.
    pub fn pool_mut(&mut self) -> &mut ConstantPool {
        &mut self.pool
    }

    /// Finishes the class.
    pub fn build(&self) -> ClassFile {
        let mut pool = self.pool.clone();
        pool.class_index(&self.name);
        ClassFile {
            minor_version: 0,
            major_version: DEFAULT_MAJOR_VERSION,
            constant_pool: pool,
            access: self.access,
            this_class: self.name.clone(),
            super_class: self.super_class.clone(),
            interfaces: self.interfaces.clone(),
            fields: self.fields.clone(),
            methods: self.methods.clone(),
            source_file: self.source_file.clone(),
        }
    }

    /// Finishes the class and serializes it.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.build().to_bytes()
    }
}

/// Literal of a `ConstantValue` attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstantValue<'a> {
    /// int, short, char, byte or boolean
    Int(i32),
    /// long
    Long(i64),
    /// float
    Float(f32),
    /// double
    Double(f64),
    /// String
    String(&'a str),
}

#[derive(Debug, Clone, Copy)]
enum FixupWidth {
    /// 16-bit branch offset
    Short,
    /// 32-bit branch or switch offset
    Wide,
}

#[derive(Debug)]
struct Fixup {
    opcode_at: usize,
    patch_at: usize,
    label: Label,
    width: FixupWidth,
}

/// Builds one method body. Offsets of branches and handlers are resolved
/// from labels in [`MethodBuilder::finish`].
#[derive(Debug)]
pub struct MethodBuilder<'a> {
    class: &'a mut ClassBuilder,
    access: AccessFlags,
    name: String,
    descriptor: String,
    code: ByteWriter,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    handlers: Vec<(Label, Label, Label, u16)>,
    lines: Vec<LineNumber>,
    max_stack: u16,
    max_locals: u16,
    error: Option<ClassFormatError>,
}

impl<'a> MethodBuilder<'a> {
    /// Current bytecode offset.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Creates an unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current offset.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        let offset = self.offset();
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(offset);
        }
        self
    }

    /// Sets the operand stack and local variable sizes.
    pub fn maxs(&mut self, max_stack: u16, max_locals: u16) -> &mut Self {
        self.max_stack = max_stack;
        self.max_locals = max_locals;
        self
    }

    /// Starts a source line at the current offset.
    pub fn line(&mut self, line: u16) -> &mut Self {
        let start_pc = self.offset() as u16;
        self.lines.push(LineNumber { start_pc, line });
        self
    }

    /// Emits an operand-less opcode.
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.code.u1(opcode.byte());
        self
    }

    /// Emits raw bytes.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.bytes(bytes);
        self
    }

    /// Pushes an int constant using the shortest encoding.
    pub fn iconst(&mut self, value: i32) -> &mut Self {
        match value {
            -1..=5 => {
                self.code
                    .u1((Opcode::Iconst0.byte() as i32 + value) as u8);
            }
            -128..=127 => {
                self.code.u1(Opcode::Bipush.byte());
                self.code.u1(value as i8 as u8);
            }
            -32768..=32767 => {
                self.code.u1(Opcode::Sipush.byte());
                self.code.u2(value as i16 as u16);
            }
            _ => {
                let index = self.class.pool.intern(Constant::Integer(value));
                self.ldc_index(index);
            }
        }
        self
    }

    /// Pushes a long constant.
    pub fn lconst(&mut self, value: i64) -> &mut Self {
        match value {
            0 => self.op(Opcode::Lconst0),
            1 => self.op(Opcode::Lconst1),
            _ => {
                let index = self.class.pool.intern(Constant::Long(value));
                self.code.u1(Opcode::Ldc2W.byte());
                self.code.u2(index);
                self
            }
        }
    }

    /// Pushes a float constant.
    pub fn fconst(&mut self, value: f32) -> &mut Self {
        if value.to_bits() == 0.0f32.to_bits() {
            self.op(Opcode::Fconst0)
        } else if value == 1.0 {
            self.op(Opcode::Fconst1)
        } else if value == 2.0 {
            self.op(Opcode::Fconst2)
        } else {
            let index = self.class.pool.intern(Constant::Float(value));
            self.ldc_index(index)
        }
    }

    /// Pushes a double constant.
    pub fn dconst(&mut self, value: f64) -> &mut Self {
        if value.to_bits() == 0.0f64.to_bits() {
            self.op(Opcode::Dconst0)
        } else if value == 1.0 {
            self.op(Opcode::Dconst1)
        } else {
            let index = self.class.pool.intern(Constant::Double(value));
            self.code.u1(Opcode::Ldc2W.byte());
            self.code.u2(index);
            self
        }
    }

    /// Pushes a string literal.
    pub fn ldc_string(&mut self, text: &str) -> &mut Self {
        let index = self.class.pool.string_index(text);
        self.ldc_index(index)
    }

    /// Pushes a class literal.
    pub fn ldc_class(&mut self, name: &str) -> &mut Self {
        let index = self.class.pool.class_index(name);
        self.ldc_index(index)
    }

    fn ldc_index(&mut self, index: u16) -> &mut Self {
        if index <= u8::MAX as u16 {
            self.code.u1(Opcode::Ldc.byte());
            self.code.u1(index as u8);
        } else {
            self.code.u1(Opcode::LdcW.byte());
            self.code.u2(index);
        }
        self
    }

    /// Loads a local, choosing the short or wide form.
    pub fn load(&mut self, kind: ValueKind, index: u16) -> &mut Self {
        self.local_op(Opcode::Iload, Opcode::Iload0, kind, index)
    }

    /// Stores a local, choosing the short or wide form.
    pub fn store(&mut self, kind: ValueKind, index: u16) -> &mut Self {
        self.local_op(Opcode::Istore, Opcode::Istore0, kind, index)
    }

    fn local_op(&mut self, base: Opcode, short_base: Opcode, kind: ValueKind, index: u16) -> &mut Self {
        let k = match kind {
            ValueKind::Int => 0,
            ValueKind::Long => 1,
            ValueKind::Float => 2,
            ValueKind::Double => 3,
            ValueKind::Reference => 4,
        };
        if index < 4 {
            self.code.u1(short_base.byte() + k * 4 + index as u8);
        } else if index <= u8::MAX as u16 {
            self.code.u1(base.byte() + k);
            self.code.u1(index as u8);
        } else {
            self.code.u1(Opcode::Wide.byte());
            self.code.u1(base.byte() + k);
            self.code.u2(index);
        }
        self
    }

    /// Increments an int local.
    pub fn iinc(&mut self, index: u16, delta: i16) -> &mut Self {
        if index <= u8::MAX as u16 && (-128..=127).contains(&delta) {
            self.code.u1(Opcode::Iinc.byte());
            self.code.u1(index as u8);
            self.code.u1(delta as i8 as u8);
        } else {
            self.code.u1(Opcode::Wide.byte());
            self.code.u1(Opcode::Iinc.byte());
            self.code.u2(index);
            self.code.u2(delta as u16);
        }
        self
    }

    /// Emits a branch instruction to `label`. `goto_w`/`jsr_w` take a
    /// 32-bit offset, the others 16 bits.
    pub fn branch(&mut self, opcode: Opcode, label: Label) -> &mut Self {
        let opcode_at = self.offset();
        self.code.u1(opcode.byte());
        let width = if matches!(opcode, Opcode::GotoW | Opcode::JsrW) {
            self.code.u4(0);
            FixupWidth::Wide
        } else {
            if !opcode.is_short_branch() {
                self.fail(ClassFormatError::BadOperand {
                    offset: opcode_at,
                    detail: format!("{} is not a branch", opcode),
                });
            }
            self.code.u2(0);
            FixupWidth::Short
        };
        self.fixups.push(Fixup {
            opcode_at,
            patch_at: opcode_at + 1,
            label,
            width,
        });
        self
    }

    /// Unconditional jump.
    pub fn goto(&mut self, label: Label) -> &mut Self {
        self.branch(Opcode::Goto, label)
    }

    /// Emits `getstatic`, `putstatic`, `getfield` or `putfield`.
    pub fn field(&mut self, opcode: Opcode, class: &str, name: &str, descriptor: &str) -> &mut Self {
        let index = self.class.pool.field_ref_index(class, name, descriptor);
        self.code.u1(opcode.byte());
        self.code.u2(index);
        self
    }

    /// Emits an invoke instruction. `invokeinterface` gets an interface
    /// method reference and its argument count.
    pub fn invoke(&mut self, opcode: Opcode, class: &str, name: &str, descriptor: &str) -> &mut Self {
        if opcode == Opcode::Invokeinterface {
            let count = match MethodDescriptor::parse(descriptor) {
                Ok(parsed) => parsed.parameter_slots() + 1,
                Err(error) => {
                    self.fail(error);
                    1
                }
            };
            let index = self
                .class
                .pool
                .interface_method_ref_index(class, name, descriptor);
            self.code.u1(opcode.byte());
            self.code.u2(index);
            self.code.u1(count as u8);
            self.code.u1(0);
        } else {
            let index = self.class.pool.method_ref_index(class, name, descriptor);
            self.code.u1(opcode.byte());
            self.code.u2(index);
        }
        self
    }

    /// Emits `new`, `anewarray`, `checkcast` or `instanceof`.
    pub fn type_op(&mut self, opcode: Opcode, class: &str) -> &mut Self {
        let index = self.class.pool.class_index(class);
        self.code.u1(opcode.byte());
        self.code.u2(index);
        self
    }

    /// Emits `newarray` for a primitive element kind.
    pub fn newarray(&mut self, kind: ArrayKind) -> &mut Self {
        match kind.atype() {
            Some(atype) => {
                self.code.u1(Opcode::Newarray.byte());
                self.code.u1(atype);
            }
            None => {
                let offset = self.offset();
                self.fail(ClassFormatError::BadOperand {
                    offset,
                    detail: "newarray of references".to_string(),
                });
            }
        }
        self
    }

    /// Emits `multianewarray`.
    pub fn multianewarray(&mut self, descriptor: &str, dimensions: u8) -> &mut Self {
        let index = self.class.pool.class_index(descriptor);
        self.code.u1(Opcode::Multianewarray.byte());
        self.code.u2(index);
        self.code.u1(dimensions);
        self
    }

    fn switch_padding(&mut self, opcode_at: usize) {
        for _ in 0..(4 - (opcode_at + 1) % 4) % 4 {
            self.code.u1(0);
        }
    }

    fn wide_fixup(&mut self, opcode_at: usize, label: Label) {
        let patch_at = self.offset();
        self.code.u4(0);
        self.fixups.push(Fixup {
            opcode_at,
            patch_at,
            label,
            width: FixupWidth::Wide,
        });
    }

    /// Emits `tableswitch` over `low..low + targets.len()`.
    pub fn table_switch(&mut self, low: i32, default: Label, targets: &[Label]) -> &mut Self {
        let opcode_at = self.offset();
        self.code.u1(Opcode::Tableswitch.byte());
        self.switch_padding(opcode_at);
        self.wide_fixup(opcode_at, default);
        let high = low as i64 + targets.len() as i64 - 1;
        self.code.u4(low as u32);
        self.code.u4(high as i32 as u32);
        for target in targets {
            self.wide_fixup(opcode_at, *target);
        }
        self
    }

    /// Emits `lookupswitch`; pairs are sorted by key.
    pub fn lookup_switch(&mut self, default: Label, pairs: &[(i32, Label)]) -> &mut Self {
        let opcode_at = self.offset();
        self.code.u1(Opcode::Lookupswitch.byte());
        self.switch_padding(opcode_at);
        self.wide_fixup(opcode_at, default);
        let mut sorted = pairs.to_vec();
        sorted.sort_by_key(|(key, _)| *key);
        self.code.u4(sorted.len() as u32);
        for (key, target) in sorted {
            self.code.u4(key as u32);
            self.wide_fixup(opcode_at, target);
        }
        self
    }

    /// Adds an exception table entry. `catch_type` of `None` catches
    /// everything.
    pub fn try_catch(&mut self, start: Label, end: Label, handler: Label, catch_type: Option<&str>) -> &mut Self {
        let catch_index = catch_type
            .map(|name| self.class.pool.class_index(name))
            .unwrap_or(0);
        self.handlers.push((start, end, handler, catch_index));
        self
    }

    fn fail(&mut self, error: ClassFormatError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn resolve(&self, label: Label) -> FormatResult<usize> {
        self.labels
            .get(label.0)
            .copied()
            .flatten()
            .ok_or(ClassFormatError::UnboundLabel(label.0))
    }

    /// Resolves labels and adds the method to its class.
    pub fn finish(mut self) -> FormatResult<()> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }

        let mut code = std::mem::take(&mut self.code);
        for fixup in &self.fixups {
            let target = self.resolve(fixup.label)?;
            let delta = target as i64 - fixup.opcode_at as i64;
            match fixup.width {
                FixupWidth::Short => {
                    let delta = i16::try_from(delta).map_err(|_| ClassFormatError::BranchOutOfRange {
                        from: fixup.opcode_at,
                        to: target,
                    })?;
                    code.patch_u2(fixup.patch_at, delta as u16);
                }
                FixupWidth::Wide => code.patch_u4(fixup.patch_at, delta as i32 as u32),
            }
        }

        let mut exception_table = Vec::with_capacity(self.handlers.len());
        for (start, end, handler, catch_type) in &self.handlers {
            exception_table.push(ExceptionHandler {
                start_pc: self.resolve(*start)? as u16,
                end_pc: self.resolve(*end)? as u16,
                handler_pc: self.resolve(*handler)? as u16,
                catch_type: *catch_type,
            });
        }

        let method = MethodInfo {
            access: self.access,
            name: std::mem::take(&mut self.name),
            descriptor: std::mem::take(&mut self.descriptor),
            code: Some(CodeAttribute {
                max_stack: self.max_stack,
                max_locals: self.max_locals,
                code: code.into_bytes(),
                exception_table,
                line_numbers: std::mem::take(&mut self.lines),
            }),
        };
        self.class.methods.push(method);
        Ok(())
    }
}
