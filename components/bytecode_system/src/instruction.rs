//! Decoded instructions.
//!
//! [`decode`] turns a method's raw code array into a list of typed
//! [`Instruction`]s. Branch targets are rewritten from byte offsets to
//! instruction indices, so the interpreter's cursor is a plain index.

use std::collections::HashMap;

use crate::bytes::ByteReader;
use crate::error::{ClassFormatError, FormatResult};
use crate::opcode::Opcode;

/// Computational type of a load, store or return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// int (and narrower)
    Int,
    /// long
    Long,
    /// float
    Float,
    /// double
    Double,
    /// reference
    Reference,
}

/// Numeric operand type of arithmetic instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericKind {
    /// int
    Int,
    /// long
    Long,
    /// float
    Float,
    /// double
    Double,
}

/// Element type of array instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    /// boolean (only `newarray`; loads and stores use `Byte`)
    Boolean,
    /// byte or boolean
    Byte,
    /// char
    Char,
    /// short
    Short,
    /// int
    Int,
    /// long
    Long,
    /// float
    Float,
    /// double
    Double,
    /// reference
    Reference,
}

impl ArrayKind {
    /// Maps the `atype` operand of `newarray`.
    pub fn from_atype(atype: u8) -> Option<ArrayKind> {
        Some(match atype {
            4 => ArrayKind::Boolean,
            5 => ArrayKind::Char,
            6 => ArrayKind::Float,
            7 => ArrayKind::Double,
            8 => ArrayKind::Byte,
            9 => ArrayKind::Short,
            10 => ArrayKind::Int,
            11 => ArrayKind::Long,
            _ => return None,
        })
    }

    /// The `atype` operand of `newarray`, if this is a primitive kind.
    pub fn atype(self) -> Option<u8> {
        Some(match self {
            ArrayKind::Boolean => 4,
            ArrayKind::Char => 5,
            ArrayKind::Float => 6,
            ArrayKind::Double => 7,
            ArrayKind::Byte => 8,
            ArrayKind::Short => 9,
            ArrayKind::Int => 10,
            ArrayKind::Long => 11,
            ArrayKind::Reference => return None,
        })
    }

    /// Descriptor of a one-dimensional array of this primitive kind.
    pub fn array_descriptor(self) -> Option<&'static str> {
        Some(match self {
            ArrayKind::Boolean => "[Z",
            ArrayKind::Byte => "[B",
            ArrayKind::Char => "[C",
            ArrayKind::Short => "[S",
            ArrayKind::Int => "[I",
            ArrayKind::Long => "[J",
            ArrayKind::Float => "[F",
            ArrayKind::Double => "[D",
            ArrayKind::Reference => return None,
        })
    }
}

/// Binary arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

/// Narrowing conversions from int.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Narrowing {
    /// i2b
    Byte,
    /// i2c
    Char,
    /// i2s
    Short,
}

/// Comparison of a conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl Condition {
    /// Evaluates the condition on `lhs` compared with `rhs`.
    pub fn holds<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            Condition::Eq => lhs == rhs,
            Condition::Ne => lhs != rhs,
            Condition::Lt => lhs < rhs,
            Condition::Ge => lhs >= rhs,
            Condition::Gt => lhs > rhs,
            Condition::Le => lhs <= rhs,
        }
    }

    fn from_offset(offset: u8) -> Condition {
        match offset {
            0 => Condition::Eq,
            1 => Condition::Ne,
            2 => Condition::Lt,
            3 => Condition::Ge,
            4 => Condition::Gt,
            _ => Condition::Le,
        }
    }
}

/// One decoded instruction. Branch targets are instruction indices.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Instruction {
    Nop,
    AconstNull,
    Iconst(i32),
    Lconst(i64),
    Fconst(f32),
    Dconst(f64),
    /// `ldc` / `ldc_w` of a one-slot constant
    Ldc(u16),
    /// `ldc2_w` of a long or double
    Ldc2(u16),
    Load(ValueKind, u16),
    Store(ValueKind, u16),
    ArrayLoad(ArrayKind),
    ArrayStore(ArrayKind),
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    Binary(NumericKind, BinaryOp),
    Neg(NumericKind),
    Iinc { index: u16, delta: i16 },
    Convert(NumericKind, NumericKind),
    Narrow(Narrowing),
    Lcmp,
    /// `fcmpl` (nan_result = -1) / `fcmpg` (nan_result = 1)
    Fcmp { nan_result: i32 },
    /// `dcmpl` / `dcmpg`
    Dcmp { nan_result: i32 },
    If { condition: Condition, target: usize },
    IfIcmp { condition: Condition, target: usize },
    IfAcmp { equal: bool, target: usize },
    IfNull { is_null: bool, target: usize },
    Goto(usize),
    Jsr(usize),
    Ret(u16),
    TableSwitch { default: usize, low: i32, targets: Vec<usize> },
    LookupSwitch { default: usize, pairs: Vec<(i32, usize)> },
    /// Typed return; `None` for `return`
    Return(Option<ValueKind>),
    GetStatic(u16),
    PutStatic(u16),
    GetField(u16),
    PutField(u16),
    InvokeVirtual(u16),
    InvokeSpecial(u16),
    InvokeStatic(u16),
    InvokeInterface(u16),
    InvokeDynamic(u16),
    New(u16),
    NewArray(ArrayKind),
    ANewArray(u16),
    ArrayLength,
    AThrow,
    CheckCast(u16),
    InstanceOf(u16),
    MonitorEnter,
    MonitorExit,
    MultiANewArray { index: u16, dimensions: u8 },
}

impl Instruction {
    fn map_targets(&mut self, f: &mut dyn FnMut(usize) -> FormatResult<usize>) -> FormatResult<()> {
        match self {
            Instruction::If { target, .. }
            | Instruction::IfIcmp { target, .. }
            | Instruction::IfAcmp { target, .. }
            | Instruction::IfNull { target, .. }
            | Instruction::Goto(target)
            | Instruction::Jsr(target) => *target = f(*target)?,
            Instruction::TableSwitch { default, targets, .. } => {
                *default = f(*default)?;
                for target in targets.iter_mut() {
                    *target = f(*target)?;
                }
            }
            Instruction::LookupSwitch { default, pairs } => {
                *default = f(*default)?;
                for (_, target) in pairs.iter_mut() {
                    *target = f(*target)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// A decoded code array.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedCode {
    /// Instructions in order
    pub instructions: Vec<Instruction>,
    /// Byte offset of each instruction
    pub offsets: Vec<usize>,
    /// Length of the raw code array
    pub code_length: usize,
}

impl DecodedCode {
    /// Instruction index starting at `offset`. The code length maps to one
    /// past the last instruction so exclusive range ends resolve.
    pub fn index_of(&self, offset: usize) -> Option<usize> {
        if offset == self.code_length {
            return Some(self.instructions.len());
        }
        self.offsets.binary_search(&offset).ok()
    }

    /// Instruction index containing byte `offset`.
    pub fn index_covering(&self, offset: usize) -> Option<usize> {
        if offset >= self.code_length {
            return None;
        }
        match self.offsets.binary_search(&offset) {
            Ok(index) => Some(index),
            Err(insert) => insert.checked_sub(1),
        }
    }
}

fn branch(at: usize, delta: i64) -> FormatResult<usize> {
    let target = at as i64 + delta;
    usize::try_from(target).map_err(|_| ClassFormatError::BadBranchTarget(target))
}

fn local_kind(base: u8) -> ValueKind {
    match base {
        0 => ValueKind::Int,
        1 => ValueKind::Long,
        2 => ValueKind::Float,
        3 => ValueKind::Double,
        _ => ValueKind::Reference,
    }
}

fn numeric_kind(index: u8) -> NumericKind {
    match index % 4 {
        0 => NumericKind::Int,
        1 => NumericKind::Long,
        2 => NumericKind::Float,
        _ => NumericKind::Double,
    }
}

const ARRAY_KINDS: [ArrayKind; 8] = [
    ArrayKind::Int,
    ArrayKind::Long,
    ArrayKind::Float,
    ArrayKind::Double,
    ArrayKind::Reference,
    ArrayKind::Byte,
    ArrayKind::Char,
    ArrayKind::Short,
];

/// Decodes a raw code array.
///
/// # Example
///
/// ```
/// use bytecode_system::{decode, Instruction, ValueKind};
///
/// // iload_0; ifeq +5; iconst_1; ireturn; iconst_0; ireturn
/// let code = [0x1a, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac];
/// let decoded = decode(&code).unwrap();
/// assert_eq!(decoded.instructions[0], Instruction::Load(ValueKind::Int, 0));
/// assert!(matches!(decoded.instructions[1], Instruction::If { target: 4, .. }));
/// ```
pub fn decode(code: &[u8]) -> FormatResult<DecodedCode> {
    let mut reader = ByteReader::new(code);
    let mut instructions = Vec::new();
    let mut offsets = Vec::new();

    while reader.remaining() > 0 {
        let at = reader.position();
        let byte = reader.u1()?;
        let opcode = Opcode::from_byte(byte).ok_or(ClassFormatError::UnknownOpcode {
            opcode: byte,
            offset: at,
        })?;
        let instruction = decode_one(&mut reader, opcode, at)?;
        offsets.push(at);
        instructions.push(instruction);
    }

    let index: HashMap<usize, usize> = offsets.iter().enumerate().map(|(i, o)| (*o, i)).collect();
    for instruction in instructions.iter_mut() {
        instruction.map_targets(&mut |offset| {
            index
                .get(&offset)
                .copied()
                .ok_or(ClassFormatError::BadBranchTarget(offset as i64))
        })?;
    }

    Ok(DecodedCode {
        instructions,
        offsets,
        code_length: code.len(),
    })
}

fn decode_one(reader: &mut ByteReader<'_>, opcode: Opcode, at: usize) -> FormatResult<Instruction> {
    use Instruction as I;
    let byte = opcode.byte();
    let instruction = match opcode {
        Opcode::Nop => I::Nop,
        Opcode::AconstNull => I::AconstNull,
        Opcode::IconstM1
        | Opcode::Iconst0
        | Opcode::Iconst1
        | Opcode::Iconst2
        | Opcode::Iconst3
        | Opcode::Iconst4
        | Opcode::Iconst5 => I::Iconst(byte as i32 - Opcode::Iconst0.byte() as i32),
        Opcode::Lconst0 => I::Lconst(0),
        Opcode::Lconst1 => I::Lconst(1),
        Opcode::Fconst0 => I::Fconst(0.0),
        Opcode::Fconst1 => I::Fconst(1.0),
        Opcode::Fconst2 => I::Fconst(2.0),
        Opcode::Dconst0 => I::Dconst(0.0),
        Opcode::Dconst1 => I::Dconst(1.0),
        Opcode::Bipush => I::Iconst(reader.u1()? as i8 as i32),
        Opcode::Sipush => I::Iconst(reader.u2()? as i16 as i32),
        Opcode::Ldc => I::Ldc(reader.u1()? as u16),
        Opcode::LdcW => I::Ldc(reader.u2()?),
        Opcode::Ldc2W => I::Ldc2(reader.u2()?),
        Opcode::Iload | Opcode::Lload | Opcode::Fload | Opcode::Dload | Opcode::Aload => {
            I::Load(local_kind(byte - Opcode::Iload.byte()), reader.u1()? as u16)
        }
        _ if (Opcode::Iload0.byte()..=Opcode::Aload3.byte()).contains(&byte) => {
            let n = byte - Opcode::Iload0.byte();
            I::Load(local_kind(n / 4), (n % 4) as u16)
        }
        _ if (Opcode::Iaload.byte()..=Opcode::Saload.byte()).contains(&byte) => {
            I::ArrayLoad(ARRAY_KINDS[(byte - Opcode::Iaload.byte()) as usize])
        }
        Opcode::Istore | Opcode::Lstore | Opcode::Fstore | Opcode::Dstore | Opcode::Astore => {
            I::Store(local_kind(byte - Opcode::Istore.byte()), reader.u1()? as u16)
        }
        _ if (Opcode::Istore0.byte()..=Opcode::Astore3.byte()).contains(&byte) => {
            let n = byte - Opcode::Istore0.byte();
            I::Store(local_kind(n / 4), (n % 4) as u16)
        }
        _ if (Opcode::Iastore.byte()..=Opcode::Sastore.byte()).contains(&byte) => {
            I::ArrayStore(ARRAY_KINDS[(byte - Opcode::Iastore.byte()) as usize])
        }
        Opcode::Pop => I::Pop,
        Opcode::Pop2 => I::Pop2,
        Opcode::Dup => I::Dup,
        Opcode::DupX1 => I::DupX1,
        Opcode::DupX2 => I::DupX2,
        Opcode::Dup2 => I::Dup2,
        Opcode::Dup2X1 => I::Dup2X1,
        Opcode::Dup2X2 => I::Dup2X2,
        Opcode::Swap => I::Swap,
        _ if (Opcode::Iadd.byte()..=Opcode::Drem.byte()).contains(&byte) => {
            let n = byte - Opcode::Iadd.byte();
            let op = [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul, BinaryOp::Div, BinaryOp::Rem]
                [(n / 4) as usize];
            I::Binary(numeric_kind(n), op)
        }
        _ if (Opcode::Ineg.byte()..=Opcode::Dneg.byte()).contains(&byte) => {
            I::Neg(numeric_kind(byte - Opcode::Ineg.byte()))
        }
        _ if (Opcode::Ishl.byte()..=Opcode::Lxor.byte()).contains(&byte) => {
            let n = byte - Opcode::Ishl.byte();
            let op = [
                BinaryOp::Shl,
                BinaryOp::Shr,
                BinaryOp::Ushr,
                BinaryOp::And,
                BinaryOp::Or,
                BinaryOp::Xor,
            ][(n / 2) as usize];
            let kind = if n % 2 == 0 {
                NumericKind::Int
            } else {
                NumericKind::Long
            };
            I::Binary(kind, op)
        }
        Opcode::Iinc => I::Iinc {
            index: reader.u1()? as u16,
            delta: reader.u1()? as i8 as i16,
        },
        Opcode::I2l => I::Convert(NumericKind::Int, NumericKind::Long),
        Opcode::I2f => I::Convert(NumericKind::Int, NumericKind::Float),
        Opcode::I2d => I::Convert(NumericKind::Int, NumericKind::Double),
        Opcode::L2i => I::Convert(NumericKind::Long, NumericKind::Int),
        Opcode::L2f => I::Convert(NumericKind::Long, NumericKind::Float),
        Opcode::L2d => I::Convert(NumericKind::Long, NumericKind::Double),
        Opcode::F2i => I::Convert(NumericKind::Float, NumericKind::Int),
        Opcode::F2l => I::Convert(NumericKind::Float, NumericKind::Long),
        Opcode::F2d => I::Convert(NumericKind::Float, NumericKind::Double),
        Opcode::D2i => I::Convert(NumericKind::Double, NumericKind::Int),
        Opcode::D2l => I::Convert(NumericKind::Double, NumericKind::Long),
        Opcode::D2f => I::Convert(NumericKind::Double, NumericKind::Float),
        Opcode::I2b => I::Narrow(Narrowing::Byte),
        Opcode::I2c => I::Narrow(Narrowing::Char),
        Opcode::I2s => I::Narrow(Narrowing::Short),
        Opcode::Lcmp => I::Lcmp,
        Opcode::Fcmpl => I::Fcmp { nan_result: -1 },
        Opcode::Fcmpg => I::Fcmp { nan_result: 1 },
        Opcode::Dcmpl => I::Dcmp { nan_result: -1 },
        Opcode::Dcmpg => I::Dcmp { nan_result: 1 },
        _ if (Opcode::Ifeq.byte()..=Opcode::Ifle.byte()).contains(&byte) => I::If {
            condition: Condition::from_offset(byte - Opcode::Ifeq.byte()),
            target: branch(at, reader.u2()? as i16 as i64)?,
        },
        _ if (Opcode::IfIcmpeq.byte()..=Opcode::IfIcmple.byte()).contains(&byte) => I::IfIcmp {
            condition: Condition::from_offset(byte - Opcode::IfIcmpeq.byte()),
            target: branch(at, reader.u2()? as i16 as i64)?,
        },
        Opcode::IfAcmpeq | Opcode::IfAcmpne => I::IfAcmp {
            equal: opcode == Opcode::IfAcmpeq,
            target: branch(at, reader.u2()? as i16 as i64)?,
        },
        Opcode::Ifnull | Opcode::Ifnonnull => I::IfNull {
            is_null: opcode == Opcode::Ifnull,
            target: branch(at, reader.u2()? as i16 as i64)?,
        },
        Opcode::Goto => I::Goto(branch(at, reader.u2()? as i16 as i64)?),
        Opcode::GotoW => I::Goto(branch(at, reader.i4()? as i64)?),
        Opcode::Jsr => I::Jsr(branch(at, reader.u2()? as i16 as i64)?),
        Opcode::JsrW => I::Jsr(branch(at, reader.i4()? as i64)?),
        Opcode::Ret => I::Ret(reader.u1()? as u16),
        Opcode::Tableswitch => {
            skip_switch_padding(reader, at)?;
            let default = branch(at, reader.i4()? as i64)?;
            let low = reader.i4()?;
            let high = reader.i4()?;
            if high < low {
                return Err(ClassFormatError::BadOperand {
                    offset: at,
                    detail: format!("tableswitch low {} > high {}", low, high),
                });
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(branch(at, reader.i4()? as i64)?);
            }
            I::TableSwitch {
                default,
                low,
                targets,
            }
        }
        Opcode::Lookupswitch => {
            skip_switch_padding(reader, at)?;
            let default = branch(at, reader.i4()? as i64)?;
            let count = reader.i4()?;
            if count < 0 {
                return Err(ClassFormatError::BadOperand {
                    offset: at,
                    detail: format!("lookupswitch with {} pairs", count),
                });
            }
            let mut pairs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let key = reader.i4()?;
                pairs.push((key, branch(at, reader.i4()? as i64)?));
            }
            I::LookupSwitch { default, pairs }
        }
        Opcode::Ireturn => I::Return(Some(ValueKind::Int)),
        Opcode::Lreturn => I::Return(Some(ValueKind::Long)),
        Opcode::Freturn => I::Return(Some(ValueKind::Float)),
        Opcode::Dreturn => I::Return(Some(ValueKind::Double)),
        Opcode::Areturn => I::Return(Some(ValueKind::Reference)),
        Opcode::Return => I::Return(None),
        Opcode::Getstatic => I::GetStatic(reader.u2()?),
        Opcode::Putstatic => I::PutStatic(reader.u2()?),
        Opcode::Getfield => I::GetField(reader.u2()?),
        Opcode::Putfield => I::PutField(reader.u2()?),
        Opcode::Invokevirtual => I::InvokeVirtual(reader.u2()?),
        Opcode::Invokespecial => I::InvokeSpecial(reader.u2()?),
        Opcode::Invokestatic => I::InvokeStatic(reader.u2()?),
        Opcode::Invokeinterface => {
            let index = reader.u2()?;
            reader.skip(2)?;
            I::InvokeInterface(index)
        }
        Opcode::Invokedynamic => {
            let index = reader.u2()?;
            reader.skip(2)?;
            I::InvokeDynamic(index)
        }
        Opcode::New => I::New(reader.u2()?),
        Opcode::Newarray => {
            let atype = reader.u1()?;
            I::NewArray(ArrayKind::from_atype(atype).ok_or(ClassFormatError::BadOperand {
                offset: at,
                detail: format!("newarray type {}", atype),
            })?)
        }
        Opcode::Anewarray => I::ANewArray(reader.u2()?),
        Opcode::Arraylength => I::ArrayLength,
        Opcode::Athrow => I::AThrow,
        Opcode::Checkcast => I::CheckCast(reader.u2()?),
        Opcode::Instanceof => I::InstanceOf(reader.u2()?),
        Opcode::Monitorenter => I::MonitorEnter,
        Opcode::Monitorexit => I::MonitorExit,
        Opcode::Multianewarray => I::MultiANewArray {
            index: reader.u2()?,
            dimensions: reader.u1()?,
        },
        Opcode::Wide => decode_wide(reader, at)?,
        _ => {
            return Err(ClassFormatError::UnknownOpcode {
                opcode: byte,
                offset: at,
            })
        }
    };
    Ok(instruction)
}

fn skip_switch_padding(reader: &mut ByteReader<'_>, at: usize) -> FormatResult<()> {
    let padding = (4 - (at + 1) % 4) % 4;
    reader.skip(padding)
}

fn decode_wide(reader: &mut ByteReader<'_>, at: usize) -> FormatResult<Instruction> {
    let byte = reader.u1()?;
    let opcode = Opcode::from_byte(byte).ok_or(ClassFormatError::UnknownOpcode {
        opcode: byte,
        offset: at + 1,
    })?;
    let index = reader.u2()?;
    Ok(match opcode {
        Opcode::Iload | Opcode::Lload | Opcode::Fload | Opcode::Dload | Opcode::Aload => {
            Instruction::Load(local_kind(byte - Opcode::Iload.byte()), index)
        }
        Opcode::Istore | Opcode::Lstore | Opcode::Fstore | Opcode::Dstore | Opcode::Astore => {
            Instruction::Store(local_kind(byte - Opcode::Istore.byte()), index)
        }
        Opcode::Ret => Instruction::Ret(index),
        Opcode::Iinc => Instruction::Iinc {
            index,
            delta: reader.u2()? as i16,
        },
        _ => {
            return Err(ClassFormatError::BadOperand {
                offset: at,
                detail: format!("wide {}", opcode),
            })
        }
    })
}
