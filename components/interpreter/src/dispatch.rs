//! Dispatch loop for bytecode execution
//!
//! [`Vm::execute`] runs one frame: it fetches the instruction at the
//! cursor, hands it to [`Vm::step`], and moves the cursor according to the
//! resulting [`Flow`]. A guest exception raised by a step is matched
//! against the method's exception table; without a handler it propagates
//! to the caller.
//!
//! Backward jumps are safe points, so a loop cannot hold up a collection.

use std::cmp::Ordering;
use std::sync::Arc;

use bytecode_system::{ArrayKind, BinaryOp, Constant, Instruction, Narrowing, NumericKind, ValueKind};
use class_linker::object_model::{array_length, element_offset, read_value, write_reference, write_value};
use class_linker::{JavaClass, JavaField, JavaMethod, LoaderId, MethodCode, Resolved};
use core_types::{ObjectRef, Value, VmError};

use crate::context::{ExecutionContext, Stack};
use crate::error::{ExecResult, ExecutionError};
use crate::thread::VmThread;
use crate::vm::Vm;

/// Where execution continues after one instruction.
#[derive(Debug, Clone)]
pub(crate) enum Flow {
    /// The following instruction
    Next,
    /// An absolute instruction index
    Jump(usize),
    /// The method completed
    Return(Option<Value>),
}

fn compare<T: PartialOrd>(a: T, b: T, nan_result: i32) -> i32 {
    match a.partial_cmp(&b) {
        Some(Ordering::Less) => -1,
        Some(Ordering::Equal) => 0,
        Some(Ordering::Greater) => 1,
        None => nan_result,
    }
}

fn malformed(instruction: &Instruction) -> VmError {
    VmError::Internal(format!("malformed instruction {:?}", instruction))
}

impl Vm {
    /// Interprets `frame` until it returns or an exception escapes it.
    pub(crate) fn execute(&self, thread: &Arc<VmThread>, frame: &Arc<ExecutionContext>) -> ExecResult<Option<Value>> {
        let code = frame.code().ok_or_else(|| {
            VmError::Internal(format!("{} has no code", frame.method().qualified_name()))
        })?;
        loop {
            let _held = thread.held_scope();
            let index = frame.cursor();
            let instruction = code.instructions.get(index).ok_or_else(|| {
                VmError::Internal(format!(
                    "execution ran off the end of {}",
                    frame.method().qualified_name()
                ))
            })?;
            match self.step(thread, frame, instruction, index) {
                Ok(Flow::Next) => frame.set_cursor(index + 1),
                Ok(Flow::Jump(target)) => {
                    if target <= index {
                        self.gc.barrier().poll();
                    }
                    frame.set_cursor(target);
                }
                Ok(Flow::Return(value)) => return Ok(value),
                Err(ExecutionError::Guest(exception)) => {
                    thread.hold(&exception);
                    match self.find_handler(thread, frame, code, index, &exception)? {
                        Some(handler) => {
                            frame.stack().clear();
                            frame.stack().push(Value::Reference(exception))?;
                            frame.set_cursor(handler);
                        }
                        None => return Err(ExecutionError::Guest(exception)),
                    }
                }
                Err(fatal) => return Err(fatal),
            }
        }
    }

    /// First handler, in table order, covering `index` and catching the
    /// class of `exception`.
    fn find_handler(
        &self,
        thread: &Arc<VmThread>,
        frame: &ExecutionContext,
        code: &MethodCode,
        index: usize,
        exception: &ObjectRef,
    ) -> ExecResult<Option<usize>> {
        let thrown = self.linker.class_of(exception)?;
        for entry in code.handlers.iter().filter(|entry| entry.covers(index)) {
            let Some(catch_type) = entry.catch_type else {
                return Ok(Some(entry.handler));
            };
            let caught = self.class_at(thread, frame, catch_type)?;
            if thrown.is_assignable_to(&caught) {
                return Ok(Some(entry.handler));
            }
        }
        Ok(None)
    }

    fn class_at(&self, thread: &Arc<VmThread>, frame: &ExecutionContext, index: u16) -> ExecResult<Arc<JavaClass>> {
        self.linker
            .resolve_class(frame.class(), index)
            .map_err(|error| self.link_error(thread, error))
    }

    fn field_at(
        &self,
        thread: &Arc<VmThread>,
        frame: &ExecutionContext,
        index: u16,
        is_static: bool,
    ) -> ExecResult<(Arc<JavaClass>, Arc<JavaField>)> {
        let (holder, field) = self
            .linker
            .resolve_field(frame.class(), index)
            .map_err(|error| self.link_error(thread, error))?;
        if field.is_static() != is_static {
            return Err(self.throw_new(
                thread,
                "java/lang/IncompatibleClassChangeError",
                Some(format!(
                    "Expected {} field {}.{}",
                    if is_static { "static" } else { "non-static" },
                    holder.java_name(),
                    field.name()
                )),
            ));
        }
        Ok((holder, field))
    }

    fn method_at(
        &self,
        thread: &Arc<VmThread>,
        frame: &ExecutionContext,
        index: u16,
        is_static: bool,
    ) -> ExecResult<Arc<JavaMethod>> {
        let method = self
            .linker
            .resolve_method(frame.class(), index)
            .map_err(|error| self.link_error(thread, error))?;
        if method.is_static() != is_static {
            return Err(self.throw_new(
                thread,
                "java/lang/IncompatibleClassChangeError",
                Some(format!(
                    "Expected {} method {}",
                    if is_static { "static" } else { "non-static" },
                    method.qualified_name()
                )),
            ));
        }
        Ok(method)
    }

    fn null_pointer(&self, thread: &Arc<VmThread>) -> ExecutionError {
        self.throw_new(thread, "java/lang/NullPointerException", None)
    }

    fn non_null(&self, thread: &Arc<VmThread>, object: Option<ObjectRef>) -> ExecResult<ObjectRef> {
        object.ok_or_else(|| self.null_pointer(thread))
    }

    fn array_element(
        &self,
        thread: &Arc<VmThread>,
        array: &ObjectRef,
        index: i32,
    ) -> ExecResult<(Arc<JavaClass>, usize)> {
        let class = self.linker.class_of(array)?;
        let element = class.element_kind().ok_or_else(|| VmError::HeapCorruption {
            address: array.address(),
            detail: format!("array instruction on {}", class.name()),
        })?;
        let length = array_length(array)?;
        if index < 0 || index as usize >= length {
            return Err(self.throw_new(
                thread,
                "java/lang/ArrayIndexOutOfBoundsException",
                Some(format!("Index {} out of bounds for length {}", index, length)),
            ));
        }
        let offset = element_offset(index as usize, element.size(self.linker.address_width()));
        Ok((class, offset))
    }

    fn new_array(&self, thread: &Arc<VmThread>, class: &JavaClass, length: i32) -> ExecResult<ObjectRef> {
        if length < 0 {
            return Err(self.throw_new(
                thread,
                "java/lang/NegativeArraySizeException",
                Some(length.to_string()),
            ));
        }
        self.allocate_array(thread, class, length as usize)
    }

    /// Builds a `dimensions.len()`-deep array whose outer class is `class`.
    fn new_multi_array(
        &self,
        thread: &Arc<VmThread>,
        class: &Arc<JavaClass>,
        dimensions: &[i32],
    ) -> ExecResult<ObjectRef> {
        let array = self.new_array(thread, class, dimensions[0])?;
        if dimensions.len() > 1 {
            let component = class.component().cloned().ok_or_else(|| {
                VmError::Internal(format!("{} has too few dimensions", class.name()))
            })?;
            let size = self.linker.address_width().bytes();
            for index in 0..dimensions[0] as usize {
                let inner = self.new_multi_array(thread, &component, &dimensions[1..])?;
                write_reference(
                    &array,
                    element_offset(index, size),
                    Some(&inner),
                    self.linker.address_width(),
                )?;
            }
        }
        Ok(array)
    }

    /// Pops the arguments and receiver of a virtual call and selects the
    /// method that runs for that receiver.
    fn dispatch_virtual(
        &self,
        thread: &Arc<VmThread>,
        frame: &ExecutionContext,
        index: u16,
        method: &Arc<JavaMethod>,
        args: &[Value],
    ) -> ExecResult<Arc<JavaMethod>> {
        let receiver = args
            .first()
            .and_then(|value| value.as_reference().flatten())
            .cloned();
        let receiver = self.non_null(thread, receiver)?;
        let class = self.linker.class_of(&receiver)?;
        if method.is_private() {
            return Ok(method.clone());
        }
        let pool = frame.class().constant_pool();
        if let Some(target) = pool.and_then(|pool| pool.cached_target(index, class.id())) {
            return Ok(target);
        }
        let target = self
            .linker
            .select_method(&class, method)
            .filter(|target| !target.is_abstract())
            .ok_or_else(|| {
                self.throw_new(
                    thread,
                    "java/lang/AbstractMethodError",
                    Some(format!("{}.{}{}", class.name(), method.name(), method.descriptor())),
                )
            })?;
        if let Some(pool) = pool {
            pool.cache_target(index, class.id(), target.clone());
        }
        Ok(target)
    }

    /// Target of `invokespecial`: constructors and private methods as
    /// resolved, superclass calls looked up from the caller's superclass.
    fn special_target(&self, frame: &ExecutionContext, method: &Arc<JavaMethod>) -> Arc<JavaMethod> {
        if method.is_constructor() || method.is_private() {
            return method.clone();
        }
        let caller = frame.class();
        let Some(owner) = method.owner() else {
            return method.clone();
        };
        if owner.is_interface() || owner.id() == caller.id() || !caller.is_subclass_of(&owner) {
            return method.clone();
        }
        caller
            .super_class()
            .and_then(|parent| parent.find_method(method.name(), method.descriptor()))
            .unwrap_or_else(|| method.clone())
    }

    fn call(&self, thread: &Arc<VmThread>, frame: &ExecutionContext, target: &Arc<JavaMethod>, args: Vec<Value>) -> ExecResult<Flow> {
        if let Some(value) = self.invoke(thread, target, args)? {
            frame.stack().push_value(value)?;
        }
        Ok(Flow::Next)
    }

    fn load_constant(&self, thread: &Arc<VmThread>, frame: &ExecutionContext, index: u16) -> ExecResult<Value> {
        let pool = frame.class().constant_pool().ok_or_else(|| {
            VmError::Internal(format!("{} has no constant pool", frame.class().name()))
        })?;
        let constant = pool
            .pool()
            .get(index)
            .map_err(|error| VmError::Link(error.to_string()))?;
        Ok(match constant {
            Constant::Integer(v) => Value::Int(*v),
            Constant::Float(v) => Value::Float(*v),
            Constant::Long(v) => Value::Long(*v),
            Constant::Double(v) => Value::Double(*v),
            Constant::String(text_index) => {
                if let Some(Resolved::String(string)) = pool.resolved(index) {
                    return Ok(Value::Reference(string.clone()));
                }
                let text = pool
                    .pool()
                    .utf8(*text_index)
                    .map_err(|error| VmError::Link(error.to_string()))?
                    .to_string();
                let string = self.intern(thread, &text)?;
                pool.store(index, Resolved::String(string.clone()));
                Value::Reference(string)
            }
            Constant::Class(_) => {
                let class = self.class_at(thread, frame, index)?;
                Value::from_object(class.mirror().cloned())
            }
            other => {
                return Err(VmError::Unsupported(format!("ldc of {:?}", other)).into());
            }
        })
    }

    fn binary(&self, thread: &Arc<VmThread>, stack: &Stack, kind: NumericKind, op: BinaryOp) -> ExecResult<Value> {
        let divide_by_zero = || {
            self.throw_new(
                thread,
                "java/lang/ArithmeticException",
                Some("/ by zero".to_string()),
            )
        };
        let unsupported = || VmError::Internal(format!("{:?} on {:?}", op, kind));
        Ok(match kind {
            NumericKind::Int => {
                let b = stack.pop_int()?;
                let a = stack.pop_int()?;
                Value::Int(match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::Div if b == 0 => return Err(divide_by_zero()),
                    BinaryOp::Div => a.wrapping_div(b),
                    BinaryOp::Rem if b == 0 => return Err(divide_by_zero()),
                    BinaryOp::Rem => a.wrapping_rem(b),
                    BinaryOp::Shl => a.wrapping_shl(b as u32),
                    BinaryOp::Shr => a.wrapping_shr(b as u32),
                    BinaryOp::Ushr => (a as u32).wrapping_shr(b as u32) as i32,
                    BinaryOp::And => a & b,
                    BinaryOp::Or => a | b,
                    BinaryOp::Xor => a ^ b,
                })
            }
            NumericKind::Long => {
                // Shift counts are ints.
                if matches!(op, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr) {
                    let count = stack.pop_int()? as u32;
                    let a = stack.pop_long()?;
                    return Ok(Value::Long(match op {
                        BinaryOp::Shl => a.wrapping_shl(count),
                        BinaryOp::Shr => a.wrapping_shr(count),
                        _ => (a as u64).wrapping_shr(count) as i64,
                    }));
                }
                let b = stack.pop_long()?;
                let a = stack.pop_long()?;
                Value::Long(match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::Div if b == 0 => return Err(divide_by_zero()),
                    BinaryOp::Div => a.wrapping_div(b),
                    BinaryOp::Rem if b == 0 => return Err(divide_by_zero()),
                    BinaryOp::Rem => a.wrapping_rem(b),
                    BinaryOp::And => a & b,
                    BinaryOp::Or => a | b,
                    BinaryOp::Xor => a ^ b,
                    BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr => return Err(unsupported().into()),
                })
            }
            NumericKind::Float => {
                let b = stack.pop_float()?;
                let a = stack.pop_float()?;
                Value::Float(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Rem => a % b,
                    _ => return Err(unsupported().into()),
                })
            }
            NumericKind::Double => {
                let b = stack.pop_double()?;
                let a = stack.pop_double()?;
                Value::Double(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Rem => a % b,
                    _ => return Err(unsupported().into()),
                })
            }
        })
    }

    /// Executes one instruction.
    pub(crate) fn step(
        &self,
        thread: &Arc<VmThread>,
        frame: &ExecutionContext,
        instruction: &Instruction,
        index: usize,
    ) -> ExecResult<Flow> {
        let stack = frame.stack();
        let locals = frame.locals();
        match instruction {
            Instruction::Nop => {}
            Instruction::AconstNull => stack.push(Value::Null)?,
            Instruction::Iconst(v) => stack.push(Value::Int(*v))?,
            Instruction::Lconst(v) => stack.push_wide(Value::Long(*v))?,
            Instruction::Fconst(v) => stack.push(Value::Float(*v))?,
            Instruction::Dconst(v) => stack.push_wide(Value::Double(*v))?,
            Instruction::Ldc(index) | Instruction::Ldc2(index) => {
                let value = self.load_constant(thread, frame, *index)?;
                stack.push_value(value)?;
            }

            Instruction::Load(kind, slot) => match kind {
                ValueKind::Long | ValueKind::Double => stack.push_wide(locals.get_wide(*slot as usize)?)?,
                _ => stack.push(locals.get(*slot as usize)?)?,
            },
            Instruction::Store(kind, slot) => match kind {
                ValueKind::Long | ValueKind::Double => locals.set_wide(*slot as usize, stack.pop_wide()?)?,
                _ => locals.set(*slot as usize, stack.pop()?)?,
            },

            Instruction::ArrayLoad(_) => {
                let position = stack.pop_int()?;
                let array = self.non_null(thread, stack.pop_reference()?)?;
                let (class, offset) = self.array_element(thread, &array, position)?;
                let element = class.element_kind().ok_or_else(|| malformed(instruction))?;
                let value = read_value(&array, offset, element, self.linker.allocator().as_ref())?;
                stack.push_value(value)?;
            }
            Instruction::ArrayStore(kind) => {
                let value = stack.pop_value(matches!(kind, ArrayKind::Long | ArrayKind::Double))?;
                let position = stack.pop_int()?;
                let array = self.non_null(thread, stack.pop_reference()?)?;
                let (class, offset) = self.array_element(thread, &array, position)?;
                let element = class.element_kind().ok_or_else(|| malformed(instruction))?;
                if let (Some(component), Value::Reference(object)) = (class.component(), &value) {
                    let stored = self.linker.class_of(object)?;
                    if !stored.is_assignable_to(component) {
                        return Err(self.throw_new(
                            thread,
                            "java/lang/ArrayStoreException",
                            Some(stored.java_name()),
                        ));
                    }
                }
                write_value(&array, offset, element, &value, self.linker.address_width())?;
            }

            Instruction::Pop => {
                stack.pop()?;
            }
            Instruction::Pop2 => {
                stack.pop_slot()?;
                stack.pop_slot()?;
            }
            Instruction::Dup => stack.push(stack.peek()?)?,
            Instruction::DupX1 => {
                let v1 = stack.pop_slot()?;
                let v2 = stack.pop_slot()?;
                for value in [v1.clone(), v2, v1] {
                    stack.push_slot(value)?;
                }
            }
            Instruction::DupX2 => {
                let v1 = stack.pop_slot()?;
                let v2 = stack.pop_slot()?;
                let v3 = stack.pop_slot()?;
                for value in [v1.clone(), v3, v2, v1] {
                    stack.push_slot(value)?;
                }
            }
            Instruction::Dup2 => {
                let v1 = stack.pop_slot()?;
                let v2 = stack.pop_slot()?;
                for value in [v2.clone(), v1.clone(), v2, v1] {
                    stack.push_slot(value)?;
                }
            }
            Instruction::Dup2X1 => {
                let v1 = stack.pop_slot()?;
                let v2 = stack.pop_slot()?;
                let v3 = stack.pop_slot()?;
                for value in [v2.clone(), v1.clone(), v3, v2, v1] {
                    stack.push_slot(value)?;
                }
            }
            Instruction::Dup2X2 => {
                let v1 = stack.pop_slot()?;
                let v2 = stack.pop_slot()?;
                let v3 = stack.pop_slot()?;
                let v4 = stack.pop_slot()?;
                for value in [v2.clone(), v1.clone(), v4, v3, v2, v1] {
                    stack.push_slot(value)?;
                }
            }
            Instruction::Swap => {
                let v1 = stack.pop()?;
                let v2 = stack.pop()?;
                stack.push(v1)?;
                stack.push(v2)?;
            }

            Instruction::Binary(kind, op) => {
                let value = self.binary(thread, stack, *kind, *op)?;
                stack.push_value(value)?;
            }
            Instruction::Neg(kind) => {
                let value = match kind {
                    NumericKind::Int => Value::Int(stack.pop_int()?.wrapping_neg()),
                    NumericKind::Long => Value::Long(stack.pop_long()?.wrapping_neg()),
                    NumericKind::Float => Value::Float(-stack.pop_float()?),
                    NumericKind::Double => Value::Double(-stack.pop_double()?),
                };
                stack.push_value(value)?;
            }
            Instruction::Iinc { index: slot, delta } => {
                let slot = *slot as usize;
                let current = locals
                    .get(slot)?
                    .as_int()
                    .ok_or_else(|| malformed(instruction))?;
                locals.set(slot, Value::Int(current.wrapping_add(*delta as i32)))?;
            }
            Instruction::Convert(from, to) => {
                // `as` saturates float to integer casts and maps NaN to 0.
                let value = match (from, stack.pop_value(matches!(from, NumericKind::Long | NumericKind::Double))?) {
                    (NumericKind::Int, v) => {
                        let v = v.as_int().ok_or_else(|| malformed(instruction))?;
                        match to {
                            NumericKind::Int => Value::Int(v),
                            NumericKind::Long => Value::Long(v as i64),
                            NumericKind::Float => Value::Float(v as f32),
                            NumericKind::Double => Value::Double(v as f64),
                        }
                    }
                    (NumericKind::Long, v) => {
                        let v = v.as_long().ok_or_else(|| malformed(instruction))?;
                        match to {
                            NumericKind::Int => Value::Int(v as i32),
                            NumericKind::Long => Value::Long(v),
                            NumericKind::Float => Value::Float(v as f32),
                            NumericKind::Double => Value::Double(v as f64),
                        }
                    }
                    (NumericKind::Float, v) => {
                        let v = v.as_float().ok_or_else(|| malformed(instruction))?;
                        match to {
                            NumericKind::Int => Value::Int(v as i32),
                            NumericKind::Long => Value::Long(v as i64),
                            NumericKind::Float => Value::Float(v),
                            NumericKind::Double => Value::Double(v as f64),
                        }
                    }
                    (NumericKind::Double, v) => {
                        let v = v.as_double().ok_or_else(|| malformed(instruction))?;
                        match to {
                            NumericKind::Int => Value::Int(v as i32),
                            NumericKind::Long => Value::Long(v as i64),
                            NumericKind::Float => Value::Float(v as f32),
                            NumericKind::Double => Value::Double(v),
                        }
                    }
                };
                stack.push_value(value)?;
            }
            Instruction::Narrow(narrowing) => {
                let v = stack.pop_int()?;
                let narrowed = match narrowing {
                    Narrowing::Byte => v as i8 as i32,
                    Narrowing::Char => v as u16 as i32,
                    Narrowing::Short => v as i16 as i32,
                };
                stack.push(Value::Int(narrowed))?;
            }
            Instruction::Lcmp => {
                let b = stack.pop_long()?;
                let a = stack.pop_long()?;
                stack.push(Value::Int(compare(a, b, 0)))?;
            }
            Instruction::Fcmp { nan_result } => {
                let b = stack.pop_float()?;
                let a = stack.pop_float()?;
                stack.push(Value::Int(compare(a, b, *nan_result)))?;
            }
            Instruction::Dcmp { nan_result } => {
                let b = stack.pop_double()?;
                let a = stack.pop_double()?;
                stack.push(Value::Int(compare(a, b, *nan_result)))?;
            }

            Instruction::If { condition, target } => {
                if condition.holds(stack.pop_int()?, 0) {
                    return Ok(Flow::Jump(*target));
                }
            }
            Instruction::IfIcmp { condition, target } => {
                let b = stack.pop_int()?;
                let a = stack.pop_int()?;
                if condition.holds(a, b) {
                    return Ok(Flow::Jump(*target));
                }
            }
            Instruction::IfAcmp { equal, target } => {
                let b = stack.pop_reference()?;
                let a = stack.pop_reference()?;
                if (a == b) == *equal {
                    return Ok(Flow::Jump(*target));
                }
            }
            Instruction::IfNull { is_null, target } => {
                if stack.pop_reference()?.is_none() == *is_null {
                    return Ok(Flow::Jump(*target));
                }
            }
            Instruction::Goto(target) => return Ok(Flow::Jump(*target)),
            Instruction::Jsr(target) => {
                stack.push(Value::ReturnAddress(index + 1))?;
                return Ok(Flow::Jump(*target));
            }
            Instruction::Ret(slot) => match locals.get(*slot as usize)? {
                Value::ReturnAddress(address) => return Ok(Flow::Jump(address)),
                other => {
                    return Err(VmError::SlotDiscipline(format!(
                        "ret through a local holding {}",
                        other.type_name()
                    ))
                    .into())
                }
            },
            Instruction::TableSwitch {
                default,
                low,
                targets,
            } => {
                let key = stack.pop_int()? as i64 - *low as i64;
                let target = usize::try_from(key)
                    .ok()
                    .and_then(|offset| targets.get(offset))
                    .unwrap_or(default);
                return Ok(Flow::Jump(*target));
            }
            Instruction::LookupSwitch { default, pairs } => {
                let key = stack.pop_int()?;
                let target = pairs
                    .iter()
                    .find(|(candidate, _)| *candidate == key)
                    .map(|(_, target)| target)
                    .unwrap_or(default);
                return Ok(Flow::Jump(*target));
            }
            Instruction::Return(kind) => {
                let value = match kind {
                    None => None,
                    Some(kind) => Some(stack.pop_value(matches!(kind, ValueKind::Long | ValueKind::Double))?),
                };
                return Ok(Flow::Return(value));
            }

            Instruction::GetStatic(index) => {
                let (holder, field) = self.field_at(thread, frame, *index, true)?;
                self.ensure_initialized(thread, &holder)?;
                stack.push_value(self.linker.read_static(&holder, &field)?)?;
            }
            Instruction::PutStatic(index) => {
                let (holder, field) = self.field_at(thread, frame, *index, true)?;
                self.ensure_initialized(thread, &holder)?;
                let value = stack.pop_value(field.field_type().slot_size() == 2)?;
                self.linker.write_static(&holder, &field, &value)?;
            }
            Instruction::GetField(index) => {
                let (_, field) = self.field_at(thread, frame, *index, false)?;
                let object = self.non_null(thread, stack.pop_reference()?)?;
                stack.push_value(self.linker.read_field(&object, &field)?)?;
            }
            Instruction::PutField(index) => {
                let (_, field) = self.field_at(thread, frame, *index, false)?;
                let value = stack.pop_value(field.field_type().slot_size() == 2)?;
                let object = self.non_null(thread, stack.pop_reference()?)?;
                self.linker.write_field(&object, &field, &value)?;
            }

            Instruction::InvokeStatic(index) => {
                let method = self.method_at(thread, frame, *index, true)?;
                let args = self.pop_arguments(frame, &method)?;
                return self.call(thread, frame, &method, args);
            }
            Instruction::InvokeSpecial(index) => {
                let method = self.method_at(thread, frame, *index, false)?;
                let args = self.pop_arguments(frame, &method)?;
                if matches!(args.first(), Some(Value::Null)) {
                    return Err(self.null_pointer(thread));
                }
                let target = self.special_target(frame, &method);
                if target.is_abstract() {
                    return Err(self.throw_new(
                        thread,
                        "java/lang/AbstractMethodError",
                        Some(target.qualified_name()),
                    ));
                }
                return self.call(thread, frame, &target, args);
            }
            Instruction::InvokeVirtual(index) => {
                let method = self.method_at(thread, frame, *index, false)?;
                let args = self.pop_arguments(frame, &method)?;
                let target = self.dispatch_virtual(thread, frame, *index, &method, &args)?;
                return self.call(thread, frame, &target, args);
            }
            Instruction::InvokeInterface(index) => {
                let method = self.method_at(thread, frame, *index, false)?;
                let args = self.pop_arguments(frame, &method)?;
                if let (Some(Value::Reference(receiver)), Some(interface)) = (args.first(), method.owner()) {
                    let class = self.linker.class_of(receiver)?;
                    if interface.is_interface() && !class.is_assignable_to(&interface) {
                        return Err(self.throw_new(
                            thread,
                            "java/lang/IncompatibleClassChangeError",
                            Some(format!(
                                "Class {} does not implement the requested interface {}",
                                class.java_name(),
                                interface.java_name()
                            )),
                        ));
                    }
                }
                let target = self.dispatch_virtual(thread, frame, *index, &method, &args)?;
                return self.call(thread, frame, &target, args);
            }
            Instruction::InvokeDynamic(index) => {
                return Err(VmError::Unsupported(format!(
                    "invokedynamic #{} in {}",
                    index,
                    frame.method().qualified_name()
                ))
                .into());
            }

            Instruction::New(index) => {
                let class = self.class_at(thread, frame, *index)?;
                if class.is_interface() || class.is_abstract() || class.is_array() {
                    return Err(self.throw_new(
                        thread,
                        "java/lang/InstantiationError",
                        Some(class.java_name()),
                    ));
                }
                self.ensure_initialized(thread, &class)?;
                let object = self.allocate_instance(thread, &class)?;
                stack.push(Value::Reference(object))?;
            }
            Instruction::NewArray(kind) => {
                let length = stack.pop_int()?;
                let descriptor = kind.array_descriptor().ok_or_else(|| malformed(instruction))?;
                let class = self
                    .linker
                    .load_class(LoaderId::BOOT, descriptor)
                    .map_err(|error| self.link_error(thread, error))?;
                let array = self.new_array(thread, &class, length)?;
                stack.push(Value::Reference(array))?;
            }
            Instruction::ANewArray(index) => {
                let length = stack.pop_int()?;
                let component = self.class_at(thread, frame, *index)?;
                let class = self
                    .linker
                    .array_class_of(&component)
                    .map_err(|error| self.link_error(thread, error))?;
                let array = self.new_array(thread, &class, length)?;
                stack.push(Value::Reference(array))?;
            }
            Instruction::MultiANewArray { index, dimensions } => {
                let class = self.class_at(thread, frame, *index)?;
                let mut counts = Vec::with_capacity(*dimensions as usize);
                for _ in 0..*dimensions {
                    counts.push(stack.pop_int()?);
                }
                counts.reverse();
                if let Some(negative) = counts.iter().find(|count| **count < 0) {
                    return Err(self.throw_new(
                        thread,
                        "java/lang/NegativeArraySizeException",
                        Some(negative.to_string()),
                    ));
                }
                if counts.is_empty() {
                    return Err(malformed(instruction).into());
                }
                let array = self.new_multi_array(thread, &class, &counts)?;
                stack.push(Value::Reference(array))?;
            }
            Instruction::ArrayLength => {
                let array = self.non_null(thread, stack.pop_reference()?)?;
                stack.push(Value::Int(array_length(&array)? as i32))?;
            }
            Instruction::AThrow => {
                let exception = self.non_null(thread, stack.pop_reference()?)?;
                return Err(ExecutionError::Guest(exception));
            }
            Instruction::CheckCast(index) => {
                if let Value::Reference(object) = stack.peek()? {
                    let target = self.class_at(thread, frame, *index)?;
                    let class = self.linker.class_of(&object)?;
                    if !class.is_assignable_to(&target) {
                        return Err(self.throw_new(
                            thread,
                            "java/lang/ClassCastException",
                            Some(format!(
                                "class {} cannot be cast to class {}",
                                class.java_name(),
                                target.java_name()
                            )),
                        ));
                    }
                }
            }
            Instruction::InstanceOf(index) => {
                let result = match stack.pop_reference()? {
                    None => false,
                    Some(object) => {
                        let target = self.class_at(thread, frame, *index)?;
                        self.linker.class_of(&object)?.is_assignable_to(&target)
                    }
                };
                stack.push(Value::Int(result as i32))?;
            }
            Instruction::MonitorEnter => {
                let object = self.non_null(thread, stack.pop_reference()?)?;
                self.monitors
                    .monitor(object.address())
                    .enter(thread.id(), self.gc.barrier());
            }
            Instruction::MonitorExit => {
                let object = self.non_null(thread, stack.pop_reference()?)?;
                let released = self
                    .monitors
                    .monitor(object.address())
                    .exit(thread.id(), object.address());
                if let Err(VmError::MonitorNotOwned { .. }) = &released {
                    return Err(self.throw_new(
                        thread,
                        "java/lang/IllegalMonitorStateException",
                        Some("current thread is not owner".to_string()),
                    ));
                }
                released?;
            }
        }
        Ok(Flow::Next)
    }
}
