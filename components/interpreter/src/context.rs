//! Execution context for one method activation
//!
//! Holds the operand [`Stack`], the [`Locals`] table and the cursor. Both
//! slot stores keep the wide-value discipline: a long or double occupies
//! two slots, the second holding [`Value::Top`].
//!
//! Slot stores are behind their own lock so the collector can read a
//! parked thread's frames during root enumeration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use class_linker::{JavaClass, JavaMethod, MethodCode};
use core_types::{ObjectRef, StackTraceElement, Value, VmError, NATIVE_LINE, UNKNOWN_LINE};
use parking_lot::Mutex;

fn discipline(detail: String) -> VmError {
    VmError::SlotDiscipline(detail)
}

/// Converts int-like values to the `Int` the stack computes with.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Short(_) | Value::Byte(_) | Value::Char(_) | Value::Boolean(_) => {
            Value::Int(value.as_int().unwrap_or(0))
        }
        other => other,
    }
}

/// Operand stack bounded by the method's declared maximum.
///
/// A long or double takes two slots, the value under a [`Value::Top`]
/// marker. The typed pops check that discipline; [`Stack::pop_slot`] is the
/// raw pop and hands the marker back as a value of its own.
///
/// # Example
///
/// ```
/// use core_types::Value;
/// use interpreter::Stack;
///
/// let stack = Stack::new(3);
/// stack.push(Value::Int(1)).unwrap();
/// stack.push_wide(Value::Long(2)).unwrap();
/// assert_eq!(stack.len(), 3);
/// assert_eq!(stack.pop_wide().unwrap(), Value::Long(2));
/// assert_eq!(stack.pop().unwrap(), Value::Int(1));
/// ```
#[derive(Debug)]
pub struct Stack {
    slots: Mutex<Vec<Value>>,
    max: usize,
}

impl Stack {
    /// Creates an empty stack of `max` slots.
    pub fn new(max: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::with_capacity(max)),
            max,
        }
    }

    /// Declared maximum depth.
    pub fn max(&self) -> usize {
        self.max
    }

    /// Slots in use; the stack cursor.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// True if nothing is pushed.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Pushes one raw slot, continuation markers included.
    pub fn push_slot(&self, value: Value) -> Result<(), VmError> {
        let mut slots = self.slots.lock();
        if slots.len() >= self.max {
            return Err(VmError::StackOverflow(self.max));
        }
        slots.push(value);
        Ok(())
    }

    /// Pops one raw slot, continuation markers included. Unwinding a wide
    /// value this way takes two calls: the marker, then the value.
    pub fn pop_slot(&self) -> Result<Value, VmError> {
        self.slots.lock().pop().ok_or(VmError::StackUnderflow)
    }

    /// Pushes a one-slot value.
    pub fn push(&self, value: Value) -> Result<(), VmError> {
        if value.is_wide() || value.is_top() {
            return Err(discipline(format!(
                "narrow push of {}",
                value.type_name()
            )));
        }
        self.push_slot(value)
    }

    /// Pushes a long or double followed by its continuation marker.
    pub fn push_wide(&self, value: Value) -> Result<(), VmError> {
        if !value.is_wide() {
            return Err(discipline(format!("wide push of {}", value.type_name())));
        }
        let mut slots = self.slots.lock();
        if slots.len() + 2 > self.max {
            return Err(VmError::StackOverflow(self.max));
        }
        slots.push(value);
        slots.push(Value::Top);
        Ok(())
    }

    /// Pushes `value` with the slot count its type requires.
    pub fn push_value(&self, value: Value) -> Result<(), VmError> {
        let value = normalize(value);
        if value.is_wide() {
            self.push_wide(value)
        } else {
            self.push(value)
        }
    }

    /// Pops a one-slot value.
    pub fn pop(&self) -> Result<Value, VmError> {
        let mut slots = self.slots.lock();
        match slots.last() {
            None => Err(VmError::StackUnderflow),
            Some(Value::Top) => Err(discipline("narrow pop of a continuation marker".to_string())),
            Some(_) => slots.pop().ok_or(VmError::StackUnderflow),
        }
    }

    /// Pops a long or double together with its marker.
    pub fn pop_wide(&self) -> Result<Value, VmError> {
        let mut slots = self.slots.lock();
        let len = slots.len();
        if len < 2 {
            return Err(VmError::StackUnderflow);
        }
        if !slots[len - 1].is_top() || !slots[len - 2].is_wide() {
            return Err(discipline(format!(
                "wide pop of {} / {}",
                slots[len - 2].type_name(),
                slots[len - 1].type_name()
            )));
        }
        slots.pop();
        slots.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pops one or two slots depending on `wide`.
    pub fn pop_value(&self, wide: bool) -> Result<Value, VmError> {
        if wide {
            self.pop_wide()
        } else {
            self.pop()
        }
    }

    /// The one-slot value on top, left in place.
    pub fn peek(&self) -> Result<Value, VmError> {
        match self.slots.lock().last() {
            None => Err(VmError::StackUnderflow),
            Some(Value::Top) => Err(discipline("narrow peek of a continuation marker".to_string())),
            Some(value) => Ok(value.clone()),
        }
    }

    /// Pops an int-like value.
    pub fn pop_int(&self) -> Result<i32, VmError> {
        let value = self.pop()?;
        value
            .as_int()
            .ok_or_else(|| discipline(format!("expected int, found {}", value.type_name())))
    }

    /// Pops a long.
    pub fn pop_long(&self) -> Result<i64, VmError> {
        let value = self.pop_wide()?;
        value
            .as_long()
            .ok_or_else(|| discipline(format!("expected long, found {}", value.type_name())))
    }

    /// Pops a float.
    pub fn pop_float(&self) -> Result<f32, VmError> {
        let value = self.pop()?;
        value
            .as_float()
            .ok_or_else(|| discipline(format!("expected float, found {}", value.type_name())))
    }

    /// Pops a double.
    pub fn pop_double(&self) -> Result<f64, VmError> {
        let value = self.pop_wide()?;
        value
            .as_double()
            .ok_or_else(|| discipline(format!("expected double, found {}", value.type_name())))
    }

    /// Pops a reference; `None` is null.
    pub fn pop_reference(&self) -> Result<Option<ObjectRef>, VmError> {
        let value = self.pop()?;
        match value {
            Value::Reference(object) => Ok(Some(object)),
            Value::Null => Ok(None),
            other => Err(discipline(format!(
                "expected reference, found {}",
                other.type_name()
            ))),
        }
    }

    /// Drops every slot; used when a handler catches an exception.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Copy of the slots, bottom first.
    pub fn snapshot(&self) -> Vec<Value> {
        self.slots.lock().clone()
    }

    /// Visits every object reference on the stack.
    pub fn for_each_reference(&self, visit: &mut dyn FnMut(&ObjectRef)) {
        for value in self.slots.lock().iter() {
            if let Value::Reference(object) = value {
                visit(object);
            }
        }
    }
}

/// Local variable table of fixed size.
#[derive(Debug)]
pub struct Locals {
    slots: Mutex<Vec<Value>>,
}

impl Locals {
    /// Creates `size` empty slots.
    pub fn new(size: usize) -> Self {
        Self {
            slots: Mutex::new(vec![Value::Top; size]),
        }
    }

    /// Creates a table of `size` slots holding `arguments` from slot 0,
    /// wide arguments taking two.
    pub fn with_arguments(size: usize, arguments: &[Value]) -> Result<Self, VmError> {
        let locals = Locals::new(size);
        let mut index = 0;
        for argument in arguments {
            let argument = normalize(argument.clone());
            if argument.is_wide() {
                locals.set_wide(index, argument)?;
                index += 2;
            } else {
                locals.set(index, argument)?;
                index += 1;
            }
        }
        Ok(locals)
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// True for a table without slots.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn check(index: usize, len: usize) -> Result<(), VmError> {
        if index >= len {
            return Err(VmError::LocalOutOfRange { index, max: len });
        }
        Ok(())
    }

    /// Reads a one-slot value.
    pub fn get(&self, index: usize) -> Result<Value, VmError> {
        let slots = self.slots.lock();
        Self::check(index, slots.len())?;
        match &slots[index] {
            Value::Top => Err(discipline(format!("narrow load of empty or wide local {}", index))),
            value if value.is_wide() => Err(discipline(format!("narrow load of wide local {}", index))),
            value => Ok(value.clone()),
        }
    }

    /// Reads the long or double starting at `index`.
    pub fn get_wide(&self, index: usize) -> Result<Value, VmError> {
        let slots = self.slots.lock();
        Self::check(index + 1, slots.len())?;
        if !slots[index].is_wide() || !slots[index + 1].is_top() {
            return Err(discipline(format!("wide load of local {}", index)));
        }
        Ok(slots[index].clone())
    }

    /// Stores a one-slot value.
    pub fn set(&self, index: usize, value: Value) -> Result<(), VmError> {
        if value.is_wide() || value.is_top() {
            return Err(discipline(format!("narrow store of {}", value.type_name())));
        }
        let mut slots = self.slots.lock();
        Self::check(index, slots.len())?;
        slots[index] = value;
        Ok(())
    }

    /// Stores a long or double into `index` and its marker into `index + 1`.
    pub fn set_wide(&self, index: usize, value: Value) -> Result<(), VmError> {
        if !value.is_wide() {
            return Err(discipline(format!("wide store of {}", value.type_name())));
        }
        let mut slots = self.slots.lock();
        Self::check(index + 1, slots.len())?;
        slots[index] = value;
        slots[index + 1] = Value::Top;
        Ok(())
    }

    /// Visits every object reference held in a local.
    pub fn for_each_reference(&self, visit: &mut dyn FnMut(&ObjectRef)) {
        for value in self.slots.lock().iter() {
            if let Value::Reference(object) = value {
                visit(object);
            }
        }
    }
}

/// State of one method activation.
///
/// The context is on its thread's backtrace from entry until the
/// invocation returns or throws; dropping it releases its slot storage.
#[derive(Debug)]
pub struct ExecutionContext {
    class: Arc<JavaClass>,
    method: Arc<JavaMethod>,
    stack: Stack,
    locals: Locals,
    cursor: AtomicUsize,
}

impl ExecutionContext {
    /// Creates a context for `method` of `class` with `arguments` (receiver
    /// first) in its locals. Methods without code get a table just large
    /// enough for the arguments.
    pub fn new(
        class: Arc<JavaClass>,
        method: Arc<JavaMethod>,
        arguments: &[Value],
    ) -> Result<Self, VmError> {
        let argument_slots: usize = arguments
            .iter()
            .map(|value| if value.is_wide() { 2 } else { 1 })
            .sum();
        let (max_stack, max_locals) = match method.code() {
            Some(code) => (code.max_stack, code.max_locals.max(argument_slots)),
            None => (0, argument_slots),
        };
        Ok(Self {
            locals: Locals::with_arguments(max_locals, arguments)?,
            stack: Stack::new(max_stack),
            cursor: AtomicUsize::new(0),
            class,
            method,
        })
    }

    /// Class declaring the method.
    pub fn class(&self) -> &Arc<JavaClass> {
        &self.class
    }

    /// Method being executed.
    pub fn method(&self) -> &Arc<JavaMethod> {
        &self.method
    }

    /// Decoded body, absent for native and abstract methods.
    pub fn code(&self) -> Option<&MethodCode> {
        self.method.code()
    }

    /// Operand stack.
    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    /// Local variables.
    pub fn locals(&self) -> &Locals {
        &self.locals
    }

    /// Index of the current instruction.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Moves the cursor.
    pub fn set_cursor(&self, index: usize) {
        self.cursor.store(index, Ordering::Relaxed);
    }

    /// Source line of the current instruction.
    pub fn line(&self) -> i32 {
        if self.method.is_native() {
            return NATIVE_LINE;
        }
        self.code()
            .and_then(|code| code.line_at(self.cursor()))
            .map(i32::from)
            .unwrap_or(UNKNOWN_LINE)
    }

    /// Backtrace entry for this frame.
    pub fn stack_trace_element(&self) -> StackTraceElement {
        StackTraceElement {
            class_name: self.class.name().to_string(),
            method_name: self.method.name().to_string(),
            source_file: self.class.source_file().map(str::to_string),
            line: self.line(),
        }
    }

    /// Visits every reference held by the stack and the locals.
    pub fn for_each_reference(&self, visit: &mut dyn FnMut(&ObjectRef)) {
        self.stack.for_each_reference(visit);
        self.locals.for_each_reference(visit);
    }
}
