//! Guest strings and well-known members
//!
//! A `java/lang/String` holds its UTF-16 code units in a `[C` array in the
//! `value` field. Literal strings are interned: one object per distinct
//! text, pinned with a [`GcHandle`] for the life of the VM.

use std::sync::Arc;

use class_linker::object_model::{array_length, element_offset, read_reference};
use class_linker::{JavaClass, JavaField, LoaderId};
use core_types::{ObjectRef, Value, VmError};
use log::trace;
use memory_manager::GcHandle;

use crate::error::ExecResult;
use crate::thread::VmThread;
use crate::vm::Vm;

/// Classes and fields the VM touches directly, looked up once at bootstrap.
#[derive(Debug)]
pub(crate) struct WellKnown {
    pub string: Arc<JavaClass>,
    pub string_value: Arc<JavaField>,
    pub char_array: Arc<JavaClass>,
    pub throwable: Arc<JavaClass>,
    pub detail_message: Arc<JavaField>,
    pub cause: Arc<JavaField>,
    pub thread: Arc<JavaClass>,
    pub thread_name: Arc<JavaField>,
    pub thread_eetop: Arc<JavaField>,
}

impl WellKnown {
    pub(crate) fn load(vm: &Vm) -> Result<Self, VmError> {
        let class = |name: &str| {
            vm.linker()
                .load_class(LoaderId::BOOT, name)
                .map_err(|_| VmError::MissingBootClass(name.to_string()))
        };
        let field = |class: &Arc<JavaClass>, name: &str| {
            class
                .declared_field(name)
                .cloned()
                .ok_or_else(|| VmError::MissingBootClass(format!("{}.{}", class.name(), name)))
        };
        let string = class("java/lang/String")?;
        let throwable = class("java/lang/Throwable")?;
        let thread = class("java/lang/Thread")?;
        Ok(Self {
            string_value: field(&string, "value")?,
            char_array: class("[C")?,
            detail_message: field(&throwable, "detailMessage")?,
            cause: field(&throwable, "cause")?,
            thread_name: field(&thread, "name")?,
            thread_eetop: field(&thread, "eetop")?,
            string,
            throwable,
            thread,
        })
    }
}

impl Vm {
    pub(crate) fn well_known(&self) -> Result<&WellKnown, VmError> {
        self.well_known
            .get()
            .ok_or_else(|| VmError::Internal("virtual machine not bootstrapped".to_string()))
    }

    /// Allocates a string object holding `text`.
    pub(crate) fn make_string(&self, thread: &Arc<VmThread>, text: &str) -> ExecResult<ObjectRef> {
        let known = self.well_known()?;
        let units: Vec<u16> = text.encode_utf16().collect();
        let chars = self.allocate_array(thread, &known.char_array, units.len())?;
        for (index, unit) in units.iter().enumerate() {
            chars.data().write_u16(element_offset(index, 2), *unit);
        }
        let string = self.allocate_instance(thread, &known.string)?;
        self.linker
            .write_field(&string, &known.string_value, &Value::Reference(chars))?;
        Ok(string)
    }

    /// The interned string object for `text`.
    pub(crate) fn intern(&self, thread: &Arc<VmThread>, text: &str) -> ExecResult<ObjectRef> {
        if let Some(handle) = self.interned.lock().get(text) {
            return Ok(handle.object().clone());
        }
        // Allocation may collect, so the table is not locked across it.
        let string = self.make_string(thread, text)?;
        let handle = self.gc.make_handle(&string);
        let mut interned = self.interned.lock();
        if let Some(existing) = interned.get(text) {
            let winner = existing.object().clone();
            drop(interned);
            self.gc.release_handle(&handle);
            return Ok(winner);
        }
        trace!("interned {:?} at {:#x}", text, string.address());
        interned.insert(text.to_string(), handle);
        Ok(string)
    }

    /// Number of interned strings.
    pub fn interned_count(&self) -> usize {
        self.interned.lock().len()
    }

    pub(crate) fn for_each_interned(&self, visit: &mut dyn FnMut(&GcHandle)) {
        for handle in self.interned.lock().values() {
            visit(handle);
        }
    }

    /// Reads a string object back into host text. Unpaired surrogates are
    /// replaced.
    pub fn read_string(&self, string: &ObjectRef) -> Result<String, VmError> {
        let known = self.well_known()?;
        let class = self.linker.class_of(string)?;
        if !class.is_subclass_of(&known.string) {
            return Err(VmError::Internal(format!(
                "{} is not a string",
                class.java_name()
            )));
        }
        let Some(chars) = read_reference(
            string,
            known.string_value.offset(),
            self.linker.allocator().as_ref(),
        )?
        else {
            return Ok(String::new());
        };
        let length = array_length(&chars)?;
        let units: Vec<u16> = (0..length)
            .map(|index| chars.data().read_u16(element_offset(index, 2)))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    /// Reads an optional string reference; null reads as `None`.
    pub(crate) fn read_optional_string(&self, value: &Value) -> Result<Option<String>, VmError> {
        match value {
            Value::Reference(object) => self.read_string(object).map(Some),
            _ => Ok(None),
        }
    }
}
