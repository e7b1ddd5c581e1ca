//! Guest exceptions raised by the VM
//!
//! Every guest-visible failure the interpreter detects (null dereference,
//! bounds violations, link failures, ...) becomes an ordinary exception
//! object built through the class's own constructor, so guest code sees
//! the same objects it would construct itself.

use std::collections::HashSet;
use std::sync::Arc;

use class_linker::{LinkError, LoaderId};
use core_types::{ObjectRef, StackTraceElement, Value, VmError};
use log::debug;

use crate::error::{ExecResult, ExecutionError};
use crate::thread::VmThread;
use crate::vm::Vm;

const STRING_CTOR: &str = "(Ljava/lang/String;)V";
const CAUSE_CTOR: &str = "(Ljava/lang/String;Ljava/lang/Throwable;)V";

impl Vm {
    /// Builds a `class_name` exception with `message` and returns it as an
    /// error ready to propagate. A failure while building it is returned
    /// instead.
    pub(crate) fn throw_new(
        &self,
        thread: &Arc<VmThread>,
        class_name: &str,
        message: Option<String>,
    ) -> ExecutionError {
        match self.new_throwable(thread, class_name, message.as_deref(), None) {
            Ok(exception) => ExecutionError::Guest(exception),
            Err(error) => error,
        }
    }

    /// Constructs an exception object. With a cause, the
    /// `(String, Throwable)` constructor is used.
    pub(crate) fn new_throwable(
        &self,
        thread: &Arc<VmThread>,
        class_name: &str,
        message: Option<&str>,
        cause: Option<&ObjectRef>,
    ) -> ExecResult<ObjectRef> {
        let class = self
            .linker
            .load_class(LoaderId::BOOT, class_name)
            .map_err(|_| VmError::MissingBootClass(class_name.to_string()))?;
        self.ensure_initialized(thread, &class)?;
        let exception = self.allocate_instance(thread, &class)?;
        let message = match message {
            Some(text) => Value::Reference(self.make_string(thread, text)?),
            None => Value::Null,
        };
        let (descriptor, args) = match cause {
            Some(cause) => (
                CAUSE_CTOR,
                vec![
                    Value::Reference(exception.clone()),
                    message,
                    Value::Reference(cause.clone()),
                ],
            ),
            None => (STRING_CTOR, vec![Value::Reference(exception.clone()), message]),
        };
        let constructor = class
            .declared_method("<init>", descriptor)
            .cloned()
            .ok_or_else(|| {
                VmError::MissingBootClass(format!("{}.<init>{}", class_name, descriptor))
            })?;
        self.invoke(thread, &constructor, args)?;
        debug!("raised {}", class_name);
        Ok(exception)
    }

    /// Turns a link failure into the guest error that reports it, or into
    /// a fatal error when the guest cannot observe it.
    pub(crate) fn link_error(&self, thread: &Arc<VmThread>, error: LinkError) -> ExecutionError {
        let Some(class_name) = error.guest_class() else {
            return ExecutionError::Fatal(error.into_vm_error());
        };
        let message = match &error {
            LinkError::ClassNotFound(name) => name.clone(),
            LinkError::NoSuchField { class, name } => format!("{}.{}", class, name),
            LinkError::NoSuchMethod {
                class,
                name,
                descriptor,
            } => format!("{}.{} {}", class, name, descriptor),
            other => other.to_string(),
        };
        self.throw_new(thread, class_name, Some(message))
    }

    /// Records the stack trace of `exception`.
    pub(crate) fn record_backtrace(&self, exception: &ObjectRef, trace: Vec<StackTraceElement>) {
        self.backtraces.lock().insert(exception.address(), trace);
    }

    pub(crate) fn forget_backtrace(&self, address: u64) {
        self.backtraces.lock().remove(&address);
    }

    /// Stack trace captured when `exception` was constructed, innermost
    /// frame first.
    pub fn backtrace(&self, exception: &ObjectRef) -> Vec<StackTraceElement> {
        self.backtraces
            .lock()
            .get(&exception.address())
            .cloned()
            .unwrap_or_default()
    }

    /// `java.lang.Foo: message`, the way `Throwable.toString` prints.
    pub(crate) fn exception_summary(&self, exception: &ObjectRef) -> Result<String, VmError> {
        let known = self.well_known()?;
        let class = self.linker.class_of(exception)?;
        let message = self.linker.read_field(exception, &known.detail_message)?;
        Ok(match self.read_optional_string(&message)? {
            Some(text) => format!("{}: {}", class.java_name(), text),
            None => class.java_name(),
        })
    }

    /// Renders `exception` with its stack trace and cause chain.
    ///
    /// ```text
    /// java.lang.IllegalStateException: outer
    ///     at demo.Main.run(Main.java:12)
    /// Caused by: java.lang.ArithmeticException: / by zero
    ///     at demo.Main.divide(Main.java:20)
    /// ```
    pub fn describe_exception(&self, exception: &ObjectRef) -> Result<String, VmError> {
        let known = self.well_known()?;
        let mut text = String::new();
        let mut seen = HashSet::new();
        let mut current = Some(exception.clone());
        while let Some(throwable) = current.take() {
            if !seen.insert(throwable.address()) {
                break;
            }
            if !text.is_empty() {
                text.push_str("\nCaused by: ");
            }
            text.push_str(&self.exception_summary(&throwable)?);
            for element in self.backtrace(&throwable) {
                text.push_str("\n\tat ");
                text.push_str(&element.to_string());
            }
            current = self
                .linker
                .read_field(&throwable, &known.cause)?
                .as_reference()
                .flatten()
                .cloned();
        }
        Ok(text)
    }
}
