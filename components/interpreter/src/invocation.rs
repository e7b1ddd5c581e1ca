//! Invocation protocol
//!
//! Every call, whether made by bytecode, by a native or by the embedder,
//! goes through [`Vm::invoke`]:
//!
//! 1. check the call depth and initialize the class of a static method
//! 2. push a fresh [`ExecutionContext`] onto the thread's backtrace
//! 3. acquire the monitor of a synchronized method
//! 4. run pre-invocation observers, then the interceptor or the body
//! 5. run post-invocation observers with the outcome
//! 6. release the monitor and pop the frame, on every exit path
//!
//! The same module owns class initialization and the allocation slow path.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use class_linker::{ClassLinker, FieldConstant, InitAction, JavaClass, JavaMethod, LoaderId};
use core_types::{ObjectRef, Value, VmError};
use log::{debug, trace};
use memory_manager::GcStats;

use crate::context::ExecutionContext;
use crate::error::{ExecResult, ExecutionError};
use crate::gc_integration::VmObjectGraph;
use crate::hooks::{Intercept, Invocation, MethodHook};
use crate::thread::VmThread;
use crate::vm::Vm;

/// Extra frames allowed while a `StackOverflowError` is being constructed.
const STACK_RESERVE: usize = 16;

impl Vm {
    /// Invokes `method` with `args` (receiver first, one entry per value).
    pub(crate) fn invoke(
        &self,
        thread: &Arc<VmThread>,
        method: &Arc<JavaMethod>,
        args: Vec<Value>,
    ) -> ExecResult<Option<Value>> {
        // Arguments are off the caller's stack and not yet in a frame.
        thread.hold_values(&args);
        self.check_depth(thread)?;
        let class = method.owner().ok_or_else(|| {
            VmError::Internal(format!("{} outlived its class", method.qualified_name()))
        })?;
        if method.is_static() {
            self.ensure_initialized(thread, &class)?;
        }
        self.run_tasks(thread);

        let frame = Arc::new(ExecutionContext::new(class, method.clone(), &args)?);
        thread.push_frame(frame.clone());
        method.record_invocation();
        trace!("enter {} (depth {})", method.qualified_name(), thread.depth());
        self.gc.barrier().poll();

        let outcome = self.run_frame(thread, &frame, &args);

        thread.pop_frame();
        self.gc.barrier().poll();
        trace!("exit {}", method.qualified_name());
        outcome
    }

    fn check_depth(&self, thread: &Arc<VmThread>) -> ExecResult<()> {
        let depth = thread.depth();
        let reserve = thread.reserve.load(Ordering::Acquire);
        let limit = if reserve {
            self.config.max_call_depth + STACK_RESERVE
        } else {
            self.config.max_call_depth
        };
        if depth < limit {
            return Ok(());
        }
        if reserve {
            return Err(VmError::Internal(format!(
                "stack overflow while raising StackOverflowError at depth {}",
                depth
            ))
            .into());
        }
        thread.reserve.store(true, Ordering::Release);
        let error = self.throw_new(thread, "java/lang/StackOverflowError", None);
        thread.reserve.store(false, Ordering::Release);
        Err(error)
    }

    fn run_frame(
        &self,
        thread: &Arc<VmThread>,
        frame: &Arc<ExecutionContext>,
        args: &[Value],
    ) -> ExecResult<Option<Value>> {
        let method = frame.method();
        let lock = if method.is_synchronized() {
            Some(self.lock_target(frame, args)?)
        } else {
            None
        };
        if let Some(object) = &lock {
            self.monitors
                .monitor(object.address())
                .enter(thread.id(), self.gc.barrier());
        }

        let hook = self.hooks.resolve(method);
        let invocation = Invocation {
            vm: self,
            thread,
            method,
            args,
        };
        if hook.is_observed() {
            self.hooks.before(&invocation);
        }
        let outcome = match &hook {
            MethodHook::Intercepted(interceptor) => match interceptor(&invocation) {
                Ok(Intercept::Handled(value)) => Ok(value),
                Ok(Intercept::NotHandled) => self.interpret(thread, frame),
                Err(error) => Err(error),
            },
            MethodHook::Plain | MethodHook::Observed => self.interpret(thread, frame),
        };
        match &outcome {
            Ok(Some(value)) => thread.hold_values(std::slice::from_ref(value)),
            Err(ExecutionError::Guest(exception)) => thread.hold(exception),
            _ => {}
        }
        if hook.is_observed() {
            self.hooks.after(&invocation, &outcome);
        }

        if let Some(object) = lock {
            // A frame that cannot give its monitor back leaves the VM
            // inconsistent.
            self.monitors
                .monitor(object.address())
                .exit(thread.id(), object.address())?;
        }
        outcome
    }

    /// Monitor object of a synchronized method: the receiver, or the class
    /// mirror for static methods.
    fn lock_target(&self, frame: &ExecutionContext, args: &[Value]) -> Result<ObjectRef, VmError> {
        if frame.method().is_static() {
            return frame.class().mirror().cloned().ok_or_else(|| {
                VmError::Internal(format!("{} has no mirror", frame.class().name()))
            });
        }
        args.first()
            .and_then(|receiver| receiver.as_reference().flatten())
            .cloned()
            .ok_or_else(|| {
                VmError::Internal(format!(
                    "synchronized {} entered without receiver",
                    frame.method().qualified_name()
                ))
            })
    }

    fn interpret(&self, thread: &Arc<VmThread>, frame: &Arc<ExecutionContext>) -> ExecResult<Option<Value>> {
        let method = frame.method();
        if method.is_native() {
            return Err(self.throw_new(
                thread,
                "java/lang/UnsatisfiedLinkError",
                Some(method.qualified_name()),
            ));
        }
        if method.code().is_none() {
            return Err(self.throw_new(
                thread,
                "java/lang/AbstractMethodError",
                Some(method.qualified_name()),
            ));
        }
        self.execute(thread, frame)
    }

    /// Pops the arguments of `method` off `frame`'s stack, receiver first.
    pub(crate) fn pop_arguments(
        &self,
        frame: &ExecutionContext,
        method: &JavaMethod,
    ) -> Result<Vec<Value>, VmError> {
        let parameters = &method.signature().parameters;
        let receiver = usize::from(!method.is_static());
        let mut args = Vec::with_capacity(parameters.len() + receiver);
        for parameter in parameters.iter().rev() {
            args.push(frame.stack().pop_value(parameter.slot_size() == 2)?);
        }
        if receiver == 1 {
            args.push(frame.stack().pop()?);
        }
        args.reverse();
        Ok(args)
    }

    /// Drains the deferred tasks queued for `thread`.
    pub(crate) fn run_tasks(&self, thread: &Arc<VmThread>) {
        while let Some(task) = thread.next_task() {
            task(self, thread);
        }
    }

    /// Initializes `class` on first active use: superclass first, then
    /// `ConstantValue` statics, then `<clinit>`.
    pub(crate) fn ensure_initialized(&self, thread: &Arc<VmThread>, class: &Arc<JavaClass>) -> ExecResult<()> {
        if class.is_initialized() || class.is_array() || class.is_primitive() {
            return Ok(());
        }
        match class.begin_initialization(thread.id()) {
            InitAction::Done | InitAction::Recursive => Ok(()),
            InitAction::Erroneous => Err(self.could_not_initialize(thread, class)),
            InitAction::Wait => {
                let action = self
                    .gc
                    .barrier()
                    .in_safe_region(|| class.wait_for_initialization());
                match action {
                    InitAction::Erroneous => Err(self.could_not_initialize(thread, class)),
                    _ => Ok(()),
                }
            }
            InitAction::Run => {
                debug!("initializing {}", class.name());
                let result = self.run_initializer(thread, class);
                class.finish_initialization(result.is_ok());
                if result.is_err() {
                    debug!("initialization of {} failed", class.name());
                }
                result
            }
        }
    }

    fn could_not_initialize(&self, thread: &Arc<VmThread>, class: &JavaClass) -> ExecutionError {
        self.throw_new(
            thread,
            "java/lang/NoClassDefFoundError",
            Some(format!("Could not initialize class {}", class.java_name())),
        )
    }

    fn run_initializer(&self, thread: &Arc<VmThread>, class: &Arc<JavaClass>) -> ExecResult<()> {
        if !class.is_interface() {
            if let Some(parent) = class.super_class() {
                self.ensure_initialized(thread, parent)?;
            }
        }
        for field in class.fields().iter().filter(|field| field.is_static()) {
            let value = match field.constant() {
                None => continue,
                Some(FieldConstant::Int(v)) => Value::Int(*v),
                Some(FieldConstant::Long(v)) => Value::Long(*v),
                Some(FieldConstant::Float(v)) => Value::Float(*v),
                Some(FieldConstant::Double(v)) => Value::Double(*v),
                Some(FieldConstant::String(text)) => Value::Reference(self.intern(thread, text)?),
            };
            self.linker.write_static(class, field, &value)?;
        }

        let Some(initializer) = class.declared_method("<clinit>", "()V").cloned() else {
            return Ok(());
        };
        match self.invoke(thread, &initializer, Vec::new()) {
            Ok(_) => Ok(()),
            Err(ExecutionError::Guest(exception)) => {
                let error = self
                    .linker
                    .load_class(LoaderId::BOOT, "java/lang/Error")
                    .map_err(|error| error.into_vm_error())?;
                if self.linker.class_of(&exception)?.is_subclass_of(&error) {
                    return Err(ExecutionError::Guest(exception));
                }
                let wrapped = self.new_throwable(
                    thread,
                    "java/lang/ExceptionInInitializerError",
                    None,
                    Some(&exception),
                )?;
                Err(ExecutionError::Guest(wrapped))
            }
            Err(fatal) => Err(fatal),
        }
    }

    /// Allocates an instance of `class`, collecting once before giving up
    /// with `OutOfMemoryError`.
    pub(crate) fn allocate_instance(&self, thread: &Arc<VmThread>, class: &JavaClass) -> ExecResult<ObjectRef> {
        self.allocate_with(thread, |linker| linker.allocate_instance(class))
    }

    /// Allocates an array of `class` with `length` elements.
    pub(crate) fn allocate_array(
        &self,
        thread: &Arc<VmThread>,
        class: &JavaClass,
        length: usize,
    ) -> ExecResult<ObjectRef> {
        self.allocate_with(thread, |linker| linker.allocate_array(class, length))
    }

    fn allocate_with(
        &self,
        thread: &Arc<VmThread>,
        attempt: impl Fn(&ClassLinker) -> Result<Option<ObjectRef>, VmError>,
    ) -> ExecResult<ObjectRef> {
        self.gc.barrier().poll();
        if let Some(object) = attempt(&self.linker)? {
            thread.hold(&object);
            return Ok(object);
        }
        debug!("allocation failed on thread {}, collecting", thread.id());
        self.run_collection()?;
        if let Some(object) = attempt(&self.linker)? {
            thread.hold(&object);
            return Ok(object);
        }
        match self.out_of_memory.get() {
            Some(handle) => Err(ExecutionError::Guest(handle.object().clone())),
            None => Err(VmError::InternalAllocation {
                size: 0,
                context: "heap exhausted during bootstrap".to_string(),
            }
            .into()),
        }
    }

    /// Runs one collection cycle over this VM's object graph.
    pub(crate) fn run_collection(&self) -> Result<GcStats, VmError> {
        let stats = self.gc.collect(&VmObjectGraph::new(self))?;
        if self.config.gc_stats {
            self.gc_history.lock().push(stats);
        }
        Ok(stats)
    }
}
