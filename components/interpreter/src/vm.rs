//! The virtual machine
//!
//! A [`Vm`] owns one heap, one class linker, one collector and every
//! registry built on them (threads, monitors, interned strings, hooks).
//! Nothing is process-global: two VMs in one process share no state.
//!
//! Bootstrap runs in a fixed order:
//!
//! 1. build the heap, the collector and the linker over the boot image
//! 2. link `java/lang/Object` and `java/lang/Class` and give every class
//!    its mirror
//! 3. look up the classes and fields the VM touches directly
//! 4. install the intrinsic natives as interceptors
//! 5. preallocate and pin the `OutOfMemoryError` thrown when the heap is
//!    exhausted
//!
//! Host threads take part by attaching:
//!
//! ```
//! use interpreter::{Vm, VmConfig};
//! use core_types::Value;
//!
//! let vm = Vm::new(VmConfig::default()).unwrap();
//! let main = vm.attach_thread("main").unwrap();
//! let text = vm.new_string(main.thread(), "héllo").unwrap();
//! assert_eq!(vm.read_string(&text).unwrap(), "héllo");
//!
//! let hash = vm
//!     .invoke_virtual(main.thread(), &text, "hashCode", "()I", &[])
//!     .unwrap();
//! assert!(matches!(hash, Some(Value::Int(_))));
//! ```

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;

use bytecode_system::FieldType;
use class_linker::object_model::{element_offset, write_reference};
use class_linker::{
    boot_image, ClassLinker, ClassSource, CompositeClassSource, JavaClass, JavaMethod, LoaderId,
    MemoryClassSource,
};
use core_types::{ObjectRef, StackTraceElement, Value, VmError};
use log::{debug, error, info, warn};
use memory_manager::{
    GcHandle, GcStats, HeapStats, MarkAndSweep, MemoryAllocator, SafepointBarrier, SimpleAllocator,
};
use parking_lot::{Mutex, RwLock};

use crate::config::VmConfig;
use crate::context::normalize;
use crate::error::{ExecResult, ExecutionError};
use crate::hooks::{Hooks, Intercept, Invocation};
use crate::monitor::MonitorTable;
use crate::natives::{write_all, SystemTimeSource, TimeSource, BOOT_NATIVES};
use crate::strings::WellKnown;
use crate::thread::{Entry, Task, ThreadAttachment, VmJoinHandle, VmThread};

const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

/// One virtual machine instance.
pub struct Vm {
    pub(crate) this: Weak<Vm>,
    pub(crate) config: VmConfig,
    pub(crate) heap: Arc<dyn MemoryAllocator>,
    pub(crate) linker: ClassLinker,
    pub(crate) gc: MarkAndSweep,
    pub(crate) hooks: Hooks,
    pub(crate) monitors: MonitorTable,
    pub(crate) threads: RwLock<Vec<Arc<VmThread>>>,
    next_thread_id: AtomicU64,
    /// Threads started by guest code, waited for by [`Vm::run_main`]
    started: Mutex<Vec<Arc<VmThread>>>,
    pub(crate) well_known: OnceLock<WellKnown>,
    pub(crate) interned: Mutex<HashMap<String, Arc<GcHandle>>>,
    pub(crate) backtraces: Mutex<HashMap<u64, Vec<StackTraceElement>>>,
    pub(crate) out_of_memory: OnceLock<Arc<GcHandle>>,
    output: Mutex<Box<dyn Write + Send>>,
    time: RwLock<Arc<dyn TimeSource>>,
    pub(crate) gc_history: Mutex<Vec<GcStats>>,
}

impl Vm {
    /// Boots a VM that only knows the boot image.
    pub fn new(config: VmConfig) -> Result<Arc<Vm>, VmError> {
        Self::with_class_source(config, Arc::new(MemoryClassSource::new()))
    }

    /// Boots a VM whose boot loader falls back to `classes` for names the
    /// boot image does not define.
    pub fn with_class_source(config: VmConfig, classes: Arc<dyn ClassSource>) -> Result<Arc<Vm>, VmError> {
        let image = boot_image().map_err(|error| VmError::Internal(format!("boot image: {}", error)))?;
        let source = CompositeClassSource::new()
            .with(Arc::new(image))
            .with(classes);
        let heap: Arc<dyn MemoryAllocator> = Arc::new(SimpleAllocator::new(config.heap.clone()));
        let gc = MarkAndSweep::new(heap.clone(), Arc::new(SafepointBarrier::new()));
        let linker = ClassLinker::new(heap.clone(), Arc::new(source));

        let vm = Arc::new_cyclic(|this| Vm {
            this: this.clone(),
            config,
            heap,
            linker,
            gc,
            hooks: Hooks::new(),
            monitors: MonitorTable::new(),
            threads: RwLock::new(Vec::new()),
            next_thread_id: AtomicU64::new(1),
            started: Mutex::new(Vec::new()),
            well_known: OnceLock::new(),
            interned: Mutex::new(HashMap::new()),
            backtraces: Mutex::new(HashMap::new()),
            out_of_memory: OnceLock::new(),
            output: Mutex::new(Box::new(std::io::stdout())),
            time: RwLock::new(Arc::new(SystemTimeSource::new())),
            gc_history: Mutex::new(Vec::new()),
        });
        vm.bootstrap()?;
        Ok(vm)
    }

    fn bootstrap(self: &Arc<Self>) -> Result<(), VmError> {
        self.linker.bootstrap().map_err(|error| error.into_vm_error())?;
        let _ = self.well_known.set(WellKnown::load(self)?);
        for (class, name, descriptor, native) in BOOT_NATIVES {
            self.register_native(class, name, descriptor, *native);
        }

        let attachment = self.attach_thread("vm-bootstrap")?;
        let thread = attachment.thread().clone();
        {
            let _entry = Entry::new(self, thread.clone());
            let error = self
                .new_throwable(&thread, "java/lang/OutOfMemoryError", Some("Java heap space"), None)
                .map_err(|error| self.host_failure(error))?;
            let _ = self.out_of_memory.set(self.gc.make_handle(&error));
        }
        drop(attachment);

        info!(
            "virtual machine booted: {} classes, {} natives, heap limit {} bytes",
            self.linker.class_count(),
            BOOT_NATIVES.len(),
            self.config.heap.max_heap_size
        );
        Ok(())
    }

    pub(crate) fn arc(&self) -> Result<Arc<Vm>, VmError> {
        self.this
            .upgrade()
            .ok_or_else(|| VmError::Internal("virtual machine is shutting down".to_string()))
    }

    /// Turns a failure outside guest control into a host error.
    fn host_failure(&self, error: ExecutionError) -> VmError {
        match error {
            ExecutionError::Fatal(error) => error,
            ExecutionError::Guest(exception) => VmError::Internal(format!(
                "unexpected guest exception: {}",
                self.exception_summary(&exception)
                    .unwrap_or_else(|error| error.to_string())
            )),
        }
    }

    /// The class linker.
    pub fn linker(&self) -> &ClassLinker {
        &self.linker
    }

    /// The garbage collector.
    pub fn gc(&self) -> &MarkAndSweep {
        &self.gc
    }

    /// The hook registry.
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Configuration the VM was booted with.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Current heap occupancy.
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    // Threads

    /// Attaches the calling host thread as a new guest thread.
    pub fn attach_thread(self: &Arc<Self>, name: &str) -> Result<ThreadAttachment, VmError> {
        if let Some(existing) = self.current_thread() {
            return Err(VmError::Internal(format!(
                "host thread is already attached as thread {}",
                existing.id()
            )));
        }
        let thread = Arc::new(VmThread::new(self.next_thread_id(), name));
        self.threads.write().push(thread.clone());
        let attachment = ThreadAttachment::new(self.clone(), thread.clone());
        self.enter_host(&thread)?;

        {
            let _entry = Entry::new(self, thread.clone());
            let object = self
                .new_thread_object(&thread)
                .map_err(|error| self.host_failure(error))?;
            thread.set_object(object);
        }
        debug!("attached thread {} ({})", thread.id(), thread.name());
        Ok(attachment)
    }

    /// Runs `body` on a new host thread attached to this VM.
    ///
    /// `body` runs as one entry: objects it allocates stay reachable until
    /// it returns.
    pub fn spawn_thread<F, R>(self: &Arc<Self>, name: &str, body: F) -> Result<VmJoinHandle<R>, VmError>
    where
        F: FnOnce(&Arc<Vm>, &Arc<VmThread>) -> ExecResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let vm = self.clone();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .stack_size(self.config.thread_stack_size)
            .spawn(move || {
                let attachment = vm.attach_thread(&thread_name)?;
                let thread = attachment.thread().clone();
                let _entry = Entry::new(&vm, thread.clone());
                body(&vm, &thread)
            })
            .map_err(|error| VmError::Internal(format!("cannot spawn thread {}: {}", name, error)))?;
        Ok(VmJoinHandle::new(self.clone(), handle))
    }

    fn next_thread_id(&self) -> u64 {
        self.next_thread_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Binds `thread` to the calling host thread and registers it with the
    /// safe-point barrier, idle.
    fn enter_host(&self, thread: &VmThread) -> Result<(), VmError> {
        thread.bind_host()?;
        let barrier = self.gc.barrier();
        barrier.register();
        barrier.enter_safe_region();
        Ok(())
    }

    fn new_thread_object(&self, thread: &Arc<VmThread>) -> ExecResult<ObjectRef> {
        let known = self.well_known()?;
        self.ensure_initialized(thread, &known.thread)?;
        let object = self.allocate_instance(thread, &known.thread)?;
        let name = self.make_string(thread, thread.name())?;
        self.linker
            .write_field(&object, &known.thread_name, &Value::Reference(name))?;
        self.linker
            .write_field(&object, &known.thread_eetop, &Value::Long(thread.id() as i64))?;
        Ok(object)
    }

    /// Removes `thread` from the VM. Called on the thread's own host thread.
    pub(crate) fn detach(&self, thread: &Arc<VmThread>) {
        self.threads.write().retain(|other| other.id() != thread.id());
        if thread.host() == Some(thread::current().id()) {
            self.gc.barrier().unregister();
        }
        thread.release_held(0);
        thread.mark_finished();
        debug!("detached thread {} ({})", thread.id(), thread.name());
    }

    /// The thread attached on the calling host thread.
    pub fn current_thread(&self) -> Option<Arc<VmThread>> {
        let me = thread::current().id();
        self.threads
            .read()
            .iter()
            .find(|thread| thread.host() == Some(me))
            .cloned()
    }

    /// Snapshot of the attached threads.
    pub fn threads(&self) -> Vec<Arc<VmThread>> {
        self.threads.read().clone()
    }

    /// Queues `task` for the thread with id `thread_id`. The thread runs it
    /// at its next method entry. Returns `false` for an unknown thread.
    pub fn submit_task(&self, thread_id: u64, task: Task) -> bool {
        match self.threads.read().iter().find(|thread| thread.id() == thread_id) {
            Some(thread) => {
                thread.submit(task);
                true
            }
            None => false,
        }
    }

    /// `Thread.start`: runs the `run()` method of `object` on a new host
    /// thread.
    pub(crate) fn start_guest_thread(&self, caller: &Arc<VmThread>, object: &ObjectRef) -> ExecResult<()> {
        let known = self.well_known()?;
        if self.linker.read_field(object, &known.thread_eetop)?.as_long() != Some(0) {
            return Err(self.throw_new(caller, "java/lang/IllegalThreadStateException", None));
        }
        let id = self.next_thread_id();
        let name = match self.read_optional_string(&self.linker.read_field(object, &known.thread_name)?)? {
            Some(name) => name,
            None => {
                let name = format!("Thread-{}", id);
                let string = self.make_string(caller, &name)?;
                self.linker
                    .write_field(object, &known.thread_name, &Value::Reference(string))?;
                name
            }
        };

        let thread = Arc::new(VmThread::new(id, &name));
        thread.set_object(object.clone());
        self.linker
            .write_field(object, &known.thread_eetop, &Value::Long(id as i64))?;
        self.threads.write().push(thread.clone());
        self.started.lock().push(thread.clone());

        let vm = self.arc()?;
        let spawned = thread::Builder::new()
            .name(name.clone())
            .stack_size(self.config.thread_stack_size)
            .spawn({
                let thread = thread.clone();
                move || vm.run_guest_thread(&thread)
            });
        if let Err(spawn_error) = spawned {
            self.threads.write().retain(|other| other.id() != id);
            thread.mark_finished();
            return Err(VmError::Internal(format!("cannot start thread {}: {}", name, spawn_error)).into());
        }
        debug!("started thread {} ({})", id, name);
        Ok(())
    }

    fn run_guest_thread(self: &Arc<Self>, thread: &Arc<VmThread>) {
        if let Err(error) = self.enter_host(thread) {
            error!("thread {} could not attach: {}", thread.name(), error);
            self.detach(thread);
            return;
        }
        {
            let _entry = Entry::new(self, thread.clone());
            if let Err(error) = self.run_thread_body(thread) {
                self.report_uncaught(thread, &error);
            }
        }
        self.detach(thread);
    }

    fn run_thread_body(&self, thread: &Arc<VmThread>) -> ExecResult<()> {
        let object = thread
            .object()
            .cloned()
            .ok_or_else(|| VmError::Internal(format!("thread {} has no object", thread.id())))?;
        let class = self.linker.class_of(&object)?;
        let run = class
            .find_method("run", "()V")
            .ok_or_else(|| self.no_such_method(thread, &class, "run", "()V"))?;
        self.invoke(thread, &run, vec![Value::Reference(object)])?;
        Ok(())
    }

    fn report_uncaught(&self, thread: &VmThread, failure: &ExecutionError) {
        match failure {
            ExecutionError::Guest(exception) => {
                let text = self
                    .describe_exception(exception)
                    .unwrap_or_else(|error| error.to_string());
                let line = format!("Exception in thread \"{}\" {}\n", thread.name(), text);
                if let Err(error) = self.write_output(&line) {
                    warn!("lost uncaught exception report: {}", error);
                }
            }
            ExecutionError::Fatal(error) => {
                error!("thread {} aborted: {}", thread.name(), error);
            }
        }
    }

    /// `Thread.join`: waits until the thread of `object` has finished.
    pub(crate) fn join_guest_thread(&self, object: &ObjectRef) -> ExecResult<()> {
        let target = self
            .threads
            .read()
            .iter()
            .find(|thread| thread.object() == Some(object))
            .cloned();
        if let Some(target) = target {
            self.gc.barrier().in_safe_region(|| target.wait_finished());
        }
        self.started.lock().retain(|thread| !thread.is_finished());
        Ok(())
    }

    fn wait_for_started_threads(&self) {
        loop {
            let pending = self
                .started
                .lock()
                .iter()
                .find(|thread| !thread.is_finished())
                .cloned();
            match pending {
                Some(thread) => self.gc.barrier().in_safe_region(|| thread.wait_finished()),
                None => break,
            }
        }
        self.started.lock().clear();
    }

    // Embedding API

    /// Loads (and links) `name` through the boot loader. Dotted names are
    /// accepted.
    pub fn find_class(&self, thread: &Arc<VmThread>, name: &str) -> ExecResult<Arc<JavaClass>> {
        let _entry = Entry::new(self, thread.clone());
        self.linker
            .load_class(LoaderId::BOOT, &name.replace('.', "/"))
            .map_err(|error| self.link_error(thread, error))
    }

    /// Defines a class from class-file bytes in the boot loader.
    pub fn define_class(&self, thread: &Arc<VmThread>, bytes: &[u8]) -> ExecResult<Arc<JavaClass>> {
        let _entry = Entry::new(self, thread.clone());
        let class = self
            .linker
            .define_class(LoaderId::BOOT, bytes)
            .map_err(|error| self.link_error(thread, error))?;
        debug!("defined {}", class.name());
        Ok(class)
    }

    fn no_such_method(&self, thread: &Arc<VmThread>, class: &JavaClass, name: &str, descriptor: &str) -> ExecutionError {
        self.throw_new(
            thread,
            "java/lang/NoSuchMethodError",
            Some(format!("{}.{}{}", class.name(), name, descriptor)),
        )
    }

    /// Invokes the static method `name` of `class_name`.
    pub fn invoke_static(
        &self,
        thread: &Arc<VmThread>,
        class_name: &str,
        name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> ExecResult<Option<Value>> {
        let _entry = Entry::new(self, thread.clone());
        let class = self.find_class(thread, class_name)?;
        let method = class
            .find_method(name, descriptor)
            .filter(|method| method.is_static())
            .ok_or_else(|| self.no_such_method(thread, &class, name, descriptor))?;
        self.invoke_boundary(thread, &method, args.to_vec())
    }

    /// Invokes the instance method `name` on `receiver` with virtual
    /// dispatch. `args` excludes the receiver.
    pub fn invoke_virtual(
        &self,
        thread: &Arc<VmThread>,
        receiver: &ObjectRef,
        name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> ExecResult<Option<Value>> {
        let _entry = Entry::new(self, thread.clone());
        let class = self.linker.class_of(receiver)?;
        let method = class
            .find_method(name, descriptor)
            .or_else(|| class.find_interface_method(name, descriptor))
            .filter(|method| !method.is_static())
            .ok_or_else(|| self.no_such_method(thread, &class, name, descriptor))?;
        let target = self
            .linker
            .select_method(&class, &method)
            .filter(|target| !target.is_abstract())
            .ok_or_else(|| {
                self.throw_new(
                    thread,
                    "java/lang/AbstractMethodError",
                    Some(format!("{}.{}{}", class.name(), name, descriptor)),
                )
            })?;
        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(Value::Reference(receiver.clone()));
        values.extend_from_slice(args);
        self.invoke_boundary(thread, &target, values)
    }

    /// Invokes exactly `method`, without dispatch. Instance methods take
    /// the receiver as the first argument.
    pub fn invoke_exact(
        &self,
        thread: &Arc<VmThread>,
        method: &Arc<JavaMethod>,
        args: &[Value],
    ) -> ExecResult<Option<Value>> {
        let _entry = Entry::new(self, thread.clone());
        self.invoke_boundary(thread, method, args.to_vec())
    }

    /// Checks and normalizes embedder arguments, and gives an int-like
    /// result back its declared type.
    fn invoke_boundary(
        &self,
        thread: &Arc<VmThread>,
        method: &Arc<JavaMethod>,
        args: Vec<Value>,
    ) -> ExecResult<Option<Value>> {
        let expected = method.signature().parameters.len() + usize::from(!method.is_static());
        if args.len() != expected {
            return Err(VmError::Internal(format!(
                "{} takes {} arguments, {} given",
                method.qualified_name(),
                expected,
                args.len()
            ))
            .into());
        }
        let args = args.into_iter().map(normalize).collect();
        let result = self.invoke(thread, method, args)?;
        Ok(result.map(|value| declared(value, method.signature().return_type.as_ref())))
    }

    /// Allocates an instance of `class_name` and runs its `<init>` with
    /// `descriptor`.
    pub fn new_instance(
        &self,
        thread: &Arc<VmThread>,
        class_name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> ExecResult<ObjectRef> {
        let _entry = Entry::new(self, thread.clone());
        let class = self.find_class(thread, class_name)?;
        if class.is_abstract() || class.is_interface() || class.is_array() {
            return Err(self.throw_new(thread, "java/lang/InstantiationError", Some(class.java_name())));
        }
        let constructor = class
            .declared_method("<init>", descriptor)
            .cloned()
            .ok_or_else(|| self.no_such_method(thread, &class, "<init>", descriptor))?;
        self.ensure_initialized(thread, &class)?;
        let object = self.allocate_instance(thread, &class)?;
        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(Value::Reference(object.clone()));
        values.extend_from_slice(args);
        self.invoke_boundary(thread, &constructor, values)?;
        Ok(object)
    }

    /// Allocates a string holding `text`.
    pub fn new_string(&self, thread: &Arc<VmThread>, text: &str) -> ExecResult<ObjectRef> {
        let _entry = Entry::new(self, thread.clone());
        self.make_string(thread, text)
    }

    /// Constructs an exception of `class_name` with `message`, stack trace
    /// filled in from `thread`.
    pub fn new_exception(
        &self,
        thread: &Arc<VmThread>,
        class_name: &str,
        message: Option<&str>,
    ) -> ExecResult<ObjectRef> {
        let _entry = Entry::new(self, thread.clone());
        self.new_throwable(thread, &class_name.replace('.', "/"), message, None)
    }

    /// Runs the static `main(String[])` of `class_name` on a new `main`
    /// thread, then waits for every thread the program started.
    pub fn run_main(self: &Arc<Self>, class_name: &str, args: &[String]) -> ExecResult<()> {
        let attachment = self.attach_thread("main")?;
        let thread = attachment.thread().clone();
        let (outcome, pinned) = {
            let _entry = Entry::new(self, thread.clone());
            let outcome = self.call_main(&thread, class_name, args);
            // An uncaught exception must outlive collections run by the
            // threads still being waited for.
            let pinned = match &outcome {
                Err(ExecutionError::Guest(exception)) => Some(self.gc.make_handle(exception)),
                _ => None,
            };
            (outcome, pinned)
        };
        self.wait_for_started_threads();
        if let Some(handle) = pinned {
            self.gc.release_handle(&handle);
        }
        outcome
    }

    fn call_main(&self, thread: &Arc<VmThread>, class_name: &str, args: &[String]) -> ExecResult<()> {
        let class = self.find_class(thread, class_name)?;
        let main = class
            .declared_method("main", MAIN_DESCRIPTOR)
            .filter(|method| method.is_static())
            .cloned()
            .ok_or_else(|| self.no_such_method(thread, &class, "main", MAIN_DESCRIPTOR))?;
        let known = self.well_known()?;
        let array_class = self
            .linker
            .array_class_of(&known.string)
            .map_err(|error| self.link_error(thread, error))?;
        let array = self.allocate_array(thread, &array_class, args.len())?;
        let width = self.linker.address_width();
        for (index, arg) in args.iter().enumerate() {
            let string = self.make_string(thread, arg)?;
            write_reference(&array, element_offset(index, width.bytes()), Some(&string), width)?;
        }
        debug!("running {}.main with {} arguments", class.java_name(), args.len());
        self.invoke(thread, &main, vec![Value::Reference(array)])?;
        Ok(())
    }

    /// Installs `native` as the body of `class.name(descriptor)`.
    pub fn register_native<F>(&self, class: &str, name: &str, descriptor: &str, native: F)
    where
        F: Fn(&Invocation<'_>) -> ExecResult<Option<Value>> + Send + Sync + 'static,
    {
        self.hooks.intercept(
            class,
            name,
            descriptor,
            Arc::new(move |call: &Invocation<'_>| native(call).map(Intercept::Handled)),
        );
    }

    // Heap

    /// Runs a full collection cycle.
    pub fn collect_garbage(&self) -> Result<GcStats, VmError> {
        let stats = self.run_collection()?;
        debug!(
            "collection freed {} objects ({} bytes), {} live",
            stats.freed_objects, stats.freed_bytes, stats.live_objects
        );
        Ok(stats)
    }

    /// Statistics of every cycle, when `gc_stats` is configured.
    pub fn gc_history(&self) -> Vec<GcStats> {
        self.gc_history.lock().clone()
    }

    /// Pins `object` until the handle is released.
    pub fn make_handle(&self, object: &ObjectRef) -> Arc<GcHandle> {
        self.gc.make_handle(object)
    }

    /// Releases one acquisition of `handle`. Returns `true` once the object
    /// is no longer pinned.
    pub fn release_handle(&self, handle: &GcHandle) -> bool {
        self.gc.release_handle(handle)
    }

    /// Id of the thread owning the monitor of `object`.
    pub fn monitor_owner(&self, object: &ObjectRef) -> Option<u64> {
        self.monitors
            .get(object.address())
            .and_then(|monitor| monitor.owner())
    }

    // Collaborators

    /// Redirects `System.out` and uncaught exception reports.
    pub fn set_output(&self, output: Box<dyn Write + Send>) {
        *self.output.lock() = output;
    }

    pub(crate) fn write_output(&self, text: &str) -> Result<(), VmError> {
        let mut output = self.output.lock();
        write_all(output.as_mut(), text)
    }

    /// Replaces the clock behind `System.currentTimeMillis`/`nanoTime`.
    pub fn set_time_source(&self, source: Arc<dyn TimeSource>) {
        *self.time.write() = source;
    }

    pub(crate) fn time_source(&self) -> Arc<dyn TimeSource> {
        self.time.read().clone()
    }
}

/// Gives an int computed on the stack the type `ty` declares.
fn declared(value: Value, ty: Option<&FieldType>) -> Value {
    match (ty, value.as_int()) {
        (Some(FieldType::Boolean), Some(v)) => Value::Boolean(v != 0),
        (Some(FieldType::Byte), Some(v)) => Value::Byte(v as i8),
        (Some(FieldType::Char), Some(v)) => Value::Char(v as u16),
        (Some(FieldType::Short), Some(v)) => Value::Short(v as i16),
        _ => value,
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("classes", &self.linker.class_count())
            .field("threads", &self.threads.read().len())
            .field("monitors", &self.monitors.len())
            .field("gc_cycles", &self.gc.cycles())
            .finish()
    }
}
