//! Intrinsic native methods
//!
//! The boot image declares the methods below `native`. Each is installed as
//! the interceptor of its method when the VM boots, so the interpreter has
//! no per-method special cases; embedders add their own natives with
//! [`Vm::register_native`](crate::Vm::register_native).

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use class_linker::object_model::{array_length, element_offset, read_reference, write_reference};
use class_linker::{JavaClass, LoaderId};
use core_types::{ObjectRef, Value, VmError};
use log::trace;

use crate::error::{ExecResult, ExecutionError};
use crate::hooks::Invocation;

/// Body of a native method. `Ok(None)` is a `void` return.
pub type NativeFn = fn(&Invocation<'_>) -> ExecResult<Option<Value>>;

/// Clock behind `System.currentTimeMillis` and `System.nanoTime`.
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn current_time_millis(&self) -> i64;

    /// Monotonic nanoseconds from an arbitrary origin.
    fn nano_time(&self) -> i64;
}

/// Host clocks.
#[derive(Debug)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    /// Creates a source whose `nano_time` starts now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn current_time_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0)
    }

    fn nano_time(&self) -> i64 {
        self.origin.elapsed().as_nanos() as i64
    }
}

/// Identity hash of an object, stable for its lifetime.
pub(crate) fn identity_hash(object: &ObjectRef) -> i32 {
    let address = object.address();
    ((address >> 3) ^ (address >> 35)) as i32
}

const OBJECT: &str = "java/lang/Object";
const CLASS: &str = "java/lang/Class";
const STRING: &str = "java/lang/String";
const THROWABLE: &str = "java/lang/Throwable";
const THREAD: &str = "java/lang/Thread";
const SYSTEM: &str = "java/lang/System";
const PRINT_STREAM: &str = "java/io/PrintStream";

/// Natives installed at boot.
pub(crate) const BOOT_NATIVES: &[(&str, &str, &str, NativeFn)] = &[
    (OBJECT, "hashCode", "()I", object_hash_code),
    (OBJECT, "getClass", "()Ljava/lang/Class;", object_get_class),
    (OBJECT, "toString", "()Ljava/lang/String;", object_to_string),
    (OBJECT, "clone", "()Ljava/lang/Object;", object_clone),
    (OBJECT, "wait", "(J)V", object_wait),
    (OBJECT, "notify", "()V", object_notify),
    (OBJECT, "notifyAll", "()V", object_notify_all),
    (CLASS, "getName", "()Ljava/lang/String;", class_get_name),
    (CLASS, "isInterface", "()Z", class_is_interface),
    (CLASS, "isArray", "()Z", class_is_array),
    (CLASS, "getSuperclass", "()Ljava/lang/Class;", class_get_superclass),
    (STRING, "equals", "(Ljava/lang/Object;)Z", string_equals),
    (STRING, "intern", "()Ljava/lang/String;", string_intern),
    (STRING, "concat", "(Ljava/lang/String;)Ljava/lang/String;", string_concat),
    (STRING, "valueOf", "(I)Ljava/lang/String;", string_value_of_int),
    (STRING, "valueOf", "(J)Ljava/lang/String;", string_value_of_long),
    (THROWABLE, "fillInStackTrace", "()Ljava/lang/Throwable;", throwable_fill_in_stack_trace),
    (THROWABLE, "toString", "()Ljava/lang/String;", throwable_to_string),
    (THROWABLE, "printStackTrace", "()V", throwable_print_stack_trace),
    (THREAD, "currentThread", "()Ljava/lang/Thread;", thread_current_thread),
    (THREAD, "sleep", "(J)V", thread_sleep),
    (THREAD, "yield", "()V", thread_yield),
    (THREAD, "getName", "()Ljava/lang/String;", thread_get_name),
    (THREAD, "start", "()V", thread_start),
    (THREAD, "join", "()V", thread_join),
    (SYSTEM, "arraycopy", "(Ljava/lang/Object;ILjava/lang/Object;II)V", system_arraycopy),
    (SYSTEM, "currentTimeMillis", "()J", system_current_time_millis),
    (SYSTEM, "nanoTime", "()J", system_nano_time),
    (SYSTEM, "identityHashCode", "(Ljava/lang/Object;)I", system_identity_hash_code),
    (SYSTEM, "gc", "()V", system_gc),
    (PRINT_STREAM, "println", "()V", print_newline),
    (PRINT_STREAM, "println", "(Ljava/lang/String;)V", print_line_string),
    (PRINT_STREAM, "println", "(I)V", print_line_int),
    (PRINT_STREAM, "println", "(J)V", print_line_long),
    (PRINT_STREAM, "print", "(Ljava/lang/String;)V", print_string),
];

fn string_result(call: &Invocation<'_>, text: &str) -> ExecResult<Option<Value>> {
    let string = call.vm.make_string(call.thread, text)?;
    Ok(Some(Value::Reference(string)))
}

fn boolean(value: bool) -> Option<Value> {
    Some(Value::Int(value as i32))
}

fn null_pointer(call: &Invocation<'_>) -> ExecutionError {
    call.vm
        .throw_new(call.thread, "java/lang/NullPointerException", None)
}

fn monitor_failure(call: &Invocation<'_>, error: VmError) -> ExecutionError {
    match error {
        VmError::MonitorNotOwned { .. } => call.vm.throw_new(
            call.thread,
            "java/lang/IllegalMonitorStateException",
            Some("current thread is not owner".to_string()),
        ),
        other => ExecutionError::Fatal(other),
    }
}

fn negative_timeout(call: &Invocation<'_>) -> ExecutionError {
    call.vm.throw_new(
        call.thread,
        "java/lang/IllegalArgumentException",
        Some("timeout value is negative".to_string()),
    )
}

fn object_hash_code(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    Ok(Some(Value::Int(identity_hash(call.this()?))))
}

fn object_get_class(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let class = call.vm.linker().class_of(call.this()?)?;
    Ok(Some(Value::from_object(class.mirror().cloned())))
}

fn object_to_string(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let this = call.this()?;
    let class = call.vm.linker().class_of(this)?;
    let text = format!("{}@{:x}", class.java_name(), identity_hash(this));
    string_result(call, &text)
}

fn object_clone(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let vm = call.vm;
    let this = call.this()?;
    let class = vm.linker().class_of(this)?;
    let copy = if class.is_array() {
        vm.allocate_array(call.thread, &class, array_length(this)?)?
    } else {
        let cloneable = vm
            .linker()
            .load_class(LoaderId::BOOT, "java/lang/Cloneable")
            .map_err(|error| error.into_vm_error())?;
        if !class.is_assignable_to(&cloneable) {
            return Err(vm.throw_new(
                call.thread,
                "java/lang/CloneNotSupportedException",
                Some(class.java_name()),
            ));
        }
        vm.allocate_instance(call.thread, &class)?
    };
    // Everything after the collector's mark byte is copied.
    let size = this.block().size().min(copy.block().size());
    copy.data().copy_from(1, this.data(), 1, size - 1);
    Ok(Some(Value::Reference(copy)))
}

fn object_wait(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let this = call.this()?;
    let millis = call.long(1)?;
    if millis < 0 {
        return Err(negative_timeout(call));
    }
    let timeout = (millis > 0).then(|| Duration::from_millis(millis as u64));
    let monitor = call.vm.monitors.monitor(this.address());
    monitor
        .wait(call.thread.id(), this.address(), timeout, call.vm.gc().barrier())
        .map_err(|error| monitor_failure(call, error))?;
    Ok(None)
}

fn object_notify(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let this = call.this()?;
    let monitor = call.vm.monitors.monitor(this.address());
    monitor
        .notify(call.thread.id(), this.address())
        .map_err(|error| monitor_failure(call, error))?;
    Ok(None)
}

fn object_notify_all(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let this = call.this()?;
    let monitor = call.vm.monitors.monitor(this.address());
    monitor
        .notify_all(call.thread.id(), this.address())
        .map_err(|error| monitor_failure(call, error))?;
    Ok(None)
}

fn mirrored_class(call: &Invocation<'_>) -> Result<Arc<JavaClass>, VmError> {
    call.vm.linker().mirror_target(call.this()?)
}

fn class_get_name(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let class = mirrored_class(call)?;
    string_result(call, &class.java_name())
}

fn class_is_interface(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    Ok(boolean(mirrored_class(call)?.is_interface()))
}

fn class_is_array(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    Ok(boolean(mirrored_class(call)?.is_array()))
}

fn class_get_superclass(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let class = mirrored_class(call)?;
    if class.is_interface() || class.is_primitive() {
        return Ok(Some(Value::Null));
    }
    let mirror = class.super_class().and_then(|parent| parent.mirror().cloned());
    Ok(Some(Value::from_object(mirror)))
}

fn string_equals(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let vm = call.vm;
    let this = call.this()?;
    let Some(other) = call.reference(1)? else {
        return Ok(boolean(false));
    };
    if this == other {
        return Ok(boolean(true));
    }
    let string = &vm.well_known()?.string;
    if !vm.linker().class_of(other)?.is_subclass_of(string) {
        return Ok(boolean(false));
    }
    Ok(boolean(vm.read_string(this)? == vm.read_string(other)?))
}

fn string_intern(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let text = call.vm.read_string(call.this()?)?;
    let interned = call.vm.intern(call.thread, &text)?;
    Ok(Some(Value::Reference(interned)))
}

fn string_concat(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let Some(other) = call.reference(1)? else {
        return Err(null_pointer(call));
    };
    let mut text = call.vm.read_string(call.this()?)?;
    text.push_str(&call.vm.read_string(other)?);
    string_result(call, &text)
}

fn string_value_of_int(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    string_result(call, &call.int(0)?.to_string())
}

fn string_value_of_long(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    string_result(call, &call.long(0)?.to_string())
}

/// Captures the caller's backtrace, leaving out this native and the
/// constructors of the exception being built.
fn throwable_fill_in_stack_trace(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let vm = call.vm;
    let this = call.this()?;
    let throwable = &vm.well_known()?.throwable;
    let frames = call.thread.frames();
    let mut innermost = frames.iter().rev().peekable();
    while let Some(frame) = innermost.peek() {
        let method = frame.method();
        let skip = (method.name() == "fillInStackTrace" || method.is_constructor())
            && frame.class().is_subclass_of(throwable);
        if !skip {
            break;
        }
        innermost.next();
    }
    let trace = innermost.map(|frame| frame.stack_trace_element()).collect();
    vm.record_backtrace(this, trace);
    Ok(Some(Value::Reference(this.clone())))
}

fn throwable_to_string(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let summary = call.vm.exception_summary(call.this()?)?;
    string_result(call, &summary)
}

fn throwable_print_stack_trace(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let text = call.vm.describe_exception(call.this()?)?;
    call.vm.write_output(&format!("{}\n", text))?;
    Ok(None)
}

fn thread_current_thread(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    Ok(Some(Value::from_object(call.thread.object().cloned())))
}

fn thread_sleep(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let millis = call.long(0)?;
    if millis < 0 {
        return Err(negative_timeout(call));
    }
    call.vm
        .gc()
        .barrier()
        .in_safe_region(|| std::thread::sleep(Duration::from_millis(millis as u64)));
    Ok(None)
}

fn thread_yield(_call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    std::thread::yield_now();
    Ok(None)
}

fn thread_get_name(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let known = call.vm.well_known()?;
    let name = call.vm.linker().read_field(call.this()?, &known.thread_name)?;
    Ok(Some(name))
}

fn thread_start(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    call.vm.start_guest_thread(call.thread, call.this()?)?;
    Ok(None)
}

fn thread_join(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    call.vm.join_guest_thread(call.this()?)?;
    Ok(None)
}

fn system_arraycopy(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let vm = call.vm;
    let (Some(src), Some(dst)) = (call.reference(0)?, call.reference(2)?) else {
        return Err(null_pointer(call));
    };
    let (src_pos, dst_pos, length) = (call.int(1)?, call.int(3)?, call.int(4)?);
    let array_store = |message: String| {
        vm.throw_new(call.thread, "java/lang/ArrayStoreException", Some(message))
    };

    let src_class = vm.linker().class_of(src)?;
    let dst_class = vm.linker().class_of(dst)?;
    let (Some(src_kind), Some(dst_kind)) = (src_class.element_kind(), dst_class.element_kind()) else {
        let culprit = if src_class.is_array() { &dst_class } else { &src_class };
        return Err(array_store(format!(
            "arraycopy: {} type {} is not an array",
            if src_class.is_array() { "destination" } else { "source" },
            culprit.java_name()
        )));
    };
    if src_kind != dst_kind {
        return Err(array_store(format!(
            "arraycopy: type mismatch: can not copy {} into {}",
            src_class.java_name(),
            dst_class.java_name()
        )));
    }

    let src_len = array_length(src)?;
    let dst_len = array_length(dst)?;
    let out_of_bounds = |which: &str, index: i64, len: usize| {
        vm.throw_new(
            call.thread,
            "java/lang/ArrayIndexOutOfBoundsException",
            Some(format!(
                "arraycopy: {} index {} out of bounds for length {}",
                which, index, len
            )),
        )
    };
    if length < 0 {
        return Err(out_of_bounds("length", length as i64, src_len));
    }
    if src_pos < 0 || src_pos as i64 + length as i64 > src_len as i64 {
        return Err(out_of_bounds("last source", src_pos as i64 + length as i64 - 1, src_len));
    }
    if dst_pos < 0 || dst_pos as i64 + length as i64 > dst_len as i64 {
        return Err(out_of_bounds("last destination", dst_pos as i64 + length as i64 - 1, dst_len));
    }

    let (src_pos, dst_pos, length) = (src_pos as usize, dst_pos as usize, length as usize);
    let width = vm.linker().address_width();
    let element = src_kind.size(width);
    let bulk = !src_kind.is_reference()
        || match (src_class.component(), dst_class.component()) {
            (Some(from), Some(to)) => from.is_assignable_to(to),
            _ => false,
        };
    if bulk {
        dst.data().copy_from(
            element_offset(dst_pos, element),
            src.data(),
            element_offset(src_pos, element),
            length * element,
        );
        return Ok(None);
    }

    let Some(target) = dst_class.component() else {
        return Ok(None);
    };
    let allocator = vm.linker().allocator().clone();
    for index in 0..length {
        let value = read_reference(src, element_offset(src_pos + index, element), allocator.as_ref())?;
        if let Some(object) = &value {
            let class = vm.linker().class_of(object)?;
            if !class.is_assignable_to(target) {
                return Err(array_store(format!(
                    "arraycopy: element type mismatch: can not store {} into {}",
                    class.java_name(),
                    dst_class.java_name()
                )));
            }
        }
        write_reference(dst, element_offset(dst_pos + index, element), value.as_ref(), width)?;
    }
    Ok(None)
}

fn system_current_time_millis(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    Ok(Some(Value::Long(call.vm.time_source().current_time_millis())))
}

fn system_nano_time(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    Ok(Some(Value::Long(call.vm.time_source().nano_time())))
}

fn system_identity_hash_code(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let hash = call.reference(0)?.map(identity_hash).unwrap_or(0);
    Ok(Some(Value::Int(hash)))
}

fn system_gc(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    let stats = call.vm.run_collection()?;
    trace!("System.gc freed {} objects", stats.freed_objects);
    Ok(None)
}

fn print_text(call: &Invocation<'_>, text: &str, newline: bool) -> ExecResult<Option<Value>> {
    let mut line = text.to_string();
    if newline {
        line.push('\n');
    }
    call.vm.write_output(&line)?;
    Ok(None)
}

fn string_argument(call: &Invocation<'_>) -> Result<String, VmError> {
    Ok(call
        .vm
        .read_optional_string(call.arg(1)?)?
        .unwrap_or_else(|| "null".to_string()))
}

fn print_newline(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    print_text(call, "", true)
}

fn print_line_string(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    print_text(call, &string_argument(call)?, true)
}

fn print_line_int(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    print_text(call, &call.int(1)?.to_string(), true)
}

fn print_line_long(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    print_text(call, &call.long(1)?.to_string(), true)
}

fn print_string(call: &Invocation<'_>) -> ExecResult<Option<Value>> {
    print_text(call, &string_argument(call)?, false)
}

/// Writes `text` to a host writer, mapping I/O failures to fatal errors.
pub(crate) fn write_all(out: &mut dyn Write, text: &str) -> Result<(), VmError> {
    out.write_all(text.as_bytes())
        .and_then(|_| out.flush())
        .map_err(|error| VmError::Internal(format!("output failed: {}", error)))
}
