//! Invocation hooks
//!
//! The seam through which natives, intrinsics and embedders attach behavior
//! to methods. Three extension points exist:
//!
//! - pre-invocation observers, run in registration order before the body
//! - post-invocation observers, run in registration order after the body,
//!   whatever its outcome
//! - at most one interceptor per method, which may replace the body
//!
//! The interpreter asks [`Hooks::resolve`] once per call for a
//! [`MethodHook`]; the answer is cached per method until the next
//! registration.

use std::collections::HashMap;
use std::sync::Arc;

use class_linker::{qualified_name, JavaMethod};
use core_types::{ObjectRef, Value, VmError};
use parking_lot::RwLock;

use crate::error::ExecResult;
use crate::thread::VmThread;
use crate::vm::Vm;

/// One call as seen by hooks.
pub struct Invocation<'a> {
    /// The virtual machine
    pub vm: &'a Vm,
    /// Calling thread
    pub thread: &'a Arc<VmThread>,
    /// Method being invoked
    pub method: &'a Arc<JavaMethod>,
    /// Arguments, receiver first for instance methods. Wide values take
    /// one entry.
    pub args: &'a [Value],
}

impl<'a> Invocation<'a> {
    /// Argument `index`.
    pub fn arg(&self, index: usize) -> Result<&Value, VmError> {
        self.args.get(index).ok_or_else(|| {
            VmError::Internal(format!(
                "{} has no argument {}",
                self.method.qualified_name(),
                index
            ))
        })
    }

    /// The receiver of an instance method.
    pub fn this(&self) -> Result<&ObjectRef, VmError> {
        self.reference(0)?.ok_or_else(|| {
            VmError::Internal(format!("{} called without receiver", self.method.qualified_name()))
        })
    }

    /// Int-like argument `index`.
    pub fn int(&self, index: usize) -> Result<i32, VmError> {
        let value = self.arg(index)?;
        value.as_int().ok_or_else(|| self.mismatch(index, "int", value))
    }

    /// Long argument `index`.
    pub fn long(&self, index: usize) -> Result<i64, VmError> {
        let value = self.arg(index)?;
        value.as_long().ok_or_else(|| self.mismatch(index, "long", value))
    }

    /// Reference argument `index`; `None` is null.
    pub fn reference(&self, index: usize) -> Result<Option<&ObjectRef>, VmError> {
        let value = self.arg(index)?;
        value
            .as_reference()
            .ok_or_else(|| self.mismatch(index, "reference", value))
    }

    fn mismatch(&self, index: usize, expected: &str, found: &Value) -> VmError {
        VmError::Internal(format!(
            "argument {} of {}: expected {}, found {}",
            index,
            self.method.qualified_name(),
            expected,
            found.type_name()
        ))
    }
}

/// Outcome of an interceptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Intercept {
    /// The body was replaced; the value is the method's result
    Handled(Option<Value>),
    /// Interpret the method normally
    NotHandled,
}

/// Observer run before a method body.
pub type Observer = Arc<dyn Fn(&Invocation<'_>) + Send + Sync>;

/// Observer run after a method body with its outcome.
pub type PostObserver = Arc<dyn Fn(&Invocation<'_>, &ExecResult<Option<Value>>) + Send + Sync>;

/// Replacement for a method body.
pub type Interceptor = Arc<dyn Fn(&Invocation<'_>) -> ExecResult<Intercept> + Send + Sync>;

/// Hook capability of one method.
#[derive(Clone)]
pub enum MethodHook {
    /// Nothing registered: interpret directly
    Plain,
    /// Observers only
    Observed,
    /// An interceptor; observers run too
    Intercepted(Interceptor),
}

impl MethodHook {
    /// True unless the method runs without any hook.
    pub fn is_observed(&self) -> bool {
        !matches!(self, MethodHook::Plain)
    }
}

impl std::fmt::Debug for MethodHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MethodHook::Plain => write!(f, "Plain"),
            MethodHook::Observed => write!(f, "Observed"),
            MethodHook::Intercepted(_) => write!(f, "Intercepted"),
        }
    }
}

/// Hook registry of one VM.
pub struct Hooks {
    pre: RwLock<Vec<Observer>>,
    post: RwLock<Vec<PostObserver>>,
    interceptors: RwLock<HashMap<String, Interceptor>>,
    /// Resolution per method, keyed like `interceptors`
    resolved: RwLock<HashMap<String, MethodHook>>,
}

impl Hooks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            pre: RwLock::new(Vec::new()),
            post: RwLock::new(Vec::new()),
            interceptors: RwLock::new(HashMap::new()),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Adds an observer run before every method body.
    pub fn add_pre_observer(&self, observer: Observer) {
        self.pre.write().push(observer);
        self.invalidate();
    }

    /// Adds an observer run after every method body.
    pub fn add_post_observer(&self, observer: PostObserver) {
        self.post.write().push(observer);
        self.invalidate();
    }

    /// Installs the interceptor of `class.name(descriptor)`, returning the
    /// one it replaces.
    pub fn intercept(
        &self,
        class: &str,
        name: &str,
        descriptor: &str,
        interceptor: Interceptor,
    ) -> Option<Interceptor> {
        let previous = self
            .interceptors
            .write()
            .insert(qualified_name(class, name, descriptor), interceptor);
        self.invalidate();
        previous
    }

    /// Removes the interceptor of `class.name(descriptor)`.
    pub fn remove_interceptor(&self, class: &str, name: &str, descriptor: &str) -> Option<Interceptor> {
        let removed = self
            .interceptors
            .write()
            .remove(&qualified_name(class, name, descriptor));
        self.invalidate();
        removed
    }

    /// True if `class.name(descriptor)` has an interceptor.
    pub fn is_intercepted(&self, class: &str, name: &str, descriptor: &str) -> bool {
        self.interceptors
            .read()
            .contains_key(&qualified_name(class, name, descriptor))
    }

    fn invalidate(&self) {
        self.resolved.write().clear();
    }

    /// Hook capability of `method`.
    pub fn resolve(&self, method: &Arc<JavaMethod>) -> MethodHook {
        let key = method.qualified_name();
        if let Some(hook) = self.resolved.read().get(&key) {
            return hook.clone();
        }
        let hook = match self.interceptors.read().get(&key) {
            Some(interceptor) => MethodHook::Intercepted(interceptor.clone()),
            None if !self.pre.read().is_empty() || !self.post.read().is_empty() => {
                MethodHook::Observed
            }
            None => MethodHook::Plain,
        };
        self.resolved.write().insert(key, hook.clone());
        hook
    }

    /// Runs the pre-invocation observers.
    pub fn before(&self, invocation: &Invocation<'_>) {
        let observers = self.pre.read().clone();
        for observer in observers {
            observer(invocation);
        }
    }

    /// Runs the post-invocation observers.
    pub fn after(&self, invocation: &Invocation<'_>, outcome: &ExecResult<Option<Value>>) {
        let observers = self.post.read().clone();
        for observer in observers {
            observer(invocation, outcome);
        }
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("pre", &self.pre.read().len())
            .field("post", &self.post.read().len())
            .field("interceptors", &self.interceptors.read().len())
            .finish()
    }
}
