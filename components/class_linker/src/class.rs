//! The type model: linked classes.
//!
//! A [`JavaClass`] is built once per (loader, name) pair and never mutated
//! afterwards, apart from its initialization state and the lazily created
//! mirror and array class.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use bytecode_system::AccessFlags;
use core_types::ObjectRef;
use parking_lot::{Condvar, Mutex};

use crate::loader::LoaderId;
use crate::member::{FieldKind, JavaField, JavaMethod};
use crate::runtime_pool::RuntimeConstantPool;

/// Index of a class in the linker's registry; stored in object headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// What a class describes.
#[derive(Debug, Clone)]
pub enum ClassKind {
    /// Ordinary class or interface
    Instance,
    /// Array class
    Array {
        /// Element class (a primitive class for primitive arrays)
        component: Arc<JavaClass>,
        /// Storage kind of each element
        element: FieldKind,
    },
    /// Primitive type; `None` for `void`
    Primitive(Option<FieldKind>),
}

/// Initialization progress of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// Linked, static initializer not run
    Linked,
    /// Static initializer running on the given thread
    Initializing(u64),
    /// Ready for use
    Initialized,
    /// Static initializer failed; the class is unusable
    Erroneous,
}

/// What a thread asking to initialize a class must do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitAction {
    /// The caller now owns initialization and must run it, then call
    /// [`JavaClass::finish_initialization`]
    Run,
    /// Already initialized
    Done,
    /// The caller is already initializing this class
    Recursive,
    /// Another thread is initializing; call [`JavaClass::wait_for_initialization`]
    Wait,
    /// Initialization failed earlier
    Erroneous,
}

/// A linked class.
pub struct JavaClass {
    pub(crate) this: Weak<JavaClass>,
    pub(crate) id: ClassId,
    pub(crate) name: String,
    pub(crate) loader: LoaderId,
    pub(crate) access: AccessFlags,
    pub(crate) kind: ClassKind,
    pub(crate) super_class: Option<Arc<JavaClass>>,
    pub(crate) interfaces: Vec<Arc<JavaClass>>,
    pub(crate) fields: Vec<Arc<JavaField>>,
    pub(crate) methods: Vec<Arc<JavaMethod>>,
    pub(crate) vtable: Vec<Arc<JavaMethod>>,
    pub(crate) instance_size: usize,
    pub(crate) static_size: usize,
    pub(crate) reference_offsets: Vec<usize>,
    pub(crate) static_reference_offsets: Vec<usize>,
    pub(crate) constant_pool: Option<RuntimeConstantPool>,
    pub(crate) source_file: Option<String>,
    pub(crate) mirror: OnceLock<ObjectRef>,
    pub(crate) array_class: OnceLock<ClassId>,
    pub(crate) init: Mutex<InitState>,
    pub(crate) init_done: Condvar,
}

impl JavaClass {
    /// Shared handle to this class.
    pub fn arc(&self) -> Option<Arc<JavaClass>> {
        self.this.upgrade()
    }

    /// Registry id.
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Internal name (`java/lang/String`, `[I`, `int`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted name as reported to guest code.
    pub fn java_name(&self) -> String {
        self.name.replace('/', ".")
    }

    /// Defining loader.
    pub fn loader(&self) -> LoaderId {
        self.loader
    }

    /// Flags.
    pub fn access(&self) -> AccessFlags {
        self.access
    }

    /// Class kind.
    pub fn kind(&self) -> &ClassKind {
        &self.kind
    }

    /// Direct superclass.
    pub fn super_class(&self) -> Option<&Arc<JavaClass>> {
        self.super_class.as_ref()
    }

    /// Direct superinterfaces.
    pub fn interfaces(&self) -> &[Arc<JavaClass>] {
        &self.interfaces
    }

    /// Declared fields, instance and static.
    pub fn fields(&self) -> &[Arc<JavaField>] {
        &self.fields
    }

    /// Declared methods.
    pub fn methods(&self) -> &[Arc<JavaMethod>] {
        &self.methods
    }

    /// Virtual method table.
    pub fn vtable(&self) -> &[Arc<JavaMethod>] {
        &self.vtable
    }

    /// Size of an instance in bytes, header included.
    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    /// Size of the static region in bytes.
    pub fn static_size(&self) -> usize {
        self.static_size
    }

    /// Offsets of every reference-typed instance field, inherited included.
    pub fn reference_offsets(&self) -> &[usize] {
        &self.reference_offsets
    }

    /// Offsets of reference-typed static fields within the static region.
    pub fn static_reference_offsets(&self) -> &[usize] {
        &self.static_reference_offsets
    }

    /// Runtime constant pool; absent for array and primitive classes.
    pub fn constant_pool(&self) -> Option<&RuntimeConstantPool> {
        self.constant_pool.as_ref()
    }

    /// `SourceFile` attribute.
    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    /// Heap-resident `java/lang/Class` object for this class.
    pub fn mirror(&self) -> Option<&ObjectRef> {
        self.mirror.get()
    }

    /// Id of the one-dimensional array class of this component, if created.
    pub fn array_class_id(&self) -> Option<ClassId> {
        self.array_class.get().copied()
    }

    /// True for interfaces.
    pub fn is_interface(&self) -> bool {
        self.access.is_interface()
    }

    /// True for abstract classes and interfaces.
    pub fn is_abstract(&self) -> bool {
        self.access.is_abstract()
    }

    /// True for array classes.
    pub fn is_array(&self) -> bool {
        matches!(self.kind, ClassKind::Array { .. })
    }

    /// True for primitive classes.
    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, ClassKind::Primitive(_))
    }

    /// Component class of an array class.
    pub fn component(&self) -> Option<&Arc<JavaClass>> {
        match &self.kind {
            ClassKind::Array { component, .. } => Some(component),
            _ => None,
        }
    }

    /// Element storage kind of an array class.
    pub fn element_kind(&self) -> Option<FieldKind> {
        match &self.kind {
            ClassKind::Array { element, .. } => Some(*element),
            _ => None,
        }
    }

    /// Primitive kind of a primitive class; `None` for void and non-primitives.
    pub fn primitive_kind(&self) -> Option<FieldKind> {
        match &self.kind {
            ClassKind::Primitive(kind) => *kind,
            _ => None,
        }
    }

    /// Descriptor naming this class as a field type.
    pub fn descriptor(&self) -> String {
        match &self.kind {
            ClassKind::Array { .. } => self.name.clone(),
            ClassKind::Primitive(Some(kind)) => kind.descriptor().to_string(),
            ClassKind::Primitive(None) => "V".to_string(),
            ClassKind::Instance => format!("L{};", self.name),
        }
    }

    /// Declared field named `name`.
    pub fn declared_field(&self, name: &str) -> Option<&Arc<JavaField>> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field lookup: this class, then superinterfaces, then the superclass chain.
    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<(Arc<JavaClass>, Arc<JavaField>)> {
        if let Some(field) = self
            .fields
            .iter()
            .find(|f| f.name == name && f.descriptor == descriptor)
        {
            return self.arc().map(|class| (class, field.clone()));
        }
        self.interfaces
            .iter()
            .find_map(|interface| interface.find_field(name, descriptor))
            .or_else(|| {
                self.super_class
                    .as_ref()
                    .and_then(|class| class.find_field(name, descriptor))
            })
    }

    /// Declared method with this name and descriptor.
    pub fn declared_method(&self, name: &str, descriptor: &str) -> Option<&Arc<JavaMethod>> {
        self.methods.iter().find(|m| m.matches(name, descriptor))
    }

    /// Class method resolution: this class and its superclasses, then
    /// default methods of the superinterfaces.
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<Arc<JavaMethod>> {
        if let Some(method) = self.declared_method(name, descriptor) {
            return Some(method.clone());
        }
        let mut current = self.super_class.clone();
        while let Some(class) = current {
            if let Some(method) = class.declared_method(name, descriptor) {
                return Some(method.clone());
            }
            current = class.super_class.clone();
        }
        self.find_interface_method(name, descriptor)
    }

    /// Interface method resolution: walks every superinterface, preferring
    /// non-abstract methods, before failing.
    pub fn find_interface_method(&self, name: &str, descriptor: &str) -> Option<Arc<JavaMethod>> {
        let mut abstract_match = None;
        let mut seen = HashSet::new();
        let mut pending: Vec<Arc<JavaClass>> = Vec::new();
        if self.is_interface() {
            if let Some(method) = self.declared_method(name, descriptor) {
                if !method.is_abstract() {
                    return Some(method.clone());
                }
                abstract_match = Some(method.clone());
            }
        }
        let mut current: Option<&JavaClass> = Some(self);
        while let Some(class) = current {
            pending.extend(class.interfaces.iter().cloned());
            current = class.super_class.as_deref();
        }
        while let Some(interface) = pending.pop() {
            if !seen.insert(interface.id) {
                continue;
            }
            if let Some(method) = interface.declared_method(name, descriptor) {
                if !method.is_abstract() {
                    return Some(method.clone());
                }
                abstract_match.get_or_insert_with(|| method.clone());
            }
            pending.extend(interface.interfaces.iter().cloned());
        }
        abstract_match
    }

    /// Virtual dispatch by name and descriptor.
    pub fn vtable_lookup(&self, name: &str, descriptor: &str) -> Option<&Arc<JavaMethod>> {
        self.vtable.iter().rev().find(|m| m.matches(name, descriptor))
    }

    /// Method in virtual table slot `index`.
    pub fn virtual_method(&self, index: usize) -> Option<&Arc<JavaMethod>> {
        self.vtable.get(index)
    }

    /// True if `self` is `other` or one of its subclasses.
    pub fn is_subclass_of(&self, other: &JavaClass) -> bool {
        if self.id == other.id {
            return true;
        }
        let mut current = self.super_class.as_deref();
        while let Some(class) = current {
            if class.id == other.id {
                return true;
            }
            current = class.super_class.as_deref();
        }
        false
    }

    /// True if `self` or a superclass implements `interface`, directly or
    /// through superinterfaces.
    pub fn implements(&self, interface: &JavaClass) -> bool {
        let mut current: Option<&JavaClass> = Some(self);
        while let Some(class) = current {
            if class
                .interfaces
                .iter()
                .any(|i| i.id == interface.id || i.implements(interface))
            {
                return true;
            }
            current = class.super_class.as_deref();
        }
        false
    }

    /// Assignment compatibility used by `checkcast`, `instanceof`,
    /// `aastore` and exception handler matching.
    pub fn is_assignable_to(&self, target: &JavaClass) -> bool {
        if self.id == target.id {
            return true;
        }
        match (&self.kind, &target.kind) {
            (ClassKind::Primitive(_), _) | (_, ClassKind::Primitive(_)) => false,
            (ClassKind::Array { component, .. }, _) => match &target.kind {
                ClassKind::Array {
                    component: target_component,
                    ..
                } => {
                    if component.is_primitive() || target_component.is_primitive() {
                        component.id == target_component.id
                    } else {
                        component.is_assignable_to(target_component)
                    }
                }
                _ if target.is_interface() => {
                    matches!(target.name.as_str(), "java/lang/Cloneable" | "java/io/Serializable")
                }
                _ => target.super_class.is_none(),
            },
            (ClassKind::Instance, ClassKind::Instance) => {
                if target.is_interface() {
                    self.implements(target)
                } else if self.is_interface() {
                    target.super_class.is_none()
                } else {
                    self.is_subclass_of(target)
                }
            }
            (ClassKind::Instance, ClassKind::Array { .. }) => false,
        }
    }

    /// Current initialization state.
    pub fn init_state(&self) -> InitState {
        *self.init.lock()
    }

    /// True once the static initializer completed.
    pub fn is_initialized(&self) -> bool {
        matches!(self.init_state(), InitState::Initialized)
    }

    /// Claims initialization for `thread`, or reports why not.
    pub fn begin_initialization(&self, thread: u64) -> InitAction {
        let mut state = self.init.lock();
        match *state {
            InitState::Linked => {
                *state = InitState::Initializing(thread);
                InitAction::Run
            }
            InitState::Initializing(owner) if owner == thread => InitAction::Recursive,
            InitState::Initializing(_) => InitAction::Wait,
            InitState::Initialized => InitAction::Done,
            InitState::Erroneous => InitAction::Erroneous,
        }
    }

    /// Blocks until another thread's initialization finishes; returns
    /// [`InitAction::Done`] or [`InitAction::Erroneous`].
    pub fn wait_for_initialization(&self) -> InitAction {
        let mut state = self.init.lock();
        while matches!(*state, InitState::Initializing(_)) {
            self.init_done.wait(&mut state);
        }
        match *state {
            InitState::Erroneous => InitAction::Erroneous,
            _ => InitAction::Done,
        }
    }

    /// Ends initialization started by [`JavaClass::begin_initialization`].
    pub fn finish_initialization(&self, success: bool) {
        let mut state = self.init.lock();
        *state = if success {
            InitState::Initialized
        } else {
            InitState::Erroneous
        };
        self.init_done.notify_all();
    }
}

impl PartialEq for JavaClass {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for JavaClass {}

impl fmt::Debug for JavaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JavaClass({} #{})", self.name, self.id.0)
    }
}

impl fmt::Display for JavaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.java_name())
    }
}
