//! The class linker.
//!
//! Turns class bytes into linked [`JavaClass`] nodes: resolves the
//! superclass and interfaces from the same loader, lays out fields, builds
//! the virtual table, and gives every class its heap-resident mirror.
//!
//! # Bootstrap
//!
//! Mirrors are instances of `java/lang/Class`, whose layout is only known
//! once `Class` itself is linked. [`ClassLinker::bootstrap`] therefore links
//! the primitive classes, `java/lang/Object` and `java/lang/Class` without
//! mirrors, fixes the mirror layout, and then retrofits mirrors onto every
//! class linked so far. Every later class gets its mirror while linking.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use bytecode_system::{AccessFlags, ClassFile, Constant, FieldType, MethodDescriptor};
use core_types::{AddressWidth, ObjectRef, Value, VmError};
use log::{debug, info, trace};
use memory_manager::MemoryAllocator;
use parking_lot::{Condvar, Mutex, ReentrantMutex, RwLock};

use crate::class::{ClassId, ClassKind, InitState, JavaClass};
use crate::error::{LinkError, LinkResult};
use crate::layout::{assign_slots, is_virtual, layout_fields};
use crate::loader::{ClassLoaderData, LoadEntry, LoaderId};
use crate::member::{FieldConstant, FieldKind, JavaField, JavaMethod, MethodCode};
use crate::object_model::{
    self, array_size, write_array_length, write_header, MirrorLayout, ObjectKind, ARRAY_BASE,
    INSTANCE_BASE,
};
use crate::runtime_pool::{Resolved, RuntimeConstantPool};
use crate::source::ClassSource;

/// Primitive classes created at bootstrap.
pub const PRIMITIVES: [(&str, Option<FieldKind>); 9] = [
    ("boolean", Some(FieldKind::Boolean)),
    ("byte", Some(FieldKind::Byte)),
    ("char", Some(FieldKind::Char)),
    ("short", Some(FieldKind::Short)),
    ("int", Some(FieldKind::Int)),
    ("long", Some(FieldKind::Long)),
    ("float", Some(FieldKind::Float)),
    ("double", Some(FieldKind::Double)),
    ("void", None),
];

const OBJECT: &str = "java/lang/Object";
const CLASS: &str = "java/lang/Class";

struct PreparedMethod {
    name: String,
    descriptor: String,
    signature: MethodDescriptor,
    access: AccessFlags,
    code: Option<MethodCode>,
    slot: Option<usize>,
}

/// Links classes and owns the class and loader registries of one VM.
pub struct ClassLinker {
    allocator: Arc<dyn MemoryAllocator>,
    width: AddressWidth,
    boot_source: Arc<dyn ClassSource>,
    classes: RwLock<Vec<Arc<JavaClass>>>,
    loaders: RwLock<Vec<Arc<ClassLoaderData>>>,
    primitives: RwLock<HashMap<String, Arc<JavaClass>>>,
    /// Serializes linking; holds the (loader, name) pairs being linked
    link_lock: ReentrantMutex<RefCell<Vec<(LoaderId, String)>>>,
    mirror_layout: OnceLock<MirrorLayout>,
    object_class: OnceLock<Arc<JavaClass>>,
    class_class: OnceLock<Arc<JavaClass>>,
}

impl ClassLinker {
    /// Creates a linker whose boot loader reads from `boot_source`.
    /// Call [`ClassLinker::bootstrap`] before linking anything else.
    pub fn new(allocator: Arc<dyn MemoryAllocator>, boot_source: Arc<dyn ClassSource>) -> Self {
        let width = allocator.address_width();
        let boot = Arc::new(ClassLoaderData::new(LoaderId::BOOT, None, None));
        Self {
            allocator,
            width,
            boot_source,
            classes: RwLock::new(Vec::new()),
            loaders: RwLock::new(vec![boot]),
            primitives: RwLock::new(HashMap::new()),
            link_lock: ReentrantMutex::new(RefCell::new(Vec::new())),
            mirror_layout: OnceLock::new(),
            object_class: OnceLock::new(),
            class_class: OnceLock::new(),
        }
    }

    /// Links the foundational classes and gives them mirrors.
    pub fn bootstrap(&self) -> LinkResult<()> {
        if self.mirror_layout.get().is_some() {
            return Ok(());
        }
        let _guard = self.link_lock.lock();

        for (name, kind) in PRIMITIVES {
            let class = self.register(|id, this| JavaClass {
                access: AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ABSTRACT,
                kind: ClassKind::Primitive(kind),
                init: Mutex::new(InitState::Initialized),
                ..bare_class(this, id, name, LoaderId::BOOT)
            });
            self.primitives.write().insert(name.to_string(), class);
        }

        let missing = |name: &str, error: LinkError| match error {
            LinkError::ClassNotFound(_) => LinkError::Vm(VmError::MissingBootClass(name.to_string())),
            other => other,
        };
        let object = self
            .load_class(LoaderId::BOOT, OBJECT)
            .map_err(|e| missing(OBJECT, e))?;
        let class = self
            .load_class(LoaderId::BOOT, CLASS)
            .map_err(|e| missing(CLASS, e))?;
        let _ = self.object_class.set(object);
        let _ = self.class_class.set(class.clone());
        let _ = self.mirror_layout.set(MirrorLayout::new(class.instance_size()));

        for existing in self.classes() {
            self.create_mirror(&existing)?;
        }
        info!("class linker bootstrapped with {} classes", self.class_count());
        Ok(())
    }

    /// Heap the linker allocates from.
    pub fn allocator(&self) -> &Arc<dyn MemoryAllocator> {
        &self.allocator
    }

    /// Width of stored references.
    pub fn address_width(&self) -> AddressWidth {
        self.width
    }

    /// Mirror layout, fixed at bootstrap.
    pub fn mirror_layout(&self) -> Result<MirrorLayout, VmError> {
        self.mirror_layout
            .get()
            .copied()
            .ok_or_else(|| VmError::MissingBootClass(CLASS.to_string()))
    }

    /// `java/lang/Object`.
    pub fn object_class(&self) -> Result<Arc<JavaClass>, VmError> {
        self.object_class
            .get()
            .cloned()
            .ok_or_else(|| VmError::MissingBootClass(OBJECT.to_string()))
    }

    /// `java/lang/Class`.
    pub fn class_class(&self) -> Result<Arc<JavaClass>, VmError> {
        self.class_class
            .get()
            .cloned()
            .ok_or_else(|| VmError::MissingBootClass(CLASS.to_string()))
    }

    /// Class with registry id `id`.
    pub fn class_by_id(&self, id: ClassId) -> Option<Arc<JavaClass>> {
        self.classes.read().get(id.0 as usize).cloned()
    }

    /// Every class linked so far, in id order.
    pub fn classes(&self) -> Vec<Arc<JavaClass>> {
        self.classes.read().clone()
    }

    /// Number of classes linked so far.
    pub fn class_count(&self) -> usize {
        self.classes.read().len()
    }

    /// Primitive class named by its keyword (`int`, `void`).
    pub fn primitive_class(&self, name: &str) -> Option<Arc<JavaClass>> {
        self.primitives.read().get(name).cloned()
    }

    /// Every primitive class.
    pub fn primitive_classes(&self) -> Vec<Arc<JavaClass>> {
        self.primitives.read().values().cloned().collect()
    }

    /// The boot loader's data.
    pub fn boot_loader(&self) -> Arc<ClassLoaderData> {
        self.loaders.read()[0].clone()
    }

    /// Data of loader `id`.
    pub fn loader(&self, id: LoaderId) -> Option<Arc<ClassLoaderData>> {
        self.loaders.read().get(id.0 as usize).cloned()
    }

    /// Every loader, boot first.
    pub fn loaders(&self) -> Vec<Arc<ClassLoaderData>> {
        self.loaders.read().clone()
    }

    /// Registers a guest class loader. Lookups delegate to the boot loader
    /// first, then consult `source`.
    pub fn register_loader(
        &self,
        loader_object: ObjectRef,
        source: Option<Arc<dyn ClassSource>>,
    ) -> Arc<ClassLoaderData> {
        let mut loaders = self.loaders.write();
        let id = LoaderId(loaders.len() as u32);
        let data = Arc::new(ClassLoaderData::new(id, Some(loader_object), source));
        loaders.push(data.clone());
        debug!("registered class loader {}", id.0);
        data
    }

    /// Class already linked by `loader`.
    pub fn find_loaded(&self, loader: LoaderId, name: &str) -> Option<Arc<JavaClass>> {
        self.loader(loader)?.class(name)
    }

    fn loader_data(&self, loader: LoaderId) -> LinkResult<Arc<ClassLoaderData>> {
        self.loader(loader)
            .ok_or_else(|| LinkError::Vm(VmError::Link(format!("unknown class loader {}", loader.0))))
    }

    /// Loads and links `name` through `loader`. Array descriptors yield
    /// array classes. Failures are cached and reported again.
    pub fn load_class(&self, loader: LoaderId, name: &str) -> LinkResult<Arc<JavaClass>> {
        if name.starts_with('[') {
            let ty = FieldType::parse(name).map_err(|source| LinkError::Format {
                name: name.to_string(),
                source,
            })?;
            return self.class_for_type(loader, &ty);
        }
        let data = self.loader_data(loader)?;
        if let Some(entry) = data.entry(name) {
            return entry_result(entry);
        }
        if !loader.is_boot() {
            match self.load_class(LoaderId::BOOT, name) {
                Ok(class) => {
                    data.record(name, LoadEntry::Linked(class.clone()));
                    return Ok(class);
                }
                Err(LinkError::ClassNotFound(_)) => {}
                Err(other) => return Err(other),
            }
        }

        let guard = self.link_lock.lock();
        if let Some(entry) = data.entry(name) {
            return entry_result(entry);
        }
        if guard.borrow().iter().any(|(l, n)| *l == loader && n == name) {
            return Err(LinkError::Circularity(name.to_string()));
        }
        guard.borrow_mut().push((loader, name.to_string()));
        let result = self.load_from_source(&data, name);
        guard.borrow_mut().retain(|(l, n)| !(*l == loader && n == name));

        if let Err(error) = &result {
            debug!("loading {} failed: {}", name, error);
            data.record(name, LoadEntry::Failed(error.clone()));
        }
        result
    }

    fn load_from_source(&self, data: &ClassLoaderData, name: &str) -> LinkResult<Arc<JavaClass>> {
        let bytes = if data.id().is_boot() {
            self.boot_source.lookup(name)
        } else {
            data.source().and_then(|source| source.lookup(name))
        }
        .ok_or_else(|| LinkError::ClassNotFound(name.to_string()))?;

        let file = ClassFile::parse(&bytes).map_err(|source| LinkError::Format {
            name: name.to_string(),
            source,
        })?;
        if file.this_class != name {
            return Err(LinkError::WrongName {
                expected: name.to_string(),
                found: file.this_class,
            });
        }
        self.link(data, file)
    }

    /// Defines a class from bytes in `loader`, bypassing its source.
    pub fn define_class(&self, loader: LoaderId, bytes: &[u8]) -> LinkResult<Arc<JavaClass>> {
        let file = ClassFile::parse(bytes).map_err(|source| LinkError::Format {
            name: "<defined class>".to_string(),
            source,
        })?;
        let data = self.loader_data(loader)?;
        let name = file.this_class.clone();

        let guard = self.link_lock.lock();
        if data.class(&name).is_some() {
            return Err(LinkError::Duplicate(name));
        }
        guard.borrow_mut().push((loader, name.clone()));
        let result = self.link(&data, file);
        guard.borrow_mut().retain(|(l, n)| !(*l == loader && *n == name));
        if let Err(error) = &result {
            data.record(&name, LoadEntry::Failed(error.clone()));
        }
        result
    }

    /// Class for a descriptor type: primitive, array or object.
    pub fn class_for_type(&self, loader: LoaderId, ty: &FieldType) -> LinkResult<Arc<JavaClass>> {
        match ty {
            FieldType::Object(name) => self.load_class(loader, name),
            FieldType::Array(component) => {
                let component = self.class_for_type(loader, component)?;
                self.array_class_of(&component)
            }
            primitive => {
                let name = primitive.class_name();
                self.primitive_class(&name)
                    .ok_or(LinkError::Vm(VmError::MissingBootClass(name)))
            }
        }
    }

    /// One-dimensional array class of `component`, created on first use.
    /// Identity is stable: the same component always yields the same class.
    pub fn array_class_of(&self, component: &Arc<JavaClass>) -> LinkResult<Arc<JavaClass>> {
        if let Some(class) = component.array_class_id().and_then(|id| self.class_by_id(id)) {
            return Ok(class);
        }
        let element = match component.kind() {
            ClassKind::Primitive(None) => {
                return Err(LinkError::IncompatibleClassChange(
                    "array of void".to_string(),
                ))
            }
            ClassKind::Primitive(Some(kind)) => *kind,
            _ => FieldKind::Reference,
        };

        let _guard = self.link_lock.lock();
        if let Some(class) = component.array_class_id().and_then(|id| self.class_by_id(id)) {
            return Ok(class);
        }
        let object = self.object_class()?;
        let interfaces = vec![
            self.load_class(LoaderId::BOOT, "java/lang/Cloneable")?,
            self.load_class(LoaderId::BOOT, "java/io/Serializable")?,
        ];
        let name = format!("[{}", component.descriptor());
        let loader = component.loader();

        let class = self.register(|id, this| JavaClass {
            access: AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ABSTRACT,
            kind: ClassKind::Array {
                component: component.clone(),
                element,
            },
            vtable: object.vtable().to_vec(),
            instance_size: ARRAY_BASE,
            reference_offsets: Vec::new(),
            super_class: Some(object.clone()),
            interfaces,
            init: Mutex::new(InitState::Initialized),
            ..bare_class(this, id, &name, loader)
        });
        let _ = component.array_class.set(class.id());
        if self.mirror_layout.get().is_some() {
            self.create_mirror(&class)?;
        }
        if let Some(data) = self.loader(loader) {
            data.record(&name, LoadEntry::Linked(class.clone()));
        }
        debug!("created array class {}", name);
        Ok(class)
    }

    fn register(&self, build: impl FnOnce(ClassId, &std::sync::Weak<JavaClass>) -> JavaClass) -> Arc<JavaClass> {
        let mut classes = self.classes.write();
        let id = ClassId(classes.len() as u32);
        let class = Arc::new_cyclic(|this| build(id, this));
        classes.push(class.clone());
        class
    }

    fn link(&self, data: &ClassLoaderData, file: ClassFile) -> LinkResult<Arc<JavaClass>> {
        let loader = data.id();
        let name = file.this_class.clone();
        let format_error = |source| LinkError::Format {
            name: name.clone(),
            source,
        };

        let super_class = match &file.super_class {
            Some(super_name) => {
                let super_class = self.load_class(loader, super_name)?;
                if super_class.is_interface() || super_class.is_array() {
                    return Err(LinkError::IncompatibleClassChange(format!(
                        "{} cannot extend {}",
                        name, super_name
                    )));
                }
                Some(super_class)
            }
            None if name == OBJECT => None,
            None => {
                return Err(LinkError::IncompatibleClassChange(format!(
                    "{} has no superclass",
                    name
                )))
            }
        };

        let mut interfaces = Vec::with_capacity(file.interfaces.len());
        for interface_name in &file.interfaces {
            let interface = self.load_class(loader, interface_name)?;
            if !interface.is_interface() {
                return Err(LinkError::IncompatibleClassChange(format!(
                    "{} implements class {}",
                    name, interface_name
                )));
            }
            interfaces.push(interface);
        }

        // Field layout: instance fields after the superclass, statics apart.
        let mut instance = Vec::new();
        let mut statics = Vec::new();
        for field in &file.fields {
            let ty = FieldType::parse(&field.descriptor).map_err(format_error)?;
            let kind = FieldKind::of(&ty);
            if field.access.is_static() {
                statics.push((field, ty, kind));
            } else {
                instance.push((field, ty, kind));
            }
        }
        let base = super_class
            .as_ref()
            .map(|s| s.instance_size())
            .unwrap_or(INSTANCE_BASE);
        let instance_kinds: Vec<FieldKind> = instance.iter().map(|(_, _, k)| *k).collect();
        let static_kinds: Vec<FieldKind> = statics.iter().map(|(_, _, k)| *k).collect();
        let instance_layout = layout_fields(base, &instance_kinds, self.width);
        let static_layout = layout_fields(0, &static_kinds, self.width);

        let mut reference_offsets = super_class
            .as_ref()
            .map(|s| s.reference_offsets().to_vec())
            .unwrap_or_default();
        let mut static_reference_offsets = Vec::new();
        let mut fields = Vec::with_capacity(file.fields.len());
        for ((info, ty, kind), offset) in instance.into_iter().zip(instance_layout.offsets) {
            if kind.is_reference() {
                reference_offsets.push(offset);
            }
            fields.push(Arc::new(JavaField {
                class_name: name.clone(),
                name: info.name.clone(),
                descriptor: info.descriptor.clone(),
                field_type: ty,
                kind,
                access: info.access,
                offset,
                constant: None,
            }));
        }
        for ((info, ty, kind), offset) in statics.into_iter().zip(static_layout.offsets) {
            if kind.is_reference() {
                static_reference_offsets.push(offset);
            }
            let constant = match info.constant_value {
                Some(index) => Some(field_constant(&file, index).map_err(format_error)?),
                None => None,
            };
            fields.push(Arc::new(JavaField {
                class_name: name.clone(),
                name: info.name.clone(),
                descriptor: info.descriptor.clone(),
                field_type: ty,
                kind,
                access: info.access,
                offset,
                constant,
            }));
        }

        // Virtual table: inherit, override matching slots, append the rest.
        let is_interface = file.access.is_interface();
        let super_vtable: Vec<Arc<JavaMethod>> = match (&super_class, is_interface) {
            (Some(s), false) => s.vtable().to_vec(),
            _ => Vec::new(),
        };
        let virtual_flags: Vec<(&str, &str, bool)> = file
            .methods
            .iter()
            .map(|m| {
                let virtual_ = !is_interface
                    && is_virtual(m.access.is_static(), m.access.is_private(), &m.name);
                (m.name.as_str(), m.descriptor.as_str(), virtual_)
            })
            .collect();
        let slots = assign_slots(&super_vtable, &virtual_flags);

        let mut prepared = Vec::with_capacity(file.methods.len());
        for (info, slot) in file.methods.iter().zip(slots) {
            let signature = MethodDescriptor::parse(&info.descriptor).map_err(format_error)?;
            let code = match &info.code {
                Some(code) => Some(MethodCode::from_attribute(code).map_err(format_error)?),
                None => None,
            };
            prepared.push(PreparedMethod {
                name: info.name.clone(),
                descriptor: info.descriptor.clone(),
                signature,
                access: info.access,
                code,
                slot,
            });
        }

        // Interface methods the class does not declare or inherit.
        let mut interface_methods = Vec::new();
        if !is_interface {
            let mut pending = interfaces.clone();
            while let Some(interface) = pending.pop() {
                interface_methods.extend(
                    interface
                        .methods()
                        .iter()
                        .filter(|m| !m.is_static() && m.name() != "<clinit>")
                        .cloned(),
                );
                pending.extend(interface.interfaces().iter().cloned());
            }
        }

        let instance_size = instance_layout.size;
        let static_size = static_layout.size;
        let pool = RuntimeConstantPool::new(file.constant_pool.clone());
        let access = file.access;
        let source_file = file.source_file.clone();

        let class = self.register(|id, this| {
            let methods: Vec<Arc<JavaMethod>> = prepared
                .into_iter()
                .map(|p| {
                    Arc::new(JavaMethod {
                        owner: this.clone(),
                        class_name: name.clone(),
                        name: p.name,
                        descriptor: p.descriptor,
                        signature: p.signature,
                        access: p.access,
                        code: p.code,
                        vtable_index: p.slot,
                        invocations: Default::default(),
                    })
                })
                .collect();

            let mut vtable = super_vtable;
            for method in &methods {
                if let Some(slot) = method.vtable_index() {
                    if slot < vtable.len() {
                        vtable[slot] = method.clone();
                    } else {
                        vtable.push(method.clone());
                    }
                }
            }
            for method in interface_methods {
                let present = vtable
                    .iter()
                    .any(|m| m.matches(method.name(), method.descriptor()));
                if !present {
                    vtable.push(method);
                }
            }

            JavaClass {
                access,
                kind: ClassKind::Instance,
                super_class,
                interfaces,
                fields,
                methods,
                vtable,
                instance_size,
                static_size,
                reference_offsets,
                static_reference_offsets,
                constant_pool: Some(pool),
                source_file,
                ..bare_class(this, id, &name, loader)
            }
        });

        if self.mirror_layout.get().is_some() {
            self.create_mirror(&class)?;
        }
        data.record(&name, LoadEntry::Linked(class.clone()));
        debug!(
            "linked {} (loader {}, instance size {}, vtable {})",
            name,
            loader.0,
            class.instance_size(),
            class.vtable().len()
        );
        Ok(class)
    }

    /// Allocates the mirror of `class` unless it has one. Failure to
    /// allocate is fatal.
    pub fn create_mirror(&self, class: &Arc<JavaClass>) -> Result<(), VmError> {
        if class.mirror().is_some() {
            return Ok(());
        }
        let layout = self.mirror_layout()?;
        let class_class = self.class_class()?;
        let size = layout.mirror_size(class.static_size());
        let block = self
            .allocator
            .allocate(size)
            .ok_or_else(|| VmError::InternalAllocation {
                size,
                context: format!("mirror of {}", class.name()),
            })?;
        let mirror = ObjectRef::new(block);
        write_header(&mirror, ObjectKind::Mirror, class_class.id());
        mirror
            .data()
            .write_u32(layout.class_id_offset, class.id().0);

        let loader_object = self.loader(class.loader()).and_then(|d| d.loader_object().cloned());
        if let (Some(loader_object), Some(field)) =
            (loader_object, class_class.declared_field("classLoader"))
        {
            object_model::write_reference(&mirror, field.offset(), Some(&loader_object), self.width)?;
        }
        trace!("mirror for {} at {:#x}", class.name(), mirror.address());
        let _ = class.mirror.set(mirror);
        Ok(())
    }

    /// Class described by a mirror.
    pub fn mirror_target(&self, mirror: &ObjectRef) -> Result<Arc<JavaClass>, VmError> {
        let layout = self.mirror_layout()?;
        if object_model::object_kind(mirror)? != ObjectKind::Mirror {
            return Err(VmError::HeapCorruption {
                address: mirror.address(),
                detail: "not a class mirror".to_string(),
            });
        }
        let id = ClassId(mirror.data().read_u32(layout.class_id_offset));
        self.class_by_id(id).ok_or_else(|| VmError::HeapCorruption {
            address: mirror.address(),
            detail: format!("mirror of unknown class {}", id.0),
        })
    }

    /// Class of a heap object.
    pub fn class_of(&self, object: &ObjectRef) -> Result<Arc<JavaClass>, VmError> {
        let id = object_model::class_id(object)?;
        self.class_by_id(id).ok_or_else(|| VmError::HeapCorruption {
            address: object.address(),
            detail: format!("header names unknown class {}", id.0),
        })
    }

    /// Allocates a zeroed instance. `Ok(None)` means the heap is exhausted.
    pub fn allocate_instance(&self, class: &JavaClass) -> Result<Option<ObjectRef>, VmError> {
        if !matches!(class.kind(), ClassKind::Instance) {
            return Err(VmError::Internal(format!("cannot instantiate {}", class.name())));
        }
        let Some(block) = self.allocator.allocate(class.instance_size()) else {
            return Ok(None);
        };
        let object = ObjectRef::new(block);
        write_header(&object, ObjectKind::Instance, class.id());
        Ok(Some(object))
    }

    /// Allocates a zeroed array of `class`. `Ok(None)` means the heap is
    /// exhausted.
    pub fn allocate_array(&self, class: &JavaClass, length: usize) -> Result<Option<ObjectRef>, VmError> {
        let element = class
            .element_kind()
            .ok_or_else(|| VmError::Internal(format!("{} is not an array class", class.name())))?;
        let Some(size) = length
            .checked_mul(element.size(self.width))
            .and_then(|bytes| bytes.checked_add(ARRAY_BASE))
        else {
            return Ok(None);
        };
        if size > i32::MAX as usize {
            return Ok(None);
        }
        let Some(block) = self.allocator.allocate(size) else {
            return Ok(None);
        };
        let object = ObjectRef::new(block);
        write_header(&object, ObjectKind::Array, class.id());
        write_array_length(&object, length);
        debug_assert_eq!(object.block().size(), array_size(length, element.size(self.width)));
        Ok(Some(object))
    }

    /// Reads an instance field.
    pub fn read_field(&self, object: &ObjectRef, field: &JavaField) -> Result<Value, VmError> {
        object_model::read_value(object, field.offset(), field.kind(), self.allocator.as_ref())
    }

    /// Writes an instance field.
    pub fn write_field(&self, object: &ObjectRef, field: &JavaField, value: &Value) -> Result<(), VmError> {
        object_model::write_value(object, field.offset(), field.kind(), value, self.width)
    }

    fn static_location(&self, holder: &JavaClass) -> Result<(ObjectRef, usize), VmError> {
        let layout = self.mirror_layout()?;
        let mirror = holder
            .mirror()
            .cloned()
            .ok_or_else(|| VmError::Internal(format!("{} has no mirror", holder.name())))?;
        Ok((mirror, layout.static_base))
    }

    /// Reads a static field of `holder`.
    pub fn read_static(&self, holder: &JavaClass, field: &JavaField) -> Result<Value, VmError> {
        let (mirror, base) = self.static_location(holder)?;
        object_model::read_value(&mirror, base + field.offset(), field.kind(), self.allocator.as_ref())
    }

    /// Writes a static field of `holder`.
    pub fn write_static(&self, holder: &JavaClass, field: &JavaField, value: &Value) -> Result<(), VmError> {
        let (mirror, base) = self.static_location(holder)?;
        object_model::write_value(&mirror, base + field.offset(), field.kind(), value, self.width)
    }

    fn pool_of<'a>(&self, from: &'a JavaClass) -> LinkResult<&'a RuntimeConstantPool> {
        from.constant_pool()
            .ok_or_else(|| LinkError::Vm(VmError::Internal(format!("{} has no constant pool", from.name()))))
    }

    /// Resolves the `Class` entry `index` of `from`'s pool.
    pub fn resolve_class(&self, from: &JavaClass, index: u16) -> LinkResult<Arc<JavaClass>> {
        let pool = self.pool_of(from)?;
        if let Some(class) = pool.resolved_class(index) {
            return Ok(class);
        }
        let name = pool
            .pool()
            .class_name(index)
            .map_err(|source| LinkError::Format {
                name: from.name().to_string(),
                source,
            })?;
        let class = self.load_class(from.loader(), name)?;
        pool.store(index, Resolved::Class(class.clone()));
        Ok(class)
    }

    /// Resolves the `FieldRef` entry `index`; returns the declaring class
    /// and the field.
    pub fn resolve_field(&self, from: &JavaClass, index: u16) -> LinkResult<(Arc<JavaClass>, Arc<JavaField>)> {
        let pool = self.pool_of(from)?;
        if let Some(Resolved::Field { holder, field }) = pool.resolved(index) {
            return Ok((holder.clone(), field.clone()));
        }
        let member = pool.pool().member_ref(index).map_err(|source| LinkError::Format {
            name: from.name().to_string(),
            source,
        })?;
        let class = self.load_class(from.loader(), &member.class)?;
        let (holder, field) = class
            .find_field(&member.name, &member.descriptor)
            .ok_or_else(|| LinkError::NoSuchField {
                class: member.class.clone(),
                name: member.name.clone(),
            })?;
        pool.store(
            index,
            Resolved::Field {
                holder: holder.clone(),
                field: field.clone(),
            },
        );
        Ok((holder, field))
    }

    /// Resolves a `MethodRef` or `InterfaceMethodRef` entry.
    pub fn resolve_method(&self, from: &JavaClass, index: u16) -> LinkResult<Arc<JavaMethod>> {
        let pool = self.pool_of(from)?;
        if let Some(method) = pool.resolved_method(index) {
            return Ok(method);
        }
        let format_error = |source| LinkError::Format {
            name: from.name().to_string(),
            source,
        };
        let interface_ref = matches!(
            pool.pool().get(index).map_err(format_error)?,
            Constant::InterfaceMethodRef { .. }
        );
        let member = pool.pool().member_ref(index).map_err(format_error)?;
        let class = self.load_class(from.loader(), &member.class)?;
        if interface_ref != class.is_interface() {
            return Err(LinkError::IncompatibleClassChange(format!(
                "{} referenced as {}",
                member.class,
                if interface_ref { "an interface" } else { "a class" }
            )));
        }

        let method = if interface_ref {
            class
                .find_interface_method(&member.name, &member.descriptor)
                .or_else(|| {
                    self.object_class.get().and_then(|object| {
                        object
                            .declared_method(&member.name, &member.descriptor)
                            .filter(|m| m.access().is_public() && !m.is_static())
                            .cloned()
                    })
                })
        } else {
            class.find_method(&member.name, &member.descriptor)
        }
        .ok_or_else(|| LinkError::NoSuchMethod {
            class: member.class.clone(),
            name: member.name.clone(),
            descriptor: member.descriptor.clone(),
        })?;
        pool.store(index, Resolved::Method(method.clone()));
        Ok(method)
    }

    /// Virtual dispatch of `method` on a receiver of class `receiver`:
    /// the receiver's table slot when the method has one, otherwise a
    /// lookup by name and descriptor.
    pub fn select_method(&self, receiver: &JavaClass, method: &Arc<JavaMethod>) -> Option<Arc<JavaMethod>> {
        if method.is_private() || method.is_static() {
            return Some(method.clone());
        }
        if let Some(slot) = method.vtable_index() {
            if let Some(selected) = receiver.virtual_method(slot) {
                if selected.matches(method.name(), method.descriptor()) {
                    return Some(selected.clone());
                }
            }
        }
        receiver
            .vtable_lookup(method.name(), method.descriptor())
            .cloned()
            .or_else(|| receiver.find_interface_method(method.name(), method.descriptor()))
    }
}

fn bare_class(this: &std::sync::Weak<JavaClass>, id: ClassId, name: &str, loader: LoaderId) -> JavaClass {
    JavaClass {
        this: this.clone(),
        id,
        name: name.to_string(),
        loader,
        access: AccessFlags::empty(),
        kind: ClassKind::Instance,
        super_class: None,
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
        vtable: Vec::new(),
        instance_size: INSTANCE_BASE,
        static_size: 0,
        reference_offsets: Vec::new(),
        static_reference_offsets: Vec::new(),
        constant_pool: None,
        source_file: None,
        mirror: OnceLock::new(),
        array_class: OnceLock::new(),
        init: Mutex::new(InitState::Linked),
        init_done: Condvar::new(),
    }
}

fn entry_result(entry: LoadEntry) -> LinkResult<Arc<JavaClass>> {
    match entry {
        LoadEntry::Linked(class) => Ok(class),
        LoadEntry::Failed(error) => Err(error),
    }
}

fn field_constant(file: &ClassFile, index: u16) -> bytecode_system::FormatResult<FieldConstant> {
    let pool = &file.constant_pool;
    Ok(match pool.get(index)? {
        Constant::Integer(v) => FieldConstant::Int(*v),
        Constant::Long(v) => FieldConstant::Long(*v),
        Constant::Float(v) => FieldConstant::Float(*v),
        Constant::Double(v) => FieldConstant::Double(*v),
        Constant::String(utf8) => FieldConstant::String(pool.utf8(*utf8)?.to_string()),
        _ => {
            return Err(bytecode_system::ClassFormatError::BadConstant {
                index,
                expected: "constant value",
            })
        }
    })
}

impl std::fmt::Debug for ClassLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassLinker")
            .field("classes", &self.class_count())
            .field("loaders", &self.loaders.read().len())
            .finish()
    }
}
