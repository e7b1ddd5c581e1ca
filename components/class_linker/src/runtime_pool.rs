//! Runtime constant pool.
//!
//! Wraps a class's parsed constant pool with one resolution cell and one
//! call-site inline cache per entry. Cells are filled at most once; racing
//! resolvers agree because resolution is deterministic.

use std::fmt;
use std::sync::{Arc, OnceLock};

use bytecode_system::ConstantPool;
use core_types::ObjectRef;
use parking_lot::Mutex;

use crate::class::{ClassId, JavaClass};
use crate::inline_cache::InlineCache;
use crate::member::{JavaField, JavaMethod};

/// A resolved symbolic reference.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// `Class` entry
    Class(Arc<JavaClass>),
    /// `FieldRef` entry with the class that declares the field
    Field {
        /// Declaring class
        holder: Arc<JavaClass>,
        /// The field
        field: Arc<JavaField>,
    },
    /// `MethodRef` or `InterfaceMethodRef` entry
    Method(Arc<JavaMethod>),
    /// `String` entry, the interned string object
    String(ObjectRef),
}

/// Call-site cache from receiver class to selected method.
pub type CallSiteCache = InlineCache<ClassId, Arc<JavaMethod>>;

/// Constant pool plus resolution state.
pub struct RuntimeConstantPool {
    pool: ConstantPool,
    resolved: Vec<OnceLock<Resolved>>,
    call_sites: Vec<Mutex<CallSiteCache>>,
}

impl RuntimeConstantPool {
    /// Wraps a parsed pool.
    pub fn new(pool: ConstantPool) -> Self {
        let len = pool.len();
        Self {
            pool,
            resolved: (0..len).map(|_| OnceLock::new()).collect(),
            call_sites: (0..len).map(|_| Mutex::new(InlineCache::new())).collect(),
        }
    }

    /// The symbolic pool.
    pub fn pool(&self) -> &ConstantPool {
        &self.pool
    }

    /// Resolution of entry `index`, if done.
    pub fn resolved(&self, index: u16) -> Option<&Resolved> {
        self.resolved.get(index as usize).and_then(OnceLock::get)
    }

    /// Stores a resolution; an earlier one wins.
    pub fn store(&self, index: u16, value: Resolved) -> Option<&Resolved> {
        self.resolved
            .get(index as usize)
            .map(|cell| cell.get_or_init(|| value))
    }

    /// Resolved class at `index`.
    pub fn resolved_class(&self, index: u16) -> Option<Arc<JavaClass>> {
        match self.resolved(index) {
            Some(Resolved::Class(class)) => Some(class.clone()),
            _ => None,
        }
    }

    /// Resolved method at `index`.
    pub fn resolved_method(&self, index: u16) -> Option<Arc<JavaMethod>> {
        match self.resolved(index) {
            Some(Resolved::Method(method)) => Some(method.clone()),
            _ => None,
        }
    }

    /// Dispatch target cached at call site `index` for `receiver`.
    pub fn cached_target(&self, index: u16, receiver: ClassId) -> Option<Arc<JavaMethod>> {
        self.call_sites
            .get(index as usize)
            .and_then(|site| site.lock().lookup(receiver))
    }

    /// Records the dispatch target of call site `index` for `receiver`.
    pub fn cache_target(&self, index: u16, receiver: ClassId, target: Arc<JavaMethod>) {
        if let Some(site) = self.call_sites.get(index as usize) {
            site.lock().update(receiver, target);
        }
    }

    /// Every resolved string object, for root enumeration.
    pub fn for_each_string(&self, visit: &mut dyn FnMut(&ObjectRef)) {
        for cell in &self.resolved {
            if let Some(Resolved::String(object)) = cell.get() {
                visit(object);
            }
        }
    }
}

impl fmt::Debug for RuntimeConstantPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolved = self.resolved.iter().filter(|c| c.get().is_some()).count();
        write!(
            f,
            "RuntimeConstantPool({} entries, {} resolved)",
            self.pool.len(),
            resolved
        )
    }
}
