//! Per-loader class tables.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use core_types::ObjectRef;
use parking_lot::RwLock;

use crate::class::JavaClass;
use crate::error::LinkError;
use crate::source::ClassSource;

/// Identity of a class loader. The boot loader is [`LoaderId::BOOT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(pub u32);

impl LoaderId {
    /// The boot loader.
    pub const BOOT: LoaderId = LoaderId(0);

    /// True for the boot loader.
    pub fn is_boot(self) -> bool {
        self == Self::BOOT
    }
}

/// Outcome of a load attempt, cached per name.
#[derive(Debug, Clone)]
pub enum LoadEntry {
    /// Linked class
    Linked(Arc<JavaClass>),
    /// Failure reported again on every later lookup
    Failed(LinkError),
}

/// Classes known to one loader.
///
/// Loader and class refer to each other only by id, so neither owns the
/// other.
pub struct ClassLoaderData {
    id: LoaderId,
    loader_object: Option<ObjectRef>,
    source: Option<Arc<dyn ClassSource>>,
    classes: RwLock<HashMap<String, LoadEntry>>,
}

impl ClassLoaderData {
    pub(crate) fn new(
        id: LoaderId,
        loader_object: Option<ObjectRef>,
        source: Option<Arc<dyn ClassSource>>,
    ) -> Self {
        Self {
            id,
            loader_object,
            source,
            classes: RwLock::new(HashMap::new()),
        }
    }

    /// Loader identity.
    pub fn id(&self) -> LoaderId {
        self.id
    }

    /// Guest `ClassLoader` object; `None` for the boot loader.
    pub fn loader_object(&self) -> Option<&ObjectRef> {
        self.loader_object.as_ref()
    }

    /// Source consulted after delegation to the boot loader fails.
    pub fn source(&self) -> Option<&Arc<dyn ClassSource>> {
        self.source.as_ref()
    }

    /// Cached entry for `name`.
    pub fn entry(&self, name: &str) -> Option<LoadEntry> {
        self.classes.read().get(name).cloned()
    }

    /// Linked class named `name`, if any.
    pub fn class(&self, name: &str) -> Option<Arc<JavaClass>> {
        match self.classes.read().get(name) {
            Some(LoadEntry::Linked(class)) => Some(class.clone()),
            _ => None,
        }
    }

    pub(crate) fn record(&self, name: &str, entry: LoadEntry) {
        self.classes.write().insert(name.to_string(), entry);
    }

    /// Every linked class of this loader.
    pub fn classes(&self) -> Vec<Arc<JavaClass>> {
        self.classes
            .read()
            .values()
            .filter_map(|entry| match entry {
                LoadEntry::Linked(class) => Some(class.clone()),
                LoadEntry::Failed(_) => None,
            })
            .collect()
    }

    /// Number of linked classes.
    pub fn len(&self) -> usize {
        self.classes
            .read()
            .values()
            .filter(|entry| matches!(entry, LoadEntry::Linked(_)))
            .count()
    }

    /// True if nothing is linked yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ClassLoaderData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassLoaderData")
            .field("id", &self.id)
            .field("classes", &self.len())
            .finish()
    }
}
