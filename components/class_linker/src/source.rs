//! Class byte sources.
//!
//! The linker only needs `lookup(name) -> bytes`. Sources are keyed by
//! internal name (`java/lang/Object`).

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;
use parking_lot::RwLock;

/// Provider of class-file bytes.
pub trait ClassSource: Send + Sync {
    /// Bytes of the class named `name`, or `None` if this source lacks it.
    fn lookup(&self, name: &str) -> Option<Vec<u8>>;
}

/// In-memory source.
#[derive(Default)]
pub struct MemoryClassSource {
    classes: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryClassSource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a class.
    pub fn insert(&self, name: &str, bytes: Vec<u8>) {
        self.classes.write().insert(name.to_string(), bytes);
    }

    /// Number of classes held.
    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    /// True if no classes are held.
    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }

    /// Names of all classes held.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ClassSource for MemoryClassSource {
    fn lookup(&self, name: &str) -> Option<Vec<u8>> {
        self.classes.read().get(name).cloned()
    }
}

impl fmt::Debug for MemoryClassSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryClassSource({} classes)", self.len())
    }
}

/// Reads `<root>/<name>.class`.
#[derive(Debug, Clone)]
pub struct DirectoryClassSource {
    root: PathBuf,
}

impl DirectoryClassSource {
    /// Source rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ClassSource for DirectoryClassSource {
    fn lookup(&self, name: &str) -> Option<Vec<u8>> {
        if name.split('/').any(|part| part.is_empty() || part == "..") {
            return None;
        }
        let path = self.root.join(format!("{}.class", name));
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(error) if error.kind() == ErrorKind::NotFound => None,
            Err(error) => {
                warn!("cannot read {}: {}", path.display(), error);
                None
            }
        }
    }
}

/// Tries each source in order; the first hit wins.
#[derive(Default, Clone)]
pub struct CompositeClassSource {
    sources: Vec<Arc<dyn ClassSource>>,
}

impl CompositeClassSource {
    /// Empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a source with lower priority than those already added.
    pub fn push(&mut self, source: Arc<dyn ClassSource>) -> &mut Self {
        self.sources.push(source);
        self
    }

    /// Builder form of [`CompositeClassSource::push`].
    pub fn with(mut self, source: Arc<dyn ClassSource>) -> Self {
        self.sources.push(source);
        self
    }
}

impl ClassSource for CompositeClassSource {
    fn lookup(&self, name: &str) -> Option<Vec<u8>> {
        self.sources.iter().find_map(|source| source.lookup(name))
    }
}

impl fmt::Debug for CompositeClassSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompositeClassSource({} sources)", self.sources.len())
    }
}
