//! Inline caching for virtual and interface call sites
//!
//! Maps receiver classes to the method selected for them, with
//! mono/poly/megamorphic states.

use arrayvec::ArrayVec;

/// Entries kept before a site goes megamorphic.
pub const POLYMORPHIC_LIMIT: usize = 4;

/// Per-call-site cache of receiver class to dispatch target.
///
/// Transitions through states as more receiver classes are seen.
#[derive(Debug, Clone, PartialEq)]
pub enum InlineCache<K, V> {
    /// Nothing cached yet
    Uninitialized,
    /// Single receiver class cached (most common case)
    Monomorphic {
        /// The cached receiver class
        key: K,
        /// The target selected for it
        target: V,
    },
    /// Several receiver classes cached
    Polymorphic {
        /// List of (receiver, target) pairs
        entries: ArrayVec<(K, V), POLYMORPHIC_LIMIT>,
    },
    /// Too many receiver classes; always do the full lookup
    Megamorphic,
}

impl<K: Copy + PartialEq, V: Clone> InlineCache<K, V> {
    /// Create a new uninitialized cache
    pub fn new() -> Self {
        InlineCache::Uninitialized
    }

    /// Cached target for `key`, if any.
    pub fn lookup(&self, key: K) -> Option<V> {
        match self {
            InlineCache::Uninitialized | InlineCache::Megamorphic => None,
            InlineCache::Monomorphic {
                key: cached,
                target,
            } => (*cached == key).then(|| target.clone()),
            InlineCache::Polymorphic { entries } => entries
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, target)| target.clone()),
        }
    }

    /// Records the target selected for `key`.
    ///
    /// - Uninitialized → Monomorphic
    /// - Monomorphic → Polymorphic (different key)
    /// - Polymorphic → Megamorphic (more than [`POLYMORPHIC_LIMIT`] keys)
    pub fn update(&mut self, key: K, target: V) {
        match self {
            InlineCache::Uninitialized => {
                *self = InlineCache::Monomorphic { key, target };
            }
            InlineCache::Monomorphic {
                key: cached,
                target: cached_target,
            } => {
                if *cached == key {
                    *cached_target = target;
                } else {
                    let mut entries = ArrayVec::new();
                    entries.push((*cached, cached_target.clone()));
                    entries.push((key, target));
                    *self = InlineCache::Polymorphic { entries };
                }
            }
            InlineCache::Polymorphic { entries } => {
                if let Some(entry) = entries.iter_mut().find(|(k, _)| *k == key) {
                    entry.1 = target;
                } else if entries.try_push((key, target)).is_err() {
                    *self = InlineCache::Megamorphic;
                }
            }
            InlineCache::Megamorphic => {}
        }
    }

    /// True once the site stopped caching.
    pub fn is_megamorphic(&self) -> bool {
        matches!(self, InlineCache::Megamorphic)
    }
}

impl<K: Copy + PartialEq, V: Clone> Default for InlineCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
