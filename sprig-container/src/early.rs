//! Early references to singletons still under construction.
//!
//! While bean `a` is being built it may register an early factory. If
//! building `a` (transitively) needs `a` again, the first such lookup runs
//! the factory once and caches its result as `a`'s early reference, so the
//! circle is closed with a handle to the incomplete instance instead of
//! recursing forever.
//!
//! Lives inside the singleton store state and is only touched with the
//! store lock held.

use std::collections::HashMap;

use tracing::debug;

use crate::store::Bean;

/// Deferred producer of an early reference.
pub type EarlyFactory = Box<dyn FnOnce() -> Bean + Send>;

/// Early factories and the references materialized from them.
#[derive(Default)]
pub(crate) struct EarlyReferences {
    factories: HashMap<String, EarlyFactory>,
    references: HashMap<String, Bean>,
}

impl EarlyReferences {
    /// Registers an early factory for `name`, dropping any stale reference.
    pub fn add_factory(&mut self, name: &str, factory: EarlyFactory) {
        self.factories.insert(name.to_string(), factory);
        self.references.remove(name);
    }

    /// Returns the published early reference for `name`, if any.
    pub fn peek(&self, name: &str) -> Option<Bean> {
        self.references.get(name).cloned()
    }

    /// Returns the early reference for `name`, materializing it from the
    /// registered factory when `allow_create` is set.
    ///
    /// The factory runs at most once; afterwards the cached reference is
    /// returned.
    pub fn resolve(&mut self, name: &str, allow_create: bool) -> Option<Bean> {
        if let Some(reference) = self.references.get(name) {
            return Some(reference.clone());
        }
        if !allow_create {
            return None;
        }

        let factory = self.factories.remove(name)?;
        debug!(bean = name, "Exposing early reference");
        let reference = factory();
        self.references.insert(name.to_string(), reference.clone());
        Some(reference)
    }

    /// Drops any factory or reference for `name`.
    pub fn remove(&mut self, name: &str) {
        self.factories.remove(name);
        self.references.remove(name);
    }

    pub fn clear(&mut self) {
        self.factories.clear();
        self.references.clear();
    }

    pub fn has_factory(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}
