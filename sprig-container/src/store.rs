//! The singleton store.
//!
//! Four pieces of state form one atomic unit: the cache of fully
//! constructed singletons, the early factories, the early references and
//! the insertion-ordered set of registered names. They are guarded by a
//! single mutex and never locked individually.
//!
//! The fully constructed cache is additionally readable without the
//! mutex: it is a [`DashMap`] that is only ever *written* while the store
//! mutex is held, so a lock-free hit is always a completed singleton.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexSet;
use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::early::{EarlyFactory, EarlyReferences};
use crate::error::SprigError;

/// A managed object instance.
pub type Bean = Arc<dyn Any + Send + Sync>;

/// Returns `true` if both handles point at the same allocation.
#[inline]
pub fn same_instance(a: &Bean, b: &Bean) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Maximum number of suppressed errors kept per construction attempt.
pub const SUPPRESSED_ERRORS_LIMIT: usize = 100;

/// Side-effect errors observed during one top-level construction attempt.
#[derive(Debug, Default)]
pub struct SuppressedErrors {
    errors: Vec<SprigError>,
}

impl SuppressedErrors {
    /// Records `err`, silently dropping it once the limit is reached.
    pub fn push(&mut self, err: SprigError) {
        if self.errors.len() < SUPPRESSED_ERRORS_LIMIT {
            self.errors.push(err);
        } else {
            trace!(error = %err, "Suppressed error limit reached, discarding");
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_vec(self) -> Vec<SprigError> {
        self.errors
    }
}

/// Whether the registry currently accepts new singletons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Active,
    /// Teardown in progress; new singleton creation fails fast.
    Destroying,
}

/// State guarded by the store mutex.
#[derive(Default)]
pub struct StoreState {
    pub(crate) early: EarlyReferences,
    pub(crate) registered: IndexSet<String>,
    pub(crate) suppressed: Option<SuppressedErrors>,
    pub(crate) phase: Phase,
}

/// Cache of singleton instances keyed by bean name.
#[derive(Default)]
pub struct SingletonStore {
    objects: DashMap<String, Bean>,
    state: Mutex<StoreState>,
}

impl SingletonStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the store mutex.
    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock()
    }

    /// Lock-free lookup of a fully constructed singleton.
    #[inline]
    pub fn cached(&self, name: &str) -> Option<Bean> {
        self.objects.get(name).map(|entry| entry.value().clone())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    /// Lock-free snapshot of fully constructed names, in no particular order.
    pub fn cached_names(&self) -> Vec<String> {
        self.objects.iter().map(|entry| entry.key().clone()).collect()
    }

    // ── Locked operations: the caller holds the guard for `state` ──

    /// Stores a fully constructed singleton, superseding any early entry.
    pub(crate) fn add(&self, state: &mut StoreState, name: &str, bean: Bean) {
        self.objects.insert(name.to_string(), bean);
        state.early.remove(name);
        state.registered.insert(name.to_string());
        trace!(bean = name, "Cached singleton");
    }

    /// Registers an early factory unless `name` is already complete.
    pub(crate) fn add_early_factory(&self, state: &mut StoreState, name: &str, factory: EarlyFactory) {
        if !self.objects.contains_key(name) {
            state.early.add_factory(name, factory);
            state.registered.insert(name.to_string());
        }
    }

    /// Looks `name` up, falling back to early references when `in_creation`.
    pub(crate) fn lookup(
        &self,
        state: &mut StoreState,
        name: &str,
        in_creation: bool,
        allow_early: bool,
    ) -> Option<Bean> {
        if let Some(bean) = self.cached(name) {
            return Some(bean);
        }
        if !in_creation {
            return None;
        }
        state.early.resolve(name, allow_early)
    }

    /// Clears every entry for `name`. Idempotent.
    pub(crate) fn remove(&self, state: &mut StoreState, name: &str) {
        self.objects.remove(name);
        state.early.remove(name);
        state.registered.shift_remove(name);
    }

    /// Drops all entries and returns to [`Phase::Active`].
    pub(crate) fn clear(&self, state: &mut StoreState) {
        self.objects.clear();
        state.early.clear();
        state.registered.clear();
        state.phase = Phase::Active;
    }
}

impl std::fmt::Debug for SingletonStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonStore")
            .field("cached", &self.objects.len())
            .finish()
    }
}
