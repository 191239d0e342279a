//! # The singleton registry
//!
//! [`SingletonRegistry`] combines the store, the creation guard, the
//! dependency graph and the disposal coordinator into one explicit object
//! with a `new()` → use → [`destroy_singletons()`](SingletonRegistry::destroy_singletons)
//! lifecycle.
//!
//! # Locking
//! ```text
//!   get_singleton ──hit──> DashMap (no lock)
//!        │ miss + in creation
//!        ▼
//!   store mutex ──> CreationContext ──> factory(&mut ctx)
//!                        │                   │
//!                        └──── nested get_or_create / early lookups
//! ```
//! The store mutex is held for the whole of [`get_or_create`](SingletonRegistry::get_or_create).
//! Factories receive a [`CreationContext`] that carries the held guard, so
//! nested lookups reuse it instead of locking again. Calling the
//! registry's own locking methods from inside a factory deadlocks; always go
//! through the context.

use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};

use crate::alias::{AliasRegistry, CanonicalName};
use crate::creation::CreationGuard;
use crate::disposal::{DisposableBean, DisposalCoordinator};
use crate::early::EarlyFactory;
use crate::error::{AlreadyRegisteredError, RegistrationKind, Result, SprigError};
use crate::graph::DependencyGraph;
use crate::store::{Bean, Phase, SingletonStore, StoreState, SuppressedErrors, same_instance};

/// Shared-instance registry with circular-reference resolution and ordered
/// teardown.
///
/// # Examples
/// ```rust
/// use std::sync::Arc;
/// use sprig_container::singleton::SingletonRegistry;
/// use sprig_container::store::Bean;
///
/// let registry = SingletonRegistry::new();
/// let first = registry
///     .get_or_create("config", |_| Ok(Arc::new(String::from("prod")) as Bean))
///     .unwrap();
/// let second = registry
///     .get_or_create("config", |_| unreachable!("memoized"))
///     .unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
/// ```
pub struct SingletonRegistry {
    store: SingletonStore,
    creation: CreationGuard,
    graph: DependencyGraph,
    disposals: DisposalCoordinator,
    aliases: Arc<AliasRegistry>,
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self::with_aliases(Arc::new(AliasRegistry::default()))
    }

    /// Creates a registry whose dependency graph canonicalizes through `aliases`.
    pub fn with_aliases(aliases: Arc<AliasRegistry>) -> Self {
        let canonical: Arc<dyn CanonicalName> = aliases.clone();
        Self {
            store: SingletonStore::new(),
            creation: CreationGuard::new(),
            graph: DependencyGraph::new(canonical),
            disposals: DisposalCoordinator::new(),
            aliases,
        }
    }

    pub fn aliases(&self) -> &AliasRegistry {
        &self.aliases
    }

    // ── Lookup ──

    /// Returns the singleton registered under `name`, allowing an early
    /// reference if it is still in creation.
    pub fn get_singleton(&self, name: &str) -> Option<Bean> {
        self.get_singleton_with(name, true)
    }

    /// Returns the singleton registered under `name`.
    ///
    /// Fully constructed instances are served without locking. A name in
    /// creation falls back to the locked path, which may materialize an
    /// early reference when `allow_early` is set.
    pub fn get_singleton_with(&self, name: &str, allow_early: bool) -> Option<Bean> {
        if let Some(bean) = self.store.cached(name) {
            return Some(bean);
        }
        if !self.creation.is_actually_in_creation(name) {
            return None;
        }
        let mut state = self.store.lock();
        self.store.lookup(&mut state, name, true, allow_early)
    }

    /// Returns the singleton under `name`, creating it with `factory` on first use.
    ///
    /// # Errors
    /// - [`SprigError::CreationNotAllowed`] while singletons are being destroyed
    /// - [`SprigError::CurrentlyInCreation`] if `name` re-entered its own construction
    /// - [`SprigError::ConstructionFailed`] wrapping the factory's error and the
    ///   side-effect errors recorded during the attempt
    pub fn get_or_create<F>(&self, name: &str, factory: F) -> Result<Bean>
    where
        F: FnOnce(&mut CreationContext<'_>) -> Result<Bean>,
    {
        if let Some(bean) = self.store.cached(name) {
            trace!(bean = name, "Returning cached instance of singleton bean");
            return Ok(bean);
        }
        let mut state = self.lock_state();
        self.get_or_create_locked(&mut *state, name, factory)
    }

    /// Runs `f` with the store mutex held.
    ///
    /// Collaborators doing multi-step creation synchronize on this same lock.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut CreationContext<'_>) -> R) -> R {
        let mut state = self.lock_state();
        let mut ctx = CreationContext {
            registry: self,
            state: &mut *state,
        };
        f(&mut ctx)
    }

    fn lock_state(&self) -> parking_lot::MutexGuard<'_, StoreState> {
        let mut state = self.store.lock();
        // A panicking factory can leave a stale set behind.
        state.suppressed = None;
        state
    }

    fn get_or_create_locked<F>(&self, state: &mut StoreState, name: &str, factory: F) -> Result<Bean>
    where
        F: FnOnce(&mut CreationContext<'_>) -> Result<Bean>,
    {
        if let Some(bean) = self.store.cached(name) {
            return Ok(bean);
        }
        if state.phase == Phase::Destroying {
            return Err(SprigError::CreationNotAllowed {
                name: name.to_string(),
            });
        }

        debug!(bean = name, "Creating shared instance of singleton bean");
        let in_creation = self.creation.enter(name)?;

        let records_suppressed = state.suppressed.is_none();
        if records_suppressed {
            state.suppressed = Some(SuppressedErrors::default());
        }

        let outcome = {
            let mut ctx = CreationContext {
                registry: self,
                state: &mut *state,
            };
            factory(&mut ctx)
        };

        let suppressed = if records_suppressed {
            state
                .suppressed
                .take()
                .map(SuppressedErrors::into_vec)
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        let result = in_creation.finish().and_then(|()| match outcome {
            Ok(bean) => {
                self.store.add(state, name, bean.clone());
                Ok(bean)
            }
            // Narrow workaround: a state error is tolerated when the singleton
            // showed up anyway.
            Err(SprigError::IllegalState(reason)) => match self.store.cached(name) {
                Some(bean) => {
                    debug!(bean = name, %reason, "Singleton appeared during failed creation, using it");
                    Ok(bean)
                }
                None => Err(SprigError::construction_failed(
                    name,
                    SprigError::IllegalState(reason),
                    suppressed,
                )),
            },
            Err(cause) => Err(SprigError::construction_failed(name, cause, suppressed)),
        });

        if result.is_err() && !self.store.contains(name) {
            // Roll back whatever the failed attempt published.
            self.store.remove(state, name);
        }
        result
    }

    // ── Registration ──

    /// Registers a fully constructed singleton.
    ///
    /// Registering the same instance twice is a no-op.
    ///
    /// # Errors
    /// [`SprigError::AlreadyRegistered`] if a different instance is bound to `name`.
    pub fn register_singleton(&self, name: &str, bean: Bean) -> Result<()> {
        let mut state = self.store.lock();
        self.register_locked(&mut state, name, bean)
    }

    fn register_locked(&self, state: &mut StoreState, name: &str, bean: Bean) -> Result<()> {
        if let Some(existing) = self.store.cached(name) {
            if same_instance(&existing, &bean) {
                return Ok(());
            }
            return Err(SprigError::AlreadyRegistered(AlreadyRegisteredError {
                name: name.to_string(),
                kind: RegistrationKind::Singleton,
            }));
        }
        self.store.add(state, name, bean);
        Ok(())
    }

    /// Registers an early-reference factory for a singleton in creation.
    pub fn add_early_factory(&self, name: &str, factory: EarlyFactory) {
        let mut state = self.store.lock();
        self.store.add_early_factory(&mut state, name, factory);
    }

    /// Clears every cache entry for `name`. Idempotent.
    pub fn remove_singleton(&self, name: &str) {
        let mut state = self.store.lock();
        self.store.remove(&mut state, name);
    }

    pub fn contains_singleton(&self, name: &str) -> bool {
        self.store.contains(name)
    }

    /// Registered singleton names, in registration order.
    pub fn singleton_names(&self) -> Vec<String> {
        self.store.lock().registered.iter().cloned().collect()
    }

    /// Names of fully constructed singletons. Does not take the store lock.
    pub fn cached_singleton_names(&self) -> Vec<String> {
        self.store.cached_names()
    }

    pub fn singleton_count(&self) -> usize {
        self.store.lock().registered.len()
    }

    // ── Creation tracking ──

    /// Opts `name` out of (`false`) or back into the reentrancy check.
    pub fn set_currently_in_creation(&self, name: &str, in_creation: bool) {
        self.creation.set_currently_in_creation(name, in_creation);
    }

    /// `true` if `name` is in creation and subject to the reentrancy check.
    pub fn is_currently_in_creation(&self, name: &str) -> bool {
        self.creation.is_in_creation(name)
    }

    /// `true` if `name` is in creation, exclusions notwithstanding.
    pub fn is_singleton_in_creation(&self, name: &str) -> bool {
        self.creation.is_actually_in_creation(name)
    }

    // ── Dependencies ──

    pub fn register_disposable(&self, name: &str, handle: Arc<dyn DisposableBean>) {
        self.disposals.register(name, handle);
    }

    pub fn has_disposable(&self, name: &str) -> bool {
        self.disposals.contains(name)
    }

    /// Records that `dependent` must be destroyed before `owner`.
    pub fn register_dependency(&self, owner: &str, dependent: &str) {
        self.graph.register_dependency(owner, dependent);
    }

    /// Records that `inner` is owned by `outer`.
    pub fn register_containment(&self, inner: &str, outer: &str) {
        self.graph.register_containment(inner, outer);
    }

    /// `true` if `dependent` depends on `name`, directly or transitively.
    pub fn is_dependent(&self, name: &str, dependent: &str) -> bool {
        self.graph.is_dependent(name, dependent)
    }

    pub fn has_dependents(&self, name: &str) -> bool {
        self.graph.has_dependents(name)
    }

    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.graph.dependents_of(name)
    }

    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.graph.dependencies_of(name)
    }

    // ── Teardown ──

    pub fn phase(&self) -> Phase {
        self.store.lock().phase
    }

    /// Destroys `name` together with everything that depends on it.
    pub fn destroy_singleton(&self, name: &str) {
        self.disposals
            .destroy_one(name, &self.graph, &mut |n| self.evict(n));
    }

    /// Destroys every disposable singleton, newest first, then clears all
    /// caches and relations.
    ///
    /// New singleton creation fails with [`SprigError::CreationNotAllowed`]
    /// while this runs. Afterwards the registry is empty and usable again.
    #[instrument(skip(self), name = "destroy_singletons")]
    pub fn destroy_singletons(&self) {
        self.store.lock().phase = Phase::Destroying;
        debug!(disposables = self.disposals.len(), "Destroying singletons");

        self.disposals
            .destroy_all(&self.graph, &mut |n| self.evict(n));
        self.graph.clear();

        let mut state = self.store.lock();
        self.store.clear(&mut state);
        if !self.creation.names().is_empty() {
            warn!(in_creation = ?self.creation.names(), "Singletons still in creation after teardown");
        }
    }

    fn evict(&self, name: &str) {
        let mut state = self.store.lock();
        self.store.remove(&mut state, name);
    }
}

impl Default for SingletonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SingletonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonRegistry")
            .field("store", &self.store)
            .field("disposables", &self.disposals.len())
            .finish()
    }
}

// ═══════════════════════════════════════════
// CreationContext
// ═══════════════════════════════════════════

/// Handle to the registry with the store mutex held.
///
/// Passed to singleton factories and [`SingletonRegistry::with_lock`]
/// callbacks. Every method assumes the lock is held and never re-acquires it.
pub struct CreationContext<'a> {
    registry: &'a SingletonRegistry,
    state: &'a mut StoreState,
}

impl<'a> CreationContext<'a> {
    pub fn registry(&self) -> &'a SingletonRegistry {
        self.registry
    }

    /// Locked variant of [`SingletonRegistry::get_singleton_with`].
    pub fn get_singleton(&mut self, name: &str, allow_early: bool) -> Option<Bean> {
        let in_creation = self.registry.creation.is_actually_in_creation(name);
        self.registry
            .store
            .lookup(self.state, name, in_creation, allow_early)
    }

    /// Locked variant of [`SingletonRegistry::get_or_create`].
    pub fn get_or_create<F>(&mut self, name: &str, factory: F) -> Result<Bean>
    where
        F: FnOnce(&mut CreationContext<'_>) -> Result<Bean>,
    {
        self.registry
            .get_or_create_locked(self.state, name, factory)
    }

    pub fn register_singleton(&mut self, name: &str, bean: Bean) -> Result<()> {
        self.registry.register_locked(self.state, name, bean)
    }

    pub fn add_early_factory(&mut self, name: &str, factory: EarlyFactory) {
        self.registry
            .store
            .add_early_factory(self.state, name, factory);
    }

    pub fn remove_singleton(&mut self, name: &str) {
        self.registry.store.remove(self.state, name);
    }

    /// Records a side-effect error for the construction attempt in progress.
    ///
    /// Ignored outside a construction attempt. Kept up to
    /// [`SUPPRESSED_ERRORS_LIMIT`](crate::store::SUPPRESSED_ERRORS_LIMIT) errors.
    pub fn on_suppressed_error(&mut self, err: SprigError) {
        if let Some(suppressed) = self.state.suppressed.as_mut() {
            suppressed.push(err);
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn singleton_names(&self) -> Vec<String> {
        self.state.registered.iter().cloned().collect()
    }

    /// Locked variant of [`SingletonRegistry::destroy_singleton`].
    ///
    /// Cleanup callbacks run with the store mutex held.
    pub fn destroy_singleton(&mut self, name: &str) {
        let registry = self.registry;
        let state = &mut *self.state;
        registry
            .disposals
            .destroy_one(name, &registry.graph, &mut |n| registry.store.remove(state, n));
    }
}

impl std::fmt::Debug for CreationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreationContext")
            .field("phase", &self.state.phase)
            .finish()
    }
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
