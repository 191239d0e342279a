//! # The bean factory
//!
//! [`BeanFactory`] builds beans from their [`BeanDefinition`]s on top of a
//! [`SingletonRegistry`].
//!
//! # Creating a bean
//! ```text
//! get_bean(name)
//!   │ canonical name, cached singleton?  ──hit──> done
//!   ▼
//! store lock ─> depends-on beans first
//!   │
//!   ├─ singleton: get_or_create ─┐
//!   └─ prototype: thread guard ──┤
//!                                ▼
//!   instantiate ─> publish early reference ─> populate
//!     ─> before-init processors ─> init ─> after-init processors
//!     ─> reconcile early reference ─> register cleanup
//! ```
//!
//! Callbacks receive a [`BeanResolver`] to look up their own dependencies.
//! Resolving through it records the dependency edge and reuses the store
//! lock already held by the creation in progress. Calling
//! [`BeanFactory::get_bean`] from inside a callback instead deadlocks when
//! the requested bean is itself in creation.

use std::any::type_name;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use sprig_support::rendering::{shorten_type_name, suggest_similar};
use tracing::{debug, info, instrument, trace};

use crate::alias::CanonicalName;
use crate::creation::PrototypeGuard;
use crate::definition::{BeanDefinition, BeanKind, DefinitionRegistry, Role};
use crate::error::{BoxError, NoSuchBeanError, Result, SprigError};
use crate::factory_bean::{
    FACTORY_BEAN_PREFIX, FactoryBean, as_factory_bean, is_factory_dereference, transformed_bean_name,
};
use crate::graph::DependsOnValidator;
use crate::processor::{BeanPostProcessor, Rank};
use crate::provider::DefinitionRegistrar;
use crate::scope::Scope;
use crate::settings::Settings;
use crate::singleton::{CreationContext, SingletonRegistry};
use crate::store::{Bean, same_instance};

/// Definition-driven bean factory.
///
/// # Examples
/// ```rust
/// use std::sync::Arc;
/// use sprig_container::definition::BeanDefinition;
/// use sprig_container::factory::BeanFactory;
/// use sprig_container::settings::Settings;
///
/// struct Clock;
/// struct Scheduler { clock: Arc<Clock> }
///
/// let factory = BeanFactory::new(Settings::default());
/// factory.register_bean_definition("clock", BeanDefinition::of(|_| Ok(Clock))).unwrap();
/// factory
///     .register_bean_definition(
///         "scheduler",
///         BeanDefinition::of(|r| Ok(Scheduler { clock: r.get::<Clock>("clock")? })),
///     )
///     .unwrap();
///
/// let scheduler = factory.get_bean_typed::<Scheduler>("scheduler").unwrap();
/// let clock = factory.get_bean_typed::<Clock>("clock").unwrap();
/// assert!(Arc::ptr_eq(&scheduler.clock, &clock));
/// ```
pub struct BeanFactory {
    singletons: SingletonRegistry,
    definitions: RwLock<DefinitionRegistry>,
    post_processors: RwLock<Vec<Arc<dyn BeanPostProcessor>>>,
    /// Names per kind, cleared whenever definitions change.
    metadata: Mutex<HashMap<BeanKind, Vec<(String, Rank)>>>,
    /// Shared factory bean objects: the factory bean instance and what it produced.
    factory_objects: DashMap<String, (Bean, Bean)>,
    settings: Settings,
}

impl BeanFactory {
    pub fn new(settings: Settings) -> Self {
        let aliases = Arc::new(crate::alias::AliasRegistry::new(settings.allow_alias_overriding));
        Self {
            singletons: SingletonRegistry::with_aliases(aliases),
            definitions: RwLock::new(DefinitionRegistry::default()),
            post_processors: RwLock::new(Vec::new()),
            metadata: Mutex::new(HashMap::new()),
            factory_objects: DashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn singletons(&self) -> &SingletonRegistry {
        &self.singletons
    }

    pub fn canonical_name(&self, name: &str) -> String {
        self.singletons.aliases().canonical_name(name)
    }

    // ── Definitions ──

    /// Registers a bean definition.
    ///
    /// Replacing an existing definition destroys the singleton built from it.
    ///
    /// # Errors
    /// [`SprigError::AlreadyRegistered`] if `name` is taken and definition
    /// overriding is disabled.
    pub fn register_bean_definition(&self, name: &str, definition: BeanDefinition) -> Result<()> {
        let previous = self.definitions.write().register(
            name,
            definition,
            self.settings.allow_bean_definition_overriding,
        )?;

        if previous.is_some() {
            info!(bean = name, "Overriding bean definition");
        }
        if previous.is_some() || self.singletons.contains_singleton(name) {
            self.singletons.destroy_singleton(name);
        }
        self.clear_metadata_cache();
        Ok(())
    }

    /// Removes a bean definition and destroys its singleton.
    ///
    /// # Errors
    /// [`SprigError::NoSuchBean`] if no definition is registered under `name`.
    pub fn remove_bean_definition(&self, name: &str) -> Result<()> {
        let removed = self.definitions.write().remove(name);
        if removed.is_none() {
            return Err(self.no_such_bean(name, None));
        }
        debug!(bean = name, "Removed bean definition");
        self.singletons.destroy_singleton(name);
        self.clear_metadata_cache();
        Ok(())
    }

    pub fn contains_bean_definition(&self, name: &str) -> bool {
        self.definitions.read().contains(name)
    }

    /// Definition names in registration order.
    pub fn bean_definition_names(&self) -> Vec<String> {
        self.definitions.read().names()
    }

    pub fn bean_definition_count(&self) -> usize {
        self.definitions.read().len()
    }

    /// Returns a copy of the definition registered under `name`.
    pub fn get_bean_definition(&self, name: &str) -> Result<BeanDefinition> {
        let found = self.definitions.read().get(name).cloned();
        found.ok_or_else(|| self.no_such_bean(name, None))
    }

    /// Edits the definition registered under `name` in place.
    pub fn modify_bean_definition(
        &self,
        name: &str,
        modify: impl FnOnce(&mut BeanDefinition),
    ) -> Result<()> {
        let found = match self.definitions.write().get_mut(name) {
            Some(definition) => {
                modify(definition);
                true
            }
            None => false,
        };
        if !found {
            return Err(self.no_such_bean(name, None));
        }
        trace!(bean = name, "Modified bean definition");
        self.clear_metadata_cache();
        Ok(())
    }

    /// Registers `alias` as another name for `name`.
    pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        self.singletons.aliases().register_alias(name, alias)
    }

    /// Registers an externally built singleton.
    pub fn register_singleton(&self, name: &str, bean: Bean) -> Result<()> {
        self.singletons.register_singleton(name, bean)?;
        self.clear_metadata_cache();
        Ok(())
    }

    /// Names and ranks of the definitions of `kind`, in registration order.
    pub fn bean_names_for_kind(&self, kind: BeanKind) -> Vec<(String, Rank)> {
        if let Some(cached) = self.metadata.lock().get(&kind) {
            return cached.clone();
        }
        let names = self.definitions.read().names_for_kind(kind);
        self.metadata.lock().insert(kind, names.clone());
        names
    }

    pub fn clear_metadata_cache(&self) {
        self.metadata.lock().clear();
    }

    // ── Bean post-processors ──

    /// Appends `processor`, moving it to the end if it was already added.
    pub fn add_bean_post_processor(&self, processor: Arc<dyn BeanPostProcessor>) {
        let mut processors = self.post_processors.write();
        processors.retain(|p| !std::ptr::addr_eq(Arc::as_ptr(p), Arc::as_ptr(&processor)));
        debug!(processor = processor.name(), "Added bean post-processor");
        processors.push(processor);
    }

    pub fn bean_post_processor_count(&self) -> usize {
        self.post_processors.read().len()
    }

    /// Snapshot of the bean post-processors, in invocation order.
    pub fn bean_post_processors(&self) -> Vec<Arc<dyn BeanPostProcessor>> {
        self.post_processors.read().clone()
    }

    // ── Queries ──

    /// `true` if a singleton or a definition exists under `name`.
    pub fn contains_bean(&self, name: &str) -> bool {
        let name = self.canonical_name(transformed_bean_name(name));
        self.singletons.contains_singleton(&name) || self.contains_bean_definition(&name)
    }

    /// Role of the definition registered under `name`, if any.
    pub fn role_of(&self, name: &str) -> Option<Role> {
        let name = self.canonical_name(transformed_bean_name(name));
        self.definitions.read().get(&name).map(BeanDefinition::role)
    }

    /// `true` if `name` resolves to a shared instance.
    pub fn is_singleton(&self, name: &str) -> bool {
        let name = self.canonical_name(transformed_bean_name(name));
        let definition_scope = self.definitions.read().get(&name).map(BeanDefinition::scope);
        match definition_scope {
            Some(scope) => scope.is_singleton(),
            None => self.singletons.contains_singleton(&name),
        }
    }

    // ── Lookup ──

    /// Returns the bean registered under `name` (or one of its aliases),
    /// creating it if needed.
    ///
    /// For a [`FactoryBean`] this is the object it produces; prefix the name
    /// with `&` to get the factory bean itself.
    ///
    /// # Errors
    /// - [`SprigError::NoSuchBean`] if nothing is registered under `name`
    /// - [`SprigError::CircularDependsOn`] for a depends-on cycle
    /// - [`SprigError::ConstructionFailed`] if the bean or one of its
    ///   dependencies failed to build
    /// - [`SprigError::BeanIsNotAFactory`] for a `&` name of a plain bean
    pub fn get_bean(&self, name: &str) -> Result<Bean> {
        let bean_name = self.canonical_name(transformed_bean_name(name));
        if let Some(instance) = self.singletons.get_singleton(&bean_name) {
            if let Some(bean) = self.exposed_without_building(&instance, name, &bean_name) {
                trace!(bean = %bean_name, "Returning cached instance of singleton bean");
                return Ok(bean);
            }
        }
        self.singletons.with_lock(|ctx| {
            let instance = self.do_get_bean(ctx, &bean_name, None)?;
            self.object_for_instance(instance, name, &bean_name)
        })
    }

    /// Typed variant of [`get_bean`](Self::get_bean) for beans holding a `T`.
    pub fn get_bean_typed<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let bean = self.get_bean(name)?;
        downcast_bean(bean, name)
    }

    fn do_get_bean(
        &self,
        ctx: &mut CreationContext<'_>,
        name: &str,
        required_by: Option<&str>,
    ) -> Result<Bean> {
        if let Some(bean) = ctx.get_singleton(name, true) {
            if self.singletons.is_singleton_in_creation(name) {
                trace!(bean = name, "Returning early reference to singleton in creation");
            }
            return Ok(bean);
        }

        let definition = self.definition_for(name, required_by)?;

        for dependency in definition.depends_on() {
            let dependency = self.canonical_name(dependency);
            if self.singletons.is_dependent(name, &dependency) {
                return Err(SprigError::CircularDependsOn {
                    chain: vec![name.to_string(), dependency, name.to_string()],
                });
            }
            self.singletons.register_dependency(&dependency, name);
            self.do_get_bean(ctx, &dependency, Some(name))
                .map_err(|e| SprigError::construction_failed(name, e, Vec::new()))?;
        }

        match definition.scope() {
            Scope::Singleton => ctx.get_or_create(name, |ctx| {
                let created = self.create_bean(ctx, name, &definition);
                if created.is_err() {
                    // Drop the early reference and whatever already captured it.
                    ctx.destroy_singleton(name);
                }
                created
            }),
            Scope::Prototype => {
                let _guard = PrototypeGuard::push(name)?;
                trace!(bean = name, "Creating prototype bean");
                self.create_bean(ctx, name, &definition)
                    .map_err(|e| SprigError::construction_failed(name, e, Vec::new()))
            }
        }
    }

    // ── Factory beans ──

    /// What `requested` exposes for `instance`, when nothing has to be built.
    fn exposed_without_building(&self, instance: &Bean, requested: &str, bean_name: &str) -> Option<Bean> {
        match (as_factory_bean(instance), is_factory_dereference(requested)) {
            (None, false) | (Some(_), true) => Some(instance.clone()),
            (None, true) => None,
            (Some(_), false) => self.cached_factory_object(bean_name, instance),
        }
    }

    /// What `requested` exposes for `instance`. Runs with the store lock held.
    fn object_for_instance(&self, instance: Bean, requested: &str, bean_name: &str) -> Result<Bean> {
        let factory_bean = as_factory_bean(&instance);
        if is_factory_dereference(requested) {
            return match factory_bean {
                Some(_) => Ok(instance),
                None => Err(SprigError::BeanIsNotAFactory {
                    name: bean_name.to_string(),
                }),
            };
        }
        let Some(factory_bean) = factory_bean else {
            return Ok(instance);
        };

        let shared = factory_bean.is_singleton() && self.singletons.contains_singleton(bean_name);
        if !shared {
            return self.object_from_factory_bean(factory_bean.as_ref(), bean_name);
        }
        if let Some(object) = self.cached_factory_object(bean_name, &instance) {
            return Ok(object);
        }
        let object = self.object_from_factory_bean(factory_bean.as_ref(), bean_name)?;
        self.factory_objects
            .insert(bean_name.to_string(), (instance, object.clone()));
        Ok(object)
    }

    fn object_from_factory_bean(&self, factory_bean: &dyn FactoryBean, bean_name: &str) -> Result<Bean> {
        trace!(bean = bean_name, factory_bean = factory_bean.name(), "Obtaining object from factory bean");
        let mut object = factory_bean
            .get_object()
            .map_err(|e| SprigError::construction_failed(bean_name, e, Vec::new()))?;
        for processor in self.bean_post_processors() {
            object = processor.post_process_after_initialization(object, bean_name)?;
        }
        Ok(object)
    }

    /// The object cached for `bean_name`, if `instance` is the factory bean that built it.
    fn cached_factory_object(&self, bean_name: &str, instance: &Bean) -> Option<Bean> {
        let entry = self.factory_objects.get(bean_name)?;
        let (factory_bean, object) = entry.value();
        same_instance(factory_bean, instance).then(|| object.clone())
    }

    fn definition_for(&self, name: &str, required_by: Option<&str>) -> Result<BeanDefinition> {
        let found = self.definitions.read().get(name).cloned();
        found.ok_or_else(|| self.no_such_bean(name, required_by))
    }

    fn no_such_bean(&self, name: &str, required_by: Option<&str>) -> SprigError {
        let mut available = self.definitions.read().names();
        available.extend(self.singletons.cached_singleton_names());
        let available: Vec<&str> = available.iter().map(String::as_str).collect();
        SprigError::NoSuchBean(NoSuchBeanError {
            name: name.to_string(),
            required_by: required_by.map(str::to_string),
            suggestions: suggest_similar(name, &available, 3),
        })
    }

    // ── Creation ──

    fn create_bean(
        &self,
        ctx: &mut CreationContext<'_>,
        name: &str,
        definition: &BeanDefinition,
    ) -> Result<Bean> {
        trace!(bean = name, "Creating instance of bean");
        let raw = {
            let mut resolver = BeanResolver::new(self, ctx, name, definition.is_singleton());
            (definition.instantiate_fn())(&mut resolver)?
        };

        let processors = self.bean_post_processors();
        let early_exposure = definition.is_singleton()
            && self.settings.allow_circular_references
            && self.singletons.is_singleton_in_creation(name);
        if early_exposure {
            trace!(bean = name, "Eagerly caching bean to allow for resolving potential circular references");
            let early_raw = raw.clone();
            let early_processors = processors.clone();
            let bean_name = name.to_string();
            ctx.add_early_factory(
                name,
                Box::new(move || {
                    early_processors
                        .iter()
                        .fold(early_raw, |bean, p| p.early_bean_reference(bean, &bean_name))
                }),
            );
        }

        if let Some(populate) = definition.populate_fn() {
            let mut resolver = BeanResolver::new(self, ctx, name, definition.is_singleton());
            populate(&raw, &mut resolver)?;
        }

        let mut exposed = self.initialize_bean(name, raw.clone(), definition, &processors)?;

        if early_exposure {
            if let Some(early) = ctx.get_singleton(name, false) {
                if same_instance(&exposed, &raw) {
                    exposed = early;
                } else if self.singletons.has_dependents(name) {
                    return Err(SprigError::RawReferenceExposed {
                        name: name.to_string(),
                        dependents: self.singletons.dependents_of(name),
                    });
                }
            }
        }

        if definition.is_singleton() {
            if let Some(destroy) = definition.destroy_fn() {
                let destroy = destroy.clone();
                let target = raw;
                self.singletons.register_disposable(
                    name,
                    Arc::new(move || -> std::result::Result<(), BoxError> { destroy(&target) }),
                );
            }
        }

        Ok(exposed)
    }

    fn initialize_bean(
        &self,
        name: &str,
        bean: Bean,
        definition: &BeanDefinition,
        processors: &[Arc<dyn BeanPostProcessor>],
    ) -> Result<Bean> {
        let mut bean = bean;
        for processor in processors {
            bean = processor.post_process_before_initialization(bean, name)?;
        }
        if let Some(init) = definition.init_fn() {
            trace!(bean = name, "Invoking init callback");
            init(&bean)?;
        }
        for processor in processors {
            bean = processor.post_process_after_initialization(bean, name)?;
        }
        Ok(bean)
    }

    // ── Lifecycle ──

    /// Instantiates every non-lazy singleton definition, in registration order.
    #[instrument(skip(self), name = "preinstantiate_singletons")]
    pub fn preinstantiate_singletons(&self) -> Result<()> {
        let names = self.bean_definition_names();
        debug!(definitions = names.len(), "Pre-instantiating singletons");

        for name in &names {
            let eager = self
                .definitions
                .read()
                .get(name)
                .filter(|d| d.is_singleton() && !d.is_lazy_init())
                .map(BeanDefinition::kind);
            match eager {
                // Only the factory bean; its object is built on first request.
                Some(BeanKind::FactoryBean) => {
                    self.get_bean(&format!("{FACTORY_BEAN_PREFIX}{name}"))?;
                }
                Some(_) => {
                    self.get_bean(name)?;
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Checks declared depends-on relations for cycles and unknown names.
    pub fn validate_dependencies(&self) -> Result<()> {
        let (declared, mut known) = {
            let definitions = self.definitions.read();
            let declared: indexmap::IndexMap<String, Vec<String>> = definitions
                .depends_on_map()
                .into_iter()
                .map(|(name, deps)| {
                    let deps = deps.iter().map(|d| self.canonical_name(d)).collect();
                    (name, deps)
                })
                .collect();
            let known: HashSet<String> = definitions.names().into_iter().collect();
            (declared, known)
        };
        known.extend(self.singletons.singleton_names());

        DependsOnValidator::new(&declared, &known).validate()
    }

    pub fn destroy_singleton(&self, name: &str) {
        let name = self.canonical_name(transformed_bean_name(name));
        self.singletons.destroy_singleton(&name);
        self.factory_objects.remove(&name);
    }

    /// Destroys every singleton in dependency order.
    pub fn destroy_singletons(&self) {
        self.singletons.destroy_singletons();
        self.factory_objects.clear();
        self.clear_metadata_cache();
    }
}

impl DefinitionRegistrar for BeanFactory {
    fn register_definition(&self, name: &str, definition: BeanDefinition) -> Result<()> {
        self.register_bean_definition(name, definition)
    }

    fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        BeanFactory::register_alias(self, name, alias)
    }
}

impl fmt::Debug for BeanFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanFactory")
            .field("definitions", &self.bean_definition_count())
            .field("post_processors", &self.bean_post_processor_count())
            .field("singletons", &self.singletons)
            .finish()
    }
}

fn downcast_bean<T: Send + Sync + 'static>(bean: Bean, name: &str) -> Result<Arc<T>> {
    bean.downcast::<T>()
        .map_err(|_| SprigError::BeanNotOfRequiredType {
            name: name.to_string(),
            expected: shorten_type_name(type_name::<T>()),
        })
}

// ═══════════════════════════════════════════
// BeanResolver
// ═══════════════════════════════════════════

/// Lookup handle passed to definition callbacks.
///
/// Every bean obtained through it is recorded as a dependency of the bean
/// being built, so teardown destroys the current bean first.
pub struct BeanResolver<'a, 'c> {
    factory: &'a BeanFactory,
    ctx: &'a mut CreationContext<'c>,
    current: &'a str,
    singleton: bool,
}

impl<'a, 'c> BeanResolver<'a, 'c> {
    fn new(
        factory: &'a BeanFactory,
        ctx: &'a mut CreationContext<'c>,
        current: &'a str,
        singleton: bool,
    ) -> Self {
        Self {
            factory,
            ctx,
            current,
            singleton,
        }
    }

    /// Name of the bean being built.
    pub fn bean_name(&self) -> &str {
        self.current
    }

    pub fn factory(&self) -> &BeanFactory {
        self.factory
    }

    /// Resolves `name` and records it as a dependency of the current bean.
    pub fn get_bean(&mut self, name: &str) -> Result<Bean> {
        let canonical = self.factory.canonical_name(transformed_bean_name(name));
        let instance = self
            .factory
            .do_get_bean(self.ctx, &canonical, Some(self.current))?;
        self.factory
            .singletons
            .register_dependency(&canonical, self.current);
        self.factory.object_for_instance(instance, name, &canonical)
    }

    /// Typed variant of [`get_bean`](Self::get_bean).
    pub fn get<T: Send + Sync + 'static>(&mut self, name: &str) -> Result<Arc<T>> {
        let bean = self.get_bean(name)?;
        downcast_bean(bean, name)
    }

    /// Optional lookup. A failure is recorded against the construction in
    /// progress and reported as `None`.
    pub fn try_get<T: Send + Sync + 'static>(&mut self, name: &str) -> Option<Arc<T>> {
        match self.get::<T>(name) {
            Ok(bean) => Some(bean),
            Err(e) => {
                debug!(bean = self.current, dependency = name, error = %e, "Optional dependency unavailable");
                self.ctx.on_suppressed_error(e);
                None
            }
        }
    }

    /// Builds an inner bean owned by the current bean.
    ///
    /// The inner bean is never cached. It is named `"{current}#{local_name}"`.
    /// Inside a singleton it is destroyed together with its owner; inside a
    /// prototype it is built as a prototype and never destroyed.
    pub fn inner_bean(&mut self, local_name: &str, definition: &BeanDefinition) -> Result<Bean> {
        let inner_name = format!("{}#{}", self.current, local_name);
        for dependency in definition.depends_on() {
            let dependency = self.factory.canonical_name(dependency);
            self.factory
                .singletons
                .register_dependency(&dependency, &inner_name);
            self.factory
                .do_get_bean(self.ctx, &dependency, Some(&inner_name))?;
        }

        if !self.singleton {
            let definition = definition.clone().prototype();
            return self
                .factory
                .create_bean(self.ctx, &inner_name, &definition)
                .map_err(|e| SprigError::construction_failed(&inner_name, e, Vec::new()));
        }

        let bean = self
            .factory
            .create_bean(self.ctx, &inner_name, definition)
            .map_err(|e| SprigError::construction_failed(&inner_name, e, Vec::new()))?;
        self.factory
            .singletons
            .register_containment(&inner_name, self.current);
        Ok(bean)
    }

    pub fn contains_bean(&self, name: &str) -> bool {
        self.factory.contains_bean(name)
    }
}

impl fmt::Debug for BeanResolver<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanResolver")
            .field("current", &self.current)
            .finish()
    }
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn factory() -> BeanFactory {
        BeanFactory::new(Settings::default())
    }

    type Log = Arc<parking_lot::Mutex<Vec<String>>>;

    type DestroyLogger = Box<dyn Fn(&Bean) -> std::result::Result<(), BoxError> + Send + Sync>;

    fn logging_destroy(log: &Log, name: &str) -> DestroyLogger {
        let log = log.clone();
        let name = name.to_string();
        Box::new(move |_: &Bean| -> std::result::Result<(), BoxError> {
            log.lock().push(name.clone());
            Ok(())
        })
    }

    #[test]
    fn singleton_created_once() {
        let factory = factory();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        factory
            .register_bean_definition(
                "a",
                BeanDefinition::of(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(1i32)
                }),
            )
            .unwrap();

        let first = factory.get_bean("a").unwrap();
        let second = factory.get_bean("a").unwrap();
        assert!(same_instance(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prototype_created_every_time() {
        let factory = factory();
        factory
            .register_bean_definition("p", BeanDefinition::of(|_| Ok(1i32)).prototype())
            .unwrap();

        let first = factory.get_bean("p").unwrap();
        let second = factory.get_bean("p").unwrap();
        assert!(!same_instance(&first, &second));
        assert!(!factory.singletons().contains_singleton("p"));
    }

    #[test]
    fn unknown_bean_suggests_similar_names() {
        let factory = factory();
        factory
            .register_bean_definition("userService", BeanDefinition::of(|_| Ok(1i32)))
            .unwrap();

        match factory.get_bean("userServise").unwrap_err() {
            SprigError::NoSuchBean(e) => {
                assert_eq!(e.name, "userServise");
                assert_eq!(e.suggestions, vec!["userService".to_string()]);
            }
            other => panic!("Expected NoSuchBean, got: {other:?}"),
        }
    }

    #[test]
    fn typed_lookup_checks_type() {
        let factory = factory();
        factory
            .register_bean_definition("n", BeanDefinition::of(|_| Ok(5u64)))
            .unwrap();

        assert_eq!(*factory.get_bean_typed::<u64>("n").unwrap(), 5);
        match factory.get_bean_typed::<String>("n").unwrap_err() {
            SprigError::BeanNotOfRequiredType { name, expected } => {
                assert_eq!(name, "n");
                assert_eq!(expected, "String");
            }
            other => panic!("Expected BeanNotOfRequiredType, got: {other:?}"),
        }
    }

    #[test]
    fn alias_resolves_to_same_singleton() {
        let factory = factory();
        factory
            .register_bean_definition("dataSource", BeanDefinition::of(|_| Ok(1i32)))
            .unwrap();
        factory.register_alias("dataSource", "db").unwrap();

        let by_alias = factory.get_bean("db").unwrap();
        let by_name = factory.get_bean("dataSource").unwrap();
        assert!(same_instance(&by_alias, &by_name));
        assert!(factory.contains_bean("db"));
    }

    #[derive(Default)]
    struct Node {
        peer: OnceLock<Arc<Node>>,
    }

    fn node_with_peer(peer: &'static str) -> BeanDefinition {
        BeanDefinition::of(|_| Ok(Node::default())).with_populate(move |bean, r| {
            let node = bean.downcast_ref::<Node>().ok_or_else(|| SprigError::IllegalState("not a node".into()))?;
            let _ = node.peer.set(r.get::<Node>(peer)?);
            Ok(())
        })
    }

    #[test]
    fn circular_populate_resolves() {
        let factory = factory();
        factory.register_bean_definition("a", node_with_peer("b")).unwrap();
        factory.register_bean_definition("b", node_with_peer("a")).unwrap();

        let a = factory.get_bean_typed::<Node>("a").unwrap();
        let b = factory.get_bean_typed::<Node>("b").unwrap();
        assert!(Arc::ptr_eq(a.peer.get().unwrap(), &b));
        assert!(Arc::ptr_eq(b.peer.get().unwrap(), &a));
        assert!(factory.singletons().is_dependent("a", "b"));
    }

    #[test]
    fn circular_populate_fails_when_disallowed() {
        let factory = BeanFactory::new(Settings::default().allow_circular_references(false));
        factory.register_bean_definition("a", node_with_peer("b")).unwrap();
        factory.register_bean_definition("b", node_with_peer("a")).unwrap();

        let err = factory.get_bean("a").unwrap_err();
        assert!(matches!(err.root_cause(), SprigError::CurrentlyInCreation(_)));
        assert!(!factory.singletons().contains_singleton("a"));
        assert!(!factory.singletons().contains_singleton("b"));
    }

    #[test]
    fn constructor_cycle_fails() {
        let factory = factory();
        factory
            .register_bean_definition("a", BeanDefinition::of(|r| r.get::<u8>("b").map(|_| 1u8)))
            .unwrap();
        factory
            .register_bean_definition("b", BeanDefinition::of(|r| r.get::<u8>("a").map(|_| 2u8)))
            .unwrap();

        let err = factory.get_bean("a").unwrap_err();
        match err.root_cause() {
            SprigError::CurrentlyInCreation(e) => assert_eq!(e.name, "a"),
            other => panic!("Expected CurrentlyInCreation, got: {other:?}"),
        }
    }

    #[test]
    fn depends_on_created_first_and_destroyed_last() {
        let factory = factory();
        let log: Log = Arc::default();
        let created: Log = Arc::default();
        for name in ["schema", "app"] {
            let created = created.clone();
            let mut definition = BeanDefinition::of(move |_| {
                created.lock().push(name.to_string());
                Ok(0u8)
            })
            .with_destroy(logging_destroy(&log, name));
            if name == "app" {
                definition = definition.with_depends_on(["schema"]);
            }
            factory.register_bean_definition(name, definition).unwrap();
        }

        factory.get_bean("app").unwrap();
        assert_eq!(*created.lock(), vec!["schema", "app"]);

        factory.destroy_singletons();
        assert_eq!(*log.lock(), vec!["app", "schema"]);
    }

    #[test]
    fn circular_depends_on_detected() {
        let factory = factory();
        factory
            .register_bean_definition("a", BeanDefinition::of(|_| Ok(0u8)).with_depends_on(["b"]))
            .unwrap();
        factory
            .register_bean_definition("b", BeanDefinition::of(|_| Ok(0u8)).with_depends_on(["a"]))
            .unwrap();

        let err = factory.get_bean("a").unwrap_err();
        assert!(matches!(err.root_cause(), SprigError::CircularDependsOn { .. }));
        assert!(matches!(
            factory.validate_dependencies(),
            Err(SprigError::CircularDependsOn { .. })
        ));
    }

    #[test]
    fn missing_depends_on_reported() {
        let factory = factory();
        factory
            .register_bean_definition("a", BeanDefinition::of(|_| Ok(0u8)).with_depends_on(["ghost"]))
            .unwrap();
        assert!(matches!(factory.validate_dependencies(), Err(SprigError::NoSuchBean(_))));
    }

    struct Doubler;

    impl BeanPostProcessor for Doubler {
        fn post_process_after_initialization(&self, bean: Bean, _name: &str) -> Result<Bean> {
            match bean.downcast_ref::<i32>() {
                Some(value) => Ok(Arc::new(value * 2)),
                None => Ok(bean),
            }
        }
    }

    #[test]
    fn post_processors_wrap_beans() {
        let factory = factory();
        factory.add_bean_post_processor(Arc::new(Doubler));
        factory
            .register_bean_definition("n", BeanDefinition::of(|_| Ok(21i32)))
            .unwrap();
        assert_eq!(*factory.get_bean_typed::<i32>("n").unwrap(), 42);
    }

    #[test]
    fn add_bean_post_processor_moves_duplicate_to_end() {
        let factory = factory();
        let doubler: Arc<dyn BeanPostProcessor> = Arc::new(Doubler);
        factory.add_bean_post_processor(doubler.clone());
        factory.add_bean_post_processor(doubler);
        assert_eq!(factory.bean_post_processor_count(), 1);
    }

    #[test]
    fn wrapped_bean_after_early_exposure_fails() {
        let factory = factory();
        factory.add_bean_post_processor(Arc::new(Doubler));
        factory
            .register_bean_definition(
                "n",
                BeanDefinition::of(|_| Ok(21i32)).with_populate(|_, r| {
                    r.get::<u8>("reader")?;
                    Ok(())
                }),
            )
            .unwrap();
        factory
            .register_bean_definition(
                "reader",
                BeanDefinition::of(|r| {
                    r.get::<i32>("n")?;
                    Ok(0u8)
                }),
            )
            .unwrap();

        let err = factory.get_bean("n").unwrap_err();
        match err.root_cause() {
            SprigError::RawReferenceExposed { name, dependents } => {
                assert_eq!(name, "n");
                assert_eq!(dependents, &vec!["reader".to_string()]);
            }
            other => panic!("Expected RawReferenceExposed, got: {other:?}"),
        }
        assert!(!factory.singletons().contains_singleton("n"));
        assert!(!factory.singletons().contains_singleton("reader"));
    }

    #[test]
    fn init_runs_between_processor_hooks() {
        let factory = factory();
        let log: Log = Arc::default();

        struct Recorder(Log);
        impl BeanPostProcessor for Recorder {
            fn post_process_before_initialization(&self, bean: Bean, name: &str) -> Result<Bean> {
                self.0.lock().push(format!("before {name}"));
                Ok(bean)
            }
            fn post_process_after_initialization(&self, bean: Bean, name: &str) -> Result<Bean> {
                self.0.lock().push(format!("after {name}"));
                Ok(bean)
            }
        }

        factory.add_bean_post_processor(Arc::new(Recorder(log.clone())));
        let init_log = log.clone();
        factory
            .register_bean_definition(
                "svc",
                BeanDefinition::of(|_| Ok(0u8)).with_init(move |_| {
                    init_log.lock().push("init svc".to_string());
                    Ok(())
                }),
            )
            .unwrap();

        factory.get_bean("svc").unwrap();
        assert_eq!(*log.lock(), vec!["before svc", "init svc", "after svc"]);
    }

    #[test]
    fn failed_init_leaves_nothing_behind() {
        let factory = factory();
        factory
            .register_bean_definition(
                "broken",
                BeanDefinition::of(|_| Ok(0u8))
                    .with_init(|_| Err(SprigError::factory("cannot connect")))
                    .with_destroy(|_| Ok(())),
            )
            .unwrap();

        let err = factory.get_bean("broken").unwrap_err();
        assert_eq!(err.bean_name(), Some("broken"));
        assert!(!factory.singletons().contains_singleton("broken"));
        assert!(!factory.singletons().has_disposable("broken"));
    }

    #[test]
    fn inner_bean_destroyed_with_outer() {
        let factory = factory();
        let log: Log = Arc::default();
        let inner = BeanDefinition::of(|_| Ok(0u8)).with_destroy(logging_destroy(&log, "inner"));
        factory
            .register_bean_definition(
                "outer",
                BeanDefinition::of(move |r| {
                    r.inner_bean("engine", &inner)?;
                    Ok(0u8)
                })
                .with_destroy(logging_destroy(&log, "outer")),
            )
            .unwrap();

        factory.get_bean("outer").unwrap();
        assert!(factory.singletons().dependents_of("outer#engine").contains(&"outer".to_string()));
        assert!(!factory.singletons().contains_singleton("outer#engine"));

        factory.destroy_singleton("outer");
        assert_eq!(*log.lock(), vec!["outer", "inner"]);
    }

    #[test]
    fn inner_bean_of_prototype_is_not_disposable() {
        let factory = factory();
        let log: Log = Arc::default();
        let inner = BeanDefinition::of(|_| Ok(0u8)).with_destroy(logging_destroy(&log, "inner"));
        factory
            .register_bean_definition(
                "p",
                BeanDefinition::of(move |r| {
                    r.inner_bean("engine", &inner)?;
                    Ok(0u8)
                })
                .prototype(),
            )
            .unwrap();

        factory.get_bean("p").unwrap();
        assert!(!factory.singletons().has_disposable("p#engine"));
        assert!(factory.singletons().dependents_of("p#engine").is_empty());

        factory.destroy_singletons();
        assert!(log.lock().is_empty());
    }

    struct User {
        id: u32,
    }

    struct UserFactory {
        calls: Arc<AtomicU32>,
        shared: bool,
    }

    impl FactoryBean for UserFactory {
        fn get_object(&self) -> Result<Bean> {
            let id = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Arc::new(User { id }))
        }

        fn is_singleton(&self) -> bool {
            self.shared
        }
    }

    fn user_factory(shared: bool) -> (BeanFactory, Arc<AtomicU32>) {
        let factory = factory();
        let calls = Arc::new(AtomicU32::new(0));
        factory
            .register_bean_definition(
                "user",
                BeanDefinition::factory_bean(UserFactory {
                    calls: calls.clone(),
                    shared,
                }),
            )
            .unwrap();
        (factory, calls)
    }

    #[test]
    fn factory_bean_exposes_produced_object() {
        let (factory, calls) = user_factory(true);
        factory.register_alias("user", "member").unwrap();

        let first = factory.get_bean_typed::<User>("user").unwrap();
        let second = factory.get_bean_typed::<User>("member").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.id, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let factory_bean = factory.get_bean("&user").unwrap();
        assert!(factory_bean.downcast_ref::<Arc<dyn FactoryBean>>().is_some());
        assert!(factory.contains_bean("&user"));
    }

    #[test]
    fn non_shared_factory_bean_builds_every_time() {
        let (factory, calls) = user_factory(false);
        let first = factory.get_bean_typed::<User>("user").unwrap();
        let second = factory.get_bean_typed::<User>("user").unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dereferencing_plain_bean_fails() {
        let factory = factory();
        factory
            .register_bean_definition("plain", BeanDefinition::of(|_| Ok(0u8)))
            .unwrap();
        let err = factory.get_bean("&plain").unwrap_err();
        assert!(matches!(err, SprigError::BeanIsNotAFactory { ref name } if name == "plain"));
    }

    #[test]
    fn resolver_receives_factory_bean_object() {
        let (factory, _) = user_factory(true);
        factory
            .register_bean_definition(
                "session",
                BeanDefinition::of(|r| Ok(r.get::<User>("user")?.id)),
            )
            .unwrap();

        let session = factory.get_bean_typed::<u32>("session").unwrap();
        assert_eq!(*session, 1);
        assert!(factory.singletons().dependents_of("user").contains(&"session".to_string()));
    }

    #[test]
    fn preinstantiation_builds_factory_bean_only() {
        let (factory, calls) = user_factory(true);
        factory.preinstantiate_singletons().unwrap();
        assert!(factory.singletons().contains_singleton("user"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn factory_bean_object_rebuilt_after_destroy() {
        let (factory, calls) = user_factory(true);
        let first = factory.get_bean_typed::<User>("user").unwrap();
        factory.destroy_singleton("user");
        let second = factory.get_bean_typed::<User>("user").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn post_processor_reads_cached_singletons() {
        struct Stamp {
            factory: Arc<OnceLock<std::sync::Weak<BeanFactory>>>,
        }

        impl BeanPostProcessor for Stamp {
            fn post_process_after_initialization(&self, bean: Bean, name: &str) -> Result<Bean> {
                let Some(factory) = self.factory.get().and_then(std::sync::Weak::upgrade) else {
                    return Ok(bean);
                };
                if name == "service" {
                    let version = factory.get_bean_typed::<&'static str>("version")?;
                    return Ok(Arc::new(format!("service@{version}")));
                }
                Ok(bean)
            }
        }

        let handle = Arc::new(OnceLock::new());
        let factory = Arc::new(factory());
        let _ = handle.set(Arc::downgrade(&factory));
        factory.register_singleton("version", Arc::new("1.2")).unwrap();
        factory.add_bean_post_processor(Arc::new(Stamp { factory: handle }));
        factory
            .register_bean_definition("service", BeanDefinition::of(|_| Ok(0u8)))
            .unwrap();

        let service = factory.get_bean_typed::<String>("service").unwrap();
        assert_eq!(*service, "service@1.2");
    }

    #[test]
    fn try_get_records_suppressed_error() {
        let factory = factory();
        factory
            .register_bean_definition(
                "svc",
                BeanDefinition::of(|r| {
                    let missing = r.try_get::<u8>("optionalCache");
                    assert!(missing.is_none());
                    Err::<u8, _>(SprigError::factory("fails anyway"))
                }),
            )
            .unwrap();

        match factory.get_bean("svc").unwrap_err() {
            SprigError::ConstructionFailed(failed) => {
                assert_eq!(failed.related.len(), 1);
                assert!(matches!(failed.related[0], SprigError::NoSuchBean(_)));
            }
            other => panic!("Expected ConstructionFailed, got: {other:?}"),
        }
    }

    #[test]
    fn overriding_definition_destroys_old_singleton() {
        let factory = factory();
        let log: Log = Arc::default();
        factory
            .register_bean_definition(
                "a",
                BeanDefinition::of(|_| Ok(1i32)).with_destroy(logging_destroy(&log, "old")),
            )
            .unwrap();
        factory.get_bean("a").unwrap();

        factory
            .register_bean_definition("a", BeanDefinition::of(|_| Ok(2i32)))
            .unwrap();
        assert_eq!(*log.lock(), vec!["old"]);
        assert_eq!(*factory.get_bean_typed::<i32>("a").unwrap(), 2);
    }

    #[test]
    fn overriding_refused_when_disabled() {
        let factory = BeanFactory::new(Settings::default().allow_bean_definition_overriding(false));
        factory
            .register_bean_definition("a", BeanDefinition::of(|_| Ok(1i32)))
            .unwrap();
        assert!(matches!(
            factory.register_bean_definition("a", BeanDefinition::of(|_| Ok(2i32))),
            Err(SprigError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn preinstantiate_skips_lazy_and_prototypes() {
        let factory = factory();
        factory
            .register_bean_definition("eager", BeanDefinition::of(|_| Ok(0u8)))
            .unwrap();
        factory
            .register_bean_definition("lazy", BeanDefinition::of(|_| Ok(0u8)).lazy())
            .unwrap();
        factory
            .register_bean_definition("proto", BeanDefinition::of(|_| Ok(0u8)).prototype())
            .unwrap();

        factory.preinstantiate_singletons().unwrap();
        assert_eq!(factory.singletons().singleton_names(), vec!["eager".to_string()]);
    }

    #[test]
    fn metadata_cache_invalidated_on_registration() {
        let factory = factory();
        assert!(factory.bean_names_for_kind(BeanKind::BeanPostProcessor).is_empty());

        factory
            .register_bean_definition("doubler", BeanDefinition::bean_post_processor(Doubler))
            .unwrap();
        assert_eq!(factory.bean_names_for_kind(BeanKind::BeanPostProcessor).len(), 1);
    }

    #[test]
    fn modify_definition_in_place() {
        let factory = factory();
        factory
            .register_bean_definition("a", BeanDefinition::of(|_| Ok(0u8)))
            .unwrap();
        factory
            .modify_bean_definition("a", |d| d.set_lazy_init(true))
            .unwrap();
        assert!(factory.get_bean_definition("a").unwrap().is_lazy_init());
        assert!(matches!(
            factory.modify_bean_definition("ghost", |_| {}),
            Err(SprigError::NoSuchBean(_))
        ));
    }

    #[test]
    fn concurrent_get_bean_builds_once() {
        let factory = factory();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        factory
            .register_bean_definition(
                "shared",
                BeanDefinition::of(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    Ok(0u8)
                }),
            )
            .unwrap();

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| factory.get_bean("shared").unwrap());
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
