//! Bean definitions, the declarative description of a bean.
//!
//! A definition says how to instantiate a bean, how to wire and initialize
//! it, how to clean it up, and which other beans must exist first.
//! Callbacks are stored behind `Arc`, so definitions are cheap to clone out
//! of the registry before a bean is built.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{AlreadyRegisteredError, BoxError, RegistrationKind, Result, SprigError};
use crate::event::ApplicationListener;
use crate::factory::BeanResolver;
use crate::factory_bean::FactoryBean;
use crate::processor::{BeanPostProcessor, FactoryPostProcessor, Rank, RegistryPostProcessor};
use crate::scope::Scope;
use crate::store::Bean;

/// Creates the raw instance.
pub type InstantiateFn = Arc<dyn Fn(&mut BeanResolver<'_, '_>) -> Result<Bean> + Send + Sync>;

/// Injects dependencies into an instantiated bean. Runs after the bean's
/// early reference is published, so circular references resolve here.
pub type PopulateFn = Arc<dyn Fn(&Bean, &mut BeanResolver<'_, '_>) -> Result<()> + Send + Sync>;

/// Init callback, run between the before- and after-init processor hooks.
pub type InitFn = Arc<dyn Fn(&Bean) -> Result<()> + Send + Sync>;

/// Cleanup callback, run when the singleton is destroyed.
pub type DestroyFn = Arc<dyn Fn(&Bean) -> std::result::Result<(), BoxError> + Send + Sync>;

/// Whether a bean belongs to the application or to the container's plumbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    Application,
    Infrastructure,
}

/// What the container does with a bean beyond handing it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BeanKind {
    #[default]
    Plain,
    /// Holds an `Arc<dyn RegistryPostProcessor>`.
    RegistryPostProcessor,
    /// Holds an `Arc<dyn FactoryPostProcessor>`.
    FactoryPostProcessor,
    /// Holds an `Arc<dyn BeanPostProcessor>`.
    BeanPostProcessor,
    /// Holds an `Arc<dyn ApplicationListener>`.
    Listener,
    /// Holds an `Arc<dyn FactoryBean>`; its name resolves to the produced object.
    FactoryBean,
}

/// Declarative description of one bean.
///
/// # Examples
/// ```rust
/// use std::sync::Arc;
/// use sprig_container::definition::BeanDefinition;
///
/// struct Pool { size: usize }
/// struct Repository { pool: Arc<Pool> }
///
/// let pool = BeanDefinition::of(|_| Ok(Pool { size: 4 }));
/// let repository = BeanDefinition::of(|r| Ok(Repository { pool: r.get::<Pool>("pool")? }))
///     .with_depends_on(["pool"]);
/// assert_eq!(repository.depends_on(), ["pool".to_string()]);
/// ```
#[derive(Clone)]
pub struct BeanDefinition {
    instantiate: InstantiateFn,
    populate: Option<PopulateFn>,
    init: Option<InitFn>,
    destroy: Option<DestroyFn>,
    scope: Scope,
    depends_on: Vec<String>,
    lazy_init: bool,
    role: Role,
    kind: BeanKind,
    rank: Rank,
}

impl BeanDefinition {
    /// Definition producing type-erased beans.
    pub fn new<F>(instantiate: F) -> Self
    where
        F: Fn(&mut BeanResolver<'_, '_>) -> Result<Bean> + Send + Sync + 'static,
    {
        Self {
            instantiate: Arc::new(instantiate),
            populate: None,
            init: None,
            destroy: None,
            scope: Scope::default(),
            depends_on: Vec::new(),
            lazy_init: false,
            role: Role::default(),
            kind: BeanKind::default(),
            rank: Rank::default(),
        }
    }

    /// Definition producing `Arc<T>` beans.
    pub fn of<T, F>(instantiate: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&mut BeanResolver<'_, '_>) -> Result<T> + Send + Sync + 'static,
    {
        Self::new(move |resolver| Ok(Arc::new(instantiate(resolver)?) as Bean))
    }

    /// Definition that always hands out `bean`.
    pub fn from_bean(bean: Bean) -> Self {
        Self::new(move |_| Ok(bean.clone()))
    }

    pub fn registry_post_processor(processor: impl RegistryPostProcessor + 'static) -> Self {
        let processor: Arc<dyn RegistryPostProcessor> = Arc::new(processor);
        Self::from_bean(Arc::new(processor))
            .with_kind(BeanKind::RegistryPostProcessor)
            .with_role(Role::Infrastructure)
    }

    pub fn factory_post_processor(processor: impl FactoryPostProcessor + 'static) -> Self {
        let processor: Arc<dyn FactoryPostProcessor> = Arc::new(processor);
        Self::from_bean(Arc::new(processor))
            .with_kind(BeanKind::FactoryPostProcessor)
            .with_role(Role::Infrastructure)
    }

    pub fn bean_post_processor(processor: impl BeanPostProcessor + 'static) -> Self {
        let processor: Arc<dyn BeanPostProcessor> = Arc::new(processor);
        Self::from_bean(Arc::new(processor))
            .with_kind(BeanKind::BeanPostProcessor)
            .with_role(Role::Infrastructure)
    }

    pub fn factory_bean(factory_bean: impl FactoryBean + 'static) -> Self {
        let factory_bean: Arc<dyn FactoryBean> = Arc::new(factory_bean);
        Self::from_bean(Arc::new(factory_bean)).with_kind(BeanKind::FactoryBean)
    }

    pub fn listener(listener: impl ApplicationListener + 'static) -> Self {
        let listener: Arc<dyn ApplicationListener> = Arc::new(listener);
        Self::from_bean(Arc::new(listener)).with_kind(BeanKind::Listener)
    }

    // ── Builder ──

    pub fn with_populate<F>(mut self, populate: F) -> Self
    where
        F: Fn(&Bean, &mut BeanResolver<'_, '_>) -> Result<()> + Send + Sync + 'static,
    {
        self.populate = Some(Arc::new(populate));
        self
    }

    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: Fn(&Bean) -> Result<()> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }

    /// Sets the cleanup callback. Only singletons are ever cleaned up.
    pub fn with_destroy<F>(mut self, destroy: F) -> Self
    where
        F: Fn(&Bean) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.destroy = Some(Arc::new(destroy));
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn prototype(self) -> Self {
        self.with_scope(Scope::Prototype)
    }

    /// Names of beans that must be created before this one, and destroyed after it.
    pub fn with_depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy_init = true;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_kind(mut self, kind: BeanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_rank(mut self, rank: Rank) -> Self {
        self.rank = rank;
        self
    }

    // ── Mutation by factory post-processors ──

    pub fn set_scope(&mut self, scope: Scope) {
        self.scope = scope;
    }

    pub fn set_lazy_init(&mut self, lazy_init: bool) {
        self.lazy_init = lazy_init;
    }

    pub fn add_depends_on(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.depends_on.contains(&name) {
            self.depends_on.push(name);
        }
    }

    // ── Accessors ──

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn is_singleton(&self) -> bool {
        self.scope.is_singleton()
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn is_lazy_init(&self) -> bool {
        self.lazy_init
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn kind(&self) -> BeanKind {
        self.kind
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn has_destroy(&self) -> bool {
        self.destroy.is_some()
    }

    pub(crate) fn instantiate_fn(&self) -> &InstantiateFn {
        &self.instantiate
    }

    pub(crate) fn populate_fn(&self) -> Option<&PopulateFn> {
        self.populate.as_ref()
    }

    pub(crate) fn init_fn(&self) -> Option<&InitFn> {
        self.init.as_ref()
    }

    pub(crate) fn destroy_fn(&self) -> Option<&DestroyFn> {
        self.destroy.as_ref()
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("scope", &self.scope)
            .field("kind", &self.kind)
            .field("rank", &self.rank)
            .field("role", &self.role)
            .field("lazy_init", &self.lazy_init)
            .field("depends_on", &self.depends_on)
            .field("has_destroy", &self.destroy.is_some())
            .finish()
    }
}

// ═══════════════════════════════════════════
// DefinitionRegistry
// ═══════════════════════════════════════════

/// Bean definitions in registration order.
#[derive(Debug, Default)]
pub(crate) struct DefinitionRegistry {
    definitions: IndexMap<String, BeanDefinition>,
}

impl DefinitionRegistry {
    /// Registers `definition` under `name`, returning the one it replaced.
    ///
    /// # Errors
    /// [`SprigError::AlreadyRegistered`] if `name` is taken and overriding
    /// is not allowed.
    pub fn register(
        &mut self,
        name: &str,
        definition: BeanDefinition,
        allow_override: bool,
    ) -> Result<Option<BeanDefinition>> {
        if self.definitions.contains_key(name) && !allow_override {
            return Err(SprigError::AlreadyRegistered(AlreadyRegisteredError {
                name: name.to_string(),
                kind: RegistrationKind::Definition,
            }));
        }
        debug!(bean = name, scope = %definition.scope, kind = ?definition.kind, "Registered bean definition");
        Ok(self.definitions.insert(name.to_string(), definition))
    }

    pub fn remove(&mut self, name: &str) -> Option<BeanDefinition> {
        self.definitions.shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&BeanDefinition> {
        self.definitions.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut BeanDefinition> {
        self.definitions.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.definitions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Names and ranks of every definition of `kind`, in registration order.
    pub fn names_for_kind(&self, kind: BeanKind) -> Vec<(String, Rank)> {
        self.definitions
            .iter()
            .filter(|(_, def)| def.kind == kind)
            .map(|(name, def)| (name.clone(), def.rank))
            .collect()
    }

    /// Declared depends-on lists, for validation.
    pub fn depends_on_map(&self) -> IndexMap<String, Vec<String>> {
        self.definitions
            .iter()
            .filter(|(_, def)| !def.depends_on.is_empty())
            .map(|(name, def)| (name.clone(), def.depends_on.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> BeanDefinition {
        BeanDefinition::of(|_| Ok(42i32))
    }

    #[test]
    fn builder_defaults() {
        let def = plain();
        assert_eq!(def.scope(), Scope::Singleton);
        assert_eq!(def.kind(), BeanKind::Plain);
        assert_eq!(def.role(), Role::Application);
        assert_eq!(def.rank(), Rank::Unordered);
        assert!(!def.is_lazy_init());
        assert!(!def.has_destroy());
    }

    #[test]
    fn builder_sets_fields() {
        let def = plain()
            .prototype()
            .lazy()
            .with_depends_on(["a", "b"])
            .with_rank(Rank::Ordered(3))
            .with_destroy(|_| Ok(()));

        assert_eq!(def.scope(), Scope::Prototype);
        assert!(def.is_lazy_init());
        assert_eq!(def.depends_on(), ["a".to_string(), "b".to_string()]);
        assert_eq!(def.rank(), Rank::Ordered(3));
        assert!(def.has_destroy());
    }

    #[test]
    fn processor_definitions_are_infrastructure() {
        struct Noop;
        impl BeanPostProcessor for Noop {}

        let def = BeanDefinition::bean_post_processor(Noop);
        assert_eq!(def.kind(), BeanKind::BeanPostProcessor);
        assert_eq!(def.role(), Role::Infrastructure);
    }

    #[test]
    fn add_depends_on_deduplicates() {
        let mut def = plain();
        def.add_depends_on("a");
        def.add_depends_on("a");
        assert_eq!(def.depends_on().len(), 1);
    }

    #[test]
    fn duplicate_definition_refused() {
        let mut registry = DefinitionRegistry::default();
        registry.register("a", plain(), false).unwrap();

        match registry.register("a", plain(), false).unwrap_err() {
            SprigError::AlreadyRegistered(e) => assert_eq!(e.kind, RegistrationKind::Definition),
            other => panic!("Expected AlreadyRegistered, got: {other:?}"),
        }
    }

    #[test]
    fn override_returns_previous() {
        let mut registry = DefinitionRegistry::default();
        registry.register("a", plain(), true).unwrap();
        let previous = registry.register("a", plain().lazy(), true).unwrap();
        assert!(previous.is_some());
        assert!(registry.get("a").unwrap().is_lazy_init());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn names_for_kind_in_registration_order() {
        struct Noop;
        impl BeanPostProcessor for Noop {}

        let mut registry = DefinitionRegistry::default();
        registry
            .register("second", BeanDefinition::bean_post_processor(Noop).with_rank(Rank::Ordered(1)), false)
            .unwrap();
        registry.register("plain", plain(), false).unwrap();
        registry
            .register("first", BeanDefinition::bean_post_processor(Noop), false)
            .unwrap();

        let found = registry.names_for_kind(BeanKind::BeanPostProcessor);
        assert_eq!(
            found,
            vec![
                ("second".to_string(), Rank::Ordered(1)),
                ("first".to_string(), Rank::Unordered),
            ]
        );
    }

    #[test]
    fn depends_on_map_skips_independent_beans() {
        let mut registry = DefinitionRegistry::default();
        registry.register("a", plain(), false).unwrap();
        registry.register("b", plain().with_depends_on(["a"]), false).unwrap();

        let map = registry.depends_on_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map["b"], vec!["a".to_string()]);
    }
}
