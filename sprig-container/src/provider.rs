//! Provider trait: a module of related bean definitions.
//!
//! Providers are how definitions reach a context: each refresh asks every
//! provider to register its definitions into the fresh bean factory.
//!
//! # Examples
//! ```rust,ignore
//! struct PersistenceProvider;
//!
//! impl Provider for PersistenceProvider {
//!     fn register(&self, registrar: &dyn DefinitionRegistrar) -> Result<()> {
//!         registrar.register_definition("pool", BeanDefinition::of(|_| Pool::connect()))?;
//!         registrar.register_definition(
//!             "orders",
//!             BeanDefinition::of(|r| Ok(OrderRepository::new(r.get("pool")?))),
//!         )?;
//!         registrar.register_alias("orders", "orderRepository")
//!     }
//! }
//! ```

use crate::definition::BeanDefinition;
use crate::error::Result;

/// A module that registers related bean definitions.
///
/// Split definitions by domain instead of one giant registration block:
///
/// ```rust,ignore
/// ApplicationContext::builder()
///     .provider(PersistenceProvider)
///     .provider(BillingProvider)
///     .provider(MailProvider)
///     .build();
/// ```
pub trait Provider: Send + Sync {
    /// Registers definitions. Called once per refresh.
    fn register(&self, registrar: &dyn DefinitionRegistrar) -> Result<()>;

    /// Human-readable name for logs and error messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> Provider for F
where
    F: Fn(&dyn DefinitionRegistrar) -> Result<()> + Send + Sync,
{
    fn register(&self, registrar: &dyn DefinitionRegistrar) -> Result<()> {
        self(registrar)
    }
}

/// The part of the bean factory that providers see.
///
/// Kept separate so providers can be tested without a factory.
pub trait DefinitionRegistrar {
    fn register_definition(&self, name: &str, definition: BeanDefinition) -> Result<()>;

    fn register_alias(&self, name: &str, alias: &str) -> Result<()>;
}
