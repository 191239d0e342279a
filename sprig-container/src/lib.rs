//! Core container implementation for Sprig.
//!
//! Bottom to top: the [`singleton`] registry (store, early references,
//! creation guard, dependency graph, disposal), the definition-driven
//! [`factory`], the post-processor [`pipeline`] and the refreshable
//! [`context`].

pub mod alias;
pub mod context;
pub mod creation;
pub mod definition;
pub mod disposal;
pub mod early;
pub mod error;
pub mod event;
pub mod factory;
pub mod factory_bean;
pub mod graph;
pub mod pipeline;
pub mod processor;
pub mod provider;
pub mod scope;
pub mod settings;
pub mod singleton;
pub mod store;

pub use error::{Result, SprigError};
pub use scope::Scope;
pub use store::Bean;

pub mod prelude {
    pub use crate::context::{ApplicationContext, ApplicationContextBuilder, ShutdownHook};
    pub use crate::definition::{BeanDefinition, BeanKind, Role};
    pub use crate::error::{BoxError, Result, SprigError};
    pub use crate::event::{ApplicationListener, ContextEvent};
    pub use crate::factory::{BeanFactory, BeanResolver};
    pub use crate::factory_bean::FactoryBean;
    pub use crate::processor::{
        BeanPostProcessor, FactoryPostProcessor, FactoryProcessor, Rank, RegistryPostProcessor,
    };
    pub use crate::provider::{DefinitionRegistrar, Provider};
    pub use crate::scope::Scope;
    pub use crate::settings::Settings;
    pub use crate::singleton::SingletonRegistry;
    pub use crate::store::Bean;
}
