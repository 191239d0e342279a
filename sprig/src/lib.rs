//! # Sprig: singleton bean registry and application context for Rust
//!
//! Definition-driven dependency injection with circular reference
//! resolution, ordered teardown and staged post-processing.
//!
//! ```rust
//! use sprig::prelude::*;
//!
//! let context = ApplicationContext::builder()
//!     .provider(|registrar: &dyn DefinitionRegistrar| {
//!         registrar.register_definition("answer", BeanDefinition::of(|_| Ok(42u32)))
//!     })
//!     .build();
//! context.refresh().unwrap();
//! assert_eq!(*context.get_bean_typed::<u32>("answer").unwrap(), 42);
//! ```

pub use sprig_container::*;
pub use sprig_support::*;
