//! Beans that produce the object exposed under their name.
//!
//! Requesting `"car"` from a factory whose `"car"` bean is a [`FactoryBean`]
//! returns the object it produces. Requesting `"&car"` returns the factory
//! bean itself.

use std::sync::Arc;

use crate::error::Result;
use crate::store::Bean;

/// Prefix that dereferences a factory bean name to the factory bean itself.
pub const FACTORY_BEAN_PREFIX: char = '&';

/// A bean whose exposed object is built by [`get_object`](Self::get_object).
///
/// # Examples
/// ```rust
/// use std::sync::Arc;
/// use sprig_container::definition::BeanDefinition;
/// use sprig_container::factory::BeanFactory;
/// use sprig_container::factory_bean::FactoryBean;
/// use sprig_container::settings::Settings;
/// use sprig_container::{Bean, Result};
///
/// struct User { name: String }
/// struct UserFactory;
///
/// impl FactoryBean for UserFactory {
///     fn get_object(&self) -> Result<Bean> {
///         Ok(Arc::new(User { name: "guest".into() }))
///     }
/// }
///
/// let factory = BeanFactory::new(Settings::default());
/// factory.register_bean_definition("user", BeanDefinition::factory_bean(UserFactory)).unwrap();
/// assert_eq!(factory.get_bean_typed::<User>("user").unwrap().name, "guest");
/// assert!(factory.get_bean("&user").is_ok());
/// ```
pub trait FactoryBean: Send + Sync {
    /// Builds the exposed object.
    ///
    /// Runs with the singleton store lock held. Calling
    /// [`BeanFactory::get_bean`](crate::factory::BeanFactory::get_bean) from
    /// here deadlocks unless the requested bean is already cached.
    fn get_object(&self) -> Result<Bean>;

    /// Shared objects are built once per factory bean instance.
    fn is_singleton(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// `true` if `name` asks for the factory bean rather than its object.
pub fn is_factory_dereference(name: &str) -> bool {
    name.starts_with(FACTORY_BEAN_PREFIX)
}

/// Strips every leading [`FACTORY_BEAN_PREFIX`].
pub fn transformed_bean_name(name: &str) -> &str {
    name.trim_start_matches(FACTORY_BEAN_PREFIX)
}

pub(crate) fn as_factory_bean(bean: &Bean) -> Option<Arc<dyn FactoryBean>> {
    bean.downcast_ref::<Arc<dyn FactoryBean>>().cloned()
}
