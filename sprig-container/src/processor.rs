//! Post-processor extension points.
//!
//! Three hooks, from coarse to fine:
//! - [`RegistryPostProcessor`] may add or remove bean definitions
//! - [`FactoryPostProcessor`] may adjust the factory once definitions are final
//! - [`BeanPostProcessor`] sees every bean instance around its init callback
//!
//! Each processor carries a [`Rank`] that decides its invocation order.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::factory::BeanFactory;
use crate::store::Bean;

/// Invocation rank of a processor.
///
/// `PriorityOrdered` processors always run before all others. Within a
/// tier, lower values run first; unordered processors run last, in the
/// order they were registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rank {
    PriorityOrdered(i32),
    Ordered(i32),
    #[default]
    Unordered,
}

impl Rank {
    /// Lowest precedence value, shared by unordered processors.
    pub const LOWEST_PRECEDENCE: i32 = i32::MAX;

    pub fn is_priority_ordered(&self) -> bool {
        matches!(self, Rank::PriorityOrdered(_))
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, Rank::Ordered(_))
    }

    /// The order value, [`LOWEST_PRECEDENCE`](Self::LOWEST_PRECEDENCE) when unordered.
    pub fn order(&self) -> i32 {
        match self {
            Rank::PriorityOrdered(order) | Rank::Ordered(order) => *order,
            Rank::Unordered => Self::LOWEST_PRECEDENCE,
        }
    }

    fn sort_key(&self) -> (u8, i32) {
        let tier = if self.is_priority_ordered() { 0 } else { 1 };
        (tier, self.order())
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::PriorityOrdered(order) => write!(f, "priority({order})"),
            Rank::Ordered(order) => write!(f, "ordered({order})"),
            Rank::Unordered => write!(f, "unordered"),
        }
    }
}

/// Sorts `items` by rank. Equal ranks keep their current relative order.
pub fn sort_by_rank<T>(items: &mut [T], rank: impl Fn(&T) -> Rank) {
    items.sort_by_key(|item| rank(item).sort_key());
}

// ═══════════════════════════════════════════
// Factory-level processors
// ═══════════════════════════════════════════

/// Hook invoked once per refresh, after all definitions are registered.
pub trait FactoryPostProcessor: Send + Sync {
    fn post_process_factory(&self, factory: &BeanFactory) -> Result<()>;

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Hook that may change the set of bean definitions.
///
/// Runs before any [`FactoryPostProcessor`]; processors registered as
/// beans by another registry processor are picked up in the same refresh.
pub trait RegistryPostProcessor: FactoryPostProcessor {
    fn post_process_registry(&self, factory: &BeanFactory) -> Result<()>;
}

/// An externally supplied factory-level processor.
#[derive(Clone)]
pub enum FactoryProcessor {
    Registry(Arc<dyn RegistryPostProcessor>),
    Plain(Arc<dyn FactoryPostProcessor>),
}

impl FactoryProcessor {
    pub fn registry(processor: impl RegistryPostProcessor + 'static) -> Self {
        FactoryProcessor::Registry(Arc::new(processor))
    }

    pub fn plain(processor: impl FactoryPostProcessor + 'static) -> Self {
        FactoryProcessor::Plain(Arc::new(processor))
    }

    pub fn name(&self) -> &str {
        match self {
            FactoryProcessor::Registry(p) => p.name(),
            FactoryProcessor::Plain(p) => p.name(),
        }
    }
}

impl fmt::Debug for FactoryProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactoryProcessor::Registry(p) => f.debug_tuple("Registry").field(&p.name()).finish(),
            FactoryProcessor::Plain(p) => f.debug_tuple("Plain").field(&p.name()).finish(),
        }
    }
}

// ═══════════════════════════════════════════
// Bean-level processors
// ═══════════════════════════════════════════

/// Hook around the initialization of every bean.
///
/// Hooks run inside bean creation, with the singleton store lock held.
/// They may read beans that are already cached through
/// [`BeanFactory::get_bean`](crate::factory::BeanFactory::get_bean), but
/// requesting a bean that still has to be built deadlocks. Resolve such
/// collaborators in the definition's callbacks instead.
///
/// # Examples
/// ```rust
/// use sprig_container::processor::BeanPostProcessor;
/// use sprig_container::store::Bean;
/// use sprig_container::Result;
///
/// struct Tracing;
///
/// impl BeanPostProcessor for Tracing {
///     fn post_process_after_initialization(&self, bean: Bean, name: &str) -> Result<Bean> {
///         println!("initialized {name}");
///         Ok(bean)
///     }
/// }
/// ```
pub trait BeanPostProcessor: Send + Sync {
    /// Called before the bean's init callback. May return a different instance.
    fn post_process_before_initialization(&self, bean: Bean, _name: &str) -> Result<Bean> {
        Ok(bean)
    }

    /// Called after the bean's init callback. May return a wrapper.
    fn post_process_after_initialization(&self, bean: Bean, _name: &str) -> Result<Bean> {
        Ok(bean)
    }

    /// Produces the reference exposed to beans that reach this one through
    /// a circular reference.
    ///
    /// A processor that wraps in `post_process_after_initialization` should
    /// wrap here too, and return the raw bean from the after-init hook for
    /// beans it already wrapped early.
    fn early_bean_reference(&self, bean: Bean, _name: &str) -> Bean {
        bean
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

// Processors registered as beans are stored as `Arc<dyn Trait>` inside the bean.

pub(crate) fn as_registry_processor(bean: &Bean) -> Option<Arc<dyn RegistryPostProcessor>> {
    bean.downcast_ref::<Arc<dyn RegistryPostProcessor>>().cloned()
}

pub(crate) fn as_factory_processor(bean: &Bean) -> Option<Arc<dyn FactoryPostProcessor>> {
    bean.downcast_ref::<Arc<dyn FactoryPostProcessor>>().cloned()
}

pub(crate) fn as_bean_processor(bean: &Bean) -> Option<Arc<dyn BeanPostProcessor>> {
    bean.downcast_ref::<Arc<dyn BeanPostProcessor>>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_sort_follows_tiers() {
        let mut items = vec![
            ("X", Rank::Unordered),
            ("O5", Rank::Ordered(5)),
            ("P2", Rank::PriorityOrdered(2)),
            ("Y", Rank::Unordered),
            ("O1", Rank::Ordered(1)),
            ("P1", Rank::PriorityOrdered(1)),
        ];
        sort_by_rank(&mut items, |(_, rank)| *rank);

        let names: Vec<&str> = items.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["P1", "P2", "O1", "O5", "X", "Y"]);
    }

    #[test]
    fn priority_beats_lower_order_value() {
        let mut items = vec![Rank::Ordered(-100), Rank::PriorityOrdered(100)];
        sort_by_rank(&mut items, |rank| *rank);
        assert_eq!(items[0], Rank::PriorityOrdered(100));
    }

    #[test]
    fn equal_ranks_keep_registration_order() {
        let mut items = vec![("first", Rank::Ordered(3)), ("second", Rank::Ordered(3))];
        sort_by_rank(&mut items, |(_, rank)| *rank);
        assert_eq!(items[0].0, "first");
    }

    #[test]
    fn rank_display() {
        assert_eq!(Rank::PriorityOrdered(1).to_string(), "priority(1)");
        assert_eq!(Rank::Unordered.to_string(), "unordered");
        assert_eq!(Rank::Unordered.order(), Rank::LOWEST_PRECEDENCE);
    }

    #[test]
    fn processor_bean_downcasts() {
        struct Noop;
        impl BeanPostProcessor for Noop {}

        let processor: Arc<dyn BeanPostProcessor> = Arc::new(Noop);
        let bean: Bean = Arc::new(processor);
        assert!(as_bean_processor(&bean).is_some());
        assert!(as_factory_processor(&bean).is_none());
        assert!(as_bean_processor(&bean).unwrap().name().contains("Noop"));
    }
}
