//! Context lifecycle events.
//!
//! Listeners are registered programmatically on the context builder, or
//! declared as beans of kind [`BeanKind::Listener`](crate::definition::BeanKind::Listener).
//! Listener beans are picked up by [`ListenerDetector`], the bean
//! post-processor the pipeline always registers last.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::Result;
use crate::factory::BeanFactory;
use crate::processor::BeanPostProcessor;
use crate::store::Bean;

/// Something that happened to an application context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextEvent {
    /// All non-lazy singletons are instantiated.
    Refreshed { display_name: String },
    /// The context is about to destroy its singletons.
    Closed { display_name: String },
}

impl ContextEvent {
    pub fn display_name(&self) -> &str {
        match self {
            ContextEvent::Refreshed { display_name } | ContextEvent::Closed { display_name } => {
                display_name
            }
        }
    }
}

/// Receives context events.
pub trait ApplicationListener: Send + Sync {
    fn on_event(&self, event: &ContextEvent);

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> ApplicationListener for F
where
    F: Fn(&ContextEvent) + Send + Sync,
{
    fn on_event(&self, event: &ContextEvent) {
        self(event)
    }
}

/// Delivers events to every registered listener, in registration order.
#[derive(Default)]
pub struct EventMulticaster {
    listeners: RwLock<Vec<Arc<dyn ApplicationListener>>>,
}

impl EventMulticaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `listener` unless this exact instance is already registered.
    pub fn add_listener(&self, listener: Arc<dyn ApplicationListener>) {
        let mut listeners = self.listeners.write();
        if listeners
            .iter()
            .any(|l| std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(&listener)))
        {
            return;
        }
        trace!(listener = listener.name(), "Added application listener");
        listeners.push(listener);
    }

    pub fn remove_all_listeners(&self) {
        self.listeners.write().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Calls every listener with `event`.
    ///
    /// Listeners run on a snapshot, so a listener may register others.
    pub fn multicast(&self, event: &ContextEvent) {
        let listeners = self.listeners.read().clone();
        debug!(?event, listeners = listeners.len(), "Publishing event");
        for listener in listeners {
            listener.on_event(event);
        }
    }
}

impl std::fmt::Debug for EventMulticaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMulticaster")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Registers singleton listener beans with the multicaster once they are
/// initialized.
pub struct ListenerDetector {
    factory: Weak<BeanFactory>,
    multicaster: Arc<EventMulticaster>,
}

impl ListenerDetector {
    pub fn new(factory: Weak<BeanFactory>, multicaster: Arc<EventMulticaster>) -> Self {
        Self {
            factory,
            multicaster,
        }
    }
}

impl BeanPostProcessor for ListenerDetector {
    fn post_process_after_initialization(&self, bean: Bean, name: &str) -> Result<Bean> {
        if let Some(listener) = bean.downcast_ref::<Arc<dyn ApplicationListener>>() {
            let singleton = self
                .factory
                .upgrade()
                .is_some_and(|factory| factory.is_singleton(name));
            if singleton {
                self.multicaster.add_listener(listener.clone());
            } else {
                debug!(bean = name, "Listener bean is not a singleton, not registering it");
            }
        }
        Ok(bean)
    }

    fn name(&self) -> &str {
        "ListenerDetector"
    }
}
