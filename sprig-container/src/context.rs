//! # The application context
//!
//! A refreshable container around a [`BeanFactory`]. Every refresh throws
//! the previous factory away and builds a new one from the providers.
//!
//! ```text
//! ApplicationContext::builder() ──build()──> ApplicationContext (inactive)
//!                                                 │
//!                                             refresh()
//!                                                 │
//!   fresh factory ─> providers ─> factory post-processors
//!     ─> bean post-processors ─> depends-on check ─> eager singletons
//!     ─> Refreshed event
//!                                                 │
//!                                              close()
//!                                                 │
//!                      Closed event ─> destroy singletons ─> inactive
//! ```
//!
//! # Examples
//! ```rust
//! use sprig_container::prelude::*;
//!
//! struct Greeter { greeting: String }
//!
//! let context = ApplicationContext::builder()
//!     .provider(|registrar: &dyn DefinitionRegistrar| {
//!         registrar.register_definition(
//!             "greeter",
//!             BeanDefinition::of(|_| Ok(Greeter { greeting: "hello".into() })),
//!         )
//!     })
//!     .build();
//!
//! context.refresh().expect("refresh failed");
//! let greeter = context.get_bean_typed::<Greeter>("greeter").expect("no greeter");
//! assert_eq!(greeter.greeting, "hello");
//! context.close();
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{Result, SprigError};
use crate::event::{ApplicationListener, ContextEvent, EventMulticaster};
use crate::factory::BeanFactory;
use crate::pipeline::{invoke_factory_post_processors, register_bean_post_processors};
use crate::processor::FactoryProcessor;
use crate::provider::Provider;
use crate::settings::Settings;
use crate::store::Bean;

// ============================================================
// ApplicationContextBuilder
// ============================================================

/// Configures an [`ApplicationContext`].
#[derive(Default)]
pub struct ApplicationContextBuilder {
    settings: Settings,
    providers: Vec<Arc<dyn Provider>>,
    factory_processors: Vec<FactoryProcessor>,
    listeners: Vec<Arc<dyn ApplicationListener>>,
}

impl ApplicationContextBuilder {
    /// Settings applied to every bean factory the context creates.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Adds a definition [`Provider`]. Providers run in the order added.
    pub fn provider(mut self, provider: impl Provider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Adds a factory post-processor that is not itself a bean.
    ///
    /// Supplied registry processors run before any registered as beans.
    pub fn factory_post_processor(mut self, processor: FactoryProcessor) -> Self {
        self.factory_processors.push(processor);
        self
    }

    /// Adds a listener that survives refreshes.
    pub fn listener(mut self, listener: impl ApplicationListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Builds an inactive context. Call [`ApplicationContext::refresh`] next.
    pub fn build(self) -> ApplicationContext {
        debug!(
            providers = self.providers.len(),
            factory_processors = self.factory_processors.len(),
            listeners = self.listeners.len(),
            "Building application context"
        );
        ApplicationContext {
            shared: Arc::new(Shared {
                settings: self.settings,
                providers: self.providers,
                factory_processors: self.factory_processors,
                listeners: self.listeners,
                multicaster: Arc::new(EventMulticaster::new()),
                factory: RwLock::new(None),
                lifecycle: Mutex::new(()),
            }),
        }
    }
}

// ═══════════════════════════════════════════
// ApplicationContext
// ═══════════════════════════════════════════

/// Refreshable application context.
///
/// Beans are only available between a successful [`refresh`](Self::refresh)
/// and the next [`close`](Self::close).
pub struct ApplicationContext {
    shared: Arc<Shared>,
}

struct Shared {
    settings: Settings,
    providers: Vec<Arc<dyn Provider>>,
    factory_processors: Vec<FactoryProcessor>,
    listeners: Vec<Arc<dyn ApplicationListener>>,
    multicaster: Arc<EventMulticaster>,
    factory: RwLock<Option<Arc<BeanFactory>>>,
    /// Serializes refresh and close.
    lifecycle: Mutex<()>,
}

impl ApplicationContext {
    pub fn builder() -> ApplicationContextBuilder {
        ApplicationContextBuilder::default()
    }

    pub fn display_name(&self) -> &str {
        self.shared.settings.display_name_or_default()
    }

    /// Builds a fresh bean factory and instantiates its eager singletons.
    ///
    /// A previous factory is destroyed first. If any stage fails, the
    /// singletons created so far are destroyed and the context stays
    /// inactive.
    ///
    /// # Errors
    /// The first error raised by a provider, a post-processor, the
    /// depends-on validation or a singleton's construction.
    #[instrument(skip(self), name = "refresh", fields(context = %self.display_name()))]
    pub fn refresh(&self) -> Result<()> {
        self.shared.refresh()
    }

    /// Publishes [`ContextEvent::Closed`] and destroys every singleton.
    ///
    /// Does nothing on an inactive context.
    #[instrument(skip(self), name = "close", fields(context = %self.display_name()))]
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_active(&self) -> bool {
        self.shared.factory.read().is_some()
    }

    /// The current bean factory.
    ///
    /// # Errors
    /// [`SprigError::ContextInactive`] before the first refresh and after close.
    pub fn bean_factory(&self) -> Result<Arc<BeanFactory>> {
        self.shared
            .factory
            .read()
            .clone()
            .ok_or(SprigError::ContextInactive)
    }

    pub fn get_bean(&self, name: &str) -> Result<Bean> {
        self.bean_factory()?.get_bean(name)
    }

    pub fn get_bean_typed<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.bean_factory()?.get_bean_typed::<T>(name)
    }

    pub fn contains_bean(&self, name: &str) -> bool {
        self.bean_factory()
            .is_ok_and(|factory| factory.contains_bean(name))
    }

    /// Delivers `event` to every listener.
    pub fn publish_event(&self, event: &ContextEvent) {
        self.shared.multicaster.multicast(event);
    }

    /// A handle that closes this context when run.
    ///
    /// The handle does not keep the context alive; running it after the
    /// context is dropped does nothing.
    pub fn shutdown_hook(&self) -> ShutdownHook {
        ShutdownHook {
            context: Arc::downgrade(&self.shared),
        }
    }
}

impl fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationContext")
            .field("display_name", &self.display_name())
            .field("active", &self.is_active())
            .field("listeners", &self.shared.multicaster.listener_count())
            .finish()
    }
}

impl Shared {
    fn refresh(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        info!("Refreshing application context");

        let previous = self.factory.write().take();
        if let Some(previous) = previous {
            debug!("Destroying previous bean factory");
            previous.destroy_singletons();
        }

        self.multicaster.remove_all_listeners();
        for listener in &self.listeners {
            self.multicaster.add_listener(listener.clone());
        }

        let factory = Arc::new(BeanFactory::new(self.settings.clone()));
        if let Err(err) = self.prepare(&factory) {
            warn!(error = %err, "Refresh failed, destroying singletons created so far");
            factory.destroy_singletons();
            self.multicaster.remove_all_listeners();
            return Err(err);
        }

        *self.factory.write() = Some(factory.clone());
        self.multicaster.multicast(&ContextEvent::Refreshed {
            display_name: self.settings.display_name_or_default().to_string(),
        });
        info!(
            definitions = factory.bean_definition_count(),
            singletons = factory.singletons().singleton_count(),
            "Application context refreshed ✓"
        );
        Ok(())
    }

    fn prepare(&self, factory: &Arc<BeanFactory>) -> Result<()> {
        let registrar: &BeanFactory = factory;
        for provider in &self.providers {
            debug!(provider = provider.name(), "Loading bean definitions");
            provider.register(registrar)?;
        }
        debug!(definitions = factory.bean_definition_count(), "Bean definitions loaded");

        invoke_factory_post_processors(factory, &self.factory_processors)?;
        register_bean_post_processors(factory, &self.multicaster)?;
        factory.validate_dependencies()?;
        factory.preinstantiate_singletons()
    }

    fn close(&self) {
        let _lifecycle = self.lifecycle.lock();
        if self.factory.read().is_none() {
            trace!("Context already inactive");
            return;
        }
        info!("Closing application context");

        self.multicaster.multicast(&ContextEvent::Closed {
            display_name: self.settings.display_name_or_default().to_string(),
        });

        let factory = self.factory.write().take();
        if let Some(factory) = factory {
            factory.destroy_singletons();
        }
        self.multicaster.remove_all_listeners();
    }
}

/// Closes the context it was created from.
///
/// Hand it to whatever drives process shutdown.
#[derive(Clone)]
pub struct ShutdownHook {
    context: Weak<Shared>,
}

impl ShutdownHook {
    pub fn run(&self) {
        match self.context.upgrade() {
            Some(shared) => {
                debug!("Running context shutdown hook");
                shared.close();
            }
            None => trace!("Context already dropped, nothing to shut down"),
        }
    }
}

impl fmt::Debug for ShutdownHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHook")
            .field("alive", &(self.context.strong_count() > 0))
            .finish()
    }
}
