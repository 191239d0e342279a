//! Lifecycle example: circular references, post-processors, ordered teardown.
//!
//! Run with `RUST_LOG=sprig=debug` for the container's own logs.

use std::sync::Arc;

use parking_lot::Mutex;
use sprig::prelude::*;
use tracing_subscriber::EnvFilter;

// === Define your types ===

struct Config {
    database_url: String,
}

struct Database {
    url: String,
}

impl Database {
    fn query(&self, sql: &str) -> String {
        format!("{sql} -> results from {}", self.url)
    }
}

/// Needs the notifier; the notifier needs it back.
struct OrderService {
    db: Arc<Database>,
    notifier: Mutex<Option<Arc<Notifier>>>,
}

struct Notifier {
    orders: Arc<OrderService>,
}

// === Extension points ===

/// Logs every bean it sees after initialization.
struct Announcer;

impl BeanPostProcessor for Announcer {
    fn post_process_after_initialization(&self, bean: Bean, name: &str) -> Result<Bean> {
        println!("[announcer] '{name}' is ready");
        Ok(bean)
    }
}

/// Supplies the configuration before any bean is created.
struct ProvideConfig;

impl FactoryPostProcessor for ProvideConfig {
    fn post_process_factory(&self, factory: &BeanFactory) -> Result<()> {
        factory.register_singleton(
            "config",
            Arc::new(Config {
                database_url: "postgres://replica/orders".to_string(),
            }),
        )
    }
}

struct OrdersModule;

impl Provider for OrdersModule {
    fn register(&self, registrar: &dyn DefinitionRegistrar) -> Result<()> {
        registrar.register_definition(
            "database",
            BeanDefinition::of(|r| {
                let config = r.get::<Config>("config")?;
                Ok(Database {
                    url: config.database_url.clone(),
                })
            })
            .with_destroy(|_: &Bean| -> std::result::Result<(), BoxError> {
                println!("[database] connections closed");
                Ok(())
            }),
        )?;

        registrar.register_definition(
            "orderService",
            BeanDefinition::of(|r| {
                Ok(OrderService {
                    db: r.get::<Database>("database")?,
                    notifier: Mutex::new(None),
                })
            })
            .with_populate(|bean, r| {
                let notifier = r.get::<Notifier>("notifier")?;
                if let Some(service) = bean.downcast_ref::<OrderService>() {
                    *service.notifier.lock() = Some(notifier);
                }
                Ok(())
            })
            .with_destroy(|_: &Bean| -> std::result::Result<(), BoxError> {
                println!("[orderService] stopped");
                Ok(())
            }),
        )?;

        registrar.register_definition(
            "notifier",
            BeanDefinition::of(|r| {
                Ok(Notifier {
                    orders: r.get::<OrderService>("orderService")?,
                })
            })
            .with_destroy(|_: &Bean| -> std::result::Result<(), BoxError> {
                println!("[notifier] stopped");
                Ok(())
            }),
        )?;

        registrar.register_definition(
            "announcer",
            BeanDefinition::bean_post_processor(Announcer).with_rank(Rank::Ordered(0)),
        )?;
        registrar.register_alias("orderService", "orders")
    }
}

fn main() -> Result<()> {
    // Initialize tracing (logging)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sprig=info")))
        .init();

    let context = ApplicationContext::builder()
        .settings(Settings::default().display_name("orders"))
        .provider(OrdersModule)
        .factory_post_processor(FactoryProcessor::plain(ProvideConfig))
        .listener(|event: &ContextEvent| println!("[event] {event:?}"))
        .build();

    context.refresh()?;

    let orders = context.get_bean_typed::<OrderService>("orders")?;
    println!("{}", orders.db.query("SELECT * FROM orders"));

    let notifier = context.get_bean_typed::<Notifier>("notifier")?;
    let linked = orders
        .notifier
        .lock()
        .as_ref()
        .is_some_and(|n| Arc::ptr_eq(n, &notifier));
    println!("circular reference resolved: {linked}");
    println!(
        "notifier sees the same service: {}",
        Arc::ptr_eq(&notifier.orders, &orders)
    );

    // Teardown runs dependents first
    let hook = context.shutdown_hook();
    hook.run();
    Ok(())
}
