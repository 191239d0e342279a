//! # Post-processor pipeline
//!
//! The staged protocol a refresh runs between loading definitions and
//! pre-instantiating singletons.
//!
//! ```text
//! supplied registry processors ──> registry beans: priority ─> ordered ─> rest (until none new)
//!        │
//!        ▼
//! post_process_factory: registry processors ─> supplied plain ones
//!        │
//!        ▼
//! factory processor beans: priority ─> ordered ─> unordered
//!        │
//!        ▼
//! bean post-processors: checker ─> priority ─> ordered ─> unordered ─> listener detector
//! ```
//!
//! A failing processor aborts the stage and the refresh with it.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use tracing::{debug, info, instrument, trace};

use crate::definition::{BeanKind, Role};
use crate::error::{Result, SprigError};
use crate::event::{EventMulticaster, ListenerDetector};
use crate::factory::BeanFactory;
use crate::processor::{
    BeanPostProcessor, FactoryPostProcessor, FactoryProcessor, Rank, RegistryPostProcessor,
    as_bean_processor, as_factory_processor, as_registry_processor, sort_by_rank,
};
use crate::store::Bean;

// ═══════════════════════════════════════════
// Factory-level processors
// ═══════════════════════════════════════════

/// Runs the supplied factory processors and those registered as beans.
///
/// # Errors
/// The first error returned by a processor, or
/// [`SprigError::BeanNotOfRequiredType`] for a processor bean that does not
/// hold the processor trait its kind announces.
#[instrument(skip_all, name = "invoke_factory_post_processors")]
pub fn invoke_factory_post_processors(
    factory: &BeanFactory,
    supplied: &[FactoryProcessor],
) -> Result<()> {
    let mut processed: HashSet<String> = HashSet::new();
    let mut registry_processors: Vec<Arc<dyn RegistryPostProcessor>> = Vec::new();
    let mut plain_processors: Vec<Arc<dyn FactoryPostProcessor>> = Vec::new();

    for processor in supplied {
        match processor {
            FactoryProcessor::Registry(p) => {
                trace!(processor = p.name(), "Invoking supplied registry post-processor");
                p.post_process_registry(factory)?;
                registry_processors.push(p.clone());
            }
            FactoryProcessor::Plain(p) => plain_processors.push(p.clone()),
        }
    }

    // ── Registry processor beans ──

    // Priority processors registered by the first wave join the second.
    let waves: [(&str, fn(&Rank) -> bool); 2] = [
        ("priority", Rank::is_priority_ordered),
        ("ordered", |rank: &Rank| !matches!(rank, Rank::Unordered)),
    ];
    for (wave, selected) in waves {
        let current = take_registry_beans(factory, &mut processed, selected)?;
        debug!(wave, processors = current.len(), "Invoking registry post-processor beans");
        invoke_registry_processors(factory, &current)?;
        registry_processors.extend(current);
    }

    // Processors may register further processor beans
    loop {
        let current = take_registry_beans(factory, &mut processed, |_| true)?;
        if current.is_empty() {
            break;
        }
        debug!(processors = current.len(), "Invoking newly discovered registry post-processor beans");
        invoke_registry_processors(factory, &current)?;
        registry_processors.extend(current);
    }

    // ── Factory callbacks of everything so far ──

    for processor in &registry_processors {
        trace!(processor = processor.name(), "Invoking factory callback of registry post-processor");
        processor.post_process_factory(factory)?;
    }
    invoke_factory_processors(factory, &plain_processors)?;

    // ── Factory processor beans ──

    let tiers = partition_by_tier(
        factory
            .bean_names_for_kind(BeanKind::FactoryPostProcessor)
            .into_iter()
            .filter(|(name, _)| !processed.contains(name)),
    );
    for (tier, names) in tiers.into_named() {
        // Beans of a tier are created only after the previous tier ran, so
        // earlier processors can still adjust their definitions.
        let current = resolve_processors(factory, names, "FactoryPostProcessor", as_factory_processor)?;
        debug!(tier, processors = current.len(), "Invoking factory post-processor beans");
        invoke_factory_processors(factory, &current)?;
    }

    factory.clear_metadata_cache();
    Ok(())
}

fn take_registry_beans(
    factory: &BeanFactory,
    processed: &mut HashSet<String>,
    selected: impl Fn(&Rank) -> bool,
) -> Result<Vec<Arc<dyn RegistryPostProcessor>>> {
    let mut names: Vec<(String, Rank)> = factory
        .bean_names_for_kind(BeanKind::RegistryPostProcessor)
        .into_iter()
        .filter(|(name, rank)| !processed.contains(name) && selected(rank))
        .collect();
    sort_by_rank(&mut names, |(_, rank)| *rank);
    processed.extend(names.iter().map(|(name, _)| name.clone()));

    names
        .into_iter()
        .map(|(name, _)| processor_bean(factory, &name, "RegistryPostProcessor", as_registry_processor))
        .collect()
}

fn invoke_registry_processors(
    factory: &BeanFactory,
    processors: &[Arc<dyn RegistryPostProcessor>],
) -> Result<()> {
    for processor in processors {
        trace!(processor = processor.name(), "Invoking registry post-processor");
        processor.post_process_registry(factory)?;
    }
    Ok(())
}

fn invoke_factory_processors(
    factory: &BeanFactory,
    processors: &[Arc<dyn FactoryPostProcessor>],
) -> Result<()> {
    for processor in processors {
        trace!(processor = processor.name(), "Invoking factory post-processor");
        processor.post_process_factory(factory)?;
    }
    Ok(())
}

// ═══════════════════════════════════════════
// Bean-level processors
// ═══════════════════════════════════════════

/// Instantiates the bean post-processor beans and adds them to `factory`.
///
/// A [`PostProcessorChecker`] goes first and a [`ListenerDetector`] feeding
/// `multicaster` goes last.
#[instrument(skip_all, name = "register_bean_post_processors")]
pub fn register_bean_post_processors(
    factory: &Arc<BeanFactory>,
    multicaster: &Arc<EventMulticaster>,
) -> Result<()> {
    let names = factory.bean_names_for_kind(BeanKind::BeanPostProcessor);

    let target = factory.bean_post_processor_count() + 1 + names.len();
    factory.add_bean_post_processor(Arc::new(PostProcessorChecker::new(
        Arc::downgrade(factory),
        target,
    )));

    for (tier, names) in partition_by_tier(names).into_named() {
        let current = resolve_processors(factory, names, "BeanPostProcessor", as_bean_processor)?;
        debug!(tier, processors = current.len(), "Registering bean post-processors");
        for processor in current {
            factory.add_bean_post_processor(processor);
        }
    }

    factory.add_bean_post_processor(Arc::new(ListenerDetector::new(
        Arc::downgrade(factory),
        multicaster.clone(),
    )));
    Ok(())
}

/// Logs beans created while bean post-processors are still being registered.
///
/// Such beans miss the processors registered after them.
pub struct PostProcessorChecker {
    factory: Weak<BeanFactory>,
    target_count: usize,
}

impl PostProcessorChecker {
    pub fn new(factory: Weak<BeanFactory>, target_count: usize) -> Self {
        Self {
            factory,
            target_count,
        }
    }
}

impl BeanPostProcessor for PostProcessorChecker {
    fn post_process_after_initialization(&self, bean: Bean, name: &str) -> Result<Bean> {
        if let Some(factory) = self.factory.upgrade() {
            let registered = factory.bean_post_processor_count();
            if registered < self.target_count && factory.role_of(name) != Some(Role::Infrastructure) {
                info!(
                    bean = name,
                    registered,
                    expected = self.target_count,
                    "Bean is not eligible for getting processed by all bean post-processors"
                );
            }
        }
        Ok(bean)
    }

    fn name(&self) -> &str {
        "PostProcessorChecker"
    }
}

// ═══════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════

/// Processor bean names split by rank tier, each in registration order.
#[derive(Default)]
struct Tiers {
    priority: Vec<(String, Rank)>,
    ordered: Vec<(String, Rank)>,
    unordered: Vec<(String, Rank)>,
}

impl Tiers {
    fn into_named(self) -> [(&'static str, Vec<(String, Rank)>); 3] {
        [
            ("priority", self.priority),
            ("ordered", self.ordered),
            ("unordered", self.unordered),
        ]
    }
}

fn partition_by_tier(names: impl IntoIterator<Item = (String, Rank)>) -> Tiers {
    let mut tiers = Tiers::default();
    for (name, rank) in names {
        match rank {
            Rank::PriorityOrdered(_) => tiers.priority.push((name, rank)),
            Rank::Ordered(_) => tiers.ordered.push((name, rank)),
            Rank::Unordered => tiers.unordered.push((name, rank)),
        }
    }
    tiers
}

fn resolve_processors<P>(
    factory: &BeanFactory,
    mut names: Vec<(String, Rank)>,
    expected: &str,
    cast: fn(&Bean) -> Option<P>,
) -> Result<Vec<P>> {
    sort_by_rank(&mut names, |(_, rank)| *rank);
    names
        .into_iter()
        .map(|(name, _)| processor_bean(factory, &name, expected, cast))
        .collect()
}

fn processor_bean<P>(
    factory: &BeanFactory,
    name: &str,
    expected: &str,
    cast: fn(&Bean) -> Option<P>,
) -> Result<P> {
    let bean = factory.get_bean(name)?;
    cast(&bean).ok_or_else(|| SprigError::BeanNotOfRequiredType {
        name: name.to_string(),
        expected: expected.to_string(),
    })
}
