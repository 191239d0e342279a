//! Ordered teardown.
//!
//! Destroying a bean destroys everything that depends on it first, then
//! runs its own cleanup, then destroys the inner beans it contains. A
//! failing cleanup is logged and swallowed: one faulty bean never stops
//! the others from being cleaned up.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{BoxError, SprigError};
use crate::graph::DependencyGraph;

/// Cleanup callback registered for a bean.
///
/// Implemented for closures, so a handle can be registered inline:
///
/// ```
/// use std::sync::Arc;
/// use sprig_container::disposal::{DisposableBean, DisposalCoordinator};
///
/// let disposals = DisposalCoordinator::new();
/// disposals.register("pool", Arc::new(|| -> Result<(), sprig_container::error::BoxError> {
///     // close connections
///     Ok(())
/// }));
/// assert!(disposals.contains("pool"));
/// ```
pub trait DisposableBean: Send + Sync {
    /// Releases the bean's resources.
    fn destroy(&self) -> Result<(), BoxError>;
}

impl<F> DisposableBean for F
where
    F: Fn() -> Result<(), BoxError> + Send + Sync,
{
    fn destroy(&self) -> Result<(), BoxError> {
        self()
    }
}

/// Holds the registered cleanup callbacks, in registration order.
///
/// The handle map lock is held only while the map itself changes, never
/// while a cleanup callback runs.
#[derive(Default)]
pub struct DisposalCoordinator {
    disposables: Mutex<IndexMap<String, Arc<dyn DisposableBean>>>,
}

impl DisposalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the cleanup handle for `name`.
    pub fn register(&self, name: &str, handle: Arc<dyn DisposableBean>) {
        self.disposables.lock().insert(name.to_string(), handle);
        trace!(bean = name, "Registered disposable bean");
    }

    /// Removes and returns the handle for `name`.
    pub fn take(&self, name: &str) -> Option<Arc<dyn DisposableBean>> {
        self.disposables.lock().shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.disposables.lock().contains_key(name)
    }

    /// Snapshot of registered names, oldest first.
    pub fn names(&self) -> Vec<String> {
        self.disposables.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.disposables.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.disposables.lock().is_empty()
    }

    /// Destroys every registered bean, newest registration first.
    ///
    /// `evict` removes a name from the singleton cache.
    pub(crate) fn destroy_all(&self, graph: &DependencyGraph, evict: &mut dyn FnMut(&str)) {
        let names = self.names();
        debug!(count = names.len(), "Destroying disposable beans");
        for name in names.iter().rev() {
            self.destroy_one(name, graph, evict);
        }
    }

    /// Evicts `name`, takes its handle and destroys it with its dependents.
    pub(crate) fn destroy_one(&self, name: &str, graph: &DependencyGraph, evict: &mut dyn FnMut(&str)) {
        evict(name);
        let handle = self.take(name);
        self.destroy_bean(name, handle, graph, evict);
    }

    /// Destroys dependents, then `name` itself, then its inner beans.
    pub(crate) fn destroy_bean(
        &self,
        name: &str,
        handle: Option<Arc<dyn DisposableBean>>,
        graph: &DependencyGraph,
        evict: &mut dyn FnMut(&str),
    ) {
        let dependents = graph.take_dependents(name);
        if !dependents.is_empty() {
            trace!(bean = name, ?dependents, "Destroying dependent beans first");
        }
        for dependent in &dependents {
            self.destroy_one(dependent, graph, evict);
        }

        if let Some(handle) = handle {
            if let Err(failure) = invoke(name, handle.as_ref()) {
                warn!(bean = name, error = %failure, "Destruction of bean threw an error");
            } else {
                debug!(bean = name, "Destroyed bean");
            }
        }

        for inner in graph.take_contained(name) {
            self.destroy_one(&inner, graph, evict);
        }

        graph.forget(name);
    }
}

/// Runs a cleanup callback, turning errors and panics into one failure.
fn invoke(name: &str, handle: &dyn DisposableBean) -> Result<(), SprigError> {
    let outcome = catch_unwind(AssertUnwindSafe(|| handle.destroy()));
    let source: BoxError = match outcome {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => e,
        Err(panic) => panic_message(panic.as_ref()).into(),
    };
    Err(SprigError::DisposalFailure {
        name: name.to_string(),
        source,
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("cleanup panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("cleanup panicked: {msg}")
    } else {
        "cleanup panicked".to_string()
    }
}

impl std::fmt::Debug for DisposalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposalCoordinator")
            .field("disposables", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording(log: &Log, name: &str) -> Arc<dyn DisposableBean> {
        let log = log.clone();
        let name = name.to_string();
        Arc::new(move || -> Result<(), BoxError> {
            log.lock().push(name.clone());
            Ok(())
        })
    }

    fn position(log: &[String], name: &str) -> usize {
        log.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn dependents_destroyed_first() {
        // b and c depend on a
        let log: Log = Arc::default();
        let graph = DependencyGraph::default();
        let disposals = DisposalCoordinator::new();
        for name in ["a", "b", "c"] {
            disposals.register(name, recording(&log, name));
        }
        graph.register_dependency("a", "b");
        graph.register_dependency("a", "c");

        let mut evicted = Vec::new();
        disposals.destroy_one("a", &graph, &mut |n| evicted.push(n.to_string()));

        let log = log.lock();
        assert_eq!(log.len(), 3);
        assert!(position(&log, "b") < position(&log, "a"));
        assert!(position(&log, "c") < position(&log, "a"));
        assert_eq!(evicted[0], "a");
        assert!(disposals.is_empty());
    }

    #[test]
    fn destroy_all_reverse_registration_order() {
        let log: Log = Arc::default();
        let graph = DependencyGraph::default();
        let disposals = DisposalCoordinator::new();
        for name in ["first", "second", "third"] {
            disposals.register(name, recording(&log, name));
        }

        disposals.destroy_all(&graph, &mut |_| {});
        assert_eq!(*log.lock(), vec!["third", "second", "first"]);
    }

    #[test]
    fn failing_cleanup_does_not_stop_teardown() {
        let log: Log = Arc::default();
        let graph = DependencyGraph::default();
        let disposals = DisposalCoordinator::new();
        disposals.register("ok1", recording(&log, "ok1"));
        disposals.register("broken", Arc::new(|| -> Result<(), BoxError> { Err("disk gone".into()) }));
        disposals.register("panicky", Arc::new(|| -> Result<(), BoxError> { panic!("oops") }));
        disposals.register("ok2", recording(&log, "ok2"));

        disposals.destroy_all(&graph, &mut |_| {});
        assert_eq!(*log.lock(), vec!["ok2", "ok1"]);
        assert!(disposals.is_empty());
    }

    #[test]
    fn inner_beans_destroyed_after_outer() {
        let log: Log = Arc::default();
        let graph = DependencyGraph::default();
        let disposals = DisposalCoordinator::new();
        disposals.register("outer", recording(&log, "outer"));
        disposals.register("outer#inner", recording(&log, "outer#inner"));
        graph.register_containment("outer#inner", "outer");

        disposals.destroy_one("outer", &graph, &mut |_| {});
        assert_eq!(*log.lock(), vec!["outer", "outer#inner"]);
    }

    #[test]
    fn destroying_inner_takes_outer_down_first() {
        let log: Log = Arc::default();
        let graph = DependencyGraph::default();
        let disposals = DisposalCoordinator::new();
        disposals.register("outer", recording(&log, "outer"));
        disposals.register("outer#inner", recording(&log, "outer#inner"));
        graph.register_containment("outer#inner", "outer");

        disposals.destroy_one("outer#inner", &graph, &mut |_| {});
        assert_eq!(*log.lock(), vec!["outer", "outer#inner"]);
    }

    #[test]
    fn unregistered_name_still_cascades() {
        let log: Log = Arc::default();
        let graph = DependencyGraph::default();
        let disposals = DisposalCoordinator::new();
        disposals.register("b", recording(&log, "b"));
        graph.register_dependency("a", "b");

        disposals.destroy_one("a", &graph, &mut |_| {});
        assert_eq!(*log.lock(), vec!["b"]);
        assert!(!graph.has_dependents("a"));
    }
}
