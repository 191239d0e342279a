//! Dependency bookkeeping between beans.
//!
//! [`DependencyGraph`] records who depends on whom as construction
//! discovers it, in both directions, plus which inner beans are contained
//! by which outer bean. Teardown reads it to destroy dependents first.
//!
//! [`DependsOnValidator`] checks the *declared* depends-on relations of
//! the bean definitions up front, during refresh:
//! - Detects circular depends-on chains
//! - Checks that every declared name is registered

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use sprig_support::rendering::suggest_similar;
use tracing::{debug, instrument, trace, warn};

use crate::alias::{CanonicalName, NoAliases};
use crate::error::{NoSuchBeanError, Result, SprigError};

type Relation = IndexMap<String, IndexSet<String>>;

/// Bidirectional depends-on / depended-by maps plus containment.
///
/// Each map has its own lock. The maps are not atomic with respect to each
/// other or to the singleton store; a short window where an edge exists
/// without its singleton (or the reverse) is tolerated.
pub struct DependencyGraph {
    aliases: Arc<dyn CanonicalName>,
    /// bean -> beans that depend on it (must be destroyed first)
    dependents: Mutex<Relation>,
    /// bean -> beans it depends on
    dependencies: Mutex<Relation>,
    /// outer bean -> inner beans it contains
    contained: Mutex<Relation>,
}

impl DependencyGraph {
    /// Creates an empty graph canonicalizing names through `aliases`.
    pub fn new(aliases: Arc<dyn CanonicalName>) -> Self {
        Self {
            aliases,
            dependents: Mutex::new(IndexMap::new()),
            dependencies: Mutex::new(IndexMap::new()),
            contained: Mutex::new(IndexMap::new()),
        }
    }

    /// Records that `dependent` depends on `owner`.
    ///
    /// `owner` is canonicalized first. Duplicate edges are no-ops.
    pub fn register_dependency(&self, owner: &str, dependent: &str) {
        let canonical = self.aliases.canonical_name(owner);

        {
            let mut dependents = self.dependents.lock();
            let set = dependents.entry(canonical.clone()).or_default();
            if !set.insert(dependent.to_string()) {
                return;
            }
        }

        self.dependencies
            .lock()
            .entry(dependent.to_string())
            .or_default()
            .insert(canonical.clone());
        trace!(bean = %canonical, dependent, "Registered dependent bean");
    }

    /// Records that `inner` is contained by `outer`.
    ///
    /// Also makes `outer` a dependent of `inner`, unless the containment
    /// was already known.
    pub fn register_containment(&self, inner: &str, outer: &str) {
        {
            let mut contained = self.contained.lock();
            let set = contained.entry(outer.to_string()).or_default();
            if !set.insert(inner.to_string()) {
                return;
            }
        }
        self.register_dependency(inner, outer);
    }

    /// Returns `true` if `dependent` depends on `name`, directly or
    /// transitively. Terminates on cyclic relations.
    pub fn is_dependent(&self, name: &str, dependent: &str) -> bool {
        let dependents = self.dependents.lock();
        let mut seen = HashSet::new();
        self.is_dependent_in(&dependents, name, dependent, &mut seen)
    }

    fn is_dependent_in(
        &self,
        dependents: &Relation,
        name: &str,
        dependent: &str,
        seen: &mut HashSet<String>,
    ) -> bool {
        if seen.contains(name) {
            return false;
        }
        let canonical = self.aliases.canonical_name(name);
        let Some(direct) = dependents.get(&canonical) else {
            return false;
        };
        if direct.contains(dependent) {
            return true;
        }
        seen.insert(name.to_string());
        direct
            .iter()
            .any(|transitive| self.is_dependent_in(dependents, transitive, dependent, seen))
    }

    /// Returns `true` if anything depends on `name`.
    pub fn has_dependents(&self, name: &str) -> bool {
        self.dependents.lock().contains_key(name)
    }

    /// Snapshot of the beans depending on `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        snapshot(&self.dependents, name)
    }

    /// Snapshot of the beans `name` depends on.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        snapshot(&self.dependencies, name)
    }

    /// Snapshot of the inner beans contained by `name`.
    pub fn contained_of(&self, name: &str) -> Vec<String> {
        snapshot(&self.contained, name)
    }

    /// Removes and returns the dependents of `name`.
    pub(crate) fn take_dependents(&self, name: &str) -> Vec<String> {
        take(&self.dependents, name)
    }

    /// Removes and returns the inner beans of `name`.
    pub(crate) fn take_contained(&self, name: &str) -> Vec<String> {
        take(&self.contained, name)
    }

    /// Drops every trace of `name` after it has been destroyed.
    pub fn forget(&self, name: &str) {
        {
            let mut dependents = self.dependents.lock();
            dependents.shift_remove(name);
            dependents.retain(|_, set| {
                set.shift_remove(name);
                !set.is_empty()
            });
        }
        self.dependencies.lock().shift_remove(name);
        self.contained.lock().shift_remove(name);
    }

    /// Clears all relations.
    pub fn clear(&self) {
        self.contained.lock().clear();
        self.dependents.lock().clear();
        self.dependencies.lock().clear();
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new(Arc::new(NoAliases))
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("dependents", &*self.dependents.lock())
            .field("contained", &*self.contained.lock())
            .finish()
    }
}

fn snapshot(relation: &Mutex<Relation>, name: &str) -> Vec<String> {
    relation
        .lock()
        .get(name)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default()
}

fn take(relation: &Mutex<Relation>, name: &str) -> Vec<String> {
    relation
        .lock()
        .shift_remove(name)
        .map(|set| set.into_iter().collect())
        .unwrap_or_default()
}

// ═══════════════════════════════════════════
// Declared depends-on validation
// ═══════════════════════════════════════════

/// Validates declared depends-on relations before any bean is created.
///
/// # Algorithm
/// Depth-first search over the declared names, keeping the current path
/// to report the full chain when a cycle closes.
pub(crate) struct DependsOnValidator<'a> {
    /// bean -> names it declares it depends on
    declared: &'a IndexMap<String, Vec<String>>,
    /// Names that can satisfy a depends-on (definitions and singletons).
    known: &'a HashSet<String>,
    visiting: HashSet<String>,
    validated: HashSet<String>,
    path: Vec<String>,
}

impl<'a> DependsOnValidator<'a> {
    pub fn new(declared: &'a IndexMap<String, Vec<String>>, known: &'a HashSet<String>) -> Self {
        Self {
            declared,
            known,
            visiting: HashSet::new(),
            validated: HashSet::new(),
            path: Vec::new(),
        }
    }

    /// # Errors
    /// - [`SprigError::CircularDependsOn`]: cycle detected
    /// - [`SprigError::NoSuchBean`]: a declared name is not registered
    #[instrument(skip(self), name = "depends_on_validation")]
    pub fn validate(&mut self) -> Result<()> {
        debug!(beans = self.declared.len(), "Validating declared depends-on relations");

        let declared = self.declared;
        for name in declared.keys() {
            self.validate_name(name)?;
        }

        debug!("Depends-on validation passed");
        Ok(())
    }

    fn validate_name(&mut self, name: &str) -> Result<()> {
        if self.validated.contains(name) {
            return Ok(());
        }

        if self.visiting.contains(name) {
            let start = self.path.iter().position(|n| n == name).unwrap_or(0);
            let mut chain = self.path[start..].to_vec();
            chain.push(name.to_string());
            warn!(cycle = ?chain, "Circular depends-on relationship detected");
            return Err(SprigError::CircularDependsOn { chain });
        }

        if !self.known.contains(name) {
            let available: Vec<&str> = self.known.iter().map(String::as_str).collect();
            return Err(SprigError::NoSuchBean(NoSuchBeanError {
                name: name.to_string(),
                required_by: self.path.last().cloned(),
                suggestions: suggest_similar(name, &available, 3),
            }));
        }

        self.visiting.insert(name.to_string());
        self.path.push(name.to_string());

        let declared = self.declared;
        if let Some(deps) = declared.get(name) {
            for dep in deps {
                self.validate_name(dep)?;
            }
        }

        self.path.pop();
        self.visiting.remove(name);
        self.validated.insert(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasRegistry;

    #[test]
    fn edges_stored_both_ways() {
        let graph = DependencyGraph::default();
        graph.register_dependency("a", "b");
        graph.register_dependency("a", "c");

        assert_eq!(graph.dependents_of("a"), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(graph.dependencies_of("b"), vec!["a".to_string()]);
        assert!(graph.has_dependents("a"));
        assert!(graph.dependents_of("zzz").is_empty());
    }

    #[test]
    fn duplicate_edge_is_noop() {
        let graph = DependencyGraph::default();
        graph.register_dependency("a", "b");
        graph.register_dependency("a", "b");
        assert_eq!(graph.dependents_of("a").len(), 1);
        assert_eq!(graph.dependencies_of("b").len(), 1);
    }

    #[test]
    fn owner_is_canonicalized() {
        let aliases = Arc::new(AliasRegistry::default());
        aliases.register_alias("dataSource", "db").unwrap();
        let graph = DependencyGraph::new(aliases);

        graph.register_dependency("db", "repo");
        assert_eq!(graph.dependents_of("dataSource"), vec!["repo".to_string()]);
        assert!(graph.is_dependent("db", "repo"));
    }

    #[test]
    fn transitive_query() {
        // b depends on a, c depends on b
        let graph = DependencyGraph::default();
        graph.register_dependency("a", "b");
        graph.register_dependency("b", "c");

        assert!(graph.is_dependent("a", "c"));
        assert!(!graph.is_dependent("c", "a"));
    }

    #[test]
    fn cyclic_relation_terminates() {
        let graph = DependencyGraph::default();
        graph.register_dependency("a", "b");
        graph.register_dependency("b", "a");
        graph.register_dependency("c", "c");

        assert!(graph.is_dependent("a", "a"));
        assert!(!graph.is_dependent("a", "x"));
        assert!(!graph.is_dependent("c", "x"));
    }

    #[test]
    fn containment_implies_dependency_once() {
        let graph = DependencyGraph::default();
        graph.register_containment("inner", "outer");
        graph.register_containment("inner", "outer");

        assert_eq!(graph.contained_of("outer"), vec!["inner".to_string()]);
        assert_eq!(graph.dependents_of("inner"), vec!["outer".to_string()]);
    }

    #[test]
    fn forget_scrubs_everywhere() {
        let graph = DependencyGraph::default();
        graph.register_dependency("a", "b");
        graph.register_dependency("c", "b");
        graph.register_dependency("b", "d");

        graph.forget("b");

        assert!(!graph.has_dependents("a"));
        assert!(!graph.has_dependents("c"));
        assert!(!graph.has_dependents("b"));
        assert!(graph.dependencies_of("b").is_empty());
    }

    #[test]
    fn take_dependents_removes_key() {
        let graph = DependencyGraph::default();
        graph.register_dependency("a", "b");
        assert_eq!(graph.take_dependents("a"), vec!["b".to_string()]);
        assert!(graph.take_dependents("a").is_empty());
    }

    fn declared(pairs: &[(&str, &[&str])]) -> IndexMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(name, deps)| (name.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    fn known(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn valid_diamond() {
        //     a
        //    / \
        //   b   c
        //    \ /
        //     d
        let declared = declared(&[("a", &["b", "c"]), ("b", &["d"]), ("c", &["d"]), ("d", &[])]);
        let known = known(&["a", "b", "c", "d"]);
        assert!(DependsOnValidator::new(&declared, &known).validate().is_ok());
    }

    #[test]
    fn detect_depends_on_cycle() {
        let declared = declared(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let known = known(&["a", "b", "c"]);

        match DependsOnValidator::new(&declared, &known).validate().unwrap_err() {
            SprigError::CircularDependsOn { chain } => {
                assert_eq!(chain.first(), chain.last());
                assert_eq!(chain.len(), 4);
            }
            other => panic!("Expected CircularDependsOn, got: {other:?}"),
        }
    }

    #[test]
    fn detect_missing_depends_on() {
        let declared = declared(&[("userService", &["userRepo"])]);
        let known = known(&["userService", "userRepository"]);

        match DependsOnValidator::new(&declared, &known).validate().unwrap_err() {
            SprigError::NoSuchBean(err) => {
                assert_eq!(err.name, "userRepo");
                assert_eq!(err.required_by.as_deref(), Some("userService"));
                assert!(err.suggestions.contains(&"userRepository".to_string()));
            }
            other => panic!("Expected NoSuchBean, got: {other:?}"),
        }
    }
}
