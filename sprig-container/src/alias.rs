//! Bean name aliases.
//!
//! An alias is a second name resolving to the same canonical bean name.
//! The registry core only ever needs the pure mapping
//! [`CanonicalName::canonical_name`]; [`AliasRegistry`] is the default
//! implementation backing it.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::{Result, SprigError};

/// Maps any bean name (or alias) to its canonical name.
pub trait CanonicalName: Send + Sync {
    /// Returns the canonical name for `name`, or `name` itself.
    fn canonical_name(&self, name: &str) -> String;
}

/// Identity mapping, for registries that do not use aliases.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAliases;

impl CanonicalName for NoAliases {
    #[inline]
    fn canonical_name(&self, name: &str) -> String {
        name.to_string()
    }
}

/// Thread-safe alias table.
///
/// # Examples
/// ```
/// use sprig_container::alias::{AliasRegistry, CanonicalName};
///
/// let aliases = AliasRegistry::new(true);
/// aliases.register_alias("dataSource", "primaryDb").unwrap();
/// aliases.register_alias("primaryDb", "db").unwrap();
/// assert_eq!(aliases.canonical_name("db"), "dataSource");
/// ```
#[derive(Debug)]
pub struct AliasRegistry {
    /// alias -> target name
    aliases: RwLock<HashMap<String, String>>,
    allow_overriding: bool,
}

impl AliasRegistry {
    /// Creates an empty alias registry.
    pub fn new(allow_overriding: bool) -> Self {
        Self {
            aliases: RwLock::new(HashMap::new()),
            allow_overriding,
        }
    }

    /// Registers `alias` for `name`.
    ///
    /// # Errors
    /// Returns [`SprigError::AliasConflict`] if the alias already points
    /// elsewhere and overriding is disabled, or if it would close a cycle.
    pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        let mut aliases = self.aliases.write();

        if alias == name {
            aliases.remove(alias);
            debug!(alias, "Alias equals its name, removed");
            return Ok(());
        }

        if let Some(existing) = aliases.get(alias) {
            if existing == name {
                return Ok(());
            }
            if !self.allow_overriding {
                return Err(SprigError::AliasConflict {
                    alias: alias.to_string(),
                    name: name.to_string(),
                    reason: format!("it is already registered for name '{existing}'"),
                });
            }
            debug!(alias, from = %existing, to = name, "Overriding alias");
        }

        if resolves_to(&aliases, name, alias) {
            return Err(SprigError::AliasConflict {
                alias: alias.to_string(),
                name: name.to_string(),
                reason: "circular reference".to_string(),
            });
        }

        aliases.insert(alias.to_string(), name.to_string());
        debug!(alias, name, "Registered alias");
        Ok(())
    }

    /// Removes an alias. Returns `false` if it was not registered.
    pub fn remove_alias(&self, alias: &str) -> bool {
        self.aliases.write().remove(alias).is_some()
    }

    /// Returns `true` if `name` is registered as an alias.
    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.read().contains_key(name)
    }

    /// Returns all aliases resolving to `name`, directly or transitively.
    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        let aliases = self.aliases.read();
        let mut result = Vec::new();
        collect_aliases(&aliases, name, &mut result);
        result
    }
}

impl Default for AliasRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CanonicalName for AliasRegistry {
    fn canonical_name(&self, name: &str) -> String {
        let aliases = self.aliases.read();
        let mut canonical = name;
        while let Some(target) = aliases.get(canonical) {
            trace!(from = canonical, to = %target, "Following alias");
            canonical = target;
        }
        canonical.to_string()
    }
}

/// True if following aliases from `from` reaches `to`.
fn resolves_to(aliases: &HashMap<String, String>, from: &str, to: &str) -> bool {
    let mut current = from;
    while let Some(target) = aliases.get(current) {
        if target == to {
            return true;
        }
        current = target;
    }
    false
}

fn collect_aliases(aliases: &HashMap<String, String>, name: &str, result: &mut Vec<String>) {
    for (alias, target) in aliases {
        if target == name && !result.contains(alias) {
            result.push(alias.clone());
            collect_aliases(aliases, alias, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_is_canonical() {
        let aliases = AliasRegistry::default();
        assert_eq!(aliases.canonical_name("dataSource"), "dataSource");
    }

    #[test]
    fn alias_chain_resolves() {
        let aliases = AliasRegistry::default();
        aliases.register_alias("dataSource", "primary").unwrap();
        aliases.register_alias("primary", "db").unwrap();
        assert_eq!(aliases.canonical_name("db"), "dataSource");
        assert!(aliases.is_alias("db"));
        assert!(!aliases.is_alias("dataSource"));
    }

    #[test]
    fn alias_equal_to_name_is_removed() {
        let aliases = AliasRegistry::default();
        aliases.register_alias("a", "x").unwrap();
        aliases.register_alias("x", "x").unwrap();
        assert_eq!(aliases.canonical_name("x"), "x");
    }

    #[test]
    fn override_refused_when_disabled() {
        let aliases = AliasRegistry::new(false);
        aliases.register_alias("a", "x").unwrap();
        // same target again is fine
        aliases.register_alias("a", "x").unwrap();

        match aliases.register_alias("b", "x").unwrap_err() {
            SprigError::AliasConflict { alias, name, .. } => {
                assert_eq!(alias, "x");
                assert_eq!(name, "b");
            }
            other => panic!("Expected AliasConflict, got: {other:?}"),
        }
    }

    #[test]
    fn override_allowed_by_default() {
        let aliases = AliasRegistry::default();
        aliases.register_alias("a", "x").unwrap();
        aliases.register_alias("b", "x").unwrap();
        assert_eq!(aliases.canonical_name("x"), "b");
    }

    #[test]
    fn circular_alias_rejected() {
        let aliases = AliasRegistry::default();
        aliases.register_alias("a", "b").unwrap();
        assert!(aliases.register_alias("b", "a").is_err());
    }

    #[test]
    fn aliases_of_is_transitive() {
        let aliases = AliasRegistry::default();
        aliases.register_alias("a", "b").unwrap();
        aliases.register_alias("b", "c").unwrap();

        let mut found = aliases.aliases_of("a");
        found.sort();
        assert_eq!(found, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn remove_alias() {
        let aliases = AliasRegistry::default();
        aliases.register_alias("a", "b").unwrap();
        assert!(aliases.remove_alias("b"));
        assert!(!aliases.remove_alias("b"));
        assert_eq!(aliases.canonical_name("b"), "b");
    }
}
