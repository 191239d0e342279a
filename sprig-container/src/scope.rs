//! Bean lifecycle scopes.
//!
//! Scopes determine how long a bean instance lives:
//! - [`Scope::Singleton`]: one instance per registry lifetime
//! - [`Scope::Prototype`]: new instance on every lookup
use std::fmt;

use serde::{Deserialize, Serialize};

/// Defines the lifetime of a bean within the registry.
///
/// # Examples
/// ```
/// use sprig_container::scope::Scope;
///
/// assert!(Scope::Singleton.is_cached());
/// assert!(!Scope::Prototype.is_singleton());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One instance shared by every lookup of the same name.
    ///
    /// Created on first lookup (or eagerly on refresh), cached in the
    /// singleton store, destroyed in dependency order on teardown.
    ///
    /// # When to use
    /// - Connection pools
    /// - Configuration holders
    /// - Post processors
    #[default]
    Singleton,

    /// New instance created on every lookup.
    ///
    /// Never cached and never registered for disposal: whoever asked for
    /// it owns it.
    Prototype,
}

impl Scope {
    /// Returns `true` if this scope caches instances.
    #[inline]
    pub fn is_cached(&self) -> bool {
        matches!(self, Scope::Singleton)
    }

    /// Returns `true` for [`Scope::Singleton`].
    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, Scope::Singleton)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Singleton => write!(f, "singleton"),
            Scope::Prototype => write!(f, "prototype"),
        }
    }
}
