//! Error types for Sprig registry and context operations.
//!
//! Every failure carries the bean name it concerns, and construction
//! failures keep their full cause chain so the root cause (for example an
//! unresolvable circular reference) can be told apart from the beans that
//! failed because of it.

use std::fmt;

use sprig_support::rendering::{render_chain, render_names};

/// Boxed error produced by user callbacks (factories, cleanup hooks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for all Sprig operations.
#[derive(Debug, thiserror::Error)]
pub enum SprigError {
    /// A singleton or definition name already holds something else.
    #[error("{}", .0)]
    AlreadyRegistered(AlreadyRegisteredError),

    /// Reentrant construction of a bean that is already being built.
    #[error("{}", .0)]
    CurrentlyInCreation(CurrentlyInCreationError),

    /// A new singleton was requested while the registry is tearing down.
    #[error(
        "Singleton bean creation not allowed while singletons are in destruction: '{name}'\n  \
         Hint: do not request beans from a destroy callback"
    )]
    CreationNotAllowed { name: String },

    /// The factory for a bean failed.
    #[error("{}", .0)]
    ConstructionFailed(Box<ConstructionFailedError>),

    /// State-consistency failure raised by a factory.
    ///
    /// When the bean appears in the cache anyway, `get_or_create` returns
    /// the cached instance instead of this error.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Paired begin/end creation bookkeeping went out of sync.
    #[error("Internal consistency violated: {0}")]
    InternalConsistency(String),

    /// A cleanup callback failed. Logged during teardown, never propagated by it.
    #[error("Destruction of bean '{name}' failed: {source}")]
    DisposalFailure {
        name: String,
        #[source]
        source: BoxError,
    },

    /// No definition and no singleton under the requested name.
    #[error("{}", .0)]
    NoSuchBean(NoSuchBeanError),

    /// The bean exists but is not of the requested type.
    #[error("Bean '{name}' is expected to be of type '{expected}'")]
    BeanNotOfRequiredType { name: String, expected: String },

    /// A `&`-prefixed name was requested for a bean that is not a factory bean.
    #[error("Bean named '{name}' is expected to be a factory bean")]
    BeanIsNotAFactory { name: String },

    /// Declared depends-on relations form a cycle.
    #[error("Circular depends-on relationship: {}", render_chain(.chain))]
    CircularDependsOn { chain: Vec<String> },

    /// A bean was injected into others in its raw form, then wrapped.
    #[error(
        "Bean '{name}' has been injected into other beans {} in its raw version as part of a \
         circular reference, but has eventually been wrapped",
        render_names(.dependents)
    )]
    RawReferenceExposed { name: String, dependents: Vec<String> },

    /// Alias registration rejected.
    #[error("Cannot register alias '{alias}' for name '{name}': {reason}")]
    AliasConflict {
        alias: String,
        name: String,
        reason: String,
    },

    /// The context was never refreshed or has been closed.
    #[error("Bean factory not initialized or already closed; call refresh() before accessing beans")]
    ContextInactive,

    /// Error raised by user code.
    #[error(transparent)]
    Factory(BoxError),
}

impl SprigError {
    /// Wraps a user error.
    pub fn factory(err: impl Into<BoxError>) -> Self {
        SprigError::Factory(err.into())
    }

    /// Wraps `cause` as the construction failure of `name`.
    ///
    /// A failure already attributed to `name` is not wrapped twice; the
    /// related causes are appended to it instead.
    pub fn construction_failed(name: &str, cause: SprigError, related: Vec<SprigError>) -> Self {
        match cause {
            SprigError::ConstructionFailed(mut failed) if failed.name == name => {
                failed.related.extend(related);
                SprigError::ConstructionFailed(failed)
            }
            cause => SprigError::ConstructionFailed(Box::new(ConstructionFailedError {
                name: name.to_string(),
                cause,
                related,
            })),
        }
    }

    /// Follows construction failures down to the first non-wrapping error.
    pub fn root_cause(&self) -> &SprigError {
        let mut current = self;
        while let SprigError::ConstructionFailed(failed) = current {
            current = &failed.cause;
        }
        current
    }

    /// The bean name this error is about, when it concerns one.
    pub fn bean_name(&self) -> Option<&str> {
        match self {
            SprigError::AlreadyRegistered(e) => Some(&e.name),
            SprigError::CurrentlyInCreation(e) => Some(&e.name),
            SprigError::CreationNotAllowed { name }
            | SprigError::DisposalFailure { name, .. }
            | SprigError::BeanNotOfRequiredType { name, .. }
            | SprigError::BeanIsNotAFactory { name }
            | SprigError::RawReferenceExposed { name, .. } => Some(name),
            SprigError::ConstructionFailed(e) => Some(&e.name),
            SprigError::NoSuchBean(e) => Some(&e.name),
            _ => None,
        }
    }
}

/// What kind of slot a rejected registration targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationKind {
    /// A fully constructed singleton instance.
    Singleton,
    /// A bean definition.
    Definition,
}

/// Error when a name is already bound.
#[derive(Debug)]
pub struct AlreadyRegisteredError {
    pub name: String,
    pub kind: RegistrationKind,
}

impl fmt::Display for AlreadyRegisteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RegistrationKind::Singleton => {
                write!(
                    f,
                    "Could not register singleton under bean name '{}': a different object is already bound",
                    self.name
                )
            }
            RegistrationKind::Definition => {
                write!(f, "Bean definition already registered: '{}'", self.name)?;
                write!(
                    f,
                    "\n  Hint: enable allow_bean_definition_overriding in the settings to replace it"
                )
            }
        }
    }
}

/// Error when a bean is requested while it is being constructed.
///
/// Shows the beans in creation so you can see WHERE the cycle is.
#[derive(Debug)]
pub struct CurrentlyInCreationError {
    /// The bean requested again.
    pub name: String,
    /// Beans in creation at the time, outermost first.
    pub in_creation: Vec<String>,
}

impl fmt::Display for CurrentlyInCreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Requested bean is currently in creation: '{}'. Is there an unresolvable circular reference?",
            self.name
        )?;
        if !self.in_creation.is_empty() {
            let mut chain = self.in_creation.clone();
            chain.push(self.name.clone());
            write!(f, "\n  {}", render_chain(&chain))?;
        }
        write!(
            f,
            "\n  Hint: inject through a populate callback so an early reference can be exposed"
        )
    }
}

/// Error when a bean factory fails.
#[derive(Debug)]
pub struct ConstructionFailedError {
    /// The bean whose construction failed.
    pub name: String,
    /// The primary cause.
    pub cause: SprigError,
    /// Side-effect errors recorded during the attempt.
    pub related: Vec<SprigError>,
}

impl fmt::Display for ConstructionFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error creating bean with name '{}': {}", self.name, self.cause)?;
        for related in &self.related {
            write!(f, "\n  Related cause: {related}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConstructionFailedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Error when a bean name is unknown.
#[derive(Debug)]
pub struct NoSuchBeanError {
    /// The requested name.
    pub name: String,
    /// The bean that required it, if known.
    pub required_by: Option<String>,
    /// Registered names that look similar.
    pub suggestions: Vec<String>,
}

impl fmt::Display for NoSuchBeanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No bean named '{}' available", self.name)?;

        if let Some(ref parent) = self.required_by {
            write!(f, "\n  Required by: {parent}")?;
        }

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n    - {suggestion}")?;
            }
        }
        Ok(())
    }
}

/// Convenient Result type for Sprig operations.
pub type Result<T> = std::result::Result<T, SprigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currently_in_creation_display() {
        let err = SprigError::CurrentlyInCreation(CurrentlyInCreationError {
            name: "a".into(),
            in_creation: vec!["a".into(), "b".into()],
        });

        let msg = format!("{err}");
        assert!(msg.contains("currently in creation"));
        assert!(msg.contains("a → b → a"));
    }

    #[test]
    fn construction_failed_lists_related_causes() {
        let err = SprigError::construction_failed(
            "orderService",
            SprigError::IllegalState("boom".into()),
            vec![SprigError::IllegalState("side effect".into())],
        );

        let msg = format!("{err}");
        assert!(msg.contains("orderService"));
        assert!(msg.contains("boom"));
        assert!(msg.contains("Related cause: Illegal state: side effect"));
    }

    #[test]
    fn construction_failed_not_wrapped_twice_for_same_bean() {
        let inner = SprigError::construction_failed("a", SprigError::IllegalState("x".into()), vec![]);
        let outer = SprigError::construction_failed(
            "a",
            inner,
            vec![SprigError::IllegalState("y".into())],
        );

        match outer {
            SprigError::ConstructionFailed(failed) => {
                assert_eq!(failed.name, "a");
                assert!(matches!(failed.cause, SprigError::IllegalState(_)));
                assert_eq!(failed.related.len(), 1);
            }
            other => panic!("Expected ConstructionFailed, got: {other:?}"),
        }
    }

    #[test]
    fn root_cause_walks_chain() {
        let cause = SprigError::CurrentlyInCreation(CurrentlyInCreationError {
            name: "a".into(),
            in_creation: vec![],
        });
        let err = SprigError::construction_failed(
            "a",
            SprigError::construction_failed("b", cause, vec![]),
            vec![],
        );

        assert!(matches!(err.root_cause(), SprigError::CurrentlyInCreation(_)));
        assert_eq!(err.bean_name(), Some("a"));
    }

    #[test]
    fn no_such_bean_display() {
        let err = SprigError::NoSuchBean(NoSuchBeanError {
            name: "userServise".into(),
            required_by: Some("userController".into()),
            suggestions: vec!["userService".into()],
        });

        let msg = format!("{err}");
        assert!(msg.contains("No bean named 'userServise'"));
        assert!(msg.contains("Required by: userController"));
        assert!(msg.contains("- userService"));
    }

    #[test]
    fn factory_error_is_transparent() {
        let err = SprigError::factory("connection refused");
        assert_eq!(format!("{err}"), "connection refused");
    }
}
