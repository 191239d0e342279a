//! In-creation tracking.
//!
//! [`CreationGuard`] records which singletons are being constructed right
//! now. Asking to begin a name that is already in creation means the
//! construction re-entered itself: an unresolvable circular reference.
//!
//! Begin/end are paired through the RAII handle [`InCreation`], so a
//! failing or panicking factory cannot leave a name stuck in creation.
//!
//! Prototypes use a separate thread-local stack ([`PrototypeGuard`]),
//! since they are not serialized by the store lock.

use std::cell::RefCell;

use dashmap::DashSet;
use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::{error, trace};

use crate::error::{CurrentlyInCreationError, Result, SprigError};

/// Tracks singletons currently under construction.
#[derive(Debug, Default)]
pub struct CreationGuard {
    /// Names in creation, in the order construction began.
    in_creation: Mutex<IndexSet<String>>,
    /// Names opted out of the reentrancy check.
    exclusions: DashSet<String>,
}

impl CreationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `name` as in creation.
    ///
    /// # Errors
    /// [`SprigError::CurrentlyInCreation`] if `name` is already in creation
    /// and not excluded.
    pub fn begin(&self, name: &str) -> Result<()> {
        if self.exclusions.contains(name) {
            return Ok(());
        }
        let mut in_creation = self.in_creation.lock();
        if !in_creation.insert(name.to_string()) {
            return Err(SprigError::CurrentlyInCreation(CurrentlyInCreationError {
                name: name.to_string(),
                in_creation: in_creation.iter().cloned().collect(),
            }));
        }
        trace!(bean = name, "Creation started");
        Ok(())
    }

    /// Unmarks `name`.
    ///
    /// # Errors
    /// [`SprigError::InternalConsistency`] if `name` was not in creation.
    pub fn end(&self, name: &str) -> Result<()> {
        if self.exclusions.contains(name) {
            return Ok(());
        }
        if !self.in_creation.lock().shift_remove(name) {
            return Err(SprigError::InternalConsistency(format!(
                "singleton '{name}' isn't currently in creation"
            )));
        }
        trace!(bean = name, "Creation finished");
        Ok(())
    }

    /// Begins creation and returns a handle that ends it on drop.
    pub fn enter<'g>(&'g self, name: &str) -> Result<InCreation<'g>> {
        self.begin(name)?;
        Ok(InCreation {
            guard: self,
            name: Some(name.to_string()),
        })
    }

    /// Returns `true` if `name` is in creation, ignoring exclusions.
    pub fn is_actually_in_creation(&self, name: &str) -> bool {
        self.in_creation.lock().contains(name)
    }

    /// Returns `true` if `name` is in creation and not excluded.
    pub fn is_in_creation(&self, name: &str) -> bool {
        !self.exclusions.contains(name) && self.is_actually_in_creation(name)
    }

    /// Opts `name` out of (`in_creation == false`) or back into the
    /// reentrancy check.
    pub fn set_currently_in_creation(&self, name: &str, in_creation: bool) {
        if in_creation {
            self.exclusions.remove(name);
        } else {
            self.exclusions.insert(name.to_string());
        }
    }

    /// Snapshot of names in creation, outermost first.
    pub fn names(&self) -> Vec<String> {
        self.in_creation.lock().iter().cloned().collect()
    }
}

/// Scoped in-creation mark. Ends creation exactly once.
#[must_use = "dropping the handle immediately ends creation"]
pub struct InCreation<'g> {
    guard: &'g CreationGuard,
    name: Option<String>,
}

impl InCreation<'_> {
    /// Ends creation now, reporting a bookkeeping mismatch.
    pub fn finish(mut self) -> Result<()> {
        match self.name.take() {
            Some(name) => self.guard.end(&name),
            None => Ok(()),
        }
    }
}

impl Drop for InCreation<'_> {
    fn drop(&mut self) {
        if let Some(name) = self.name.take() {
            if let Err(e) = self.guard.end(&name) {
                error!(bean = %name, error = %e, "Failed to clear creation mark");
            }
        }
    }
}

thread_local! {
    // Prototypes being built on this thread, outermost first.
    static PROTOTYPES_IN_CREATION: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Thread-local guard against reentrant prototype construction.
///
/// # Example
/// ```
/// use sprig_container::creation::PrototypeGuard;
///
/// let _outer = PrototypeGuard::push("command").unwrap();
/// assert!(PrototypeGuard::push("command").is_err());
/// ```
#[derive(Debug)]
pub struct PrototypeGuard {
    name: String,
}

impl PrototypeGuard {
    /// Pushes `name`, failing if it is already being built on this thread.
    pub fn push(name: &str) -> Result<Self> {
        PROTOTYPES_IN_CREATION.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.iter().any(|n| n == name) {
                return Err(SprigError::CurrentlyInCreation(CurrentlyInCreationError {
                    name: name.to_string(),
                    in_creation: stack.clone(),
                }));
            }
            stack.push(name.to_string());
            Ok(PrototypeGuard {
                name: name.to_string(),
            })
        })
    }

    /// Returns `true` if `name` is being built on this thread.
    pub fn is_in_creation(name: &str) -> bool {
        PROTOTYPES_IN_CREATION.with(|stack| stack.borrow().iter().any(|n| n == name))
    }
}

impl Drop for PrototypeGuard {
    fn drop(&mut self) {
        PROTOTYPES_IN_CREATION.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|n| *n == self.name) {
                stack.remove(pos);
            }
        });
    }
}
