//! Bean factory settings.
//!
//! Applied to every fresh bean factory a context creates on refresh.
//! Deserializable, so they can live in an application's own config file.

use serde::{Deserialize, Serialize};

/// Switches controlling how a bean factory resolves and registers beans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Expose early references so circular references between singletons
    /// can be resolved.
    pub allow_circular_references: bool,
    /// Let a later definition replace an earlier one with the same name.
    pub allow_bean_definition_overriding: bool,
    /// Let an alias be re-pointed at a different name.
    pub allow_alias_overriding: bool,
    /// Name used in logs and events.
    pub display_name: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allow_circular_references: true,
            allow_bean_definition_overriding: true,
            allow_alias_overriding: true,
            display_name: None,
        }
    }
}

impl Settings {
    pub fn allow_circular_references(mut self, allow: bool) -> Self {
        self.allow_circular_references = allow;
        self
    }

    pub fn allow_bean_definition_overriding(mut self, allow: bool) -> Self {
        self.allow_bean_definition_overriding = allow;
        self
    }

    pub fn allow_alias_overriding(mut self, allow: bool) -> Self {
        self.allow_alias_overriding = allow;
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// The display name, or a generic one.
    pub fn display_name_or_default(&self) -> &str {
        self.display_name.as_deref().unwrap_or("application")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_allow_everything() {
        let settings = Settings::default();
        assert!(settings.allow_circular_references);
        assert!(settings.allow_bean_definition_overriding);
        assert!(settings.allow_alias_overriding);
        assert_eq!(settings.display_name_or_default(), "application");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "allow_circular_references": false, "display_name": "orders" }"#)
                .unwrap();
        assert!(!settings.allow_circular_references);
        assert!(settings.allow_bean_definition_overriding);
        assert_eq!(settings.display_name_or_default(), "orders");
    }

    #[test]
    fn builder_chain() {
        let settings = Settings::default()
            .allow_bean_definition_overriding(false)
            .display_name("billing");
        assert!(!settings.allow_bean_definition_overriding);
        assert_eq!(settings.display_name.as_deref(), Some("billing"));
    }
}
