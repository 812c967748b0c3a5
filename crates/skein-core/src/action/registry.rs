//! Action registry -- a named collection of available action handlers.
//!
//! Populated once at process startup and shared (read-only) across the
//! Worker Pool. Treat it as an injected capability rather than a global: the
//! registry itself carries no process-wide singleton state.

use std::collections::HashMap;

use super::trait_def::Action;

/// A collection of registered [`Action`] implementations, keyed by name.
///
/// # Example
///
/// ```ignore
/// let mut registry = ActionRegistry::new();
/// registry.register(EchoAction);
/// let action = registry.get("echo").unwrap();
/// ```
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Box<dyn Action>>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action handler.
    ///
    /// Stored under the name returned by [`Action::name`]. If a handler
    /// with the same name is already registered, it is replaced and the
    /// old one is returned.
    pub fn register(&mut self, action: impl Action + 'static) -> Option<Box<dyn Action>> {
        let name = action.name().to_string();
        self.actions.insert(name, Box::new(action))
    }

    /// Look up an action by name.
    pub fn get(&self, name: &str) -> Option<&dyn Action> {
        self.actions.get(name).map(|b| b.as_ref())
    }

    /// List the names of all registered actions.
    ///
    /// The order is not guaranteed (HashMap iteration order).
    pub fn list(&self) -> Vec<&str> {
        self.actions.keys().map(|s| s.as_str()).collect()
    }

    /// Return the number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Return `true` if no actions are registered.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::types::{ActionContext, ActionError};
    use async_trait::async_trait;

    struct FakeAction {
        action_name: String,
    }

    impl FakeAction {
        fn new(name: &str) -> Self {
            Self {
                action_name: name.to_string(),
            }
        }
    }

    #[async_trait]
    impl Action for FakeAction {
        fn name(&self) -> &str {
            &self.action_name
        }

        async fn invoke(
            &self,
            _ctx: &ActionContext,
            input: serde_json::Value,
        ) -> Result<serde_json::Value, ActionError> {
            Ok(input)
        }
    }

    #[test]
    fn registry_starts_empty() {
        let registry = ActionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn register_and_get() {
        let mut registry = ActionRegistry::new();
        let old = registry.register(FakeAction::new("alpha"));
        assert!(old.is_none());

        let action = registry.get("alpha");
        assert!(action.is_some());
        assert_eq!(action.unwrap().name(), "alpha");
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = ActionRegistry::new();
        registry.register(FakeAction::new("alpha"));
        let old = registry.register(FakeAction::new("alpha"));
        assert!(old.is_some());
        assert_eq!(old.unwrap().name(), "alpha");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_missing_returns_none() {
        let registry = ActionRegistry::new();
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn list_returns_all_names() {
        let mut registry = ActionRegistry::new();
        registry.register(FakeAction::new("alpha"));
        registry.register(FakeAction::new("beta"));
        registry.register(FakeAction::new("gamma"));

        let mut names = registry.list();
        names.sort();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn registry_debug_shows_names() {
        let mut registry = ActionRegistry::new();
        registry.register(FakeAction::new("test-action"));
        let debug = format!("{registry:?}");
        assert!(debug.contains("test-action"));
    }
}
