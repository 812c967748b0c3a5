//! The `Action` trait -- the handler interface invoked by the Worker Pool.
//!
//! Concrete actions implement this trait; the orchestrator treats them as
//! opaque named handlers, looked up in an [`super::ActionRegistry`] by the
//! task's `action` field. Action implementations themselves are outside the
//! orchestrator's scope -- this trait is the seam where a caller's business
//! logic plugs in.

use async_trait::async_trait;

use super::types::{ActionContext, ActionError};

/// Adapter interface for invoking named handlers.
///
/// Object-safe so it can be stored as `Box<dyn Action>` in the
/// [`super::ActionRegistry`].
#[async_trait]
pub trait Action: Send + Sync {
    /// The name this action is registered under (matches `Task::action`).
    fn name(&self) -> &str;

    /// Invoke the handler with the task's input payload.
    ///
    /// Handlers are responsible for being idempotent if external side
    /// effects matter: the orchestrator provides at-least-once execution,
    /// not exactly-once.
    async fn invoke(
        &self,
        ctx: &ActionContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActionError>;
}

// Compile-time assertion: Action must be object-safe.
#[allow(dead_code)]
fn assert_object_safe(_: &dyn Action) {}
