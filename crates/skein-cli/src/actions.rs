//! Demo actions registered with the CLI's worker pool.
//!
//! Action implementations are out of scope for the orchestrator itself
//! (spec §1) -- these exist only so `skein run` has something runnable out
//! of the box.

use async_trait::async_trait;
use tokio::time::Duration;

use skein_core::action::{Action, ActionContext, ActionError, ActionRegistry};

/// Echoes its input back as output. Always succeeds.
struct EchoAction;

#[async_trait]
impl Action for EchoAction {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(
        &self,
        _ctx: &ActionContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        Ok(input)
    }
}

/// Sleeps for `input.seconds` (default 1) then succeeds.
struct SleepAction;

#[async_trait]
impl Action for SleepAction {
    fn name(&self) -> &str {
        "sleep"
    }

    async fn invoke(
        &self,
        ctx: &ActionContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let seconds = input.get("seconds").and_then(|v| v.as_u64()).unwrap_or(1);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => {
                Ok(serde_json::json!({"slept_seconds": seconds}))
            }
            _ = ctx.cancel.cancelled() => {
                Err(ActionError::Retryable("cancelled while sleeping".to_string()))
            }
        }
    }
}

/// Always fails terminally. Useful for exercising the failure/skip path.
struct FailAction;

#[async_trait]
impl Action for FailAction {
    fn name(&self) -> &str {
        "fail"
    }

    async fn invoke(
        &self,
        _ctx: &ActionContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let message = input
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("deliberate failure")
            .to_string();
        Err(ActionError::Terminal(message))
    }
}

/// Build the demo registry: `echo`, `sleep`, `fail`.
pub fn demo_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry.register(EchoAction);
    registry.register(SleepAction);
    registry.register(FailAction);
    registry
}
