//! Worker Pool -- `N` concurrent workers, each running the per-task state
//! machine: dequeue -> fetch -> skip-check -> claim (CAS) -> execute ->
//! terminal bookkeeping -> publish.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use skein_db::models::{TaskCompletedEvent, TaskTerminatedEvent, TerminationKind, WorkflowStatus};
use skein_db::queries::{executions as execution_db, tasks as task_db};

use crate::action::{ActionContext, ActionError, ActionRegistry};
use crate::events::EventBus;
use crate::queue::ReadyQueue;

/// Configuration for a worker pool instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent worker loops.
    pub num_workers: usize,
    /// Wall-clock limit for a single action invocation.
    pub action_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            action_timeout: Duration::from_secs(300),
        }
    }
}

/// Outcome of processing one dequeued task id, surfaced for logging/testing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Task didn't exist (stale or already-deleted id); dropped.
    TaskMissing,
    /// `skip_hint` was set; routed straight to `SKIPPED` without invoking
    /// the action.
    Skipped,
    /// `ClaimTask` affected zero rows -- another worker already owns it, or
    /// the task is no longer `QUEUED`. Silently dropped per policy.
    ClaimLost,
    /// The action succeeded.
    Completed,
    /// The action failed retryably and was re-queued.
    RetriedRequeued,
    /// The action failed terminally (retries exhausted, or a terminal
    /// error) and the task (and workflow) are now `FAILED`.
    FailedTerminal,
    /// `action` did not match any registered handler.
    UnknownAction,
}

/// Spawn `config.num_workers` worker loops, each pulling from the shared
/// `queue`. Returns when every loop has exited (on `cancel`).
///
/// Each worker instance gets a stable id stamped at construction
/// (`"worker-{n}"`); correctness rests on the version CAS in `ClaimTask`,
/// not on worker identity, so sharing or distinguishing ids is equally
/// correct.
pub async fn run_worker_pool(
    pool: PgPool,
    queue: ReadyQueue,
    bus: EventBus,
    registry: Arc<ActionRegistry>,
    config: WorkerConfig,
    cancel: CancellationToken,
) {
    let mut handles = Vec::with_capacity(config.num_workers);

    for n in 0..config.num_workers {
        let worker_id = format!("worker-{n}");
        let pool = pool.clone();
        let queue = queue.clone();
        let bus = bus.clone();
        let registry = Arc::clone(&registry);
        let cancel = cancel.clone();
        let action_timeout = config.action_timeout;

        handles.push(tokio::spawn(async move {
            run_worker_loop(pool, queue, bus, registry, worker_id, action_timeout, cancel).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

async fn run_worker_loop(
    pool: PgPool,
    queue: ReadyQueue,
    bus: EventBus,
    registry: Arc<ActionRegistry>,
    worker_id: String,
    action_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let Some(task_id) = queue.pop(&cancel).await else {
            tracing::info!(worker_id = %worker_id, "worker loop exiting");
            return;
        };

        match process_task(&pool, &queue, &bus, &registry, &worker_id, task_id, action_timeout, &cancel).await {
            Ok(outcome) => {
                tracing::debug!(
                    worker_id = %worker_id,
                    task_id = %task_id,
                    outcome = ?outcome,
                    "processed task"
                );
            }
            Err(e) => {
                tracing::error!(
                    worker_id = %worker_id,
                    task_id = %task_id,
                    error = %e,
                    "store error while processing task, continuing"
                );
            }
        }
    }
}

/// Process a single dequeued task id through the full state machine.
/// Store errors propagate to the caller for log-and-continue handling;
/// expected non-error outcomes (claim lost, skip, unknown action) are
/// represented in the returned [`WorkerOutcome`].
async fn process_task(
    pool: &PgPool,
    queue: &ReadyQueue,
    bus: &EventBus,
    registry: &ActionRegistry,
    worker_id: &str,
    task_id: Uuid,
    action_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<WorkerOutcome> {
    let Some(task) = task_db::get_task(pool, task_id).await? else {
        tracing::warn!(task_id = %task_id, "dequeued task id not found in store, dropping");
        return Ok(WorkerOutcome::TaskMissing);
    };

    // Skip short-circuit precedes claim: a skip_hint task never runs its
    // action, regardless of current status.
    if task.skip_hint {
        let rows = task_db::mark_skipped(pool, task_id).await?;
        if rows > 0 {
            publish_terminated(bus, &task, TerminationKind::Skipped, None);
        }
        return Ok(WorkerOutcome::Skipped);
    }

    if task_db::try_claim_task(pool, task_id, worker_id, task.version)
        .await?
        .is_err()
    {
        // Already claimed by another worker, or no longer QUEUED (e.g. a
        // racing retry reset it since we read it). Queue redelivery is
        // expected; drop silently.
        return Ok(WorkerOutcome::ClaimLost);
    }

    let Some(action) = registry.get(&task.action) else {
        tracing::error!(task_id = %task_id, action = %task.action, "unknown action");
        let error = format!("unknown action: {}", task.action);
        task_db::mark_failed(pool, task_id, &error).await?;
        execution_db::update_execution_status(pool, task.execution_id, WorkflowStatus::Failed).await?;
        publish_terminated(bus, &task, TerminationKind::Failed, Some(error));
        return Ok(WorkerOutcome::UnknownAction);
    };

    let ctx = ActionContext {
        execution_id: task.execution_id,
        task_id: task.id,
        ref_id: task.ref_id.clone(),
        attempt: task.retry_count,
        cancel: cancel.clone(),
    };

    let invocation = tokio::time::timeout(action_timeout, action.invoke(&ctx, task.input.clone())).await;

    let result = match invocation {
        Ok(r) => r,
        Err(_elapsed) => Err(ActionError::Retryable(format!(
            "action {:?} timed out after {:?}",
            task.action, action_timeout
        ))),
    };

    match result {
        Ok(output) => {
            let rows = task_db::mark_completed(pool, task_id, output).await?;
            if rows > 0 {
                bus.publish_completed(TaskCompletedEvent {
                    execution_id: task.execution_id,
                    task_id: task.id,
                    ref_id: task.ref_id.clone(),
                });
            }
            Ok(WorkerOutcome::Completed)
        }
        Err(err) if err.is_retryable() && task.retry_count < task.max_retries => {
            let rows = task_db::increment_retry_count(pool, task_id, task.version + 1).await?;
            if rows > 0 {
                queue.push(task_id);
            }
            Ok(WorkerOutcome::RetriedRequeued)
        }
        Err(err) => {
            task_db::mark_failed(pool, task_id, err.message()).await?;
            execution_db::update_execution_status(pool, task.execution_id, WorkflowStatus::Failed)
                .await?;
            publish_terminated(
                bus,
                &task,
                TerminationKind::Failed,
                Some(err.message().to_string()),
            );
            Ok(WorkerOutcome::FailedTerminal)
        }
    }
}

fn publish_terminated(
    bus: &EventBus,
    task: &skein_db::models::Task,
    kind: TerminationKind,
    error: Option<String>,
) {
    bus.publish_terminated(TaskTerminatedEvent {
        execution_id: task.execution_id,
        task_id: task.id,
        ref_id: task.ref_id.clone(),
        kind,
        error,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_config_has_sane_defaults() {
        let config = WorkerConfig::default();
        assert!(config.num_workers > 0);
        assert!(config.action_timeout > Duration::ZERO);
    }
}
