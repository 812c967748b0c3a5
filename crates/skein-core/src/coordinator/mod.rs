//! Coordinator -- subscribes to both event streams, applies the in-degree
//! decrement, enqueues newly-ready tasks, propagates skip hints, and
//! detects workflow completion.
//!
//! One scheduling loop per process; safe to replicate across processes
//! because correctness rests on the Task Store's atomicity, not on any
//! single coordinator's in-memory state (see spec §4.4, §5).

use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use skein_db::models::WorkflowStatus;
use skein_db::queries::{executions as execution_db, tasks as task_db};

use crate::events::{BusEvent, EventBus};
use crate::queue::ReadyQueue;

/// Configuration for a coordinator loop.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How often to sweep for stale `RUNNING` tasks (a dead worker's claim
    /// that never reached a terminal write). See spec §11.
    pub stale_sweep_interval: Duration,
    /// A `RUNNING` task idle longer than this is considered abandoned.
    pub stale_after: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stale_sweep_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// Run the coordinator loop until `cancel` fires.
///
/// On shutdown no in-flight work is drained: the loop simply stops
/// consuming events. Any event not yet applied is recoverable because the
/// store is the source of truth and a lost event is tolerated (see spec §7).
pub async fn run_coordinator(
    pool: PgPool,
    bus: EventBus,
    queue: ReadyQueue,
    config: CoordinatorConfig,
    cancel: CancellationToken,
) {
    let mut subscriber = bus.subscribe();
    let mut sweep_interval = tokio::time::interval(config.stale_sweep_interval);
    sweep_interval.tick().await; // first tick fires immediately; discard.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("coordinator shutting down");
                return;
            }
            event = subscriber.recv() => {
                handle_bus_event(&pool, &queue, event).await;
            }
            _ = sweep_interval.tick() => {
                sweep_stale_tasks(&pool, &queue, config.stale_after).await;
            }
        }
    }
}

async fn handle_bus_event(pool: &PgPool, queue: &ReadyQueue, event: BusEvent) {
    match event {
        BusEvent::Completed(event) => {
            if let Err(e) = on_task_completed(pool, queue, &event).await {
                tracing::warn!(
                    execution_id = %event.execution_id,
                    task_id = %event.task_id,
                    error = %e,
                    "failed to process TaskCompleted, continuing"
                );
            }
        }
        BusEvent::Terminated(event) => {
            if let Err(e) = on_task_terminated(pool, queue, &event).await {
                tracing::warn!(
                    execution_id = %event.execution_id,
                    task_id = %event.task_id,
                    error = %e,
                    "failed to process TaskTerminated, continuing"
                );
            }
        }
        BusEvent::Lagged { skipped } => {
            tracing::warn!(skipped, "coordinator lagged on event bus, some events dropped");
        }
    }
}

async fn on_task_completed(
    pool: &PgPool,
    queue: &ReadyQueue,
    event: &skein_db::models::TaskCompletedEvent,
) -> anyhow::Result<()> {
    let ready = task_db::decrement_and_get_ready_tasks(pool, event.execution_id, &event.ref_id).await?;

    if ready.is_empty() {
        // The completed task had no ready descendants this time. Per spec
        // §4.4, this is the only place the completion check runs: running
        // it from TaskTerminated as well could flip a FAILED workflow back
        // to COMPLETED on a racing skip.
        if task_db::are_all_tasks_completed(pool, event.execution_id).await? {
            execution_db::update_execution_status(pool, event.execution_id, WorkflowStatus::Completed)
                .await?;
        }
        return Ok(());
    }

    for task_id in ready {
        queue.push(task_id);
    }

    Ok(())
}

async fn on_task_terminated(
    pool: &PgPool,
    queue: &ReadyQueue,
    event: &skein_db::models::TaskTerminatedEvent,
) -> anyhow::Result<()> {
    let ready = task_db::decrement_and_set_skip_hint(pool, event.execution_id, &event.ref_id).await?;

    for task_id in ready {
        queue.push(task_id);
    }

    // Deliberately no completion check here: a FAILED workflow must never
    // be flipped back to COMPLETED by a racing termination event.
    Ok(())
}

async fn sweep_stale_tasks(pool: &PgPool, queue: &ReadyQueue, stale_after: Duration) {
    let stale_after_secs = stale_after.as_secs() as i64;
    // Swept per-execution would require enumerating executions; instead the
    // sweep runs against every running execution via a single store call.
    // Kept as a Task Store primitive invoked here rather than a separate
    // process, per spec §11.
    let executions = match execution_db::list_executions(pool).await {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list executions for stale sweep");
            return;
        }
    };

    for execution in executions {
        if execution.status != WorkflowStatus::Running {
            continue;
        }
        match task_db::reclaim_stale_tasks(pool, execution.id, stale_after_secs).await {
            Ok(reclaimed) => {
                for task in reclaimed {
                    tracing::warn!(
                        task_id = %task.id,
                        execution_id = %execution.id,
                        "reclaimed stale running task, re-queueing"
                    );
                    queue.push(task.id);
                }
            }
            Err(e) => {
                tracing::warn!(execution_id = %execution.id, error = %e, "failed to reclaim stale tasks");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_intervals() {
        let config = CoordinatorConfig::default();
        assert!(config.stale_sweep_interval > Duration::ZERO);
        assert!(config.stale_after > Duration::ZERO);
    }
}
