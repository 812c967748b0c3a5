//! Database query functions for the `workflow_executions` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Task, WorkflowExecution, WorkflowStatus};

/// Insert a new workflow execution row. Returns the inserted row with
/// server-generated defaults (id, status = running, timestamps).
pub async fn insert_execution(
    pool: &PgPool,
    user_id: &str,
    workflow_type: &str,
) -> Result<WorkflowExecution> {
    let execution = sqlx::query_as::<_, WorkflowExecution>(
        "INSERT INTO workflow_executions (user_id, workflow_type) \
         VALUES ($1, $2) \
         RETURNING *",
    )
    .bind(user_id)
    .bind(workflow_type)
    .fetch_one(pool)
    .await
    .context("failed to insert workflow execution")?;

    Ok(execution)
}

/// Fetch a workflow execution by ID.
pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<Option<WorkflowExecution>> {
    let execution =
        sqlx::query_as::<_, WorkflowExecution>("SELECT * FROM workflow_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch workflow execution")?;

    Ok(execution)
}

/// List all workflow executions, newest first.
pub async fn list_executions(pool: &PgPool) -> Result<Vec<WorkflowExecution>> {
    let executions = sqlx::query_as::<_, WorkflowExecution>(
        "SELECT * FROM workflow_executions ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list workflow executions")?;

    Ok(executions)
}

/// List workflow executions that have reached a terminal status
/// (`completed` or `failed`), newest first. A convenience read for
/// reporting surfaces (e.g. the CLI's `status` command); `paused` and
/// `running` executions are excluded.
pub async fn list_terminal_workflows(pool: &PgPool) -> Result<Vec<WorkflowExecution>> {
    let executions = sqlx::query_as::<_, WorkflowExecution>(
        "SELECT * FROM workflow_executions \
         WHERE status IN ('completed', 'failed') \
         ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list terminal workflow executions")?;

    Ok(executions)
}

/// Fetch a workflow execution together with all of its tasks in one call,
/// so a reporting caller doesn't need to sequence two round trips itself.
/// Returns `None` if the execution doesn't exist.
pub async fn get_workflow_with_tasks(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<(WorkflowExecution, Vec<Task>)>> {
    let Some(execution) = get_execution(pool, id).await? else {
        return Ok(None);
    };

    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE execution_id = $1 ORDER BY created_at ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await
    .context("failed to fetch tasks for workflow execution")?;

    Ok(Some((execution, tasks)))
}

/// Update the status of a workflow execution.
///
/// `FAILED` is absorbing: this update never overwrites a `failed` row with
/// any other status. The `WHERE status != 'failed'` guard makes the write a
/// no-op (0 rows affected) rather than an error when that happens, which is
/// the correct behavior for a racing completion-check that loses to a
/// concurrent failure.
pub async fn update_execution_status(
    pool: &PgPool,
    id: Uuid,
    status: WorkflowStatus,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE workflow_executions \
         SET status = $1, updated_at = now() \
         WHERE id = $2 AND status != 'failed'",
    )
    .bind(status)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to update workflow execution status")?;

    Ok(result.rows_affected())
}
