//! Database query functions for the `tasks` and `task_edges_processed`
//! tables.
//!
//! This module holds the hot-path primitives the orchestrator's correctness
//! rests on: [`claim_task`] (optimistic-lock claim), [`decrement_and_get_ready_tasks`]
//! and [`decrement_and_set_skip_hint`] (the atomic in-degree decrement that
//! drives scheduling), and the idempotent terminal writers.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Task, TaskStatus};

/// Insert a new task row. Returns the inserted task with server-generated
/// defaults (id, timestamps).
///
/// `status` is set to `queued` when `in_degree == 0` (no dependencies to
/// wait on) and `pending` otherwise, matching the Submission Planner's
/// construction rule.
pub async fn insert_task(
    pool: &PgPool,
    execution_id: Uuid,
    ref_id: &str,
    action: &str,
    dependencies: &[String],
    max_retries: i32,
    input: serde_json::Value,
) -> Result<Task> {
    let in_degree = dependencies.len() as i32;
    let status = if in_degree == 0 {
        TaskStatus::Queued
    } else {
        TaskStatus::Pending
    };
    let deps_json = serde_json::Value::Array(
        dependencies
            .iter()
            .map(|d| serde_json::Value::String(d.clone()))
            .collect(),
    );

    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (execution_id, ref_id, action, status, dependencies, in_degree, max_retries, input) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(execution_id)
    .bind(ref_id)
    .bind(action)
    .bind(status)
    .bind(deps_json)
    .bind(in_degree)
    .bind(max_retries)
    .bind(input)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// Fetch a task by its workflow-local `ref_id`.
pub async fn get_task_by_ref(
    pool: &PgPool,
    execution_id: Uuid,
    ref_id: &str,
) -> Result<Option<Task>> {
    let task =
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE execution_id = $1 AND ref_id = $2")
            .bind(execution_id)
            .bind(ref_id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch task by ref_id")?;

    Ok(task)
}

/// List all tasks for a given execution, ordered by creation time.
pub async fn list_tasks_for_execution(pool: &PgPool, execution_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE execution_id = $1 ORDER BY created_at ASC",
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for execution")?;

    Ok(tasks)
}

/// Error returned by [`try_claim_task`] when the optimistic-lock claim
/// loses its race.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClaimError {
    #[error("task {0} already claimed by another worker, or not in queued status")]
    AlreadyClaimed(Uuid),
}

/// Attempt to claim a task with optimistic-concurrency control.
///
/// `SET status = running, worker_id = ?, version = version + 1 WHERE id = ?
/// AND version = expected_version AND status = 'queued'`. Returns the number
/// of rows affected: `0` means the task was already claimed by another
/// worker, or is no longer in `queued` status (e.g. a racing claim, or the
/// task has been reset by a retry since the caller read it).
pub async fn claim_task(
    pool: &PgPool,
    task_id: Uuid,
    worker_id: &str,
    expected_version: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'running', worker_id = $1, version = version + 1, updated_at = now() \
         WHERE id = $2 AND version = $3 AND status = 'queued'",
    )
    .bind(worker_id)
    .bind(task_id)
    .bind(expected_version)
    .execute(pool)
    .await
    .context("failed to claim task")?;

    Ok(result.rows_affected())
}

/// Typed wrapper over [`claim_task`] for callers that want to match on the
/// claim-lost case rather than inspect a raw row count, mirroring the
/// teacher's `TokenError`-style typed boundary errors.
pub async fn try_claim_task(
    pool: &PgPool,
    task_id: Uuid,
    worker_id: &str,
    expected_version: i32,
) -> Result<Result<(), ClaimError>> {
    let rows = claim_task(pool, task_id, worker_id, expected_version).await?;
    if rows == 0 {
        Ok(Err(ClaimError::AlreadyClaimed(task_id)))
    } else {
        Ok(Ok(()))
    }
}

/// Mark a task completed with the given output. Idempotent: writing the
/// same terminal status twice is a no-op (the second call affects 0 rows
/// because the row is no longer `running`).
pub async fn mark_completed(
    pool: &PgPool,
    task_id: Uuid,
    output: serde_json::Value,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'completed', output = $1, updated_at = now() \
         WHERE id = $2 AND status = 'running'",
    )
    .bind(output)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to mark task completed")?;

    Ok(result.rows_affected())
}

/// Mark a task failed. The error message is written into `output` as a
/// `{"error": "..."}` envelope, matching the uniform terminal-output shape.
/// Idempotent for the same reason as [`mark_completed`].
pub async fn mark_failed(pool: &PgPool, task_id: Uuid, error: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'failed', output = jsonb_build_object('error', $1::text), updated_at = now() \
         WHERE id = $2 AND status = 'running'",
    )
    .bind(error)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to mark task failed")?;

    Ok(result.rows_affected())
}

/// Mark a task skipped. Unlike [`mark_completed`]/[`mark_failed`], a skip
/// short-circuits before a claim, so the precondition is any
/// non-terminal status rather than specifically `running`.
pub async fn mark_skipped(pool: &PgPool, task_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'skipped', updated_at = now() \
         WHERE id = $1 AND status IN ('pending', 'queued', 'running')",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to mark task skipped")?;

    Ok(result.rows_affected())
}

/// Reset a task back to `queued` after a retryable handler failure,
/// incrementing `retry_count` and `version`. Conditioned on `expected_version`
/// so a stale caller loses the race cleanly. Does not touch `in_degree`.
pub async fn increment_retry_count(
    pool: &PgPool,
    task_id: Uuid,
    expected_version: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'queued', retry_count = retry_count + 1, version = version + 1, \
             worker_id = NULL, updated_at = now() \
         WHERE id = $1 AND version = $2",
    )
    .bind(task_id)
    .bind(expected_version)
    .execute(pool)
    .await
    .context("failed to increment retry count")?;

    Ok(result.rows_affected())
}

/// Decrement `in_degree` on every task that depends on `completed_ref_id`
/// within `execution_id`, and return the ids of tasks whose `in_degree`
/// reached zero as a result (these become `queued` in the same statement).
///
/// Atomic and idempotent under event replay: the decrement is gated by an
/// insert into `task_edges_processed` with `ON CONFLICT DO NOTHING`, so a
/// replayed `TaskCompleted` event for an edge already applied is a no-op --
/// it returns an empty set rather than double-decrementing.
pub async fn decrement_and_get_ready_tasks(
    pool: &PgPool,
    execution_id: Uuid,
    completed_ref_id: &str,
) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "WITH target AS ( \
             SELECT id FROM tasks \
             WHERE execution_id = $1 AND dependencies @> to_jsonb(ARRAY[$2]::text[]) \
         ), inserted AS ( \
             INSERT INTO task_edges_processed (child_task_id, parent_ref_id) \
             SELECT id, $2 FROM target \
             ON CONFLICT DO NOTHING \
             RETURNING child_task_id \
         ), updated AS ( \
             UPDATE tasks \
             SET in_degree = in_degree - 1, \
                 status = CASE WHEN in_degree - 1 <= 0 THEN 'queued' ELSE status END, \
                 updated_at = now() \
             WHERE id IN (SELECT child_task_id FROM inserted) AND in_degree > 0 \
             RETURNING id, in_degree \
         ) \
         SELECT id FROM updated WHERE in_degree = 0",
    )
    .bind(execution_id)
    .bind(completed_ref_id)
    .fetch_all(pool)
    .await
    .context("failed to decrement in-degree and collect ready tasks")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Like [`decrement_and_get_ready_tasks`], but additionally sets
/// `skip_hint = true` on every affected child regardless of whether it hit
/// zero this time. Returns the ids of tasks whose `in_degree` reached zero
/// (so the caller can enqueue them; the worker will observe the skip hint
/// and route them straight to `skipped` without invoking their action).
pub async fn decrement_and_set_skip_hint(
    pool: &PgPool,
    execution_id: Uuid,
    failed_ref_id: &str,
) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "WITH target AS ( \
             SELECT id FROM tasks \
             WHERE execution_id = $1 AND dependencies @> to_jsonb(ARRAY[$2]::text[]) \
         ), inserted AS ( \
             INSERT INTO task_edges_processed (child_task_id, parent_ref_id) \
             SELECT id, $2 FROM target \
             ON CONFLICT DO NOTHING \
             RETURNING child_task_id \
         ), updated AS ( \
             UPDATE tasks \
             SET in_degree = GREATEST(in_degree - 1, 0), \
                 skip_hint = true, \
                 status = CASE WHEN in_degree - 1 <= 0 THEN 'queued' ELSE status END, \
                 updated_at = now() \
             WHERE id IN (SELECT child_task_id FROM inserted) \
             RETURNING id, in_degree \
         ) \
         SELECT id FROM updated WHERE in_degree = 0",
    )
    .bind(execution_id)
    .bind(failed_ref_id)
    .fetch_all(pool)
    .await
    .context("failed to decrement in-degree and set skip hint")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Check whether all tasks in an execution are `completed`.
pub async fn are_all_tasks_completed(pool: &PgPool, execution_id: Uuid) -> Result<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT NOT EXISTS(SELECT 1 FROM tasks WHERE execution_id = $1 AND status != 'completed')",
    )
    .bind(execution_id)
    .fetch_one(pool)
    .await
    .context("failed to check all-tasks-completed")?;

    Ok(row.0)
}

/// Check whether all tasks in an execution are in a terminal status
/// (`completed`, `failed`, or `skipped`).
pub async fn are_all_tasks_terminal(pool: &PgPool, execution_id: Uuid) -> Result<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT NOT EXISTS( \
             SELECT 1 FROM tasks \
             WHERE execution_id = $1 AND status NOT IN ('completed', 'failed', 'skipped') \
         )",
    )
    .bind(execution_id)
    .fetch_one(pool)
    .await
    .context("failed to check all-tasks-terminal")?;

    Ok(row.0)
}

/// Status counts for an execution's tasks.
#[derive(Debug, Clone, Default)]
pub struct ExecutionProgress {
    pub pending: i64,
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub total: i64,
}

/// Get a summary of task counts by status for a given execution.
pub async fn get_execution_progress(pool: &PgPool, execution_id: Uuid) -> Result<ExecutionProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status::text, COUNT(*) as cnt FROM tasks WHERE execution_id = $1 GROUP BY status",
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await
    .context("failed to get execution progress")?;

    let mut progress = ExecutionProgress::default();
    for (status, count) in &rows {
        match status.as_str() {
            "pending" => progress.pending = *count,
            "queued" => progress.queued = *count,
            "running" => progress.running = *count,
            "completed" => progress.completed = *count,
            "failed" => progress.failed = *count,
            "skipped" => progress.skipped = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}

/// Reclaim tasks stuck `running` for longer than `stale_after_secs`.
///
/// A worker that crashes mid-execution leaves its claimed task in `running`
/// forever; this resets such tasks back to `queued` (bumping `version` so
/// any delayed write from the dead worker loses the race) so a live worker
/// can re-claim and retry them. This is a Task Store primitive, not a
/// separate process -- the Coordinator invokes it periodically.
pub async fn reclaim_stale_tasks(
    pool: &PgPool,
    execution_id: Uuid,
    stale_after_secs: i64,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'queued', worker_id = NULL, version = version + 1, updated_at = now() \
         WHERE execution_id = $1 \
           AND status = 'running' \
           AND updated_at < now() - ($2::bigint * interval '1 second') \
         RETURNING *",
    )
    .bind(execution_id)
    .bind(stale_after_secs)
    .fetch_all(pool)
    .await
    .context("failed to reclaim stale tasks")?;

    Ok(tasks)
}
