//! Submission Planner -- validates a workflow submission, computes initial
//! in-degrees, persists the workflow and all tasks in a single transaction,
//! and enqueues root tasks.
//!
//! Modeled on `create_plan_from_toml`'s single-transaction multi-insert
//! shape, generalized from a TOML plan definition to a submission request
//! whose tasks carry dependencies by `ref_id` rather than by name-to-name
//! edges in a side table.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use skein_db::models::{Task, TaskStatus, WorkflowExecution, WorkflowStatus};

use crate::queue::ReadyQueue;

/// One task spec within a submission, as received from the external API
/// layer (out of scope here -- this struct is the boundary this crate
/// accepts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub ref_id: String,
    pub action: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_input")]
    pub input: serde_json::Value,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
}

fn default_input() -> serde_json::Value {
    serde_json::json!({})
}

fn default_max_retries() -> i32 {
    0
}

/// A validated submission request.
///
/// `workflow_type` is serialized as `type` on the wire (see spec §6), since
/// `type` is a reserved word in Rust.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "type")]
    pub workflow_type: String,
    pub user_id: String,
    pub tasks: Vec<TaskSpec>,
}

/// Error returned when a submission fails validation. Rejected before any
/// database write -- nothing is persisted for an invalid submission.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("ref_id {0:?} appears more than once in the submission")]
    DuplicateRefId(String),
    #[error("task {task:?} depends on unknown ref_id {dep:?}")]
    UnknownDependency { task: String, dep: String },
    #[error("the dependency graph contains a cycle")]
    CyclicDependencies,
    #[error("submission has no task with zero dependencies; the workflow cannot start")]
    NoRootTask,
    #[error("submission has no tasks")]
    Empty,
}

/// Validate a submission's structural invariants: unique `ref_id`s, every
/// dependency resolves to a known `ref_id`, the induced graph is acyclic,
/// and at least one root task exists.
pub fn validate(submission: &Submission) -> Result<(), ValidationError> {
    if submission.tasks.is_empty() {
        return Err(ValidationError::Empty);
    }

    let mut seen = HashSet::new();
    for task in &submission.tasks {
        if !seen.insert(task.ref_id.as_str()) {
            return Err(ValidationError::DuplicateRefId(task.ref_id.clone()));
        }
    }

    for task in &submission.tasks {
        for dep in &task.dependencies {
            if !seen.contains(dep.as_str()) {
                return Err(ValidationError::UnknownDependency {
                    task: task.ref_id.clone(),
                    dep: dep.clone(),
                });
            }
        }
    }

    if !submission
        .tasks
        .iter()
        .any(|t| t.dependencies.is_empty())
    {
        return Err(ValidationError::NoRootTask);
    }

    if is_cyclic(submission) {
        return Err(ValidationError::CyclicDependencies);
    }

    Ok(())
}

/// Kahn's algorithm: if a topological order can't consume every node, the
/// graph has a cycle.
fn is_cyclic(submission: &Submission) -> bool {
    let mut in_degree: HashMap<&str, usize> = submission
        .tasks
        .iter()
        .map(|t| (t.ref_id.as_str(), t.dependencies.len()))
        .collect();

    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in &submission.tasks {
        for dep in &task.dependencies {
            children
                .entry(dep.as_str())
                .or_default()
                .push(task.ref_id.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut visited = 0;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        if let Some(kids) = children.get(id) {
            for &kid in kids {
                let deg = in_degree.get_mut(kid).expect("child must be known");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(kid);
                }
            }
        }
    }

    visited != submission.tasks.len()
}

/// Create a workflow execution from a validated submission: a new
/// `WorkflowExecution` row plus one `Task` row per spec, all in a single
/// transaction. Returns the execution and the ids of root tasks (those with
/// `in_degree = 0`) so the caller can push them onto the Ready Queue.
pub async fn create_execution(
    pool: &PgPool,
    submission: &Submission,
) -> Result<(WorkflowExecution, Vec<Task>)> {
    validate(submission).context("submission failed validation")?;

    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let execution = sqlx::query_as::<_, WorkflowExecution>(
        "INSERT INTO workflow_executions (user_id, workflow_type, status) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(&submission.user_id)
    .bind(&submission.workflow_type)
    .bind(WorkflowStatus::Running)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert workflow execution")?;

    let mut tasks = Vec::with_capacity(submission.tasks.len());
    for spec in &submission.tasks {
        let in_degree = spec.dependencies.len() as i32;
        let status = if in_degree == 0 {
            TaskStatus::Queued
        } else {
            TaskStatus::Pending
        };
        let deps_json = serde_json::Value::Array(
            spec.dependencies
                .iter()
                .map(|d| serde_json::Value::String(d.clone()))
                .collect(),
        );

        let task = sqlx::query_as::<_, Task>(
            "INSERT INTO tasks (execution_id, ref_id, action, status, dependencies, in_degree, max_retries, input) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING *",
        )
        .bind(execution.id)
        .bind(&spec.ref_id)
        .bind(&spec.action)
        .bind(status)
        .bind(deps_json)
        .bind(in_degree)
        .bind(spec.max_retries)
        .bind(&spec.input)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to insert task {:?}", spec.ref_id))?;

        tasks.push(task);
    }

    tx.commit().await.context("failed to commit transaction")?;

    Ok((execution, tasks))
}

/// Submit a workflow end to end: validate, persist, and push root tasks
/// onto the Ready Queue.
///
/// Enqueue failures are non-fatal: the task rows are already `QUEUED` and
/// recoverable by a sweeper (out of scope). In this implementation `push`
/// cannot itself fail (see [`ReadyQueue::push`]), so this is purely a
/// structural guarantee, not a try/catch around a fallible call.
pub async fn submit(
    pool: &PgPool,
    queue: &ReadyQueue,
    submission: &Submission,
) -> Result<WorkflowExecution> {
    let (execution, tasks) = create_execution(pool, submission).await?;

    for task in &tasks {
        if task.status == TaskStatus::Queued {
            queue.push(task.id);
        }
    }

    Ok(execution)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(ref_id: &str, deps: &[&str]) -> TaskSpec {
        TaskSpec {
            ref_id: ref_id.to_string(),
            action: "noop".to_string(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            input: serde_json::json!({}),
            max_retries: 0,
        }
    }

    fn submission(tasks: Vec<TaskSpec>) -> Submission {
        Submission {
            workflow_type: "test".to_string(),
            user_id: "user-1".to_string(),
            tasks,
        }
    }

    #[test]
    fn rejects_empty_submission() {
        let sub = submission(vec![]);
        assert!(matches!(validate(&sub), Err(ValidationError::Empty)));
    }

    #[test]
    fn rejects_duplicate_ref_id() {
        let sub = submission(vec![spec("a", &[]), spec("a", &[])]);
        assert!(matches!(
            validate(&sub),
            Err(ValidationError::DuplicateRefId(_))
        ));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let sub = submission(vec![spec("a", &["ghost"])]);
        assert!(matches!(
            validate(&sub),
            Err(ValidationError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn rejects_missing_root_task() {
        let sub = submission(vec![spec("a", &["b"]), spec("b", &["a"])]);
        // Every task has a dependency, so no-root-task should fire before
        // cycle detection even runs.
        assert!(matches!(validate(&sub), Err(ValidationError::NoRootTask)));
    }

    #[test]
    fn rejects_cyclic_dependencies() {
        let sub = submission(vec![
            spec("a", &[]),
            spec("b", &["a", "c"]),
            spec("c", &["b"]),
        ]);
        assert!(matches!(
            validate(&sub),
            Err(ValidationError::CyclicDependencies)
        ));
    }

    #[test]
    fn accepts_diamond_dag() {
        let sub = submission(vec![
            spec("a", &[]),
            spec("b", &["a"]),
            spec("c", &["a"]),
            spec("d", &["b", "c"]),
        ]);
        assert!(validate(&sub).is_ok());
    }

    #[test]
    fn accepts_single_root_task() {
        let sub = submission(vec![spec("a", &[])]);
        assert!(validate(&sub).is_ok());
    }
}
