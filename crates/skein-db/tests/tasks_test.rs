//! Integration tests for the hot-path task primitives: claim races,
//! in-degree decrement atomicity/idempotency, and idempotent terminal
//! writes.

use std::sync::Arc;

use skein_db::models::TaskStatus;
use skein_db::queries::tasks as task_db;
use skein_test_utils::{create_test_db, drop_test_db};

async fn insert_root(pool: &sqlx::PgPool, execution_id: uuid::Uuid, ref_id: &str) -> uuid::Uuid {
    let task = task_db::insert_task(pool, execution_id, ref_id, "noop", &[], 0, serde_json::json!({}))
        .await
        .unwrap();
    task.id
}

async fn insert_execution(pool: &sqlx::PgPool) -> uuid::Uuid {
    skein_db::queries::executions::insert_execution(pool, "user-1", "test")
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn claim_is_exclusive_under_concurrent_attempts() {
    let (pool, db_name) = create_test_db().await;
    let execution_id = insert_execution(&pool).await;
    let task_id = insert_root(&pool, execution_id, "a").await;

    let pool = Arc::new(pool);
    let mut handles = Vec::new();
    for n in 0..10 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            task_db::claim_task(&pool, task_id, &format!("worker-{n}"), 0)
                .await
                .unwrap()
        }));
    }

    let mut total_claimed = 0;
    for handle in handles {
        total_claimed += handle.await.unwrap();
    }

    assert_eq!(total_claimed, 1, "exactly one concurrent claim should succeed");

    let task = task_db::get_task(&pool, task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.version, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_fails_once_already_claimed() {
    let (pool, db_name) = create_test_db().await;
    let execution_id = insert_execution(&pool).await;
    let task_id = insert_root(&pool, execution_id, "a").await;

    let rows = task_db::claim_task(&pool, task_id, "worker-1", 0).await.unwrap();
    assert_eq!(rows, 1);

    // Stale version (redelivered item, or a second racer with the original
    // version) must fail to claim.
    let rows = task_db::claim_task(&pool, task_id, "worker-2", 0).await.unwrap();
    assert_eq!(rows, 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn try_claim_task_reports_already_claimed() {
    let (pool, db_name) = create_test_db().await;
    let execution_id = insert_execution(&pool).await;
    let task_id = insert_root(&pool, execution_id, "a").await;

    let first = task_db::try_claim_task(&pool, task_id, "worker-1", 0).await.unwrap();
    assert!(first.is_ok());

    let second = task_db::try_claim_task(&pool, task_id, "worker-2", 0).await.unwrap();
    match second {
        Err(task_db::ClaimError::AlreadyClaimed(id)) => assert_eq!(id, task_id),
        Ok(()) => panic!("expected the second claim to lose the race"),
    }

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn decrement_and_get_ready_tasks_is_idempotent_per_edge() {
    let (pool, db_name) = create_test_db().await;
    let execution_id = insert_execution(&pool).await;

    task_db::insert_task(&pool, execution_id, "a", "noop", &[], 0, serde_json::json!({}))
        .await
        .unwrap();
    let child = task_db::insert_task(
        &pool,
        execution_id,
        "b",
        "noop",
        &["a".to_string()],
        0,
        serde_json::json!({}),
    )
    .await
    .unwrap();
    assert_eq!(child.in_degree, 1);
    assert_eq!(child.status, TaskStatus::Pending);

    let ready = task_db::decrement_and_get_ready_tasks(&pool, execution_id, "a")
        .await
        .unwrap();
    assert_eq!(ready, vec![child.id]);

    let refetched = task_db::get_task(&pool, child.id).await.unwrap().unwrap();
    assert_eq!(refetched.in_degree, 0);
    assert_eq!(refetched.status, TaskStatus::Queued);

    // Replay of the same completion event (e.g. at-least-once redelivery
    // of TaskCompleted) must be a no-op: the edge marker already exists.
    let replay = task_db::decrement_and_get_ready_tasks(&pool, execution_id, "a")
        .await
        .unwrap();
    assert!(replay.is_empty());

    let refetched_again = task_db::get_task(&pool, child.id).await.unwrap().unwrap();
    assert_eq!(refetched_again.in_degree, 0, "in_degree must not go negative on replay");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn decrement_applies_exactly_once_under_concurrent_replay() {
    let (pool, db_name) = create_test_db().await;
    let execution_id = insert_execution(&pool).await;

    task_db::insert_task(&pool, execution_id, "a", "noop", &[], 0, serde_json::json!({}))
        .await
        .unwrap();
    let child = task_db::insert_task(
        &pool,
        execution_id,
        "b",
        "noop",
        &["a".to_string()],
        0,
        serde_json::json!({}),
    )
    .await
    .unwrap();

    let pool = Arc::new(pool);
    let mut handles = Vec::new();
    for _ in 0..10 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            task_db::decrement_and_get_ready_tasks(&pool, execution_id, "a")
                .await
                .unwrap()
        }));
    }

    let mut total_ready = 0;
    for handle in handles {
        total_ready += handle.await.unwrap().len();
    }

    assert_eq!(total_ready, 1, "exactly one concurrent decrement should observe the zero transition");

    let refetched = task_db::get_task(&pool, child.id).await.unwrap().unwrap();
    assert_eq!(refetched.in_degree, 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn decrement_and_set_skip_hint_marks_children_even_before_zero() {
    let (pool, db_name) = create_test_db().await;
    let execution_id = insert_execution(&pool).await;

    task_db::insert_task(&pool, execution_id, "a", "noop", &[], 0, serde_json::json!({}))
        .await
        .unwrap();
    task_db::insert_task(&pool, execution_id, "x", "noop", &[], 0, serde_json::json!({}))
        .await
        .unwrap();
    let child = task_db::insert_task(
        &pool,
        execution_id,
        "b",
        "noop",
        &["a".to_string(), "x".to_string()],
        0,
        serde_json::json!({}),
    )
    .await
    .unwrap();
    assert_eq!(child.in_degree, 2);

    let ready = task_db::decrement_and_set_skip_hint(&pool, execution_id, "a")
        .await
        .unwrap();
    assert!(ready.is_empty(), "in_degree is still 1, not ready yet");

    let refetched = task_db::get_task(&pool, child.id).await.unwrap().unwrap();
    assert_eq!(refetched.in_degree, 1);
    assert!(refetched.skip_hint, "skip_hint must be set even though in_degree hasn't hit 0");

    let ready = task_db::decrement_and_set_skip_hint(&pool, execution_id, "x")
        .await
        .unwrap();
    assert_eq!(ready, vec![child.id]);

    let refetched = task_db::get_task(&pool, child.id).await.unwrap().unwrap();
    assert_eq!(refetched.in_degree, 0);
    assert_eq!(refetched.status, TaskStatus::Queued);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn mark_completed_is_idempotent() {
    let (pool, db_name) = create_test_db().await;
    let execution_id = insert_execution(&pool).await;
    let task_id = insert_root(&pool, execution_id, "a").await;

    task_db::claim_task(&pool, task_id, "worker-1", 0).await.unwrap();

    let rows = task_db::mark_completed(&pool, task_id, serde_json::json!({"ok": true}))
        .await
        .unwrap();
    assert_eq!(rows, 1);

    // A second write (e.g. a redelivered worker retrying its own terminal
    // write after a network blip) must be a no-op: the row is no longer
    // `running`.
    let rows = task_db::mark_completed(&pool, task_id, serde_json::json!({"ok": true}))
        .await
        .unwrap();
    assert_eq!(rows, 0);

    let task = task_db::get_task(&pool, task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reclaim_stale_tasks_resets_abandoned_running_rows() {
    let (pool, db_name) = create_test_db().await;
    let execution_id = insert_execution(&pool).await;
    let task_id = insert_root(&pool, execution_id, "a").await;

    task_db::claim_task(&pool, task_id, "dead-worker", 0).await.unwrap();

    // stale_after_secs = 0 means "immediately eligible", simulating a
    // worker that has been gone far longer than the staleness window.
    let reclaimed = task_db::reclaim_stale_tasks(&pool, execution_id, 0).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, task_id);
    assert_eq!(reclaimed[0].status, TaskStatus::Queued);
    assert!(reclaimed[0].worker_id.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}
