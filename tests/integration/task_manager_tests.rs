//! Integration tests for task scheduling: admission, queueing, promotion,
//! cancellation and disposal.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use agent_conductor::adapter::AdapterEvent;
use agent_conductor::models::task::{CompletionStatus, TaskMessage, TaskStatus};
use agent_conductor::AppError;
use serde_json::json;

use super::test_helpers::{
    eventually, fake_manager, options, start, wait_for, wait_for_complete, Recorded,
};

/// Finish `task_id` with a success verdict through the completion tool.
async fn finish_successfully(factory: &super::test_helpers::FakeFactory, task_id: &str) {
    let adapter = factory.adapter(task_id);
    adapter
        .emit(AdapterEvent::CompletionSignaled(
            json!({ "status": "success", "summary": "done" }),
        ))
        .await;
    adapter
        .emit(AdapterEvent::StepFinished {
            reason: Some("stop".into()),
        })
        .await;
}

// ── Admission ────────────────────────────────────────────────────────────────

/// With N slots, N+1 starts give N running tasks and one queued at position 1.
#[tokio::test]
async fn overflow_task_is_queued_at_position_one() {
    let (manager, factory) = fake_manager(options(2, 10, 3));

    let (_, _, a) = start(&manager, "a").await;
    let (_, _, b) = start(&manager, "b").await;
    let (_, _, c) = start(&manager, "c").await;

    assert_eq!(a.expect("a starts").status, TaskStatus::Running);
    assert_eq!(b.expect("b starts").status, TaskStatus::Running);
    assert_eq!(c.expect("c queues").status, TaskStatus::Queued);

    assert_eq!(manager.active_task_count().await, 2);
    assert_eq!(manager.queue_length().await, 1);
    assert_eq!(manager.queue_position("c").await, 1);
    assert_eq!(manager.queue_position("a").await, 0, "active tasks have no position");
    assert_eq!(manager.queue_position("zzz").await, 0);
    assert!(manager.is_task_queued("c").await);
    assert!(!manager.has_active_task("c").await);
    assert!(manager.has_running_task().await);
    assert_eq!(manager.active_task_ids().await, vec!["a", "b"]);
    assert!(!factory.created("c"), "queued tasks have no adapter");
}

#[tokio::test]
async fn duplicate_ids_are_rejected() {
    let (manager, _factory) = fake_manager(options(1, 10, 3));
    start(&manager, "a").await.2.expect("a starts");
    start(&manager, "b").await.2.expect("b queues");

    let active_dup = start(&manager, "a").await.2;
    assert!(matches!(active_dup, Err(AppError::DuplicateTask(ref id)) if id == "a"));

    let queued_dup = start(&manager, "b").await.2;
    assert!(matches!(queued_dup, Err(AppError::DuplicateTask(ref id)) if id == "b"));

    assert_eq!(manager.active_task_count().await, 1);
    assert_eq!(manager.queue_length().await, 1);
}

#[tokio::test]
async fn full_queue_rejects_without_state_change() {
    let (manager, _factory) = fake_manager(options(1, 1, 3));
    start(&manager, "a").await.2.expect("a starts");
    start(&manager, "b").await.2.expect("b queues");

    let rejected = start(&manager, "c").await.2;
    assert!(matches!(rejected, Err(AppError::QueueFull(_))), "got {rejected:?}");
    assert!(!manager.is_task_queued("c").await);
    assert_eq!(manager.queue_length().await, 1);
}

#[tokio::test]
async fn missing_cli_rejects_without_state_change() {
    let (manager, factory) = fake_manager(options(2, 10, 3));
    factory.set_missing_cli();

    let result = start(&manager, "a").await.2;
    assert!(matches!(result, Err(AppError::CliNotFound(_))), "got {result:?}");
    assert_eq!(manager.active_task_count().await, 0);
    assert!(manager.get_task("a").await.is_none());
}

/// A start failure disposes the adapter and leaves no slot taken.
#[tokio::test]
async fn start_failure_releases_adapter() {
    let (manager, factory) = fake_manager(options(2, 10, 3));
    factory.fail_start_for("a");

    let result = start(&manager, "a").await.2;
    assert!(matches!(result, Err(AppError::Process(_))), "got {result:?}");
    assert!(factory.adapter("a").is_disposed());
    assert!(!manager.has_active_task("a").await);
}

#[tokio::test]
async fn fifo_positions_follow_insertion_order() {
    let (manager, _factory) = fake_manager(options(1, 10, 3));
    for id in ["a", "b", "c", "d"] {
        start(&manager, id).await.2.expect("admitted");
    }
    assert_eq!(manager.queue_position("b").await, 1);
    assert_eq!(manager.queue_position("c").await, 2);
    assert_eq!(manager.queue_position("d").await, 3);
}

// ── Completion and promotion ─────────────────────────────────────────────────

/// A finished task frees its slot and the queue head is promoted.
#[tokio::test]
async fn completion_promotes_queue_head() {
    let (manager, factory) = fake_manager(options(1, 10, 3));
    let (a_callbacks, mut a_rx, _) = start(&manager, "a").await;
    let (_b_callbacks, mut b_rx, _) = start(&manager, "b").await;

    finish_successfully(&factory, "a").await;
    let result = wait_for_complete(&mut a_rx).await;
    assert_eq!(result.status, CompletionStatus::Success);
    assert_eq!(result.summary.as_deref(), Some("done"));

    wait_for(&mut b_rx, |r| *r == Recorded::Status(TaskStatus::Running)).await;
    assert!(manager.has_active_task("b").await);
    assert_eq!(manager.queue_length().await, 0);
    assert!(factory.adapter("a").is_disposed());
    assert_eq!(
        a_callbacks.statuses(),
        vec![TaskStatus::Running, TaskStatus::Completed]
    );
}

#[tokio::test]
async fn agent_error_fails_task() {
    let (manager, factory) = fake_manager(options(1, 10, 3));
    let (callbacks, mut rx, _) = start(&manager, "a").await;

    factory
        .adapter("a")
        .emit(AdapterEvent::Error("model overloaded".into()))
        .await;

    let result = wait_for_complete(&mut rx).await;
    assert_eq!(result.status, CompletionStatus::Error);
    assert_eq!(callbacks.errors(), vec!["model overloaded"]);
    assert_eq!(callbacks.statuses().last(), Some(&TaskStatus::Failed));
    assert!(!manager.has_active_task("a").await);
}

/// A queued task whose start fails is reported and the next one is tried.
#[tokio::test]
async fn failed_promotion_is_reported_and_skipped() {
    let (manager, factory) = fake_manager(options(1, 10, 3));
    factory.fail_start_for("b");
    start(&manager, "a").await.2.expect("a starts");
    let (b_callbacks, mut b_rx, _) = start(&manager, "b").await;
    let (_c_callbacks, mut c_rx, _) = start(&manager, "c").await;

    manager.cancel_task("a").await;

    let result = wait_for_complete(&mut b_rx).await;
    assert_eq!(result.status, CompletionStatus::Error);
    assert!(
        result.error.as_deref().is_some_and(|e| e.contains("boom")),
        "error should carry the start failure: {result:?}"
    );
    assert_eq!(b_callbacks.errors().len(), 1);

    wait_for(&mut c_rx, |r| *r == Recorded::Status(TaskStatus::Running)).await;
    assert_eq!(manager.active_task_ids().await, vec!["c"]);
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancelling_queued_task_keeps_order() {
    let (manager, _factory) = fake_manager(options(1, 10, 3));
    start(&manager, "a").await.2.expect("a starts");
    start(&manager, "b").await.2.expect("b queues");
    let (c_callbacks, _c_rx, _) = start(&manager, "c").await;
    start(&manager, "d").await.2.expect("d queues");

    manager.cancel_task("c").await;

    assert_eq!(manager.queue_length().await, 2);
    assert_eq!(manager.queue_position("b").await, 1);
    assert_eq!(manager.queue_position("d").await, 2);
    assert_eq!(c_callbacks.statuses(), vec![TaskStatus::Cancelled]);
    assert_eq!(
        c_callbacks.completions().first().map(|r| r.status),
        Some(CompletionStatus::Cancelled)
    );
}

/// With one slot, cancelling the running task promotes the queued one.
#[tokio::test]
async fn cancelling_active_task_promotes_next() {
    let (manager, factory) = fake_manager(options(1, 10, 3));
    let (a_callbacks, _a_rx, _) = start(&manager, "a").await;
    let (_b_callbacks, mut b_rx, _) = start(&manager, "b").await;

    manager.cancel_task("a").await;

    assert!(!manager.has_active_task("a").await);
    assert!(manager.has_active_task("b").await);
    assert_eq!(manager.queue_length().await, 0);
    wait_for(&mut b_rx, |r| *r == Recorded::Status(TaskStatus::Running)).await;

    let adapter = factory.adapter("a");
    eventually(|| {
        let adapter = Arc::clone(&adapter);
        async move { adapter.is_cancelled() }
    })
    .await;
    assert_eq!(
        a_callbacks.completions().first().map(|r| r.status),
        Some(CompletionStatus::Cancelled)
    );
    assert_eq!(a_callbacks.statuses().last(), Some(&TaskStatus::Cancelled));
    assert!(manager.get_task("a").await.is_none(), "cancelled task is forgotten");
}

#[tokio::test]
async fn cancelling_unknown_task_is_noop() {
    let (manager, _factory) = fake_manager(options(1, 10, 3));
    manager.cancel_task("ghost").await;
    assert_eq!(manager.active_task_count().await, 0);
}

/// Events arriving after cancellation never reach the callbacks.
#[tokio::test]
async fn cancelled_task_stops_reporting() {
    let (manager, factory) = fake_manager(options(1, 10, 3));
    let (callbacks, _rx, _) = start(&manager, "a").await;
    let adapter = factory.adapter("a");

    manager.cancel_task("a").await;
    adapter.try_emit(AdapterEvent::Debug("late".into())).await;

    assert!(!callbacks.log().contains(&Recorded::Debug("late".into())));
    assert_eq!(callbacks.completions().len(), 1);
}

// ── Operator input ───────────────────────────────────────────────────────────

#[tokio::test]
async fn send_response_reaches_running_task() {
    let (manager, factory) = fake_manager(options(1, 10, 3));
    start(&manager, "a").await.2.expect("a starts");

    manager
        .send_response("a", "use the staging database")
        .await
        .expect("running task accepts input");
    assert_eq!(factory.adapter("a").sent(), vec!["use the staging database"]);
}

#[tokio::test]
async fn send_response_to_inactive_task_fails() {
    let (manager, _factory) = fake_manager(options(1, 10, 3));
    start(&manager, "a").await.2.expect("a starts");
    start(&manager, "b").await.2.expect("b queues");

    let queued = manager.send_response("b", "hello").await;
    assert!(matches!(queued, Err(AppError::TaskNotActive(ref id)) if id == "b"));

    let unknown = manager.send_response("never-started", "hello").await;
    assert!(matches!(unknown, Err(AppError::TaskNotActive(_))));
}

#[tokio::test]
async fn interrupt_reaches_running_task_only() {
    let (manager, factory) = fake_manager(options(1, 10, 3));
    start(&manager, "a").await.2.expect("a starts");

    manager.interrupt_task("a").await.expect("interrupt delivered");
    manager.interrupt_task("ghost").await.expect("unknown task is a no-op");
    assert_eq!(factory.adapter("a").interrupts.load(Ordering::SeqCst), 1);
}

// ── Task state ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn session_and_messages_are_tracked() {
    let (manager, factory) = fake_manager(options(1, 10, 3));
    let (_callbacks, mut rx, _) = start(&manager, "a").await;
    let adapter = factory.adapter("a");

    adapter
        .emit(AdapterEvent::SessionEstablished("ses_7".into()))
        .await;
    adapter
        .emit(AdapterEvent::Messages(vec![
            TaskMessage::assistant("one".into()),
            TaskMessage::assistant("two".into()),
        ]))
        .await;
    wait_for(&mut rx, |r| matches!(r, Recorded::Message(_))).await;

    assert_eq!(manager.get_session_id("a").await.as_deref(), Some("ses_7"));
    let task = manager.get_task("a").await.expect("task is active");
    let contents: Vec<&str> = task.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "two"]);
}

#[tokio::test]
async fn permission_requests_are_forwarded() {
    let (manager, factory) = fake_manager(options(1, 10, 3));
    let (_callbacks, mut rx, _) = start(&manager, "a").await;
    let request = agent_conductor::models::task::PermissionRequest {
        id: Some("p1".into()),
        tool: Some("edit".into()),
        description: Some("Edit main.rs".into()),
        payload: json!({ "id": "p1" }),
    };

    factory
        .adapter("a")
        .emit(AdapterEvent::PermissionRequest(request.clone()))
        .await;

    let received = wait_for(&mut rx, |r| matches!(r, Recorded::Permission(_))).await;
    assert_eq!(received, Recorded::Permission(request));
}

// ── Disposal ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn dispose_terminates_everything_and_is_idempotent() {
    let (manager, factory) = fake_manager(options(1, 10, 3));
    start(&manager, "a").await.2.expect("a starts");
    start(&manager, "b").await.2.expect("b queues");

    manager.dispose().await;
    manager.dispose().await;

    assert!(factory.adapter("a").is_cancelled());
    assert_eq!(manager.active_task_count().await, 0);
    assert_eq!(manager.queue_length().await, 0);

    let after = start(&manager, "c").await.2;
    assert!(matches!(after, Err(AppError::Disposed(_))), "got {after:?}");
}

#[tokio::test]
async fn dispose_without_tasks_is_safe() {
    let (manager, _factory) = fake_manager(options(1, 10, 3));
    manager.dispose().await;
    assert_eq!(manager.active_task_count().await, 0);
}
