//! Integration tests for the CLI process adapter.
//!
//! Each test runs `/bin/sh -c <script>` as the agent, so the whole pipeline
//! (spawn, stdout parsing, batching, stdin writes, exit reporting) runs
//! against a real process.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use agent_conductor::adapter::cli::CliAdapterFactory;
use agent_conductor::adapter::{AdapterEvent, AdapterFactory, AgentAdapter};
use agent_conductor::config::{AgentConfig, CompletionConfig, GlobalConfig, StreamConfig};
use agent_conductor::models::progress::ProgressStage;
use agent_conductor::models::task::{CompletionStatus, TaskConfig};
use agent_conductor::{AppError, TaskCallbacks, TaskManager, TaskManagerOptions};

use super::test_helpers::{wait_for_complete, Recorded, RecordingCallbacks, WAIT};

fn sh_config(workspace: &std::path::Path, script: &str) -> GlobalConfig {
    sh_config_with_window(workspace, script, 10)
}

fn sh_config_with_window(
    workspace: &std::path::Path,
    script: &str,
    batch_window_ms: u64,
) -> GlobalConfig {
    GlobalConfig {
        workspace_root: workspace.to_path_buf(),
        max_concurrent_tasks: 2,
        max_queue_length: 2,
        agent: AgentConfig {
            args: vec!["-c".into(), script.into()],
            termination_grace_ms: 2000,
            ..AgentConfig::for_cli("/bin/sh")
        },
        completion: CompletionConfig::default(),
        stream: StreamConfig {
            batch_window_ms,
            ..StreamConfig::default()
        },
    }
}

fn spawn_adapter(
    config: &GlobalConfig,
    task_id: &str,
) -> (Arc<dyn AgentAdapter>, mpsc::Receiver<AdapterEvent>) {
    let (tx, rx) = mpsc::channel(256);
    let adapter = CliAdapterFactory::new(config)
        .create(task_id, tx)
        .expect("/bin/sh exists");
    (adapter, rx)
}

/// Collect events until the process exit is reported.
async fn collect_until_exit(rx: &mut mpsc::Receiver<AdapterEvent>) -> Vec<AdapterEvent> {
    tokio::time::timeout(WAIT, async {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = matches!(event, AdapterEvent::Exited { .. });
            events.push(event);
            if done {
                break;
            }
        }
        events
    })
    .await
    .expect("agent exit not reported in time")
}

fn message_contents(events: &[AdapterEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            AdapterEvent::Messages(batch) => Some(batch),
            _ => None,
        })
        .flatten()
        .map(|m| m.content.clone())
        .collect()
}

// ── Streaming ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn streams_events_until_exit() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = r#"printf '%s\n' '{"type":"step_start","sessionID":"ses_1"}' '{"type":"text","part":{"text":"one"}}' '{"type":"text","part":{"text":"two"}}' 'plain log line' '{"type":"complete","part":{"status":"success"}}'"#;
    let config = sh_config(temp.path(), script);
    let (adapter, mut rx) = spawn_adapter(&config, "t1");

    adapter
        .start(TaskConfig::new("hello"))
        .await
        .expect("agent starts");
    let events = collect_until_exit(&mut rx).await;

    assert!(
        matches!(
            events.first(),
            Some(AdapterEvent::Progress(p))
                if p.stage == ProgressStage::Starting
                    && p.message.as_deref().is_some_and(|m| m.starts_with("launching "))
        ),
        "first event: {:?}",
        events.first()
    );
    assert!(events.contains(&AdapterEvent::SessionEstablished("ses_1".into())));
    assert_eq!(message_contents(&events), vec!["one", "two"]);

    let position = |pred: &dyn Fn(&AdapterEvent) -> bool| {
        events.iter().position(pred).expect("event present")
    };
    let last_message_at = events
        .iter()
        .rposition(|e| matches!(e, AdapterEvent::Messages(_)))
        .expect("messages");
    let debug_at = position(&|e| *e == AdapterEvent::Debug("plain log line".into()));
    let complete_at = position(
        &|e| matches!(e, AdapterEvent::Complete(p) if p.status == CompletionStatus::Success),
    );
    assert!(last_message_at < debug_at, "messages precede the later log line");
    assert!(debug_at < complete_at, "log line precedes completion");

    assert_eq!(events.last(), Some(&AdapterEvent::Exited { code: Some(0) }));
    assert_eq!(adapter.session_id().as_deref(), Some("ses_1"));
}

#[tokio::test]
async fn stderr_lines_become_debug_output() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = sh_config(temp.path(), "echo 'warming cache' >&2; exit 3");
    let (adapter, mut rx) = spawn_adapter(&config, "t1");

    adapter.start(TaskConfig::new("p")).await.expect("agent starts");
    let events = collect_until_exit(&mut rx).await;

    assert!(events.contains(&AdapterEvent::Debug("warming cache".into())));
    assert_eq!(events.last(), Some(&AdapterEvent::Exited { code: Some(3) }));
}

/// The prompt is passed as the last argument and the task id in the
/// environment.
#[tokio::test]
async fn prompt_and_task_id_reach_the_agent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = r#"printf '{"type":"text","part":{"text":"%s %s"}}\n' "$0" "$AGENT_CONDUCTOR_TASK_ID""#;
    let config = sh_config(temp.path(), script);
    let (adapter, mut rx) = spawn_adapter(&config, "task-7");

    adapter
        .start(TaskConfig::new("do-it"))
        .await
        .expect("agent starts");
    let events = collect_until_exit(&mut rx).await;

    assert_eq!(message_contents(&events), vec!["do-it task-7"]);
}

/// Output the agent wrote first reaches the caller first, even while the
/// message batch window is still open.
#[tokio::test]
async fn raw_output_does_not_overtake_batched_messages() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = r#"printf '%s\n' '{"type":"text","part":{"text":"first"}}' 'raw after first'"#;
    let config = sh_config_with_window(temp.path(), script, 200);
    let (adapter, mut rx) = spawn_adapter(&config, "t1");

    adapter.start(TaskConfig::new("p")).await.expect("agent starts");
    let events = collect_until_exit(&mut rx).await;

    let message_at = events
        .iter()
        .position(|e| matches!(e, AdapterEvent::Messages(batch) if batch[0].content == "first"))
        .expect("message delivered");
    let debug_at = events
        .iter()
        .position(|e| *e == AdapterEvent::Debug("raw after first".into()))
        .expect("raw line delivered");
    assert!(message_at < debug_at, "events: {events:?}");
}

// ── Stdin ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn operator_message_is_written_to_stdin() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = r#"read line; printf '{"type":"text","part":{"text":"got %s"}}\n' "$line""#;
    let config = sh_config(temp.path(), script);
    let (adapter, mut rx) = spawn_adapter(&config, "t1");

    adapter.start(TaskConfig::new("p")).await.expect("agent starts");
    adapter
        .send_response("ping")
        .await
        .expect("running agent accepts input");
    let events = collect_until_exit(&mut rx).await;

    assert_eq!(message_contents(&events), vec!["got ping"]);
}

#[tokio::test]
async fn send_before_start_has_no_process() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = sh_config(temp.path(), "exit 0");
    let (adapter, _rx) = spawn_adapter(&config, "t1");

    let result = adapter.send_response("hello").await;
    assert!(matches!(result, Err(AppError::NoActiveProcess(_))), "got {result:?}");
}

#[tokio::test]
async fn disposed_adapter_cannot_start() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = sh_config(temp.path(), "exit 0");
    let (adapter, _rx) = spawn_adapter(&config, "t1");

    adapter.dispose().await.expect("dispose");
    adapter.dispose().await.expect("dispose is idempotent");
    let result = adapter.start(TaskConfig::new("p")).await;
    assert!(matches!(result, Err(AppError::NoActiveProcess(_))), "got {result:?}");
}

/// Disposing the adapter delivers messages still waiting in the batch window.
#[tokio::test]
async fn dispose_flushes_pending_batch() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = r#"printf '%s\n' '{"type":"text","part":{"text":"pending"}}'; exec sleep 30"#;
    let config = sh_config_with_window(temp.path(), script, 10_000);
    let (adapter, mut rx) = spawn_adapter(&config, "t1");

    adapter.start(TaskConfig::new("p")).await.expect("agent starts");
    tokio::time::sleep(Duration::from_millis(300)).await;
    adapter.dispose().await.expect("dispose");

    let events = collect_until_exit(&mut rx).await;
    assert_eq!(message_contents(&events), vec!["pending"]);
}

// ── Termination ──────────────────────────────────────────────────────────────

/// Cancellation terminates a long-running agent within the grace period.
#[tokio::test]
async fn cancel_terminates_running_agent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = sh_config(temp.path(), "exec sleep 30");
    let (adapter, mut rx) = spawn_adapter(&config, "t1");

    adapter.start(TaskConfig::new("p")).await.expect("agent starts");
    tokio::time::timeout(WAIT, adapter.cancel())
        .await
        .expect("cancel returns within the grace period")
        .expect("cancel succeeds");

    let events = collect_until_exit(&mut rx).await;
    assert_eq!(events.last(), Some(&AdapterEvent::Exited { code: None }));

    let result = adapter.send_response("too late").await;
    assert!(matches!(result, Err(AppError::NoActiveProcess(_))));
}

// ── Factory ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_cli_is_reported_by_factory() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = sh_config(temp.path(), "exit 0");
    config.agent.cli = temp.path().join("no-such-agent").display().to_string();

    let (tx, _rx) = mpsc::channel(8);
    let result = CliAdapterFactory::new(&config).create("t1", tx);
    assert!(matches!(result, Err(AppError::CliNotFound(_))));
}

// ── End to end ───────────────────────────────────────────────────────────────

/// A real agent that stops once, receives the continuation prompt on stdin
/// and then reports its verdict.
#[tokio::test]
async fn task_manager_drives_continuation_over_stdin() {
    let temp = tempfile::tempdir().expect("tempdir");
    let script = r#"
printf '%s\n' '{"type":"step_start","sessionID":"ses_e2e"}' '{"type":"text","part":{"text":"Working on it"}}' '{"type":"step_finish","part":{"reason":"stop"}}'
read line
printf '%s\n' '{"type":"tool_call","part":{"id":"c1","tool":"complete_task","input":{"status":"partial","summary":"did half","remaining_work":"docs"}}}' '{"type":"step_finish","part":{"reason":"stop"}}'
read line
"#;
    let config = sh_config(temp.path(), script);
    let manager = TaskManager::new(
        Arc::new(CliAdapterFactory::new(&config)),
        TaskManagerOptions::from_config(&config),
    );
    let (callbacks, mut rx) = RecordingCallbacks::new();

    manager
        .start_task(
            "e2e",
            TaskConfig::new("write the docs"),
            Arc::clone(&callbacks) as Arc<dyn TaskCallbacks>,
        )
        .await
        .expect("task starts");

    let result = wait_for_complete(&mut rx).await;
    assert_eq!(result.status, CompletionStatus::Partial);
    assert!(!result.forced);
    assert_eq!(result.summary.as_deref(), Some("did half"));
    assert_eq!(result.remaining_work.as_deref(), Some("docs"));
    assert_eq!(result.session_id.as_deref(), Some("ses_e2e"));

    let log = callbacks.log();
    assert!(log.iter().any(|r| matches!(
        r,
        Recorded::Progress(p) if p.stage == ProgressStage::Continuing { attempt: 1 }
    )));
    assert!(log.iter().any(|r| matches!(
        r,
        Recorded::Message(batch) if batch.iter().any(|m| m.content == "Working on it")
    )));
    assert_eq!(manager.active_task_count().await, 0);

    manager.dispose().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
}
