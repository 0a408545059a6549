//! Shared test helpers for task manager integration tests.
//!
//! Provides a scriptable in-memory adapter factory, so scheduling and
//! completion behaviour can be exercised without spawning processes, and a
//! callback set that records everything it receives.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use agent_conductor::adapter::{AdapterEvent, AdapterFactory, AgentAdapter};
use agent_conductor::config::CompletionConfig;
use agent_conductor::models::progress::TaskProgress;
use agent_conductor::models::task::{
    PermissionRequest, TaskConfig, TaskMessage, TaskResult, TaskStatus,
};
use agent_conductor::{AppError, Result, TaskCallbacks, TaskManager, TaskManagerOptions};

/// How long helpers wait for an expected event before failing the test.
pub const WAIT: Duration = Duration::from_secs(5);

// ── Fake adapter ─────────────────────────────────────────────────────────────

/// In-memory adapter that records calls and lets tests inject events.
pub struct FakeAdapter {
    pub task_id: String,
    events: mpsc::Sender<AdapterEvent>,
    fail_start: bool,
    pub started: AtomicBool,
    pub cancelled: AtomicBool,
    pub disposed: AtomicBool,
    pub interrupts: AtomicUsize,
    pub sent: Mutex<Vec<String>>,
    pub config: Mutex<Option<TaskConfig>>,
}

impl FakeAdapter {
    /// Push an event to the task's supervisor as if the agent emitted it.
    pub async fn emit(&self, event: AdapterEvent) {
        self.events
            .send(event)
            .await
            .expect("supervisor must still be listening");
    }

    /// Push an event whether or not anyone is still listening.
    pub async fn try_emit(&self, event: AdapterEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Messages written to the agent so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn is_live(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.is_cancelled() && !self.is_disposed()
    }
}

impl AgentAdapter for FakeAdapter {
    fn start(&self, config: TaskConfig) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_start {
                return Err(AppError::Process("failed to spawn agent: boom".into()));
            }
            *self.config.lock().unwrap() = Some(config);
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn send_response(&self, text: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let text = text.to_owned();
        Box::pin(async move {
            if !self.is_live() {
                return Err(AppError::NoActiveProcess(self.task_id.clone()));
            }
            self.sent.lock().unwrap().push(text);
            Ok(())
        })
    }

    fn interrupt(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if self.is_live() {
                self.interrupts.fetch_add(1, Ordering::SeqCst);
                let _ = self.events.send(AdapterEvent::InterruptRequested).await;
            }
            Ok(())
        })
    }

    fn cancel(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.cancelled.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn dispose(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.disposed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn session_id(&self) -> Option<String> {
        self.config
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|config| config.session_id.clone())
    }
}

/// Factory handing out [`FakeAdapter`]s and keeping them for inspection.
#[derive(Default)]
pub struct FakeFactory {
    adapters: Mutex<HashMap<String, Arc<FakeAdapter>>>,
    fail_start: Mutex<HashSet<String>>,
    missing_cli: AtomicBool,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `start` fail for `task_id`.
    pub fn fail_start_for(&self, task_id: &str) {
        self.fail_start.lock().unwrap().insert(task_id.to_owned());
    }

    /// Make every `create` fail as if the CLI were not installed.
    pub fn set_missing_cli(&self) {
        self.missing_cli.store(true, Ordering::SeqCst);
    }

    /// The adapter created for `task_id`.
    pub fn adapter(&self, task_id: &str) -> Arc<FakeAdapter> {
        self.adapters
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| panic!("no adapter created for {task_id}"))
    }

    pub fn created(&self, task_id: &str) -> bool {
        self.adapters.lock().unwrap().contains_key(task_id)
    }
}

impl AdapterFactory for FakeFactory {
    fn create(
        &self,
        task_id: &str,
        events: mpsc::Sender<AdapterEvent>,
    ) -> Result<Arc<dyn AgentAdapter>> {
        if self.missing_cli.load(Ordering::SeqCst) {
            return Err(AppError::CliNotFound("fake-agent: not installed".into()));
        }
        let adapter = Arc::new(FakeAdapter {
            task_id: task_id.to_owned(),
            events,
            fail_start: self.fail_start.lock().unwrap().contains(task_id),
            started: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            interrupts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            config: Mutex::new(None),
        });
        self.adapters
            .lock()
            .unwrap()
            .insert(task_id.to_owned(), Arc::clone(&adapter));
        Ok(adapter)
    }
}

// ── Recording callbacks ──────────────────────────────────────────────────────

/// One callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Message(Vec<TaskMessage>),
    Progress(TaskProgress),
    Permission(PermissionRequest),
    Complete(TaskResult),
    Error(String),
    Status(TaskStatus),
    Debug(String),
}

/// Records every callback and forwards each one on a channel for waiting.
pub struct RecordingCallbacks {
    log: Mutex<Vec<Recorded>>,
    tx: mpsc::UnboundedSender<Recorded>,
}

impl RecordingCallbacks {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Recorded>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                log: Mutex::new(Vec::new()),
                tx,
            }),
            rx,
        )
    }

    pub fn log(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<TaskStatus> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Status(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<TaskResult> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Complete(result) => Some(result),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Error(error) => Some(error),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Recorded) {
        self.log.lock().unwrap().push(event.clone());
        let _ = self.tx.send(event);
    }
}

impl TaskCallbacks for RecordingCallbacks {
    fn on_message(&self, _task_id: &str, messages: &[TaskMessage]) {
        self.record(Recorded::Message(messages.to_vec()));
    }

    fn on_progress(&self, _task_id: &str, progress: &TaskProgress) {
        self.record(Recorded::Progress(progress.clone()));
    }

    fn on_permission_request(&self, _task_id: &str, request: &PermissionRequest) {
        self.record(Recorded::Permission(request.clone()));
    }

    fn on_complete(&self, _task_id: &str, result: &TaskResult) {
        self.record(Recorded::Complete(result.clone()));
    }

    fn on_error(&self, _task_id: &str, error: &str) {
        self.record(Recorded::Error(error.to_owned()));
    }

    fn on_status_change(&self, _task_id: &str, status: TaskStatus) {
        self.record(Recorded::Status(status));
    }

    fn on_debug(&self, _task_id: &str, line: &str) {
        self.record(Recorded::Debug(line.to_owned()));
    }
}

// ── Waiting ──────────────────────────────────────────────────────────────────

/// Receive callbacks until one matches `pred`, failing after [`WAIT`].
pub async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<Recorded>, mut pred: F) -> Recorded
where
    F: FnMut(&Recorded) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("callbacks dropped");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for callback")
}

/// Wait for the task's terminal result.
pub async fn wait_for_complete(rx: &mut mpsc::UnboundedReceiver<Recorded>) -> TaskResult {
    match wait_for(rx, |r| matches!(r, Recorded::Complete(_))).await {
        Recorded::Complete(result) => result,
        other => unreachable!("filtered to completions, got {other:?}"),
    }
}

/// Poll `check` until it returns `true`, failing after [`WAIT`].
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

// ── Manager construction ─────────────────────────────────────────────────────

/// Options with the given limits and a short, recognisable continuation prompt.
pub fn options(max_concurrent: usize, max_queue: usize, max_attempts: u32) -> TaskManagerOptions {
    TaskManagerOptions {
        max_concurrent_tasks: max_concurrent,
        max_queue_length: max_queue,
        completion: CompletionConfig {
            max_continuation_attempts: max_attempts,
            continuation_prompt: "call complete_task".into(),
            ..CompletionConfig::default()
        },
    }
}

/// A manager over a fresh [`FakeFactory`].
pub fn fake_manager(options: TaskManagerOptions) -> (TaskManager, Arc<FakeFactory>) {
    let factory = FakeFactory::new();
    let manager = TaskManager::new(Arc::clone(&factory) as Arc<dyn AdapterFactory>, options);
    (manager, factory)
}

/// Start `task_id` with fresh recording callbacks.
pub async fn start(
    manager: &TaskManager,
    task_id: &str,
) -> (
    Arc<RecordingCallbacks>,
    mpsc::UnboundedReceiver<Recorded>,
    Result<agent_conductor::models::task::Task>,
) {
    let (callbacks, rx) = RecordingCallbacks::new();
    let result = manager
        .start_task(
            task_id,
            TaskConfig::new(format!("prompt for {task_id}")),
            Arc::clone(&callbacks) as Arc<dyn TaskCallbacks>,
        )
        .await;
    (callbacks, rx, result)
}
