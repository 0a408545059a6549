//! Bounded-concurrency task manager with a FIFO overflow queue.
//!
//! At most `max_concurrent_tasks` tasks run at once, each with its own agent
//! process. Further tasks wait in a bounded [`TaskQueue`] and are promoted in
//! insertion order whenever a slot frees (completion, failure, cancellation).
//!
//! Admission, cancellation and promotion all run under one
//! [`tokio::sync::Mutex`] over the active map and the queue, so the active
//! count never exceeds the limit, not even transiently. Everything else a
//! task owns (its process, parser buffer and completion state) lives in its
//! adapter and supervisor and is never shared.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::adapter::{AdapterFactory, AgentAdapter, EVENT_CHANNEL_CAPACITY};
use crate::config::{CompletionConfig, GlobalConfig};
use crate::models::task::{
    CompletionStatus, Task, TaskConfig, TaskMessage, TaskResult, TaskStatus,
};
use crate::orchestrator::callbacks::TaskCallbacks;
use crate::orchestrator::completion::CompletionEnforcer;
use crate::orchestrator::queue::{QueueEntry, TaskQueue};
use crate::orchestrator::supervisor::Supervisor;
use crate::{AppError, Result};

/// Scheduling limits and per-task enforcement settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskManagerOptions {
    /// Maximum tasks running at once.
    pub max_concurrent_tasks: usize,
    /// Maximum tasks waiting for a slot.
    pub max_queue_length: usize,
    /// Completion enforcement for every task.
    pub completion: CompletionConfig,
}

impl TaskManagerOptions {
    /// Options from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            max_concurrent_tasks: usize::try_from(config.max_concurrent_tasks).unwrap_or(usize::MAX),
            max_queue_length: usize::try_from(config.max_queue_length).unwrap_or(usize::MAX),
            completion: config.completion.clone(),
        }
    }
}

impl Default for TaskManagerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            max_queue_length: 10,
            completion: CompletionConfig::default(),
        }
    }
}

/// A task holding a slot.
struct ActiveTaskHandle {
    adapter: Arc<dyn AgentAdapter>,
    callbacks: Arc<dyn TaskCallbacks>,
    task: Task,
    /// Stops the task's supervisor.
    cancel: CancellationToken,
}

#[derive(Default)]
struct ManagerState {
    active: HashMap<String, ActiveTaskHandle>,
    queue: TaskQueue,
    disposed: bool,
}

/// A queued task whose promotion failed.
struct FailedPromotion {
    entry: QueueEntry,
    error: AppError,
}

/// Shared state behind a [`TaskManager`] and its supervisors.
pub(crate) struct Inner {
    factory: Arc<dyn AdapterFactory>,
    options: TaskManagerOptions,
    state: Mutex<ManagerState>,
}

/// Schedules tasks onto agent processes.
///
/// Constructed and disposed by the caller; cloning shares the same manager.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    /// Create a manager that builds adapters with `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn AdapterFactory>, options: TaskManagerOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                options,
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    /// Start a task now, or queue it when every slot is taken.
    ///
    /// Returns the task with status `running` or `queued`.
    ///
    /// # Errors
    ///
    /// - `AppError::Disposed` after [`dispose`](Self::dispose).
    /// - `AppError::DuplicateTask` if `task_id` is active or queued.
    /// - `AppError::QueueFull` if every slot is taken and the queue is full.
    /// - `AppError::CliNotFound` / `AppError::Process` if the agent cannot be
    ///   started. No state changes in any of these cases.
    pub async fn start_task(
        &self,
        task_id: &str,
        config: TaskConfig,
        callbacks: Arc<dyn TaskCallbacks>,
    ) -> Result<Task> {
        let mut state = self.inner.state.lock().await;

        if state.disposed {
            return Err(AppError::Disposed("task manager has been disposed".into()));
        }
        if state.active.contains_key(task_id) || state.queue.contains(task_id) {
            return Err(AppError::DuplicateTask(task_id.to_owned()));
        }

        if state.active.len() < self.inner.options.max_concurrent_tasks {
            return self
                .inner
                .activate(&mut state, task_id.to_owned(), config, callbacks)
                .await;
        }

        if state.queue.len() >= self.inner.options.max_queue_length {
            return Err(AppError::QueueFull(format!(
                "{} tasks already waiting",
                state.queue.len()
            )));
        }

        let entry = QueueEntry::new(task_id.to_owned(), config, callbacks);
        let task = entry.to_task();
        state.queue.push(entry);
        info!(
            task_id,
            position = state.queue.len(),
            "all slots busy, task queued"
        );
        Ok(task)
    }

    /// Cancel a task. Unknown or finished tasks are a no-op.
    ///
    /// An active task loses its slot immediately; its process is terminated
    /// in the background. A queued task is simply removed.
    pub async fn cancel_task(&self, task_id: &str) {
        let mut state = self.inner.state.lock().await;

        if let Some(handle) = state.active.remove(task_id) {
            handle.cancel.cancel();
            let failures = self.inner.promote(&mut state).await;
            drop(state);

            info!(task_id, "active task cancelled");
            let adapter = Arc::clone(&handle.adapter);
            tokio::spawn(
                async move {
                    if let Err(err) = adapter.cancel().await {
                        warn!(error = %err, "agent termination failed");
                    }
                }
                .instrument(info_span!("cancel_task", task_id)),
            );

            let result = TaskResult {
                session_id: handle.task.session_id.clone(),
                ..TaskResult::with_status(CompletionStatus::Cancelled)
            };
            notify_terminal(task_id, handle.callbacks.as_ref(), &result);
            report_failed_promotions(failures);
        } else if let Some(entry) = state.queue.remove(task_id) {
            drop(state);
            info!(task_id, "queued task cancelled");
            let result = TaskResult::with_status(CompletionStatus::Cancelled);
            notify_terminal(task_id, entry.callbacks.as_ref(), &result);
        }
    }

    /// Ask a running task's agent to stop softly. No-op for other tasks.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the interrupt cannot be delivered.
    pub async fn interrupt_task(&self, task_id: &str) -> Result<()> {
        let Some(adapter) = self.adapter(task_id).await else {
            return Ok(());
        };
        info!(task_id, "interrupting task");
        adapter.interrupt().await
    }

    /// Forward an operator message to a running task's agent.
    ///
    /// # Errors
    ///
    /// - `AppError::TaskNotActive` if the task is queued, finished or unknown.
    /// - `AppError::NoActiveProcess` if the agent process is gone.
    pub async fn send_response(&self, task_id: &str, text: &str) -> Result<()> {
        let adapter = self
            .adapter(task_id)
            .await
            .ok_or_else(|| AppError::TaskNotActive(task_id.to_owned()))?;
        adapter.send_response(text).await
    }

    /// Session reported by a running task's agent.
    pub async fn get_session_id(&self, task_id: &str) -> Option<String> {
        let state = self.inner.state.lock().await;
        let handle = state.active.get(task_id)?;
        handle
            .task
            .session_id
            .clone()
            .or_else(|| handle.adapter.session_id())
    }

    /// Snapshot of an active or queued task.
    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        let state = self.inner.state.lock().await;
        state
            .active
            .get(task_id)
            .map(|handle| handle.task.clone())
            .or_else(|| state.queue.get(task_id).map(QueueEntry::to_task))
    }

    /// Number of tasks holding a slot.
    pub async fn active_task_count(&self) -> usize {
        self.inner.state.lock().await.active.len()
    }

    /// Number of queued tasks.
    pub async fn queue_length(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// 1-based queue position, or 0 for active and unknown tasks.
    pub async fn queue_position(&self, task_id: &str) -> usize {
        self.inner.state.lock().await.queue.position(task_id)
    }

    /// Whether `task_id` holds a slot.
    pub async fn has_active_task(&self, task_id: &str) -> bool {
        self.inner.state.lock().await.active.contains_key(task_id)
    }

    /// Whether `task_id` is queued.
    pub async fn is_task_queued(&self, task_id: &str) -> bool {
        self.inner.state.lock().await.queue.contains(task_id)
    }

    /// Ids of every task holding a slot, sorted.
    pub async fn active_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.state.lock().await.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether any task is running.
    pub async fn has_running_task(&self) -> bool {
        self.inner
            .state
            .lock()
            .await
            .active
            .values()
            .any(|handle| handle.task.status == TaskStatus::Running)
    }

    /// Terminate every running task and drop the queue.
    ///
    /// Safe to call repeatedly and before any task was started. Later
    /// [`start_task`](Self::start_task) calls fail with `AppError::Disposed`.
    pub async fn dispose(&self) {
        let (active, queued) = {
            let mut state = self.inner.state.lock().await;
            if state.disposed {
                return;
            }
            state.disposed = true;
            let active: Vec<ActiveTaskHandle> =
                std::mem::take(&mut state.active).into_values().collect();
            (active, state.queue.drain())
        };

        info!(
            active = active.len(),
            queued = queued.len(),
            "disposing task manager"
        );

        let mut teardown = JoinSet::new();
        for handle in active {
            handle.cancel.cancel();
            teardown.spawn(async move {
                if let Err(err) = handle.adapter.cancel().await {
                    warn!(error = %err, "agent termination failed during dispose");
                }
            });
        }
        while teardown.join_next().await.is_some() {}
    }

    async fn adapter(&self, task_id: &str) -> Option<Arc<dyn AgentAdapter>> {
        let state = self.inner.state.lock().await;
        state
            .active
            .get(task_id)
            .map(|handle| Arc::clone(&handle.adapter))
    }
}

impl Inner {
    /// Create and start an adapter for `task_id` and take a slot.
    ///
    /// Called with the state lock held; on error nothing is inserted. Boxed
    /// because the supervisor spawned here awaits [`finish`](Self::finish),
    /// which promotes queued tasks through this same path.
    fn activate<'a>(
        self: &'a Arc<Self>,
        state: &'a mut ManagerState,
        task_id: String,
        config: TaskConfig,
        callbacks: Arc<dyn TaskCallbacks>,
    ) -> Pin<Box<dyn Future<Output = Result<Task>> + Send + 'a>> {
        Box::pin(async move {
            let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let adapter = self.factory.create(&task_id, event_tx)?;

            let task = Task::new(task_id.clone(), &config, TaskStatus::Running);
            if let Err(err) = adapter.start(config).await {
                warn!(task_id = %task_id, error = %err, "agent failed to start");
                if let Err(dispose_err) = adapter.dispose().await {
                    warn!(task_id = %task_id, error = %dispose_err, "adapter dispose failed");
                }
                return Err(err);
            }

            let cancel = CancellationToken::new();
            let supervisor = Supervisor {
                task_id: task_id.clone(),
                adapter: Arc::clone(&adapter),
                callbacks: Arc::clone(&callbacks),
                enforcer: CompletionEnforcer::new(&self.options.completion),
                events: event_rx,
                cancel: cancel.clone(),
                manager: Arc::clone(self),
            };
            tokio::spawn(
                supervisor
                    .run()
                    .instrument(info_span!("task", task_id = %task_id)),
            );

            info!(task_id = %task_id, active = state.active.len() + 1, "task started");
            state.active.insert(
                task_id,
                ActiveTaskHandle {
                    adapter,
                    callbacks,
                    task: task.clone(),
                    cancel,
                },
            );
            Ok(task)
        })
    }

    /// Fill free slots from the queue head. Entries that fail to start are
    /// returned so their callbacks can be notified outside the lock.
    async fn promote(self: &Arc<Self>, state: &mut ManagerState) -> Vec<FailedPromotion> {
        let mut failures = Vec::new();
        while !state.disposed && state.active.len() < self.options.max_concurrent_tasks {
            let Some(entry) = state.queue.pop() else {
                break;
            };
            info!(task_id = %entry.task_id, "promoting queued task");
            let started = self
                .activate(
                    state,
                    entry.task_id.clone(),
                    entry.config.clone(),
                    Arc::clone(&entry.callbacks),
                )
                .await;
            if let Err(error) = started {
                failures.push(FailedPromotion { entry, error });
            }
        }
        failures
    }

    /// Record a terminal result, release the slot and promote the queue.
    ///
    /// No-op when the task no longer holds a slot (it was cancelled).
    pub(crate) async fn finish(self: &Arc<Self>, task_id: &str, mut result: TaskResult) {
        let (handle, failures) = {
            let mut state = self.state.lock().await;
            let Some(mut handle) = state.active.remove(task_id) else {
                return;
            };
            if result.session_id.is_none() {
                result.session_id = handle
                    .task
                    .session_id
                    .clone()
                    .or_else(|| handle.adapter.session_id());
            }
            handle.task.transition(TaskStatus::from(result.status));
            handle.task.result = Some(result.clone());
            let failures = self.promote(&mut state).await;
            (handle, failures)
        };

        info!(
            task_id,
            status = ?result.status,
            forced = result.forced,
            "task finished"
        );
        notify_terminal(task_id, handle.callbacks.as_ref(), &result);
        if let Err(err) = handle.adapter.dispose().await {
            warn!(task_id, error = %err, "adapter dispose failed");
        }
        report_failed_promotions(failures);
    }

    pub(crate) async fn record_messages(&self, task_id: &str, messages: &[TaskMessage]) {
        if let Some(handle) = self.state.lock().await.active.get_mut(task_id) {
            handle.task.push_messages(messages);
        }
    }

    pub(crate) async fn record_session(&self, task_id: &str, session_id: &str) {
        if let Some(handle) = self.state.lock().await.active.get_mut(task_id) {
            handle.task.session_id = Some(session_id.to_owned());
        }
    }
}

fn notify_terminal(task_id: &str, callbacks: &dyn TaskCallbacks, result: &TaskResult) {
    if result.status == CompletionStatus::Error {
        callbacks.on_error(task_id, result.error.as_deref().unwrap_or("task failed"));
    }
    callbacks.on_status_change(task_id, TaskStatus::from(result.status));
    callbacks.on_complete(task_id, result);
}

fn report_failed_promotions(failures: Vec<FailedPromotion>) {
    for FailedPromotion { entry, error } in failures {
        warn!(task_id = %entry.task_id, error = %error, "queued task failed to start");
        let result = TaskResult::failed(error.to_string());
        notify_terminal(&entry.task_id, entry.callbacks.as_ref(), &result);
    }
}
