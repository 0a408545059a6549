//! Process adapter backed by an external agent CLI.
//!
//! [`CliAdapter::start`] spawns the agent and runs four background tasks:
//!
//! | Task          | Role                                                    |
//! |---------------|---------------------------------------------------------|
//! | stdout reader | bytes → [`StreamParser`] → translate → batch → channel |
//! | stderr reader | each line → [`AdapterEvent::Debug`]                     |
//! | stdin writer  | [`run_writer`] over an `mpsc` channel                   |
//! | exit monitor  | owns the child, kills it on request, reports the exit   |
//!
//! The exit monitor waits for the stdout reader to drain before reporting
//! [`AdapterEvent::Exited`], so the exit is always the last event.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::adapter::environment::{AllowlistEnvironment, EnvironmentBuilder};
use crate::adapter::spawner::{build_args, spawn_agent, CliProbe, PathProbe, SpawnRequest};
use crate::adapter::translate::{EventTranslator, Translated};
use crate::adapter::{AdapterEvent, AdapterFactory, AgentAdapter};
use crate::config::{AgentConfig, GlobalConfig, StreamConfig};
use crate::models::progress::{ProgressStage, TaskProgress};
use crate::models::task::TaskConfig;
use crate::processor::batcher::MessageBatcher;
use crate::processor::message::MessageOptions;
use crate::stream::event::StreamEvent;
use crate::stream::parser::StreamParser;
use crate::stream::writer::run_writer;
use crate::{AppError, Result};

/// How long the exit monitor waits for stdout to drain after the process exits.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long `cancel` waits for the exit after a forceful kill.
const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

const STDIN_CHANNEL_CAPACITY: usize = 32;

const READ_CHUNK_BYTES: usize = 8192;

// ── Factory ──────────────────────────────────────────────────────────────────

/// Shared settings for every adapter a factory creates.
#[derive(Clone)]
struct CliSettings {
    agent: AgentConfig,
    stream: StreamConfig,
    workspace_root: PathBuf,
    environment: Arc<dyn EnvironmentBuilder>,
}

/// Creates [`CliAdapter`]s for the configured agent CLI.
pub struct CliAdapterFactory {
    settings: CliSettings,
    probe: Arc<dyn CliProbe>,
}

impl CliAdapterFactory {
    /// Factory using the allowlist environment and `PATH` lookup.
    #[must_use]
    pub fn new(config: &GlobalConfig) -> Self {
        Self {
            settings: CliSettings {
                agent: config.agent.clone(),
                stream: config.stream.clone(),
                workspace_root: config.workspace_root.clone(),
                environment: Arc::new(AllowlistEnvironment::from_config(&config.agent)),
            },
            probe: Arc::new(PathProbe),
        }
    }

    /// Replace the environment builder.
    #[must_use]
    pub fn with_environment(mut self, environment: Arc<dyn EnvironmentBuilder>) -> Self {
        self.settings.environment = environment;
        self
    }

    /// Replace the CLI probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn CliProbe>) -> Self {
        self.probe = probe;
        self
    }
}

impl AdapterFactory for CliAdapterFactory {
    fn create(
        &self,
        task_id: &str,
        events: mpsc::Sender<AdapterEvent>,
    ) -> Result<Arc<dyn AgentAdapter>> {
        let program = self.probe.resolve(&self.settings.agent.cli)?;
        Ok(Arc::new(CliAdapter {
            task_id: task_id.to_owned(),
            program,
            settings: self.settings.clone(),
            events,
            session_id: Arc::new(RwLock::new(None)),
            phase: Mutex::new(Phase::Idle),
        }))
    }
}

// ── Adapter ──────────────────────────────────────────────────────────────────

/// Handles to a live process and its I/O tasks.
struct Running {
    pid: Option<u32>,
    stdin_tx: mpsc::Sender<String>,
    /// Stops the readers and the writer.
    io_cancel: CancellationToken,
    /// Asks the exit monitor to kill the child.
    kill: CancellationToken,
    /// Cancelled by the exit monitor once the child has exited.
    exited: CancellationToken,
}

enum Phase {
    Idle,
    Running(Running),
    Disposed,
}

/// [`AgentAdapter`] driving one agent CLI process.
pub struct CliAdapter {
    task_id: String,
    program: PathBuf,
    settings: CliSettings,
    events: mpsc::Sender<AdapterEvent>,
    session_id: Arc<RwLock<Option<String>>>,
    phase: Mutex<Phase>,
}

impl CliAdapter {
    async fn start_inner(&self, config: TaskConfig) -> Result<()> {
        let mut phase = self.phase.lock().await;
        match *phase {
            Phase::Idle => {}
            Phase::Running(_) => {
                return Err(AppError::Process(format!(
                    "adapter for task {} already started",
                    self.task_id
                )))
            }
            Phase::Disposed => return Err(AppError::NoActiveProcess(self.task_id.clone())),
        }

        self.emit(AdapterEvent::Progress(TaskProgress::with_message(
            ProgressStage::Starting,
            format!("launching {}", self.program.display()),
        )))
        .await;

        if let Some(session_id) = &config.session_id {
            set_session(&self.session_id, session_id);
        }

        let request = SpawnRequest {
            program: self.program.clone(),
            args: build_args(&self.settings.agent, &config),
            working_dir: config
                .working_directory
                .clone()
                .unwrap_or_else(|| self.settings.workspace_root.clone()),
            env: self.settings.environment.build(&self.task_id, &config),
        };
        let process = spawn_agent(&self.task_id, &request)?;

        let io_cancel = CancellationToken::new();
        let kill = CancellationToken::new();
        let exited = CancellationToken::new();
        let (stdin_tx, stdin_rx) = mpsc::channel(STDIN_CHANNEL_CAPACITY);

        let span = info_span!("agent_process", task_id = %self.task_id, pid = process.pid);

        {
            let task_id = self.task_id.clone();
            let cancel = io_cancel.clone();
            tokio::spawn(
                async move {
                    if let Err(err) = run_writer(task_id, process.stdin, stdin_rx, cancel).await {
                        warn!(error = %err, "stdin writer stopped");
                    }
                }
                .instrument(span.clone()),
            );
        }

        tokio::spawn(
            read_stderr(process.stderr, self.events.clone(), io_cancel.clone())
                .instrument(span.clone()),
        );

        let pump = StreamPump {
            parser: StreamParser::with_max_line_bytes(self.settings.stream.max_line_bytes),
            translator: EventTranslator::new(MessageOptions {
                verbose: self.settings.stream.verbose_tool_output,
                max_tool_output_chars: self.settings.stream.max_tool_output_chars,
            }),
            batcher: MessageBatcher::new(self.settings.stream.batch_window()),
            events: self.events.clone(),
            session_id: Arc::clone(&self.session_id),
        };
        let reader = tokio::spawn(
            pump.run(process.stdout, io_cancel.clone())
                .instrument(span.clone()),
        );

        tokio::spawn(
            monitor_exit(
                process.child,
                reader,
                self.events.clone(),
                kill.clone(),
                exited.clone(),
            )
            .instrument(span),
        );

        *phase = Phase::Running(Running {
            pid: process.pid,
            stdin_tx,
            io_cancel,
            kill,
            exited,
        });
        Ok(())
    }

    async fn send_inner(&self, text: String) -> Result<()> {
        let stdin_tx = match &*self.phase.lock().await {
            Phase::Running(running) => running.stdin_tx.clone(),
            Phase::Idle | Phase::Disposed => {
                return Err(AppError::NoActiveProcess(self.task_id.clone()))
            }
        };
        stdin_tx
            .send(text)
            .await
            .map_err(|_| AppError::NoActiveProcess(self.task_id.clone()))
    }

    async fn interrupt_inner(&self) -> Result<()> {
        let pid = match &*self.phase.lock().await {
            Phase::Running(running) => running.pid,
            Phase::Idle | Phase::Disposed => return Ok(()),
        };
        self.emit(AdapterEvent::InterruptRequested).await;
        if let Some(pid) = pid {
            info!(task_id = %self.task_id, pid, "interrupting agent process");
            signal::interrupt(pid)?;
        }
        Ok(())
    }

    async fn cancel_inner(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.phase.lock().await, Phase::Disposed);
        let Phase::Running(running) = previous else {
            return Ok(());
        };

        let grace = self.settings.agent.termination_grace();
        let soft = match running.pid {
            Some(pid) => {
                info!(task_id = %self.task_id, pid, ?grace, "terminating agent process");
                signal::terminate(pid)
            }
            None => Ok(()),
        };
        if let Err(err) = &soft {
            warn!(task_id = %self.task_id, error = %err, "soft termination failed");
        }

        if soft.is_ok()
            && tokio::time::timeout(grace, running.exited.cancelled())
                .await
                .is_ok()
        {
            info!(task_id = %self.task_id, "agent process exited within grace period");
        } else {
            warn!(task_id = %self.task_id, "agent process still alive, forcing kill");
            running.kill.cancel();
            if tokio::time::timeout(KILL_WAIT_TIMEOUT, running.exited.cancelled())
                .await
                .is_err()
            {
                warn!(task_id = %self.task_id, "agent process did not report exit after kill");
            }
        }

        running.io_cancel.cancel();
        Ok(())
    }

    async fn dispose_inner(&self) {
        let previous = std::mem::replace(&mut *self.phase.lock().await, Phase::Disposed);
        if let Phase::Running(running) = previous {
            debug!(task_id = %self.task_id, "disposing agent adapter");
            // Readers flush their pending batch on cancellation.
            running.io_cancel.cancel();
            running.kill.cancel();
        }
    }

    async fn emit(&self, event: AdapterEvent) {
        if self.events.send(event).await.is_err() {
            debug!(task_id = %self.task_id, "event channel closed");
        }
    }
}

impl AgentAdapter for CliAdapter {
    fn start(
        &self,
        config: TaskConfig,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.start_inner(config))
    }

    fn send_response(
        &self,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.send_inner(text.to_owned()))
    }

    fn interrupt(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.interrupt_inner())
    }

    fn cancel(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.cancel_inner())
    }

    fn dispose(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.dispose_inner().await;
            Ok(())
        })
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().ok().and_then(|guard| guard.clone())
    }
}

fn set_session(slot: &RwLock<Option<String>>, session_id: &str) {
    if let Ok(mut guard) = slot.write() {
        *guard = Some(session_id.to_owned());
    }
}

// ── Stdout pump ──────────────────────────────────────────────────────────────

/// Owns the parse → translate → batch pipeline for one process.
struct StreamPump {
    parser: StreamParser,
    translator: EventTranslator,
    batcher: MessageBatcher,
    events: mpsc::Sender<AdapterEvent>,
    session_id: Arc<RwLock<Option<String>>>,
}

impl StreamPump {
    async fn run<R>(mut self, stdout: R, cancel: CancellationToken)
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut stdout = stdout;
        let mut buf = vec![0u8; READ_CHUNK_BYTES];

        loop {
            let deadline = self.batcher.deadline();
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("stdout reader: cancellation received, stopping");
                    break;
                }

                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() => {
                    if !self.flush().await {
                        return;
                    }
                }

                read = stdout.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!("stdout reader: EOF detected");
                        let events = self.parser.finish();
                        self.dispatch(events).await;
                        break;
                    }
                    Ok(n) => {
                        let events = self.parser.feed(&buf[..n]);
                        if !self.dispatch(events).await {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "stdout reader: read failed, stopping");
                        break;
                    }
                },
            }
        }

        self.flush().await;
    }

    /// Returns `false` once the event channel is closed.
    async fn dispatch(&mut self, events: Vec<StreamEvent>) -> bool {
        for event in events {
            if let StreamEvent::SessionStarted { session_id } = &event {
                set_session(&self.session_id, session_id);
            }
            for item in self.translator.translate(event) {
                let delivered = match item {
                    Translated::Message(message) => {
                        self.batcher.push(message);
                        true
                    }
                    Translated::Observation(event) => self.send(event).await,
                    Translated::Boundary(event) => self.flush().await && self.send(event).await,
                };
                if !delivered {
                    return false;
                }
            }
        }
        true
    }

    async fn flush(&mut self) -> bool {
        if self.batcher.is_empty() {
            return true;
        }
        let batch = self.batcher.flush();
        self.send(AdapterEvent::Messages(batch)).await
    }

    async fn send(&self, event: AdapterEvent) -> bool {
        if self.events.send(event).await.is_err() {
            debug!("stdout reader: event channel closed, stopping");
            return false;
        }
        true
    }
}

// ── Stderr reader ────────────────────────────────────────────────────────────

async fn read_stderr<R>(stderr: R, events: mpsc::Sender<AdapterEvent>, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(stderr).lines();
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    debug!(line = %line, "agent stderr");
                    if events.send(AdapterEvent::Debug(line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(error = %err, "stderr reader: read failed, stopping");
                    break;
                }
            },
        }
    }
}

// ── Exit monitor ─────────────────────────────────────────────────────────────

async fn monitor_exit(
    mut child: Child,
    reader: JoinHandle<()>,
    events: mpsc::Sender<AdapterEvent>,
    kill: CancellationToken,
    exited: CancellationToken,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = kill.cancelled() => {
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to kill agent process");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => {
            info!(code = status.code(), "agent process exited");
            status.code()
        }
        Err(err) => {
            warn!(%err, "error waiting for agent process");
            None
        }
    };

    if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader)
        .await
        .is_err()
    {
        debug!("stdout reader still running after exit, not waiting further");
    }

    exited.cancel();
    if events.send(AdapterEvent::Exited { code }).await.is_err() {
        debug!("event channel closed before exit could be delivered");
    }
}

// ── Signals ──────────────────────────────────────────────────────────────────

#[cfg(unix)]
mod signal {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    use crate::{AppError, Result};

    fn send(pid: u32, sig: Signal) -> Result<()> {
        let raw = i32::try_from(pid)
            .map_err(|_| AppError::Process(format!("pid {pid} out of range")))?;
        match kill(Pid::from_raw(raw), sig) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(err) => Err(AppError::Process(format!("failed to send {}: {err}", sig.as_str()))),
        }
    }

    pub(super) fn terminate(pid: u32) -> Result<()> {
        send(pid, Signal::SIGTERM)
    }

    pub(super) fn interrupt(pid: u32) -> Result<()> {
        send(pid, Signal::SIGINT)
    }
}

#[cfg(not(unix))]
mod signal {
    use crate::{AppError, Result};

    /// Without POSIX signals there is no soft termination; the caller falls
    /// back to a forceful kill.
    pub(super) fn terminate(_pid: u32) -> Result<()> {
        Err(AppError::Process("soft termination unsupported".into()))
    }

    pub(super) fn interrupt(_pid: u32) -> Result<()> {
        Ok(())
    }
}
