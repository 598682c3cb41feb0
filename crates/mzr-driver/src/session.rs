//! Solver sessions: launching a run and streaming its events.
//!
//! A [`SolverSession`] runs at most one solve at a time. [`SolverSession::start`]
//! snapshots the configuration, launches the toolchain in its own process
//! group and hands back an [`EventStream`]. A background task multiplexes the
//! child's stdout and stderr through a [`StreamDecoder`], applies stop
//! requests and timeouts, and finishes the stream with exactly one
//! [`ProtocolEvent::Finished`] or [`ProtocolEvent::Failure`].
//!
//! ```text
//! Idle -> Starting -> Running -> Finishing  -> Idle
//!                            \-> Cancelling -> Idle
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::command::{CommandBuilder, OperationMode};
use crate::config::SolveConfiguration;
use crate::decoder::StreamDecoder;
use crate::error::{FailureKind, LaunchError, SessionError};
use crate::events::{Channel, ProtocolEvent};
use crate::process::{run_blocking, Escalation, LaunchSpec, ProcessGroup, RunOutput, StopStep};
use crate::registry::DriverRegistry;
use crate::settings::ProcessSettings;

const READ_CHUNK: usize = 8192;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    /// The process exited; remaining output is being flushed.
    Finishing,
    /// A stop was requested and the process has not exited yet.
    Cancelling,
}

/// Timeouts applied by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub escalation: Escalation,
    /// Stop any run that takes longer than this.
    pub supervisory_timeout: Option<Duration>,
    /// How long to keep reading after the process exited.
    pub drain_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            escalation: Escalation::default(),
            supervisory_timeout: None,
            drain_timeout: Duration::from_secs(2),
        }
    }
}

impl SessionOptions {
    pub fn from_settings(settings: &ProcessSettings) -> Self {
        Self {
            escalation: settings.escalation(),
            supervisory_timeout: settings.supervisory_timeout(),
            ..Self::default()
        }
    }
}

/// A model or data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    File(PathBuf),
    /// In-memory text, written to a run-scoped scratch file named `name`.
    Text { name: String, text: String },
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveInput {
    pub model: Option<InputSource>,
    pub data: Vec<InputSource>,
    pub extra_args: Vec<String>,
    pub mode: OperationMode,
    pub json_stream: bool,
    pub working_dir: Option<PathBuf>,
}

impl Default for SolveInput {
    fn default() -> Self {
        Self {
            model: None,
            data: Vec::new(),
            extra_args: Vec::new(),
            mode: OperationMode::Both,
            json_stream: true,
            working_dir: None,
        }
    }
}

impl SolveInput {
    pub fn model_file(path: impl Into<PathBuf>) -> Self {
        Self {
            model: Some(InputSource::File(path.into())),
            ..Self::default()
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            model: Some(InputSource::Text {
                name: "model.mzn".into(),
                text: text.into(),
            }),
            ..Self::default()
        }
    }

    pub fn data_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.data.push(InputSource::File(path.into()));
        self
    }

    pub fn data_text(mut self, text: impl Into<String>) -> Self {
        let name = format!("data-{}.dzn", self.data.len());
        self.data.push(InputSource::Text {
            name,
            text: text.into(),
        });
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn mode(mut self, mode: OperationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn json_stream(mut self, enabled: bool) -> Self {
        self.json_stream = enabled;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn has_text(&self) -> bool {
        self.model
            .iter()
            .chain(&self.data)
            .any(|s| matches!(s, InputSource::Text { .. }))
    }
}

/// Write in-memory sources into `scratch`, returning the paths to pass.
fn materialize(source: &InputSource, scratch: Option<&TempDir>) -> Result<PathBuf, LaunchError> {
    match (source, scratch) {
        (InputSource::File(path), _) => Ok(path.clone()),
        (InputSource::Text { name, text }, Some(dir)) => {
            let file_name = Path::new(name)
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "input.mzn".into());
            let path = dir.path().join(file_name);
            std::fs::write(&path, text).map_err(LaunchError::Scratch)?;
            Ok(path)
        }
        (InputSource::Text { .. }, None) => Err(LaunchError::Scratch(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no scratch directory",
        ))),
    }
}

/// Monotonic run time, frozen when the process exits.
#[derive(Debug, Default)]
struct ElapsedClock {
    started: Option<Instant>,
    frozen: Option<Duration>,
}

impl ElapsedClock {
    fn start(&mut self) {
        self.started = Some(Instant::now());
        self.frozen = None;
    }

    fn freeze(&mut self) {
        if self.frozen.is_none() {
            self.frozen = self.started.map(|s| s.elapsed());
        }
    }

    fn elapsed(&self) -> Option<Duration> {
        self.frozen.or_else(|| self.started.map(|s| s.elapsed()))
    }
}

enum Control {
    Stop,
    Terminate(oneshot::Sender<()>),
}

/// Bookkeeping the session keeps about the current run.
struct ActiveRun {
    control: mpsc::UnboundedSender<Control>,
    pid: Option<u32>,
}

/// Events of one run, ending with `Finished` or `Failure`.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<ProtocolEvent>,
}

impl EventStream {
    /// Next event, or `None` after the terminal event.
    pub async fn next(&mut self) -> Option<ProtocolEvent> {
        self.rx.recv().await
    }

    /// Wait for the run to end and return every event.
    pub async fn collect(mut self) -> Vec<ProtocolEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

/// Runs one solver process at a time.
pub struct SolverSession {
    registry: Arc<DriverRegistry>,
    options: SessionOptions,
    state: watch::Sender<SessionState>,
    active: Arc<Mutex<Option<ActiveRun>>>,
    clock: Arc<Mutex<ElapsedClock>>,
}

impl SolverSession {
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self::with_options(registry, SessionOptions::default())
    }

    pub fn with_options(registry: Arc<DriverRegistry>, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            registry,
            options,
            state,
            active: Arc::new(Mutex::new(None)),
            clock: Arc::new(Mutex::new(ElapsedClock::default())),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() != SessionState::Idle
    }

    /// Time since the current or last run started; frozen once it exited.
    pub fn elapsed(&self) -> Option<Duration> {
        self.clock.lock().elapsed()
    }

    /// Process id of the running toolchain, which is also its group id.
    pub fn pid(&self) -> Option<u32> {
        self.active.lock().as_ref().and_then(|r| r.pid)
    }

    /// Launch a run of `config` on `input`.
    ///
    /// The configuration is copied, so later edits do not affect this run.
    pub async fn start(
        &self,
        config: &SolveConfiguration,
        input: SolveInput,
    ) -> Result<EventStream, SessionError> {
        let mut active = self.active.lock();
        if active.is_some() || self.state() != SessionState::Idle {
            return Err(SessionError::AlreadyRunning);
        }
        self.state.send_replace(SessionState::Starting);

        let launched = self.launch(config.clone(), &input);
        let (mut group, scratch) = match launched {
            Ok(ok) => ok,
            Err(e) => {
                self.state.send_replace(SessionState::Idle);
                return Err(e);
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(ProtocolEvent::Started);
        self.clock.lock().start();
        *active = Some(ActiveRun {
            control: control_tx,
            pid: group.pid(),
        });
        self.state.send_replace(SessionState::Running);
        drop(active);
        info!(pid = ?group.pid(), solver = %config.solver, "solver run started");

        let stdout = group.take_stdout();
        let stderr = group.take_stderr();
        let handle = RunHandle {
            group,
            scratch,
            options: self.options,
            clock: Arc::clone(&self.clock),
            state: self.state.clone(),
            active: Arc::clone(&self.active),
            events: events_tx,
            stop_requested: false,
            discard_output: false,
        };
        tokio::spawn(handle.run(stdout, stderr, control_rx));
        Ok(EventStream { rx: events_rx })
    }

    fn launch(
        &self,
        config: SolveConfiguration,
        input: &SolveInput,
    ) -> Result<(ProcessGroup, Option<TempDir>), SessionError> {
        let toolchain = self.registry.require()?;
        let scratch = if input.has_text() {
            Some(
                tempfile::Builder::new()
                    .prefix("mzr-run-")
                    .tempdir()
                    .map_err(LaunchError::Scratch)?,
            )
        } else {
            None
        };

        let mut builder = CommandBuilder::new(&config, input.mode)
            .json_stream(input.json_stream)
            .extra_args(input.extra_args.iter().cloned());
        if let Some(model) = &input.model {
            builder = builder.model(materialize(model, scratch.as_ref())?);
        }
        for data in &input.data {
            builder = builder.data(materialize(data, scratch.as_ref())?);
        }
        if let Some(dir) = &input.working_dir {
            builder = builder.working_dir(dir);
        }
        let cmd = builder.build();

        let mut spec = LaunchSpec::new(&toolchain.executable)
            .args(cmd.args)
            .current_dir(cmd.working_dir);
        if let Some(dir) = cmd.path_prefix {
            spec = spec.prepend_path(dir);
        }
        if let Some(dir) = toolchain.install_dir() {
            spec = spec.prepend_path(dir);
        }
        let group = ProcessGroup::launch(&spec)?;
        Ok((group, scratch))
    }

    /// Ask the running process to stop.
    ///
    /// Returns immediately; the stream still ends with a terminal event once
    /// the process is gone and its output has been flushed.
    pub fn stop(&self) -> bool {
        let active = self.active.lock();
        let Some(run) = active.as_ref() else {
            return false;
        };
        if run.control.send(Control::Stop).is_err() {
            return false;
        }
        self.state.send_if_modified(|s| {
            if *s == SessionState::Running {
                *s = SessionState::Cancelling;
                true
            } else {
                false
            }
        });
        true
    }

    /// Kill the process group and wait until it is gone.
    ///
    /// Output not yet decoded is discarded. The stream still receives its
    /// terminal event.
    pub async fn terminate(&self) {
        let ack = {
            let active = self.active.lock();
            let Some(run) = active.as_ref() else {
                return;
            };
            let (tx, rx) = oneshot::channel();
            if run.control.send(Control::Terminate(tx)).is_err() {
                return;
            }
            rx
        };
        let _ = ack.await;
    }

    /// Run the toolchain with `args` to completion, buffering its output.
    ///
    /// Blocks the calling thread. Meant for short queries, not solves.
    pub fn run_blocking(&self, args: &[String], cwd: Option<&Path>) -> Result<RunOutput, SessionError> {
        let toolchain = self.registry.require()?;
        let mut spec = LaunchSpec::new(&toolchain.executable)
            .args(args.iter().cloned())
            .current_dir(cwd.map(Path::to_path_buf));
        if let Some(dir) = toolchain.install_dir() {
            spec = spec.prepend_path(dir);
        }
        run_blocking(&spec, self.options.supervisory_timeout)
    }
}

impl Drop for SolverSession {
    fn drop(&mut self) {
        if let Some(run) = self.active.lock().as_ref() {
            let _ = run.control.send(Control::Stop);
        }
    }
}

/// One in-flight invocation, owned by the session's background task.
///
/// Dropping it removes the scratch directory.
struct RunHandle {
    group: ProcessGroup,
    scratch: Option<TempDir>,
    options: SessionOptions,
    clock: Arc<Mutex<ElapsedClock>>,
    state: watch::Sender<SessionState>,
    active: Arc<Mutex<Option<ActiveRun>>>,
    events: mpsc::UnboundedSender<ProtocolEvent>,
    stop_requested: bool,
    discard_output: bool,
}

async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match reader {
        Some(r) => r.read(buf).await,
        None => std::future::pending().await,
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}

impl RunHandle {
    async fn run<O, E>(
        mut self,
        mut stdout: Option<O>,
        mut stderr: Option<E>,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin,
    {
        let mut decoder = StreamDecoder::new();
        let mut out_buf = vec![0u8; READ_CHUNK];
        let mut err_buf = vec![0u8; READ_CHUNK];
        let mut exit: Option<std::io::Result<ExitStatus>> = None;
        let mut stage: Option<(StopStep, Instant)> = None;
        let mut terminate_ack: Option<oneshot::Sender<()>> = None;
        let supervisory = self.options.supervisory_timeout.map(|t| Instant::now() + t);
        let mut drain_until: Option<Instant> = None;

        loop {
            if exit.is_some() && stdout.is_none() && stderr.is_none() {
                break;
            }
            let escalate_at = stage
                .filter(|(step, _)| step.next().is_some())
                .map(|(_, at)| at);

            tokio::select! {
                read = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => {
                    let events = match read {
                        Ok(0) | Err(_) => {
                            stdout = None;
                            decoder.finish_channel(Channel::Stdout)
                        }
                        Ok(n) => decoder.feed(Channel::Stdout, &out_buf[..n]),
                    };
                    self.forward(events);
                }
                read = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => {
                    let events = match read {
                        Ok(0) | Err(_) => {
                            stderr = None;
                            decoder.finish_channel(Channel::Stderr)
                        }
                        Ok(n) => decoder.feed(Channel::Stderr, &err_buf[..n]),
                    };
                    self.forward(events);
                }
                status = self.group.wait(), if exit.is_none() => {
                    self.clock.lock().freeze();
                    debug!(?status, "solver process exited");
                    exit = Some(status);
                    if !self.stop_requested {
                        self.state.send_replace(SessionState::Finishing);
                    }
                    drain_until = Some(Instant::now() + self.options.drain_timeout);
                }
                Some(cmd) = control.recv() => match cmd {
                    Control::Stop => self.begin_stop(&mut stage, exit.is_some()),
                    Control::Terminate(ack) => {
                        terminate_ack = Some(ack);
                        self.discard_output = true;
                        stdout = None;
                        stderr = None;
                        if exit.is_none() {
                            self.stop_requested = true;
                            self.state.send_replace(SessionState::Cancelling);
                            stage = self.escalate(StopStep::KillGroup);
                        }
                    }
                },
                _ = sleep_until(escalate_at.unwrap_or_else(far_future)), if escalate_at.is_some() && exit.is_none() => {
                    if let Some(next) = stage.and_then(|(step, _)| step.next()) {
                        match next {
                            StopStep::KillGroup => warn!(pid = ?self.group.pid(), "solver ignored interrupt, killing process group"),
                            _ => warn!(pid = ?self.group.pid(), "process group survived kill, killing leader"),
                        }
                        stage = self.escalate(next);
                    }
                }
                _ = sleep_until(supervisory.unwrap_or_else(far_future)), if supervisory.is_some() && !self.stop_requested && exit.is_none() => {
                    warn!(timeout = ?self.options.supervisory_timeout, "supervisory timeout reached, stopping solver");
                    self.begin_stop(&mut stage, false);
                }
                _ = sleep_until(drain_until.unwrap_or_else(far_future)), if drain_until.is_some() => {
                    warn!("output still open after process exit, closing");
                    break;
                }
            }
        }

        if !self.discard_output {
            let events = decoder.finish();
            self.forward(events);
        }
        self.reap().await;
        self.scratch.take();

        let terminal = classify(exit, self.stop_requested, self.clock.lock().elapsed());
        info!(event = terminal.kind(), "solver run ended");
        *self.active.lock() = None;
        self.state.send_replace(SessionState::Idle);
        let _ = self.events.send(terminal);
        if let Some(ack) = terminate_ack {
            let _ = ack.send(());
        }
    }

    fn forward(&mut self, events: Vec<ProtocolEvent>) {
        if self.discard_output {
            return;
        }
        for event in events {
            if self.events.send(event).is_err() && !self.discard_output {
                debug!("event receiver dropped, killing solver");
                self.stop_requested = true;
                self.discard_output = true;
                self.kill_group();
                return;
            }
        }
    }

    fn begin_stop(&mut self, stage: &mut Option<(StopStep, Instant)>, exited: bool) {
        if exited {
            // The exit status stands; only leftovers holding the pipes open go.
            debug!("stop after solver exit, killing remaining group members");
            self.kill_group();
            return;
        }
        if self.stop_requested && stage.is_some() {
            return;
        }
        self.stop_requested = true;
        self.state.send_replace(SessionState::Cancelling);
        *stage = self.escalate(StopStep::Interrupt);
    }

    /// Take `step` and schedule the next one.
    fn escalate(&mut self, step: StopStep) -> Option<(StopStep, Instant)> {
        self.group.escalate(step);
        let next_at = self
            .options
            .escalation
            .grace_after(step)
            .map_or_else(far_future, |grace| Instant::now() + grace);
        Some((step, next_at))
    }

    fn kill_group(&self) {
        if let Err(e) = self.group.force_kill() {
            warn!(error = %e, "failed to kill process group");
        }
    }

    /// Make sure nothing of the group outlives the run.
    async fn reap(&mut self) {
        if !self.group.group_alive() {
            return;
        }
        debug!(pid = ?self.group.pid(), "killing processes left in group");
        self.kill_group();
        let deadline = Instant::now() + self.options.escalation.kill_grace;
        while self.group.group_alive() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if self.group.group_alive() {
            tracing::error!(pid = ?self.group.pid(), "process group still alive after kill");
        }
    }
}

/// Turn the exit observation into the terminal event.
fn classify(
    exit: Option<std::io::Result<ExitStatus>>,
    stop_requested: bool,
    elapsed: Option<Duration>,
) -> ProtocolEvent {
    match exit {
        Some(Ok(status)) if status.success() => ProtocolEvent::Finished {
            elapsed,
            exit_code: Some(0),
        },
        Some(Ok(status)) if stop_requested => ProtocolEvent::Finished {
            elapsed,
            exit_code: status.code(),
        },
        Some(Ok(status)) => match status.code() {
            Some(code) => ProtocolEvent::Failure {
                exit_code: Some(code),
                kind: FailureKind::NonZeroExit,
            },
            None => ProtocolEvent::Failure {
                exit_code: None,
                kind: FailureKind::Crashed,
            },
        },
        Some(Err(e)) => {
            warn!(error = %e, "failed to wait for solver process");
            ProtocolEvent::Failure {
                exit_code: None,
                kind: FailureKind::UnknownError,
            }
        }
        None => ProtocolEvent::Failure {
            exit_code: None,
            kind: FailureKind::UnknownError,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn status(raw: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(raw)
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_exits() {
        let elapsed = Some(Duration::from_millis(5));
        assert_eq!(
            classify(Some(Ok(status(0))), false, elapsed),
            ProtocolEvent::Finished {
                elapsed,
                exit_code: Some(0)
            }
        );
        // Exit code 2 is encoded in the high byte of the wait status.
        assert_eq!(
            classify(Some(Ok(status(2 << 8))), false, elapsed),
            ProtocolEvent::Failure {
                exit_code: Some(2),
                kind: FailureKind::NonZeroExit
            }
        );
        // Killed by SIGKILL (9).
        assert_eq!(
            classify(Some(Ok(status(9))), false, elapsed),
            ProtocolEvent::Failure {
                exit_code: None,
                kind: FailureKind::Crashed
            }
        );
        assert_eq!(
            classify(Some(Ok(status(9))), true, elapsed),
            ProtocolEvent::Finished {
                elapsed,
                exit_code: None
            }
        );
        assert!(matches!(
            classify(
                Some(Err(std::io::Error::other("lost"))),
                false,
                elapsed
            ),
            ProtocolEvent::Failure {
                kind: FailureKind::UnknownError,
                ..
            }
        ));
    }

    #[test]
    fn test_clock_freezes() {
        let mut clock = ElapsedClock::default();
        assert_eq!(clock.elapsed(), None);
        clock.start();
        clock.freeze();
        let frozen = clock.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.elapsed(), frozen);
    }

    #[test]
    fn test_input_builders() {
        let input = SolveInput::model_text("var 1..3: x;")
            .data_text("n = 1;")
            .data_file("/work/extra.dzn")
            .mode(OperationMode::CompileOnly);
        assert!(input.has_text());
        assert_eq!(input.data.len(), 2);
        assert!(!SolveInput::model_file("/work/m.mzn").has_text());
    }

    #[test]
    fn test_materialize_text() {
        let dir = tempfile::tempdir().unwrap();
        let source = InputSource::Text {
            name: "../escape.mzn".into(),
            text: "solve satisfy;".into(),
        };
        let path = materialize(&source, Some(&dir)).unwrap();
        assert_eq!(path, dir.path().join("escape.mzn"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "solve satisfy;");
    }

    #[tokio::test]
    async fn test_start_without_toolchain() {
        let session = SolverSession::new(DriverRegistry::shared());
        let identity = crate::identity::SolverIdentity::from_json(&serde_json::json!({"id": "a.b"})).unwrap();
        let config = SolveConfiguration::builtin(Arc::new(identity));
        let err = session
            .start(&config, SolveInput::model_text("solve satisfy;"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Driver(_)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.stop());
    }
}
