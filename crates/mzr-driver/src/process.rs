//! Subprocess management for toolchain invocations.
//!
//! Every launch makes the child the leader of a fresh process group, so the
//! toolchain and any solver backends it spawns can be signalled as a unit.
//! Stopping follows a fixed escalation: cooperative interrupt, wait, kill the
//! whole group, wait, kill the leader alone.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::{LaunchError, SessionError};

/// How long each stage of a shutdown may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    /// Wait after the cooperative interrupt before killing the group.
    pub interrupt_grace: Duration,
    /// Wait after killing the group before killing the leader alone.
    pub kill_grace: Duration,
}

impl Default for Escalation {
    fn default() -> Self {
        Self {
            interrupt_grace: Duration::from_millis(500),
            kill_grace: Duration::from_millis(1000),
        }
    }
}

impl Escalation {
    /// How long to wait after `step` before taking the next one.
    pub fn grace_after(&self, step: StopStep) -> Option<Duration> {
        match step {
            StopStep::Interrupt => Some(self.interrupt_grace),
            StopStep::KillGroup => Some(self.kill_grace),
            StopStep::KillLeader => None,
        }
    }
}

/// One step of the stop escalation, in the order they are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStep {
    Interrupt,
    KillGroup,
    KillLeader,
}

impl StopStep {
    pub fn next(self) -> Option<StopStep> {
        match self {
            StopStep::Interrupt => Some(StopStep::KillGroup),
            StopStep::KillGroup => Some(StopStep::KillLeader),
            StopStep::KillLeader => None,
        }
    }
}

/// Everything needed to spawn one toolchain process.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Directories placed ahead of the inherited `PATH`, in order.
    pub path_prefix: Vec<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    /// Add a directory to the end of the `PATH` prefix.
    pub fn prepend_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.path_prefix.push(dir.into());
        self
    }

    /// The `PATH` value the child will see.
    pub fn search_path(&self) -> Option<OsString> {
        let inherited = std::env::var_os("PATH");
        let dirs = self
            .path_prefix
            .iter()
            .cloned()
            .chain(inherited.iter().flat_map(std::env::split_paths));
        std::env::join_paths(dirs).ok()
    }

    fn check_program(&self) -> Result<(), LaunchError> {
        let has_dir = self.program.components().count() > 1;
        if has_dir && !self.program.is_file() {
            return Err(LaunchError::NotFound(self.program.clone()));
        }
        Ok(())
    }

    fn spawn_error(&self, source: std::io::Error) -> LaunchError {
        if source.kind() == std::io::ErrorKind::NotFound {
            LaunchError::NotFound(self.program.clone())
        } else {
            LaunchError::Spawn {
                program: self.program.clone(),
                source,
            }
        }
    }

    fn tokio_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        if let Some(path) = self.search_path() {
            cmd.env("PATH", path);
        }
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        cmd
    }

    fn std_command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        if let Some(path) = self.search_path() {
            cmd.env("PATH", path);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }
        cmd
    }
}

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// A running process that leads its own process group.
///
/// On Windows the group is a job object; dropping the handle kills every
/// process still assigned to it.
#[derive(Debug)]
pub struct ProcessGroup {
    child: Child,
    pid: Option<u32>,
    group: Option<platform::Group>,
}

impl ProcessGroup {
    /// Spawn the process described by `spec`.
    pub fn launch(spec: &LaunchSpec) -> Result<ProcessGroup, LaunchError> {
        spec.check_program()?;
        let mut child = spec
            .tokio_command()
            .spawn()
            .map_err(|e| spec.spawn_error(e))?;
        let pid = child.id();
        let group = match platform::attach_tokio(&child) {
            Ok(group) => group,
            Err(e) => {
                let _ = child.start_kill();
                return Err(LaunchError::Group(e));
            }
        };
        debug!(program = %spec.program.display(), ?pid, args = ?spec.args, "launched process group");
        Ok(ProcessGroup { child, pid, group })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Ask the group to stop (SIGINT, or the toolchain's stop pipe on Windows).
    pub fn signal_interrupt(&self) -> std::io::Result<()> {
        let Some(group) = &self.group else {
            return Ok(());
        };
        debug!(pid = ?self.pid, "interrupting process group");
        group.interrupt()
    }

    /// Kill every process in the group.
    pub fn force_kill(&self) -> std::io::Result<()> {
        let Some(group) = &self.group else {
            return Ok(());
        };
        debug!(pid = ?self.pid, "killing process group");
        group.kill()
    }

    /// Kill only the directly spawned process.
    pub fn kill_leader(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }

    /// Take one escalation step. Failures are logged, not returned.
    pub fn escalate(&mut self, step: StopStep) {
        let result = match step {
            StopStep::Interrupt => self.signal_interrupt(),
            StopStep::KillGroup => self.force_kill(),
            StopStep::KillLeader => self.kill_leader(),
        };
        if let Err(e) = result {
            warn!(pid = ?self.pid, ?step, error = %e, "stop step failed");
        }
    }

    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Wait for exit, giving up after `timeout`.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => status.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Whether any process of the group is still alive.
    pub fn group_alive(&self) -> bool {
        self.group.as_ref().is_some_and(platform::Group::alive)
    }
}

/// Exit code and captured output of a short, non-streaming run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Run a process to completion on the calling thread, capturing its output.
///
/// All output is buffered in memory, so this is only meant for short queries
/// such as capability probes. `timeout` bounds the whole call, including
/// reading output that descendants hold open; when it elapses the group is
/// killed and [`SessionError::Timeout`] is returned.
pub fn run_blocking(spec: &LaunchSpec, timeout: Option<Duration>) -> Result<RunOutput, SessionError> {
    spec.check_program()?;
    let mut child = spec.std_command().spawn().map_err(|e| spec.spawn_error(e))?;
    let pid = child.id();
    let group = match platform::attach_std(&child) {
        Ok(group) => group,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(LaunchError::Group(e).into());
        }
    };
    debug!(program = %spec.program.display(), pid, args = ?spec.args, "running");

    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let deadline = timeout.map(|t| Instant::now() + t);
    let timed_out = || {
        warn!(pid, "blocking run timed out, killing group");
        SessionError::Timeout(timeout.unwrap_or_default())
    };
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            let _ = group.kill();
            let _ = child.kill();
            let _ = child.wait();
            return Err(timed_out());
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    // Leftover group members would keep the pipes open.
    if group.alive() {
        debug!(pid, "killing processes left in group");
        let _ = group.kill();
    }

    let (Some(stdout), Some(stderr)) = (collect(stdout, deadline), collect(stderr, deadline)) else {
        let _ = group.kill();
        return Err(timed_out());
    };
    Ok(RunOutput {
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut source: R) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = source.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

/// Output of one reader, or `None` if it is still open at `deadline`.
fn collect(reader: Option<mpsc::Receiver<Vec<u8>>>, deadline: Option<Instant>) -> Option<String> {
    let Some(rx) = reader else {
        return Some(String::new());
    };
    let bytes = match deadline {
        Some(deadline) => match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(bytes) => bytes,
            Err(mpsc::RecvTimeoutError::Timeout) => return None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Vec::new(),
        },
        None => rx.recv().unwrap_or_default(),
    };
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Directory containing `program`, used as the toolchain's `PATH` entry.
pub fn program_dir(program: &Path) -> Option<PathBuf> {
    program
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

#[cfg(unix)]
mod platform {
    /// A process group; its id equals the leader's pid.
    #[derive(Debug)]
    pub struct Group {
        pgid: libc::pid_t,
    }

    pub fn attach_tokio(child: &tokio::process::Child) -> std::io::Result<Option<Group>> {
        Ok(child.id().map(|pid| Group {
            pgid: pid as libc::pid_t,
        }))
    }

    pub fn attach_std(child: &std::process::Child) -> std::io::Result<Group> {
        Ok(Group {
            pgid: child.id() as libc::pid_t,
        })
    }

    impl Group {
        fn signal(&self, signal: libc::c_int) -> std::io::Result<()> {
            let rc = unsafe { libc::killpg(self.pgid, signal) };
            if rc == 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                // Already gone.
                return Ok(());
            }
            Err(err)
        }

        pub fn interrupt(&self) -> std::io::Result<()> {
            self.signal(libc::SIGINT)
        }

        pub fn kill(&self) -> std::io::Result<()> {
            self.signal(libc::SIGKILL)
        }

        pub fn alive(&self) -> bool {
            let rc = unsafe { libc::killpg(self.pgid, 0) };
            rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
        }
    }
}

#[cfg(windows)]
mod platform {
    use std::ffi::c_void;
    use std::os::windows::io::{AsRawHandle, RawHandle};

    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
    use windows_sys::Win32::System::JobObjects::{
        AssignProcessToJobObject, CreateJobObjectW, JobObjectBasicAccountingInformation,
        JobObjectExtendedLimitInformation, QueryInformationJobObject, SetInformationJobObject,
        TerminateJobObject, JOBOBJECT_BASIC_ACCOUNTING_INFORMATION,
        JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
    };

    /// A job object holding the leader and everything it spawns.
    #[derive(Debug)]
    pub struct Group {
        pid: u32,
        job: HANDLE,
    }

    // The job handle is a kernel object usable from any thread.
    unsafe impl Send for Group {}
    unsafe impl Sync for Group {}

    pub fn attach_tokio(child: &tokio::process::Child) -> std::io::Result<Option<Group>> {
        match (child.id(), child.raw_handle()) {
            (Some(pid), Some(handle)) => Group::attach(pid, handle).map(Some),
            _ => Ok(None),
        }
    }

    pub fn attach_std(child: &std::process::Child) -> std::io::Result<Group> {
        Group::attach(child.id(), child.as_raw_handle())
    }

    fn check(ok: i32) -> std::io::Result<()> {
        if ok == 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    impl Group {
        fn attach(pid: u32, process: RawHandle) -> std::io::Result<Group> {
            let job = unsafe { CreateJobObjectW(std::ptr::null(), std::ptr::null()) };
            if job.is_null() {
                return Err(std::io::Error::last_os_error());
            }
            let group = Group { pid, job };
            let mut limits: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { std::mem::zeroed() };
            limits.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
            check(unsafe {
                SetInformationJobObject(
                    job,
                    JobObjectExtendedLimitInformation,
                    &limits as *const _ as *const c_void,
                    std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
                )
            })?;
            check(unsafe { AssignProcessToJobObject(job, process as HANDLE) })?;
            Ok(group)
        }

        /// The toolchain listens on this pipe and stops when a client connects.
        fn stop_pipe(&self) -> String {
            format!(r"\\.\pipe\minizinc-{}", self.pid)
        }

        pub fn interrupt(&self) -> std::io::Result<()> {
            std::fs::OpenOptions::new()
                .write(true)
                .open(self.stop_pipe())
                .map(drop)
        }

        pub fn kill(&self) -> std::io::Result<()> {
            check(unsafe { TerminateJobObject(self.job, 1) })
        }

        pub fn alive(&self) -> bool {
            let mut info: JOBOBJECT_BASIC_ACCOUNTING_INFORMATION = unsafe { std::mem::zeroed() };
            let ok = unsafe {
                QueryInformationJobObject(
                    self.job,
                    JobObjectBasicAccountingInformation,
                    &mut info as *mut _ as *mut c_void,
                    std::mem::size_of::<JOBOBJECT_BASIC_ACCOUNTING_INFORMATION>() as u32,
                    std::ptr::null_mut(),
                )
            };
            ok != 0 && info.ActiveProcesses > 0
        }
    }

    impl Drop for Group {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.job);
            }
        }
    }
}
