//! Error types for toolchain probing, configuration loading and solver runs.
//!
//! Errors raised while *composing* a run (configuration, command line, launch)
//! are returned synchronously. Failures that happen once a solver is running
//! are never errors: they arrive as [`ProtocolEvent::Failure`] on the event
//! stream.
//!
//! [`ProtocolEvent::Failure`]: crate::events::ProtocolEvent::Failure

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Classification of an abnormal solver exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The process ran and exited with a non-zero code.
    NonZeroExit,
    /// The operating system could not spawn the process.
    FailedToStart,
    /// The process was terminated by a signal nobody asked for.
    Crashed,
    /// Anything else (wait failures, lost handles).
    UnknownError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::NonZeroExit => write!(f, "non-zero exit"),
            FailureKind::FailedToStart => write!(f, "failed to start"),
            FailureKind::Crashed => write!(f, "crashed"),
            FailureKind::UnknownError => write!(f, "unknown error"),
        }
    }
}

/// The solver executable could not be spawned.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The executable does not exist or is not a file.
    #[error("executable not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The OS refused to create the process.
    #[error("failed to spawn {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The child could not be placed in its own process group or job.
    #[error("failed to isolate process group: {0}")]
    Group(#[source] std::io::Error),

    /// Materializing in-memory model or data text failed.
    #[error("failed to prepare scratch files: {0}")]
    Scratch(#[source] std::io::Error),
}

/// The toolchain probe in [`DriverRegistry::set_location`] failed.
///
/// [`DriverRegistry::set_location`]: crate::registry::DriverRegistry::set_location
#[derive(Debug, Error)]
pub enum DriverError {
    /// No `minizinc` executable at the given location (or on `PATH`).
    #[error("no MiniZinc executable found in {0}")]
    NotFound(String),

    /// A probe invocation could not be run.
    #[error("failed to run `{query}`: {source}")]
    Probe {
        query: String,
        #[source]
        source: Box<SessionError>,
    },

    /// A probe did not complete within the probe timeout.
    #[error("`{query}` did not finish within {timeout:?}")]
    ProbeTimeout { query: String, timeout: Duration },

    /// A probe exited unsuccessfully.
    #[error("`{query}` exited with code {code:?}")]
    ProbeFailed { query: String, code: Option<i32> },

    /// The version output did not contain a version triple.
    #[error("unrecognised version output: {0}")]
    BadVersion(String),

    /// The capability or config-dirs dump was not valid JSON of the expected shape.
    #[error("corrupt `{query}` output: {source}")]
    BadJson {
        query: String,
        #[source]
        source: serde_json::Error,
    },

    /// No installed solver matches the reference.
    #[error("failed to find solver {0}")]
    UnknownSolver(String),

    /// The registry has not been pointed at a usable toolchain.
    #[error("no MiniZinc toolchain configured")]
    NotConfigured,
}

/// Loading a persisted solver configuration failed.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON.
    #[error("could not parse {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// The document is valid JSON but not an object.
    #[error("configuration must be a JSON object")]
    NotAnObject,

    /// Neither the referenced solver nor a default solver is available.
    #[error("failed to load fallback solver")]
    NoFallbackSolver,

    /// Runner settings (TOML) could not be read or written.
    #[error("settings error: {0}")]
    Settings(String),
}

/// Errors from [`SolverSession`] operations.
///
/// [`SolverSession`]: crate::session::SolverSession
#[derive(Debug, Error)]
pub enum SessionError {
    /// `start()` was called while a run is in progress.
    #[error("solver session is already running")]
    AlreadyRunning,

    /// The subprocess could not be launched.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// The registry has no usable toolchain.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A blocking run exceeded its timeout and was killed.
    #[error("process did not finish within {0:?}")]
    Timeout(Duration),

    /// I/O failure while talking to the subprocess.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Umbrella error for callers that do not care which layer failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;
