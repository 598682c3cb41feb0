//! Process orchestration and output decoding for MiniZinc toolchains.
//!
//! This crate launches the `minizinc` executable for a solve, streams its
//! mixed JSON/text output through an incremental decoder, and reports typed
//! events to the caller while handling cancellation and process-group
//! cleanup.
//!
//! # Architecture
//!
//! ```text
//! DriverRegistry ──identities──> SolveConfiguration
//!                                      │
//!                                CommandBuilder ──argv──> ProcessGroup
//!                                                            │ stdout/stderr
//!                      caller <──ProtocolEvent── StreamDecoder
//!                         ▲
//!                         └──── SolverSession (state, timing, stop/terminate)
//! ```
//!
//! | Component | Module |
//! |-----------|--------|
//! | Toolchain probe and solver list | [`registry`] |
//! | Solver capabilities and extra flags | [`identity`] |
//! | Persisted run options | [`config`] |
//! | Options to argv | [`command`] |
//! | Process groups and escalation | [`process`] |
//! | Stream decoding | [`decoder`] |
//! | Run lifecycle | [`session`] |
//! | Concurrent runs | [`batch`] |
//!
//! Runtime failures of a solver are never returned as errors; they arrive as
//! [`ProtocolEvent::Failure`] at the end of the event stream.

pub mod batch;
pub mod command;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod identity;
pub mod process;
pub mod registry;
pub mod session;
pub mod settings;

pub use batch::{run_batch, BatchJob, BatchJobRecord, BatchManifest, BatchSummary};
pub use command::{CommandBuilder, CommandLine, OperationMode};
pub use config::SolveConfiguration;
pub use decoder::StreamDecoder;
pub use error::{ConfigError, DriverError, Error, FailureKind, LaunchError, Result, SessionError};
pub use events::{Channel, Diagnostic, OutputSections, ProtocolEvent, SolveStatus, SourceLocation};
pub use identity::{ExtraFlag, FlagKind, InputType, SolverIdentity};
pub use process::{Escalation, LaunchSpec, ProcessGroup, RunOutput, StopStep};
pub use registry::{DriverRegistry, Toolchain, Version};
pub use session::{EventStream, InputSource, SessionOptions, SessionState, SolveInput, SolverSession};
pub use settings::RunnerSettings;
