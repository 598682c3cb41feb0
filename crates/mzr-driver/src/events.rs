//! Typed protocol events decoded from solver output.
//!
//! Every unit of subprocess output becomes exactly one [`ProtocolEvent`].
//! Events are plain data: once emitted they are never mutated, and for a
//! single run they are delivered in the order their units completed.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FailureKind;

/// Which subprocess stream a unit was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stdout,
    Stderr,
}

/// Final solve status reported by the toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    AllSolutions,
    OptimalSolution,
    Satisfied,
    Unsatisfiable,
    UnsatOrUnbounded,
    Unbounded,
    Unknown,
    Error,
}

impl SolveStatus {
    /// Parse the status string used by the JSON stream.
    pub fn from_json_name(name: &str) -> Option<SolveStatus> {
        Some(match name {
            "ALL_SOLUTIONS" => SolveStatus::AllSolutions,
            "OPTIMAL_SOLUTION" => SolveStatus::OptimalSolution,
            "SATISFIED" => SolveStatus::Satisfied,
            "UNSATISFIABLE" => SolveStatus::Unsatisfiable,
            "UNSAT_OR_UNBOUNDED" => SolveStatus::UnsatOrUnbounded,
            "UNBOUNDED" => SolveStatus::Unbounded,
            "UNKNOWN" => SolveStatus::Unknown,
            "ERROR" => SolveStatus::Error,
            _ => return None,
        })
    }

    /// Parse a legacy `=====...=====` status line.
    pub fn from_legacy_line(line: &str) -> Option<SolveStatus> {
        Some(match line {
            "==========" => SolveStatus::OptimalSolution,
            "=====UNSATISFIABLE=====" => SolveStatus::Unsatisfiable,
            "=====UNSATorUNBOUNDED=====" => SolveStatus::UnsatOrUnbounded,
            "=====UNBOUNDED=====" => SolveStatus::Unbounded,
            "=====UNKNOWN=====" => SolveStatus::Unknown,
            "=====ERROR=====" => SolveStatus::Error,
            _ => return None,
        })
    }

    /// The legacy text rendering of this status.
    pub fn legacy_line(&self) -> &'static str {
        match self {
            SolveStatus::AllSolutions | SolveStatus::OptimalSolution => "==========",
            SolveStatus::Satisfied => "",
            SolveStatus::Unsatisfiable => "=====UNSATISFIABLE=====",
            SolveStatus::UnsatOrUnbounded => "=====UNSATorUNBOUNDED=====",
            SolveStatus::Unbounded => "=====UNBOUNDED=====",
            SolveStatus::Unknown => "=====UNKNOWN=====",
            SolveStatus::Error => "=====ERROR=====",
        }
    }
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveStatus::AllSolutions => write!(f, "all solutions"),
            SolveStatus::OptimalSolution => write!(f, "optimal solution"),
            SolveStatus::Satisfied => write!(f, "satisfied"),
            SolveStatus::Unsatisfiable => write!(f, "unsatisfiable"),
            SolveStatus::UnsatOrUnbounded => write!(f, "unsatisfiable or unbounded"),
            SolveStatus::Unbounded => write!(f, "unbounded"),
            SolveStatus::Unknown => write!(f, "unknown"),
            SolveStatus::Error => write!(f, "error"),
        }
    }
}

/// Named output sections of one solution, in display order.
///
/// The order is the one declared by the producer (the `sections` array of a
/// JSON unit), not the key order of the underlying map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSections {
    entries: Vec<(String, String)>,
}

impl OutputSections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a section, replacing the text of an existing one in place.
    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        let name = name.into();
        let text = text.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = text,
            None => self.entries.push((name, text)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.as_str())
    }

    /// Section names in display order.
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A source span in a model file (1-based lines and columns).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub filename: String,
    pub first_line: u32,
    pub first_column: u32,
    pub last_line: u32,
    pub last_column: u32,
}

/// One frame of a diagnostic's evaluation stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    pub location: Option<SourceLocation>,
    pub description: String,
    pub is_comp_iter: bool,
}

/// Structured error or warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Short category such as `type error`.
    pub what: Option<String>,
    pub message: String,
    pub location: Option<SourceLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<StackFrame>,
}

/// One decoded unit of subprocess output, or a session lifecycle marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// The subprocess was launched.
    Started,
    SolutionOutput {
        sections: OutputSections,
        #[serde(with = "millis", default)]
        elapsed: Option<Duration>,
    },
    /// Output of a solution checker, same shape as a solution.
    CheckerOutput {
        sections: OutputSections,
        #[serde(with = "millis", default)]
        elapsed: Option<Duration>,
    },
    StatisticsOutput {
        statistics: BTreeMap<String, Value>,
    },
    ProgressOutput {
        fraction: f64,
    },
    FinalStatus {
        status: SolveStatus,
        #[serde(with = "millis", default)]
        elapsed: Option<Duration>,
    },
    CommentOutput {
        text: String,
    },
    TraceOutput {
        section: String,
        payload: Value,
    },
    WarningOutput(Diagnostic),
    ErrorOutput(Diagnostic),
    TimeOutput {
        #[serde(with = "millis", default)]
        elapsed: Option<Duration>,
    },
    PathsOutput {
        paths: Vec<Value>,
    },
    ProfilingOutput {
        entries: Vec<Value>,
    },
    /// Anything the decoder could not classify, passed through verbatim.
    UnknownOutput {
        channel: Channel,
        text: String,
    },
    /// The process exited normally (or was stopped on request).
    Finished {
        #[serde(with = "millis", default)]
        elapsed: Option<Duration>,
        exit_code: Option<i32>,
    },
    /// The process failed.
    Failure {
        exit_code: Option<i32>,
        kind: FailureKind,
    },
}

impl ProtocolEvent {
    /// Whether this event ends a run. Nothing follows a terminal event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProtocolEvent::Finished { .. } | ProtocolEvent::Failure { .. }
        )
    }

    /// Short kind name, used in logs and the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolEvent::Started => "started",
            ProtocolEvent::SolutionOutput { .. } => "solution",
            ProtocolEvent::CheckerOutput { .. } => "checker",
            ProtocolEvent::StatisticsOutput { .. } => "statistics",
            ProtocolEvent::ProgressOutput { .. } => "progress",
            ProtocolEvent::FinalStatus { .. } => "status",
            ProtocolEvent::CommentOutput { .. } => "comment",
            ProtocolEvent::TraceOutput { .. } => "trace",
            ProtocolEvent::WarningOutput(_) => "warning",
            ProtocolEvent::ErrorOutput(_) => "error",
            ProtocolEvent::TimeOutput { .. } => "time",
            ProtocolEvent::PathsOutput { .. } => "paths",
            ProtocolEvent::ProfilingOutput { .. } => "profiling",
            ProtocolEvent::UnknownOutput { .. } => "unknown",
            ProtocolEvent::Finished { .. } => "finished",
            ProtocolEvent::Failure { .. } => "failure",
        }
    }
}

/// Serialize `Option<Duration>` as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
