//! Decoding of JSON stream units.
//!
//! A unit is one JSON object carrying a `"type"` member. Objects that fail to
//! parse, lack required members, or carry an unrecognised type decode to
//! `None`; the caller turns that into [`ProtocolEvent::UnknownOutput`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::events::{
    Diagnostic, OutputSections, ProtocolEvent, SolveStatus, SourceLocation, StackFrame,
};

/// Wire shape of every unit kind the decoder understands.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamUnit {
    Solution(SolutionUnit),
    Checker(SolutionUnit),
    Statistics {
        statistics: BTreeMap<String, Value>,
    },
    Status {
        status: String,
        time: Option<u64>,
    },
    Error(DiagnosticUnit),
    Warning(DiagnosticUnit),
    Comment {
        comment: String,
    },
    Trace {
        #[serde(default = "default_section")]
        section: String,
        #[serde(default)]
        message: Value,
    },
    Time {
        time: u64,
    },
    Paths {
        paths: Vec<Value>,
    },
    Profiling {
        entries: Vec<Value>,
    },
    Progress {
        progress: f64,
    },
}

#[derive(Debug, Deserialize)]
struct SolutionUnit {
    output: Value,
    #[serde(default)]
    sections: Vec<String>,
    time: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DiagnosticUnit {
    what: Option<String>,
    #[serde(default)]
    message: String,
    location: Option<LocationUnit>,
    #[serde(default)]
    stack: Vec<FrameUnit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationUnit {
    filename: String,
    first_line: u32,
    first_column: u32,
    last_line: u32,
    last_column: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameUnit {
    location: Option<LocationUnit>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    is_comp_iter: bool,
}

fn default_section() -> String {
    "default".to_string()
}

impl From<LocationUnit> for SourceLocation {
    fn from(l: LocationUnit) -> Self {
        SourceLocation {
            filename: l.filename,
            first_line: l.first_line,
            first_column: l.first_column,
            last_line: l.last_line,
            last_column: l.last_column,
        }
    }
}

impl From<DiagnosticUnit> for Diagnostic {
    fn from(d: DiagnosticUnit) -> Self {
        Diagnostic {
            what: d.what,
            message: d.message,
            location: d.location.map(SourceLocation::from),
            stack: d
                .stack
                .into_iter()
                .map(|f| StackFrame {
                    location: f.location.map(SourceLocation::from),
                    description: f.description,
                    is_comp_iter: f.is_comp_iter,
                })
                .collect(),
        }
    }
}

fn millis(ms: Option<u64>) -> Option<Duration> {
    ms.map(Duration::from_millis)
}

fn section_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Arrange solution sections in the declared order, then any undeclared ones.
fn ordered_sections(output: Value, declared: &[String]) -> OutputSections {
    let mut sections = OutputSections::new();
    let map: Map<String, Value> = match output {
        Value::Object(map) => map,
        Value::String(text) => {
            sections.insert("default", text);
            return sections;
        }
        other => {
            sections.insert("default", other.to_string());
            return sections;
        }
    };
    for name in declared {
        if let Some(value) = map.get(name) {
            sections.insert(name.clone(), section_text(value));
        }
    }
    for (name, value) in &map {
        if !declared.contains(name) {
            sections.insert(name.clone(), section_text(value));
        }
    }
    sections
}

/// Decode one JSON unit.
///
/// `announced` is the kind named by a `%%%mzn-json:<kind>` marker; it is used
/// only when the object has no `"type"` member of its own.
pub(crate) fn decode_unit(text: &str, announced: Option<&str>) -> Option<ProtocolEvent> {
    let mut value: Value = serde_json::from_str(text).ok()?;
    let object = value.as_object_mut()?;
    if !object.contains_key("type") {
        object.insert("type".to_string(), Value::String(announced?.to_string()));
    }
    let unit: StreamUnit = serde_json::from_value(value).ok()?;
    if matches!(unit, StreamUnit::Progress { progress } if !progress.is_finite()) {
        return None;
    }
    Some(match unit {
        StreamUnit::Solution(s) => ProtocolEvent::SolutionOutput {
            sections: ordered_sections(s.output, &s.sections),
            elapsed: millis(s.time),
        },
        StreamUnit::Checker(s) => ProtocolEvent::CheckerOutput {
            sections: ordered_sections(s.output, &s.sections),
            elapsed: millis(s.time),
        },
        StreamUnit::Statistics { statistics } => ProtocolEvent::StatisticsOutput { statistics },
        StreamUnit::Status { status, time } => ProtocolEvent::FinalStatus {
            status: SolveStatus::from_json_name(&status)?,
            elapsed: millis(time),
        },
        StreamUnit::Error(d) => ProtocolEvent::ErrorOutput(d.into()),
        StreamUnit::Warning(d) => ProtocolEvent::WarningOutput(d.into()),
        StreamUnit::Comment { comment } => ProtocolEvent::CommentOutput { text: comment },
        StreamUnit::Trace { section, message } => ProtocolEvent::TraceOutput {
            section,
            payload: message,
        },
        StreamUnit::Time { time } => ProtocolEvent::TimeOutput {
            elapsed: millis(Some(time)),
        },
        StreamUnit::Paths { paths } => ProtocolEvent::PathsOutput { paths },
        StreamUnit::Profiling { entries } => ProtocolEvent::ProfilingOutput { entries },
        StreamUnit::Progress { progress } => ProtocolEvent::ProgressOutput { fraction: progress },
    })
}
