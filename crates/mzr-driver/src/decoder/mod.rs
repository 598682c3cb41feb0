//! Incremental decoder for solver stdout/stderr.
//!
//! Bytes arrive in arbitrary chunks and are buffered per channel until a full
//! line is available; splitting the same byte stream differently never
//! changes the decoded events. Each completed unit becomes exactly one
//! [`ProtocolEvent`]. Anything that cannot be classified is passed through as
//! [`ProtocolEvent::UnknownOutput`], so decoding never fails.
//!
//! Recognised stdout units, in order of precedence:
//!
//! 1. `%%%mzn-json:<kind>` ... `%%%mzn-json-end` blocks
//! 2. single-line JSON objects (a line starting with `{"`)
//! 3. `%%%mzn-stat: k=v` lines closed by `%%%mzn-stat-end`
//! 4. `%%%mzn-progress <fraction>`
//! 5. other `%` lines (comments)
//! 6. legacy solution text closed by `----------`, and legacy status lines
//!
//! Once a channel has produced a JSON unit it is in JSON mode and legacy text
//! is no longer accumulated into solutions.

mod json;
mod legacy;

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, trace};

use crate::events::{Channel, OutputSections, ProtocolEvent, SolveStatus};

const JSON_BLOCK_START: &str = "%%%mzn-json:";
const JSON_BLOCK_END: &str = "%%%mzn-json-end";
const STAT_LINE: &str = "%%%mzn-stat:";
const STAT_END: &str = "%%%mzn-stat-end";
const PROGRESS_LINE: &str = "%%%mzn-progress";
const HTML_START: &str = "%%%mzn-html-start";
const HTML_END: &str = "%%%mzn-html-end";
const SOLUTION_SEPARATOR: &str = "----------";

/// Bytes of a line that has not been terminated yet.
#[derive(Debug, Default)]
struct LineBuffer {
    fragment: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completes.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.fragment.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.fragment[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            lines.push(decode_line(&self.fragment[start..end]));
            start = end + 1;
        }
        self.fragment.drain(..start);
        lines
    }

    /// Take the unterminated remainder, if any.
    fn take_rest(&mut self) -> Option<String> {
        if self.fragment.is_empty() {
            return None;
        }
        let rest = decode_line(&self.fragment);
        self.fragment.clear();
        Some(rest)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// What the stdout scanner is in the middle of.
#[derive(Debug, Default)]
enum UnitState {
    #[default]
    ScanningText,
    AccumulatingJson {
        kind: Option<String>,
        raw: String,
        body: String,
    },
}

/// Legacy solution text collected since the last separator.
#[derive(Debug, Default)]
struct LegacySolution {
    default: String,
    html: String,
    in_html: bool,
    raw: String,
}

impl LegacySolution {
    fn push(&mut self, line: &str) {
        let target = if self.in_html {
            &mut self.html
        } else {
            &mut self.default
        };
        target.push_str(line);
        target.push('\n');
        self.raw.push_str(line);
        self.raw.push('\n');
    }

    fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    fn take_sections(&mut self) -> OutputSections {
        let taken = std::mem::take(self);
        let mut sections = OutputSections::new();
        sections.insert("default", taken.default);
        if !taken.html.is_empty() {
            sections.insert("html", taken.html);
        }
        sections
    }

    fn take_raw(&mut self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(std::mem::take(self).raw)
    }
}

#[derive(Debug, Default)]
struct StdoutState {
    lines: LineBuffer,
    unit: UnitState,
    json_mode: bool,
    solution: LegacySolution,
    stats: BTreeMap<String, Value>,
    stats_raw: String,
}

#[derive(Debug, Default)]
struct StderrState {
    lines: LineBuffer,
    /// A location line waiting for its keyword line.
    pending_location: Option<(crate::events::SourceLocation, String)>,
}

/// Turns raw solver output into [`ProtocolEvent`]s.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    stdout: StdoutState,
    stderr: StderrState,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk read from `channel`.
    pub fn feed(&mut self, channel: Channel, chunk: &[u8]) -> Vec<ProtocolEvent> {
        let mut out = Vec::new();
        match channel {
            Channel::Stdout => {
                for line in self.stdout.lines.push(chunk) {
                    self.stdout_line(&line, &mut out);
                }
            }
            Channel::Stderr => {
                for line in self.stderr.lines.push(chunk) {
                    self.stderr_line(&line, &mut out);
                }
            }
        }
        out
    }

    /// Flush one channel after it reached end of stream.
    ///
    /// An unterminated final line is decoded as a line; any unit still open
    /// afterwards is emitted as a single [`ProtocolEvent::UnknownOutput`].
    pub fn finish_channel(&mut self, channel: Channel) -> Vec<ProtocolEvent> {
        let mut out = Vec::new();
        match channel {
            Channel::Stdout => {
                if let Some(line) = self.stdout.lines.take_rest() {
                    self.stdout_line(&line, &mut out);
                }
                let state = &mut self.stdout;
                if let Some(raw) = state.solution.take_raw() {
                    out.push(unknown(Channel::Stdout, raw));
                }
                if !state.stats_raw.is_empty() {
                    state.stats.clear();
                    out.push(unknown(Channel::Stdout, std::mem::take(&mut state.stats_raw)));
                }
                if let UnitState::AccumulatingJson { raw, .. } = std::mem::take(&mut state.unit) {
                    debug!("unterminated JSON block at end of stream");
                    out.push(unknown(Channel::Stdout, raw));
                }
            }
            Channel::Stderr => {
                if let Some(line) = self.stderr.lines.take_rest() {
                    self.stderr_line(&line, &mut out);
                }
                if let Some((_, raw)) = self.stderr.pending_location.take() {
                    out.push(unknown(Channel::Stderr, raw));
                }
            }
        }
        out
    }

    /// Flush both channels, stdout first.
    pub fn finish(&mut self) -> Vec<ProtocolEvent> {
        let mut out = self.finish_channel(Channel::Stdout);
        out.extend(self.finish_channel(Channel::Stderr));
        out
    }

    /// Decode complete captured output in one go.
    pub fn decode_all(stdout: &[u8], stderr: &[u8]) -> Vec<ProtocolEvent> {
        let mut decoder = StreamDecoder::new();
        let mut out = decoder.feed(Channel::Stdout, stdout);
        out.extend(decoder.finish_channel(Channel::Stdout));
        out.extend(decoder.feed(Channel::Stderr, stderr));
        out.extend(decoder.finish_channel(Channel::Stderr));
        out
    }

    fn stdout_line(&mut self, line: &str, out: &mut Vec<ProtocolEvent>) {
        let state = &mut self.stdout;

        if let UnitState::AccumulatingJson { kind, raw, body } = &mut state.unit {
            if line.trim_end() == JSON_BLOCK_END {
                raw.push_str(line);
                raw.push('\n');
                let event = json::decode_unit(body, kind.as_deref())
                    .unwrap_or_else(|| malformed(Channel::Stdout, raw));
                out.push(emitted(event));
                state.unit = UnitState::ScanningText;
                return;
            }
            let reopened = line.starts_with(JSON_BLOCK_START)
                || (!body.is_empty() && is_complete_unit(line));
            if reopened {
                // A new unit started before the previous block was closed.
                let stale = std::mem::take(raw);
                out.push(malformed(Channel::Stdout, &stale));
                state.unit = UnitState::ScanningText;
            } else {
                raw.push_str(line);
                raw.push('\n');
                body.push_str(line);
                body.push('\n');
                return;
            }
        }

        if let Some(kind) = line.strip_prefix(JSON_BLOCK_START) {
            Self::enter_json_mode(state, out);
            let kind = kind.trim();
            state.unit = UnitState::AccumulatingJson {
                kind: (!kind.is_empty()).then(|| kind.to_string()),
                raw: format!("{line}\n"),
                body: String::new(),
            };
            return;
        }

        let trimmed = line.trim_start();
        if trimmed.starts_with("{\"") {
            Self::enter_json_mode(state, out);
            let event = json::decode_unit(trimmed, None)
                .unwrap_or_else(|| malformed(Channel::Stdout, line));
            out.push(emitted(event));
            return;
        }

        if let Some(payload) = line.strip_prefix(STAT_LINE) {
            if let Some((key, value)) = legacy::parse_stat(payload) {
                state.stats.insert(key, value);
            }
            state.stats_raw.push_str(line);
            state.stats_raw.push('\n');
            return;
        }
        if line.trim_end() == STAT_END {
            state.stats_raw.clear();
            let statistics = std::mem::take(&mut state.stats);
            out.push(emitted(ProtocolEvent::StatisticsOutput { statistics }));
            return;
        }

        if let Some(rest) = line.strip_prefix(PROGRESS_LINE) {
            let event = match rest.trim().parse::<f64>() {
                Ok(fraction) if fraction.is_finite() => ProtocolEvent::ProgressOutput { fraction },
                _ => unknown(Channel::Stdout, line.to_string()),
            };
            out.push(emitted(event));
            return;
        }

        if !state.json_mode {
            match line.trim_end() {
                HTML_START => {
                    state.solution.in_html = true;
                    return;
                }
                HTML_END => {
                    state.solution.in_html = false;
                    return;
                }
                SOLUTION_SEPARATOR => {
                    let sections = state.solution.take_sections();
                    out.push(emitted(ProtocolEvent::SolutionOutput {
                        sections,
                        elapsed: None,
                    }));
                    return;
                }
                status_line => {
                    if let Some(status) = SolveStatus::from_legacy_line(status_line) {
                        if let Some(raw) = state.solution.take_raw() {
                            out.push(unknown(Channel::Stdout, raw));
                        }
                        out.push(emitted(ProtocolEvent::FinalStatus {
                            status,
                            elapsed: None,
                        }));
                        return;
                    }
                }
            }
        }

        if line.starts_with('%') {
            out.push(emitted(ProtocolEvent::CommentOutput {
                text: line.to_string(),
            }));
            return;
        }

        if state.json_mode {
            out.push(emitted(unknown(Channel::Stdout, line.to_string())));
        } else {
            state.solution.push(line);
        }
    }

    fn enter_json_mode(state: &mut StdoutState, out: &mut Vec<ProtocolEvent>) {
        if state.json_mode {
            return;
        }
        state.json_mode = true;
        if let Some(raw) = state.solution.take_raw() {
            out.push(unknown(Channel::Stdout, raw));
        }
    }

    fn stderr_line(&mut self, line: &str, out: &mut Vec<ProtocolEvent>) {
        let state = &mut self.stderr;

        if let Some((location, raw)) = state.pending_location.take() {
            if let Some(event) = legacy::diagnostic(line, location) {
                out.push(emitted(event));
                return;
            }
            out.push(unknown(Channel::Stderr, raw));
        }

        let trimmed = line.trim_start();
        if trimmed.starts_with("{\"") {
            let event = json::decode_unit(trimmed, None)
                .unwrap_or_else(|| malformed(Channel::Stderr, line));
            out.push(emitted(event));
            return;
        }

        if let Some(location) = legacy::parse_location(line) {
            state.pending_location = Some((location, line.to_string()));
            return;
        }

        out.push(emitted(unknown(Channel::Stderr, line.to_string())));
    }
}

/// A single-line JSON unit at column 0.
fn is_complete_unit(line: &str) -> bool {
    line.starts_with("{\"") && json::decode_unit(line, None).is_some()
}

fn unknown(channel: Channel, text: String) -> ProtocolEvent {
    ProtocolEvent::UnknownOutput { channel, text }
}

fn malformed(channel: Channel, raw: &str) -> ProtocolEvent {
    debug!(?channel, "unrecognised JSON unit passed through");
    unknown(channel, raw.to_string())
}

fn emitted(event: ProtocolEvent) -> ProtocolEvent {
    trace!(kind = event.kind(), "decoded unit");
    event
}
