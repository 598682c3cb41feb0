//! Recognisers for the legacy (pre-JSON) text protocol.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::events::{Diagnostic, ProtocolEvent, SourceLocation};

/// `file:line.col[-line.col]:` as printed before a legacy diagnostic.
static LOCATION_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+):(\d+)\.(\d+)(?:-(\d+)\.(\d+))?:\s*$").expect("valid location regex")
});

/// Parse a legacy location line.
pub(crate) fn parse_location(line: &str) -> Option<SourceLocation> {
    let caps = LOCATION_LINE.captures(line)?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let first_line = num(2)?;
    let first_column = num(3)?;
    Some(SourceLocation {
        filename: caps[1].to_string(),
        first_line,
        first_column,
        last_line: num(4).unwrap_or(first_line),
        last_column: num(5).unwrap_or(first_column),
    })
}

/// Build a diagnostic from the keyword line that follows a location line.
///
/// `MiniZinc:` and `Error:` lines become errors, `Warning:` lines warnings.
/// Any other line is not a diagnostic.
pub(crate) fn diagnostic(line: &str, location: SourceLocation) -> Option<ProtocolEvent> {
    let (is_error, rest) = if let Some(rest) = line.strip_prefix("MiniZinc:") {
        (true, rest)
    } else if let Some(rest) = line.strip_prefix("Error:") {
        (true, rest)
    } else if let Some(rest) = line.strip_prefix("Warning:") {
        (false, rest)
    } else {
        return None;
    };
    let rest = rest.trim();
    let (what, message) = match rest.split_once(": ") {
        Some((what, message)) => (Some(what.to_string()), message.to_string()),
        None => (None, rest.to_string()),
    };
    let diagnostic = Diagnostic {
        what,
        message,
        location: Some(location),
        stack: Vec::new(),
    };
    Some(if is_error {
        ProtocolEvent::ErrorOutput(diagnostic)
    } else {
        ProtocolEvent::WarningOutput(diagnostic)
    })
}

/// Parse one `%%%mzn-stat: key=value` payload.
///
/// Values that are valid JSON literals keep their type; anything else is
/// kept as a string.
pub(crate) fn parse_stat(payload: &str) -> Option<(String, serde_json::Value)> {
    let (key, value) = payload.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.trim();
    let parsed = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Some((key.to_string(), parsed))
}
