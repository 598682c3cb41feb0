//! Solver identities parsed from the toolchain's `--solvers-json` dump.
//!
//! A [`SolverIdentity`] is the static description of one installed solver
//! backend: which standard flags it understands, which solver-specific
//! ("extra") flags it declares, and where its executable lives. Identities are
//! immutable once parsed and are shared behind `Arc` by the registry.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Flags that the compiler front end interprets itself. They are accepted for
/// every solver regardless of its declared `stdFlags`.
pub const TOOLCHAIN_FLAGS: &[&str] = &[
    "--time-limit",
    "--verbose-compilation",
    "--compiler-statistics",
    "--output-time",
    "-O",
    "-D",
];

/// What the solver executable consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// FlatZinc produced by the compiler.
    #[default]
    FlatZinc,
    /// Model source, handled end-to-end by the solver.
    ModelSource,
    /// JSON model export.
    Json,
    /// AMPL NL files or anything else.
    Other,
}

impl InputType {
    fn from_descriptor(input_type: Option<&str>, supports_mzn: bool, supports_fzn: bool) -> Self {
        match input_type {
            Some("FZN") => InputType::FlatZinc,
            Some("MZN") => InputType::ModelSource,
            Some("JSON") => InputType::Json,
            Some(_) => InputType::Other,
            None if supports_mzn => InputType::ModelSource,
            None if supports_fzn => InputType::FlatZinc,
            None => InputType::Other,
        }
    }
}

/// Declared value kind of a solver-specific flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlagKind {
    Int,
    IntRange { min: i64, max: i64 },
    Float,
    FloatRange { min: f64, max: f64 },
    Bool,
    /// Boolean serialized as one of two solver-chosen tokens.
    BoolOnOff { on: String, off: String },
    String,
    /// One of a fixed set of string options.
    Enum { options: Vec<String> },
    /// Reference to another solver by tag.
    Solver,
}

static TYPED_FLAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(int|float|bool)(:([0-9a-zA-Z.-]+):([0-9a-zA-Z.-]+))?").expect("valid regex")
});

impl FlagKind {
    /// Parse a type descriptor such as `int:1:10`, `bool:on:off` or `opt:a:b:c`.
    ///
    /// Returns `None` for descriptors this crate does not understand; such
    /// flags are skipped when building the identity.
    pub fn parse(descriptor: &str) -> Option<FlagKind> {
        if let Some(caps) = TYPED_FLAG.captures(descriptor) {
            let bounds = caps.get(3).zip(caps.get(4)).map(|(a, b)| (a.as_str(), b.as_str()));
            return match (&caps[1], bounds) {
                ("int", None) => Some(FlagKind::Int),
                ("int", Some((min, max))) => Some(FlagKind::IntRange {
                    min: min.parse().unwrap_or(0),
                    max: max.parse().unwrap_or(0),
                }),
                ("float", None) => Some(FlagKind::Float),
                ("float", Some((min, max))) => Some(FlagKind::FloatRange {
                    min: min.parse().unwrap_or(1.0),
                    max: max.parse().unwrap_or(0.0),
                }),
                ("bool", None) => Some(FlagKind::Bool),
                ("bool", Some((on, off))) => Some(FlagKind::BoolOnOff {
                    on: on.to_string(),
                    off: off.to_string(),
                }),
                _ => None,
            };
        }
        if descriptor == "string" {
            return Some(FlagKind::String);
        }
        if descriptor == "solver" {
            return Some(FlagKind::Solver);
        }
        descriptor.strip_prefix("opt:").map(|rest| FlagKind::Enum {
            options: rest.split(':').map(str::to_string).collect(),
        })
    }

    /// Interpret the textual default from the descriptor as a typed value.
    pub fn parse_default(&self, text: &str) -> Value {
        match self {
            FlagKind::Int | FlagKind::IntRange { .. } => {
                Value::from(text.trim().parse::<i64>().unwrap_or(0))
            }
            FlagKind::Float | FlagKind::FloatRange { .. } => {
                Value::from(text.trim().parse::<f64>().unwrap_or(0.0))
            }
            FlagKind::Bool => Value::Bool(text == "true"),
            FlagKind::BoolOnOff { on, off } => {
                if text == on {
                    Value::Bool(true)
                } else if text == off {
                    Value::Bool(false)
                } else {
                    Value::Bool(text == "true")
                }
            }
            FlagKind::String | FlagKind::Enum { .. } | FlagKind::Solver => {
                Value::String(text.to_string())
            }
        }
    }

    /// Render a value as the single argument that follows the flag.
    ///
    /// Returns `None` for plain booleans, which are presence-only switches.
    pub fn encode(&self, value: &Value) -> Option<String> {
        match self {
            FlagKind::Bool => None,
            FlagKind::BoolOnOff { on, off } => Some(match value {
                Value::Bool(true) => on.clone(),
                Value::Bool(false) => off.clone(),
                Value::String(s) if s == on || s == off => s.clone(),
                Value::String(s) if s == "true" => on.clone(),
                _ => off.clone(),
            }),
            _ => Some(value_to_arg(value)),
        }
    }

    /// Normalize a persisted value into the in-memory representation.
    ///
    /// On/off flags are stored as booleans so that editing code does not need
    /// to know the tokens.
    pub fn normalize(&self, value: Value) -> Value {
        match (self, value) {
            (FlagKind::BoolOnOff { on, .. }, Value::String(s)) => Value::Bool(&s == on),
            (_, v) => v,
        }
    }
}

/// Render a JSON value as a command-line argument (strings without quotes).
pub fn value_to_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One solver-specific flag declared in the capability dump.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraFlag {
    pub name: String,
    pub description: String,
    pub kind: FlagKind,
    pub default: Value,
}

impl ExtraFlag {
    /// Parse the `[name, description, type, default]` array form.
    fn from_json(value: &Value) -> Option<ExtraFlag> {
        let parts = value.as_array()?;
        if parts.len() != 4 {
            return None;
        }
        let name = parts[0].as_str()?.to_string();
        let descriptor = parts[2].as_str().unwrap_or_default();
        let Some(kind) = FlagKind::parse(descriptor) else {
            debug!(flag = %name, descriptor, "skipping extra flag with unknown type");
            return None;
        };
        let default = kind.parse_default(&value_to_arg(&parts[3]));
        Some(ExtraFlag {
            name,
            description: parts[1].as_str().unwrap_or_default().to_string(),
            kind,
            default,
        })
    }
}

/// Shape of one entry in the `--solvers-json` array.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    executable: String,
    #[serde(default)]
    mznlib: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    std_flags: Vec<String>,
    #[serde(default)]
    extra_flags: Vec<Value>,
    #[serde(default)]
    required_flags: Vec<String>,
    input_type: Option<String>,
    #[serde(default)]
    supports_mzn: bool,
    #[serde(default = "default_true")]
    supports_fzn: bool,
    #[serde(default = "default_true")]
    needs_solns2_out: bool,
    #[serde(default, rename = "isGUIApplication")]
    is_gui_application: bool,
    #[serde(default)]
    extra_info: ExtraInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtraInfo {
    #[serde(default)]
    executable: String,
    #[serde(default)]
    config_file: String,
    #[serde(default)]
    is_default: bool,
    #[serde(default)]
    default_flags: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn non_empty_path(s: String) -> Option<PathBuf> {
    (!s.is_empty()).then(|| PathBuf::from(s))
}

/// Static description of one installed solver backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolverIdentity {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Executable as written in the solver configuration file.
    pub executable: String,
    /// Executable resolved by the toolchain, if it found one.
    pub executable_resolved: Option<PathBuf>,
    pub mznlib: String,
    pub tags: Vec<String>,
    pub std_flags: Vec<String>,
    pub extra_flags: Vec<ExtraFlag>,
    pub required_flags: Vec<String>,
    pub default_flags: Vec<String>,
    pub input_type: InputType,
    /// Whether output needs the post-processing adapter (`solns2out`).
    pub needs_solns2out: bool,
    pub is_gui_application: bool,
    pub is_default: bool,
    pub config_file: Option<PathBuf>,
}

impl SolverIdentity {
    /// Build an identity from one capability-dump object.
    pub fn from_json(value: &Value) -> Result<SolverIdentity, serde_json::Error> {
        let d: Descriptor = serde_json::from_value(value.clone())?;
        Ok(Self::from_descriptor(d))
    }

    fn from_descriptor(d: Descriptor) -> SolverIdentity {
        let extra_flags = d.extra_flags.iter().filter_map(ExtraFlag::from_json).collect();
        SolverIdentity {
            input_type: InputType::from_descriptor(
                d.input_type.as_deref(),
                d.supports_mzn,
                d.supports_fzn,
            ),
            id: d.id,
            name: d.name,
            version: d.version,
            executable: d.executable,
            executable_resolved: non_empty_path(d.extra_info.executable),
            mznlib: d.mznlib,
            tags: d.tags,
            std_flags: d.std_flags,
            extra_flags,
            required_flags: d.required_flags,
            default_flags: d.extra_info.default_flags,
            needs_solns2out: d.needs_solns2_out,
            is_gui_application: d.is_gui_application,
            is_default: d.extra_info.is_default,
            config_file: non_empty_path(d.extra_info.config_file),
        }
    }

    /// Parse the full `--solvers-json` array.
    pub fn parse_descriptor_list(text: &str) -> Result<Vec<SolverIdentity>, serde_json::Error> {
        let descriptors: Vec<Descriptor> = serde_json::from_str(text)?;
        Ok(descriptors.into_iter().map(Self::from_descriptor).collect())
    }

    /// `id@version`, the form passed to `--solver`.
    pub fn tag(&self) -> String {
        if self.version.is_empty() {
            self.id.clone()
        } else {
            format!("{}@{}", self.id, self.version)
        }
    }

    /// Whether this solver accepts the given standard flag.
    pub fn supports(&self, flag: &str) -> bool {
        TOOLCHAIN_FLAGS.contains(&flag) || self.std_flags.iter().any(|f| f == flag)
    }

    /// Whether every required flag has a configured default.
    pub fn has_all_required_flags(&self) -> bool {
        self.required_flags
            .iter()
            .all(|rf| self.default_flags.contains(rf))
    }

    /// Look up a declared extra flag by name.
    pub fn extra_flag(&self, name: &str) -> Option<&ExtraFlag> {
        self.extra_flags.iter().find(|f| f.name == name)
    }

    /// Match a user-supplied solver reference.
    ///
    /// Accepts the full id, `id@version`, the last dotted component of the id,
    /// the display name (case-insensitive) or any tag.
    pub fn matches(&self, query: &str) -> bool {
        if let Some((id, version)) = query.split_once('@') {
            return self.matches_id(id) && self.version == version;
        }
        self.matches_id(query)
            || self.name.eq_ignore_ascii_case(query)
            || self.tags.iter().any(|t| t == query)
    }

    fn matches_id(&self, id: &str) -> bool {
        self.id == id || self.id.rsplit('.').next() == Some(id)
    }

    /// Directory containing the resolved executable.
    pub fn install_dir(&self) -> Option<&Path> {
        self.executable_resolved.as_deref().and_then(Path::parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gecode() -> Value {
        json!({
            "id": "org.gecode.gecode",
            "name": "Gecode",
            "version": "6.3.0",
            "executable": "fzn-gecode",
            "tags": ["cp", "int", "float"],
            "stdFlags": ["-a", "-f", "-n", "-p", "-r", "-s", "-t"],
            "extraFlags": [
                ["--c-d", "Recomputation commit distance", "int", "8"],
                ["--restart", "Restart sequence", "opt:none:constant:linear:geometric", "none"],
                ["--use-nogoods", "Use no-goods from restarts", "bool:on:off", "off"],
                ["--restart-base", "Base for geometric restart", "float:1.0:10.0", "1.5"],
                ["--weird", "Unknown type", "matrix", "1"]
            ],
            "inputType": "FZN",
            "extraInfo": {
                "executable": "/opt/mzn/bin/fzn-gecode",
                "configFile": "/opt/mzn/share/solvers/gecode.msc",
                "isDefault": true,
                "defaultFlags": []
            }
        })
    }

    #[test]
    fn test_parse_flag_kinds() {
        assert_eq!(FlagKind::parse("int"), Some(FlagKind::Int));
        assert_eq!(
            FlagKind::parse("int:1:10"),
            Some(FlagKind::IntRange { min: 1, max: 10 })
        );
        assert_eq!(
            FlagKind::parse("bool:on:off"),
            Some(FlagKind::BoolOnOff {
                on: "on".into(),
                off: "off".into()
            })
        );
        assert_eq!(
            FlagKind::parse("opt:a:b"),
            Some(FlagKind::Enum {
                options: vec!["a".into(), "b".into()]
            })
        );
        assert_eq!(FlagKind::parse("solver"), Some(FlagKind::Solver));
        assert_eq!(FlagKind::parse("matrix"), None);
    }

    #[test]
    fn test_identity_from_json() {
        let id = SolverIdentity::from_json(&gecode()).unwrap();
        assert_eq!(id.tag(), "org.gecode.gecode@6.3.0");
        assert_eq!(id.input_type, InputType::FlatZinc);
        assert_eq!(id.extra_flags.len(), 4, "unknown flag type is skipped");
        assert!(id.is_default);
        assert_eq!(id.install_dir(), Some(Path::new("/opt/mzn/bin")));

        let nogoods = id.extra_flag("--use-nogoods").unwrap();
        assert_eq!(nogoods.default, Value::Bool(false));
        let cd = id.extra_flag("--c-d").unwrap();
        assert_eq!(cd.default, json!(8));
    }

    #[test]
    fn test_supports_and_matches() {
        let id = SolverIdentity::from_json(&gecode()).unwrap();
        assert!(id.supports("-a"));
        assert!(!id.supports("-v"));
        assert!(id.supports("--compiler-statistics"));

        assert!(id.matches("gecode"));
        assert!(id.matches("Gecode"));
        assert!(id.matches("org.gecode.gecode@6.3.0"));
        assert!(!id.matches("org.gecode.gecode@6.2.0"));
        assert!(id.matches("cp"));
        assert!(!id.matches("chuffed"));
    }

    #[test]
    fn test_on_off_encoding() {
        let kind = FlagKind::BoolOnOff {
            on: "yes".into(),
            off: "no".into(),
        };
        assert_eq!(kind.encode(&Value::Bool(true)).as_deref(), Some("yes"));
        assert_eq!(kind.encode(&Value::Bool(false)).as_deref(), Some("no"));
        assert_eq!(kind.normalize(json!("yes")), Value::Bool(true));
        assert_eq!(FlagKind::Bool.encode(&Value::Bool(true)), None);
        assert_eq!(FlagKind::Float.encode(&json!(0.25)).as_deref(), Some("0.25"));
    }

    #[test]
    fn test_required_flags() {
        let mut value = gecode();
        value["requiredFlags"] = json!(["--licence"]);
        let id = SolverIdentity::from_json(&value).unwrap();
        assert!(!id.has_all_required_flags());
    }

    #[test]
    fn test_legacy_input_flags() {
        let value = json!({"id": "a.b", "supportsMzn": true});
        let id = SolverIdentity::from_json(&value).unwrap();
        assert_eq!(id.input_type, InputType::ModelSource);
        assert!(id.needs_solns2out);
    }
}
