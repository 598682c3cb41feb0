//! Solve configurations: one bundle of run options bound to a solver.
//!
//! Configurations are inert data. A session snapshots the configuration it
//! was started with, so editing a configuration never affects a running solve.
//!
//! The persisted form is the toolchain's parameter-file JSON: flag-like keys
//! (`--time-limit`, `-n`, `--backend-flags`, ...) mapped to values. Short and
//! long spellings are accepted interchangeably, keys without a leading dash
//! are treated as long flags, and unrecognised keys are kept as extra options.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::identity::{value_to_arg, FlagKind, InputType, SolverIdentity};
use crate::registry::DriverRegistry;

/// Run options for one solver.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveConfiguration {
    pub identity: Arc<SolverIdentity>,
    /// Solver reference as persisted (normally `id@version`).
    pub solver: String,
    /// Built-in configurations are derived from an identity, not a file.
    pub is_builtin: bool,
    /// Wall-clock limit passed to the toolchain; `None` means unlimited.
    pub time_limit: Option<Duration>,
    pub print_intermediate: bool,
    /// Solutions to print for satisfaction problems; 0 means all.
    pub num_solutions: u32,
    /// Optimal solutions to print; 0 means all.
    pub num_optimal: u32,
    pub verbose_compilation: bool,
    pub verbose_solving: bool,
    pub compilation_stats: bool,
    pub solving_stats: bool,
    pub output_timing: bool,
    pub output_objective: bool,
    /// Compiler optimisation level, 0 to 5.
    pub optimization_level: u8,
    /// Data fragments passed with `-D`.
    pub additional_data: Vec<String>,
    pub num_threads: u32,
    pub random_seed: Option<Value>,
    pub free_search: bool,
    /// Options routed to the toolchain, keyed by normalized flag.
    pub extra_options: BTreeMap<String, Value>,
    /// Options forwarded verbatim to the solver backend.
    pub backend_options: BTreeMap<String, Value>,
    /// File this configuration was loaded from.
    pub param_file: Option<PathBuf>,
    /// Edited since it was loaded or saved.
    pub modified: bool,
}

/// A loaded configuration plus any non-fatal problems found while loading.
pub type Loaded = (SolveConfiguration, Vec<String>);

impl SolveConfiguration {
    /// Default configuration for a solver.
    pub fn builtin(identity: Arc<SolverIdentity>) -> Self {
        Self::with_identity(identity, true)
    }

    fn with_identity(identity: Arc<SolverIdentity>, is_builtin: bool) -> Self {
        Self {
            solver: identity.tag(),
            identity,
            is_builtin,
            time_limit: None,
            print_intermediate: true,
            num_solutions: 1,
            num_optimal: 1,
            verbose_compilation: false,
            verbose_solving: false,
            compilation_stats: false,
            solving_stats: false,
            output_timing: false,
            output_objective: true,
            optimization_level: 1,
            additional_data: Vec::new(),
            num_threads: 1,
            random_seed: None,
            free_search: false,
            extra_options: BTreeMap::new(),
            backend_options: BTreeMap::new(),
            param_file: None,
            modified: false,
        }
    }

    /// Whether the bound solver accepts a standard flag.
    pub fn supports(&self, flag: &str) -> bool {
        self.identity.supports(flag)
    }

    /// Whether `--output-objective` applies to this solver.
    pub fn supports_output_objective(&self) -> bool {
        self.identity.input_type != InputType::ModelSource
            || self.identity.supports("--output-objective")
    }

    /// Load a persisted configuration file.
    pub fn load_json_file(path: &Path, registry: &DriverRegistry) -> Result<Loaded, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let value: Value =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse { name, source })?;
        let (mut config, warnings) = Self::from_json(&value, registry)?;
        config.param_file = Some(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()));
        Ok((config, warnings))
    }

    /// Build a configuration from the parameter-file JSON object.
    ///
    /// An unresolvable solver reference falls back to the registry's default
    /// solver and is reported as a warning.
    pub fn from_json(value: &Value, registry: &DriverRegistry) -> Result<Loaded, ConfigError> {
        let object = value.as_object().ok_or(ConfigError::NotAnObject)?;
        let mut warnings = Vec::new();

        let reference = object
            .get("--solver")
            .or_else(|| object.get("solver"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let identity = resolve_solver(registry, &[reference], &mut warnings)?;

        let mut config = Self::with_identity(identity, false);
        for (raw_key, value) in object {
            config.apply_key(&normalize_key(raw_key), value);
        }
        config.normalize_extra_options();

        for w in &warnings {
            warn!(warning = %w, "solver configuration");
        }
        Ok((config, warnings))
    }

    fn apply_key(&mut self, key: &str, value: &Value) {
        match key {
            "--solver" => self.solver = value.as_str().unwrap_or_default().to_string(),
            "-t" | "--time-limit" => {
                let ms = to_int(value, 0);
                self.time_limit = (ms > 0).then(|| Duration::from_millis(ms as u64));
            }
            "-a" | "--all-solutions" => {
                if to_bool(value, true) {
                    self.num_solutions = 0;
                    self.print_intermediate = true;
                }
            }
            "-i" | "--intermediate" | "--intermediate-solutions" => {
                self.print_intermediate = to_bool(value, true);
            }
            "--all-satisfaction" => {
                if to_bool(value, true) {
                    self.num_solutions = 0;
                }
            }
            "-n" | "--num-solutions" => self.num_solutions = to_int(value, 1).max(0) as u32,
            "-a-o" | "--all-optimal" => {
                if to_bool(value, true) {
                    self.num_optimal = 0;
                }
            }
            "-n-o" | "--num-optimal" => self.num_optimal = to_int(value, 1).max(0) as u32,
            "-v" | "--verbose" => {
                self.verbose_compilation = to_bool(value, false);
                self.verbose_solving = to_bool(value, false);
            }
            "--verbose-compilation" => self.verbose_compilation = to_bool(value, false),
            "--verbose-solving" => self.verbose_solving = to_bool(value, false),
            "-s" | "--statistics" => {
                self.compilation_stats = to_bool(value, false);
                self.solving_stats = to_bool(value, false);
            }
            "--compiler-statistics" => self.compilation_stats = to_bool(value, false),
            "--solver-statistics" => self.solving_stats = to_bool(value, false),
            "--output-time" => self.output_timing = to_bool(value, false),
            "--output-objective" => self.output_objective = to_bool(value, false),
            "-O" => self.optimization_level = to_int(value, 1).clamp(0, 5) as u8,
            "-D" | "--cmdline-data" => match value {
                Value::Array(items) => self
                    .additional_data
                    .extend(items.iter().map(value_to_arg)),
                other => self
                    .additional_data
                    .push(value_to_arg(other)),
            },
            "-p" | "--parallel" => self.num_threads = to_int(value, 1).max(1) as u32,
            "-r" | "--random-seed" => {
                self.random_seed = (!value.is_null()).then(|| value.clone());
            }
            "-f" | "--free-search" => self.free_search = to_bool(value, false),
            "--backend-flags" | "--fzn-flags" | "--flatzinc-flags" | "--mzn-flags"
            | "--minizinc-flags" => match value {
                Value::String(text) => self.backend_options.extend(parse_arg_list(text)),
                Value::Object(map) => self
                    .backend_options
                    .extend(map.iter().map(|(k, v)| (k.clone(), v.clone()))),
                _ => debug!(key, "ignoring backend flags that are neither string nor object"),
            },
            other => match optimization_switch(other) {
                Some(level) if to_bool(value, false) => self.optimization_level = level,
                _ => {
                    self.extra_options.insert(key.to_string(), value.clone());
                }
            },
        }
    }

    /// Store on/off extra flags as booleans.
    fn normalize_extra_options(&mut self) {
        for flag in &self.identity.extra_flags {
            if let FlagKind::BoolOnOff { .. } = flag.kind {
                if let Some(value) = self.extra_options.remove(&flag.name) {
                    self.extra_options
                        .insert(flag.name.clone(), flag.kind.normalize(value));
                }
            }
        }
    }

    /// Load the older IDE configuration format (camelCase keys).
    pub fn from_legacy_json(value: &Value, registry: &DriverRegistry) -> Result<Loaded, ConfigError> {
        let sco = value.as_object().ok_or(ConfigError::NotAnObject)?;
        let mut warnings = Vec::new();

        let id = str_field(sco, "id").unwrap_or_default();
        let version = str_field(sco, "version").unwrap_or_default();
        let tagged = format!("{id}@{version}");
        let identity = resolve_solver(registry, &[tagged.as_str(), id], &mut warnings)?;
        let mut config = Self::with_identity(identity, false);

        if let Some(ms) = sco.get("timeLimit").and_then(Value::as_f64) {
            config.time_limit = (ms > 0.0).then(|| Duration::from_millis(ms as u64));
        }
        if let Some(b) = sco.get("printIntermediate").and_then(Value::as_bool) {
            config.print_intermediate = b;
        }
        if let Some(n) = sco.get("stopAfter").and_then(Value::as_f64) {
            config.num_solutions = n.max(0.0) as u32;
        }
        if let Some(b) = sco.get("verboseFlattening").and_then(Value::as_bool) {
            config.verbose_compilation = b;
        }
        if let Some(b) = sco.get("flatteningStats").and_then(Value::as_bool) {
            config.compilation_stats = b;
        }
        if let Some(n) = sco.get("optimizationLevel").and_then(Value::as_f64) {
            config.optimization_level = n.clamp(0.0, 5.0) as u8;
        }
        if let Some(data) = str_field(sco, "additionalData").filter(|s| !s.is_empty()) {
            config.additional_data.push(data.to_string());
        }
        if let Some(cmdline) =
            str_field(sco, "additionalCompilerCommandline").filter(|s| !s.is_empty())
        {
            config.extra_options.extend(parse_arg_list(cmdline));
        }
        if let Some(n) = sco.get("nThreads").and_then(Value::as_f64) {
            config.num_threads = n.max(1.0) as u32;
        }
        if let Some(seed) = sco.get("randomSeed").filter(|v| v.is_number()) {
            config.random_seed = Some(seed.clone());
        }
        if let Some(flags) = str_field(sco, "solverFlags").filter(|s| !s.is_empty()) {
            config.backend_options.extend(parse_arg_list(flags));
        }
        if let Some(b) = sco.get("freeSearch").and_then(Value::as_bool) {
            config.free_search = b;
        }
        if let Some(b) = sco.get("verboseSolving").and_then(Value::as_bool) {
            config.verbose_solving = b;
        }
        if let Some(b) = sco.get("outputTiming").and_then(Value::as_bool) {
            config.output_timing = b;
        }
        if let Some(b) = sco.get("solvingStats").and_then(Value::as_bool) {
            config.solving_stats = b;
        }

        let use_extra = sco
            .get("useExtraOptions")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if let (true, Some(Value::Object(extra))) = (use_extra, sco.get("extraOptions")) {
            for (name, value) in extra {
                // Values equal to the declared default carry no information.
                let is_default = config
                    .identity
                    .extra_flag(name)
                    .is_some_and(|f| value_to_arg(&f.default) == value_to_arg(value));
                if !is_default {
                    config.extra_options.insert(name.clone(), value.clone());
                }
            }
        }
        config.normalize_extra_options();
        Ok((config, warnings))
    }

    /// Serialize to the parameter-file JSON object.
    ///
    /// Options the solver does not support are left out, and on/off flags are
    /// written with their tokens.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("solver".into(), Value::from(self.solver.clone()));
        if let Some(limit) = self.time_limit {
            out.insert("time-limit".into(), Value::from(limit.as_millis() as u64));
        }
        if self.supports("-a") || self.supports("-i") {
            out.insert(
                "intermediate-solutions".into(),
                Value::from(self.print_intermediate),
            );
        }
        if self.num_solutions > 1 && self.supports("-n") {
            out.insert("num-solutions".into(), Value::from(self.num_solutions));
        }
        if self.num_solutions == 0 && self.supports("-a") {
            out.insert("all-satisfaction".into(), Value::Bool(true));
        }
        if self.num_optimal > 1 && self.supports("-n-o") {
            out.insert("num-optimal".into(), Value::from(self.num_optimal));
        }
        if self.num_optimal == 0 && self.supports("-a-o") {
            out.insert("all-optimal".into(), Value::Bool(true));
        }
        if self.verbose_compilation {
            out.insert("verbose-compilation".into(), Value::Bool(true));
        }
        if self.verbose_solving && self.supports("-v") {
            out.insert("verbose-solving".into(), Value::Bool(true));
        }
        if self.compilation_stats {
            out.insert("compiler-statistics".into(), Value::Bool(true));
        }
        if self.solving_stats && self.supports("-s") {
            out.insert("solver-statistics".into(), Value::Bool(true));
        }
        if self.output_timing {
            out.insert("output-time".into(), Value::Bool(true));
        }
        if self.output_objective && self.supports_output_objective() {
            out.insert("output-objective".into(), Value::Bool(true));
        }
        if self.optimization_level != 1 {
            out.insert("-O".into(), Value::from(self.optimization_level));
        }
        if !self.additional_data.is_empty() {
            out.insert("cmdline-data".into(), Value::from(self.additional_data.clone()));
        }
        if self.num_threads > 1 && self.supports("-p") {
            out.insert("parallel".into(), Value::from(self.num_threads));
        }
        if let (Some(seed), true) = (&self.random_seed, self.supports("-r")) {
            out.insert("random-seed".into(), seed.clone());
        }
        if self.free_search && self.supports("-f") {
            out.insert("free-search".into(), Value::Bool(true));
        }
        for (key, value) in &self.extra_options {
            let value = match self.identity.extra_flag(key) {
                Some(flag) if matches!(flag.kind, FlagKind::BoolOnOff { .. }) => {
                    flag.kind.encode(value).map(Value::from).unwrap_or_default()
                }
                _ => value.clone(),
            };
            out.insert(key.clone(), value);
        }
        if !self.backend_options.is_empty() {
            let backend: Map<String, Value> = self
                .backend_options
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            out.insert("backend-flags".into(), Value::Object(backend));
        }
        Value::Object(out)
    }

    /// Display name, e.g. `Gecode 6.3.0` or `tuned (Gecode 6.3.0) *`.
    pub fn name(&self) -> String {
        let mut parts = Vec::new();
        let solver = format!("{} {}", self.identity.name, self.identity.version);
        if self.is_builtin {
            parts.push(solver);
        } else {
            parts.push(match &self.param_file {
                Some(path) => path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                None => "Unsaved Configuration".to_string(),
            });
            parts.push(format!("({solver})"));
        }
        if self.modified {
            parts.push("*".to_string());
        }
        parts.join(" ")
    }

    /// Whether the options shared between configurations agree.
    ///
    /// Built-in configurations always match. Flags only one side supports
    /// are not compared.
    pub fn synced_options_match(&self, other: &SolveConfiguration) -> bool {
        if self.is_builtin || other.is_builtin {
            return true;
        }
        let both = |flag: &str| self.supports(flag) && other.supports(flag);
        let intermediate = |c: &SolveConfiguration| c.supports("-a") || c.supports("-i");

        self.time_limit == other.time_limit
            && !(intermediate(self)
                && intermediate(other)
                && self.print_intermediate != other.print_intermediate)
            && !(both("-n")
                && (self.num_solutions > 0 || other.num_solutions > 0)
                && self.num_solutions != other.num_solutions)
            && !(both("-a")
                && (self.num_solutions == 0 || other.num_solutions == 0)
                && self.num_solutions != other.num_solutions)
            && !(both("-n-o")
                && (self.num_optimal > 0 || other.num_optimal > 0)
                && self.num_optimal != other.num_optimal)
            && !(both("-a-o")
                && (self.num_optimal == 0 || other.num_optimal == 0)
                && self.num_optimal != other.num_optimal)
            && self.verbose_compilation == other.verbose_compilation
            && !(both("-v") && self.verbose_solving != other.verbose_solving)
            && self.compilation_stats == other.compilation_stats
            && !(both("-s") && self.solving_stats != other.solving_stats)
            && self.output_timing == other.output_timing
            && !(self.supports_output_objective()
                && other.supports_output_objective()
                && self.output_objective != other.output_objective)
    }
}

/// Normalize a persisted key: anything not starting with `-` or `_` is a long flag.
pub fn normalize_key(key: &str) -> String {
    if key.starts_with('-') || key.starts_with('_') {
        key.to_string()
    } else {
        format!("--{key}")
    }
}

fn optimization_switch(key: &str) -> Option<u8> {
    let n = key.strip_prefix("-O")?.parse::<u8>().ok()?;
    (n <= 5).then_some(n)
}

fn resolve_solver(
    registry: &DriverRegistry,
    candidates: &[&str],
    warnings: &mut Vec<String>,
) -> Result<Arc<SolverIdentity>, ConfigError> {
    for candidate in candidates {
        match registry.lookup(candidate) {
            Ok(identity) => return Ok(identity),
            Err(e) => debug!(solver = %candidate, error = %e, "solver lookup failed"),
        }
    }
    let wanted = candidates.first().copied().unwrap_or_default();
    warnings.push(format!("Failed to find solver {wanted}"));
    warnings.push("Using default solver instead.".to_string());
    registry.default_solver().ok_or(ConfigError::NoFallbackSolver)
}

fn str_field<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

fn to_int(value: &Value, default: i64) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(default),
        Value::String(s) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn to_bool(value: &Value, default: bool) -> bool {
    value.as_bool().unwrap_or(default)
}

/// Split a shell-like argument string into flag/value pairs.
///
/// Quotes group words, backslash escapes the next character. A flag followed
/// by a non-flag word takes it as its value; a flag followed by another flag
/// (or nothing) is a boolean switch, as is a bare word.
pub fn parse_arg_list(text: &str) -> BTreeMap<String, Value> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    let mut quote: Option<char> = None;
    for c in text.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match (c, quote) {
            ('\\', _) => escaped = true,
            ('"' | '\'', None) => quote = Some(c),
            (c, Some(q)) if c == q => {
                quote = None;
                words.push(std::mem::take(&mut current));
            }
            (' ', None) => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            (c, _) => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }

    let mut map = BTreeMap::new();
    let mut flag: Option<String> = None;
    for word in words {
        if word.starts_with('-') {
            if let Some(prev) = flag.replace(word) {
                map.insert(prev, Value::Bool(true));
            }
        } else if let Some(f) = flag.take() {
            map.insert(f, Value::String(word));
        } else {
            map.insert(word, Value::Bool(true));
        }
    }
    if let Some(f) = flag {
        map.insert(f, Value::Bool(true));
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DriverRegistry;
    use serde_json::json;

    fn registry() -> DriverRegistry {
        let gecode = json!({
            "id": "org.gecode.gecode",
            "name": "Gecode",
            "version": "6.3.0",
            "stdFlags": ["-a", "-f", "-n", "-p", "-r", "-s", "-t"],
            "extraFlags": [
                ["--use-nogoods", "Use no-goods", "bool:on:off", "off"],
                ["--c-d", "Commit distance", "int", "8"]
            ],
            "inputType": "FZN",
            "extraInfo": {"isDefault": true}
        });
        let cbc = json!({
            "id": "org.minizinc.mip.coin-bc",
            "name": "COIN-BC",
            "version": "2.10.5",
            "stdFlags": ["-a", "-i", "-p", "-s", "-v", "-r"],
            "inputType": "FZN"
        });
        DriverRegistry::with_solvers(vec![
            SolverIdentity::from_json(&gecode).unwrap(),
            SolverIdentity::from_json(&cbc).unwrap(),
        ])
    }

    #[test]
    fn test_builtin_defaults() {
        let reg = registry();
        let config = SolveConfiguration::builtin(reg.find_solver("gecode").unwrap());
        assert_eq!(config.solver, "org.gecode.gecode@6.3.0");
        assert!(config.print_intermediate);
        assert_eq!(config.num_solutions, 1);
        assert_eq!(config.optimization_level, 1);
        assert_eq!(config.name(), "Gecode 6.3.0");
    }

    #[test]
    fn test_short_and_long_keys() {
        let reg = registry();
        let short = json!({"solver": "gecode", "-t": 5000, "-n": 3, "-p": 4, "-f": true});
        let long = json!({"--solver": "gecode", "time-limit": 5000, "num-solutions": 3, "parallel": 4, "free-search": true});
        let (a, wa) = SolveConfiguration::from_json(&short, &reg).unwrap();
        let (b, wb) = SolveConfiguration::from_json(&long, &reg).unwrap();
        assert!(wa.is_empty() && wb.is_empty());
        assert_eq!(a.time_limit, Some(Duration::from_secs(5)));
        assert_eq!(a.num_solutions, 3);
        assert_eq!(a.num_threads, 4);
        assert!(a.free_search);
        assert_eq!(
            (a.time_limit, a.num_solutions, a.num_threads, a.free_search),
            (b.time_limit, b.num_solutions, b.num_threads, b.free_search)
        );
    }

    #[test]
    fn test_unknown_keys_preserved_and_on_off_normalized() {
        let reg = registry();
        let doc = json!({
            "solver": "org.gecode.gecode@6.3.0",
            "use-nogoods": "on",
            "mystery": 7,
            "_meta": "x"
        });
        let (config, _) = SolveConfiguration::from_json(&doc, &reg).unwrap();
        assert_eq!(config.extra_options["--use-nogoods"], Value::Bool(true));
        assert_eq!(config.extra_options["--mystery"], json!(7));
        assert_eq!(config.extra_options["_meta"], json!("x"));

        let out = config.to_json();
        assert_eq!(out["--use-nogoods"], json!("on"));
        assert_eq!(out["--mystery"], json!(7));
    }

    #[test]
    fn test_backend_flags_as_string_or_object() {
        let reg = registry();
        let doc = json!({"solver": "gecode", "backend-flags": "--restart luby -v"});
        let (config, _) = SolveConfiguration::from_json(&doc, &reg).unwrap();
        assert_eq!(config.backend_options["--restart"], json!("luby"));
        assert_eq!(config.backend_options["-v"], json!(true));

        let doc = json!({"solver": "gecode", "--backend-flags": {"--restart": "luby"}});
        let (config, _) = SolveConfiguration::from_json(&doc, &reg).unwrap();
        assert_eq!(config.backend_options["--restart"], json!("luby"));
    }

    #[test]
    fn test_unknown_solver_falls_back_with_warnings() {
        let reg = registry();
        let doc = json!({"solver": "org.nowhere.none", "-a": true});
        let (config, warnings) = SolveConfiguration::from_json(&doc, &reg).unwrap();
        assert_eq!(config.identity.id, "org.gecode.gecode");
        assert_eq!(config.num_solutions, 0);
        assert_eq!(warnings.len(), 2);

        let empty = DriverRegistry::new();
        assert!(matches!(
            SolveConfiguration::from_json(&doc, &empty),
            Err(ConfigError::NoFallbackSolver)
        ));
    }

    #[test]
    fn test_not_an_object() {
        let reg = registry();
        assert!(matches!(
            SolveConfiguration::from_json(&json!([1, 2]), &reg),
            Err(ConfigError::NotAnObject)
        ));
    }

    #[test]
    fn test_optimization_switches() {
        let reg = registry();
        let (config, _) =
            SolveConfiguration::from_json(&json!({"solver": "gecode", "-O3": true}), &reg).unwrap();
        assert_eq!(config.optimization_level, 3);
        let (config, _) =
            SolveConfiguration::from_json(&json!({"solver": "gecode", "-O": 0}), &reg).unwrap();
        assert_eq!(config.optimization_level, 0);
        assert_eq!(config.to_json()["-O"], json!(0));
    }

    #[test]
    fn test_to_json_skips_unsupported() {
        let reg = registry();
        let mut config = SolveConfiguration::builtin(reg.find_solver("gecode").unwrap());
        config.verbose_solving = true;
        config.num_optimal = 0;
        config.num_threads = 2;
        let out = config.to_json();
        assert!(out.get("verbose-solving").is_none(), "gecode has no -v");
        assert!(out.get("all-optimal").is_none(), "gecode has no -a-o");
        assert_eq!(out["parallel"], json!(2));
    }

    #[test]
    fn test_legacy_format() {
        let reg = registry();
        let doc = json!({
            "id": "org.minizinc.mip.coin-bc",
            "version": "2.10.5",
            "timeLimit": 1000,
            "stopAfter": 0,
            "solverFlags": "--cuts off",
            "useExtraOptions": true,
            "extraOptions": {"--gap": "0.01"}
        });
        let (config, warnings) = SolveConfiguration::from_legacy_json(&doc, &reg).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(config.identity.name, "COIN-BC");
        assert_eq!(config.time_limit, Some(Duration::from_secs(1)));
        assert_eq!(config.num_solutions, 0);
        assert_eq!(config.backend_options["--cuts"], json!("off"));
        assert_eq!(config.extra_options["--gap"], json!("0.01"));
    }

    #[test]
    fn test_parse_arg_list_quoting() {
        let map = parse_arg_list(r#"--name "two words" --flag --path 'a b\'c' bare"#);
        assert_eq!(map["--name"], json!("two words"));
        assert_eq!(map["--flag"], json!(true));
        assert_eq!(map["--path"], json!("a b'c"));
        assert_eq!(map["bare"], json!(true));
    }

    #[test]
    fn test_synced_options() {
        let reg = registry();
        let gecode = reg.find_solver("gecode").unwrap();
        let mut a = SolveConfiguration::builtin(gecode.clone());
        let mut b = SolveConfiguration::builtin(gecode);
        a.is_builtin = false;
        b.is_builtin = false;
        assert!(a.synced_options_match(&b));
        b.time_limit = Some(Duration::from_secs(1));
        assert!(!a.synced_options_match(&b));
        b.time_limit = None;
        b.verbose_solving = true; // gecode lacks -v, so not compared
        assert!(a.synced_options_match(&b));
    }
}
