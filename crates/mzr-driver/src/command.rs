//! Compiling a [`SolveConfiguration`] into a toolchain command line.
//!
//! Each option maps to at most one flag and is emitted only when the bound
//! solver supports it; unsupported options are dropped without error.
//! Arguments come out in a fixed order: the preamble, core behaviour flags,
//! numeric flags, toolchain extra options, backend options, then inputs.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::config::{normalize_key, SolveConfiguration};
use crate::identity::{value_to_arg, FlagKind};

/// What the toolchain should do with the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationMode {
    /// Compile to FlatZinc and stop.
    CompileOnly,
    /// Solve already compiled input.
    Solve,
    /// Compile and solve.
    #[default]
    Both,
}

impl OperationMode {
    fn compiles(self) -> bool {
        matches!(self, OperationMode::CompileOnly | OperationMode::Both)
    }

    fn solves(self) -> bool {
        matches!(self, OperationMode::Solve | OperationMode::Both)
    }
}

/// A finished command line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandLine {
    pub args: Vec<String>,
    /// Directory to run in; defaults to the model's directory.
    pub working_dir: Option<PathBuf>,
    /// Directory to put ahead of the toolchain on `PATH`.
    pub path_prefix: Option<PathBuf>,
}

/// Builder for a [`CommandLine`].
#[derive(Debug, Clone)]
pub struct CommandBuilder<'a> {
    config: &'a SolveConfiguration,
    mode: OperationMode,
    model: Option<PathBuf>,
    data: Vec<PathBuf>,
    extra_args: Vec<String>,
    json_stream: bool,
    working_dir: Option<PathBuf>,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(config: &'a SolveConfiguration, mode: OperationMode) -> Self {
        Self {
            config,
            mode,
            model: None,
            data: Vec::new(),
            extra_args: Vec::new(),
            json_stream: true,
            working_dir: None,
        }
    }

    pub fn model(mut self, path: impl Into<PathBuf>) -> Self {
        self.model = Some(path.into());
        self
    }

    pub fn data(mut self, path: impl Into<PathBuf>) -> Self {
        self.data.push(path.into());
        self
    }

    /// Extra arguments appended after the inputs.
    pub fn extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Request JSON stream output (on by default).
    pub fn json_stream(mut self, enabled: bool) -> Self {
        self.json_stream = enabled;
        self
    }

    /// Override the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> CommandLine {
        let mut args = Vec::new();
        self.push_preamble(&mut args);
        self.push_core_flags(&mut args);
        self.push_numeric_flags(&mut args);
        self.push_extra_options(&mut args);
        self.push_backend_options(&mut args);

        if let Some(model) = &self.model {
            args.push(model.display().to_string());
        }
        args.extend(self.data.iter().map(|d| d.display().to_string()));
        args.extend(self.extra_args.iter().cloned());

        let working_dir = self.working_dir.clone().or_else(|| {
            self.model
                .as_deref()
                .and_then(Path::parent)
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
        });
        debug!(solver = %self.config.solver, ?args, "built command line");
        CommandLine {
            args,
            working_dir,
            path_prefix: self.config.identity.install_dir().map(Path::to_path_buf),
        }
    }

    fn supports(&self, flag: &str) -> bool {
        self.config.supports(flag)
    }

    fn push_preamble(&self, args: &mut Vec<String>) {
        args.push("--solver".into());
        args.push(self.config.identity.tag());
        if self.json_stream {
            args.push("--json-stream".into());
        }
        if self.mode == OperationMode::CompileOnly {
            args.push("--compile".into());
        }
    }

    fn push_core_flags(&self, args: &mut Vec<String>) {
        let c = self.config;
        if self.mode.solves() {
            if let Some(limit) = c.time_limit.filter(|_| self.supports("--time-limit")) {
                args.push("--time-limit".into());
                args.push(limit.as_millis().to_string());
            }
            if c.print_intermediate && (self.supports("-a") || self.supports("-i")) {
                args.push("--intermediate-solutions".into());
            }
            if c.num_solutions == 0 {
                if self.supports("-a") {
                    args.push("--all-solutions".into());
                }
            } else if c.num_solutions > 1 && self.supports("-n") {
                args.push("--num-solutions".into());
                args.push(c.num_solutions.to_string());
            }
            if c.num_optimal == 0 {
                if self.supports("-a-o") {
                    args.push("--all-optimal".into());
                }
            } else if c.num_optimal > 1 && self.supports("-n-o") {
                args.push("--num-optimal".into());
                args.push(c.num_optimal.to_string());
            }
        }
        if self.mode.compiles() && c.verbose_compilation && self.supports("--verbose-compilation") {
            args.push("--verbose-compilation".into());
        }
        if self.mode.solves() && c.verbose_solving && self.supports("-v") {
            args.push("--verbose-solving".into());
        }
        if self.mode.compiles() && c.compilation_stats && self.supports("--compiler-statistics") {
            args.push("--compiler-statistics".into());
        }
        if self.mode.solves() && c.solving_stats && self.supports("-s") {
            args.push("--solver-statistics".into());
        }
        if c.output_timing && self.supports("--output-time") {
            args.push("--output-time".into());
        }
        if self.mode.compiles() && c.output_objective && c.supports_output_objective() {
            args.push("--output-objective".into());
        }
    }

    fn push_numeric_flags(&self, args: &mut Vec<String>) {
        let c = self.config;
        if self.mode.compiles() {
            if c.optimization_level != 1 && self.supports("-O") {
                args.push(format!("-O{}", c.optimization_level));
            }
            if self.supports("-D") {
                for fragment in &c.additional_data {
                    args.push("-D".into());
                    args.push(fragment.clone());
                }
            }
        }
        if self.mode.solves() {
            if c.num_threads > 1 && self.supports("-p") {
                args.push("--parallel".into());
                args.push(c.num_threads.to_string());
            }
            if let (Some(seed), true) = (&c.random_seed, self.supports("-r")) {
                args.push("--random-seed".into());
                args.push(value_to_arg(seed));
            }
            if c.free_search && self.supports("-f") {
                args.push("--free-search".into());
            }
        }
    }

    fn push_extra_options(&self, args: &mut Vec<String>) {
        for (key, value) in &self.config.extra_options {
            // Underscore keys are metadata, never flags.
            if key.starts_with('_') {
                continue;
            }
            let flag = normalize_key(key);
            let kind = self.config.identity.extra_flag(&flag).map(|f| &f.kind);
            push_option(args, &flag, kind, value);
        }
    }

    fn push_backend_options(&self, args: &mut Vec<String>) {
        if !self.mode.solves() {
            return;
        }
        for (key, value) in &self.config.backend_options {
            match value {
                Value::Bool(false) | Value::Null => {}
                Value::Bool(true) => {
                    args.push("--backend-flag".into());
                    args.push(key.clone());
                }
                other => {
                    args.push("--backend-flag".into());
                    args.push(key.clone());
                    args.push("--backend-flag".into());
                    args.push(value_to_arg(other));
                }
            }
        }
    }
}

/// Emit one option according to its declared kind.
fn push_option(args: &mut Vec<String>, flag: &str, kind: Option<&FlagKind>, value: &Value) {
    match (kind, value) {
        (Some(kind @ FlagKind::BoolOnOff { .. }), v) => {
            args.push(flag.to_string());
            args.extend(kind.encode(v));
        }
        (_, Value::Bool(true)) => args.push(flag.to_string()),
        (_, Value::Bool(false) | Value::Null) => {}
        (_, v) => {
            args.push(flag.to_string());
            args.push(value_to_arg(v));
        }
    }
}
