//! A fake `minizinc` built from a shell script in a temp directory.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mzr_driver::{DriverRegistry, SolveConfiguration};
use tempfile::TempDir;

pub const VERSION_LINE: &str = "MiniZinc to FlatZinc converter, version 2.8.5, build 1234";

pub const SOLVERS_JSON: &str = r#"[
  {
    "id": "org.gecode.gecode",
    "name": "Gecode",
    "version": "6.3.0",
    "executable": "",
    "mznlib": "gecode",
    "tags": ["cp", "int", "float", "set"],
    "stdFlags": ["-a", "-f", "-n", "-p", "-r", "-s", "-t"],
    "extraFlags": [["--c-d", "Recomputation commit distance", "int", "8"]],
    "supportsMzn": false,
    "supportsFzn": true,
    "extraInfo": {"isDefault": true}
  },
  {
    "id": "org.chuffed.chuffed",
    "name": "Chuffed",
    "version": "0.13.2",
    "executable": "",
    "tags": ["cp", "lcg", "int"],
    "stdFlags": ["-a", "-f", "-n", "-r", "-s", "-t", "-v"]
  }
]"#;

pub struct FakeToolchain {
    pub dir: TempDir,
}

impl FakeToolchain {
    /// A toolchain whose solve invocations run `solve_body` as shell code.
    ///
    /// The arguments of the last solve are written to `args.txt`; `$model` is
    /// the last argument.
    pub fn new(solve_body: &str) -> Self {
        Self::with_probes(VERSION_LINE, SOLVERS_JSON, solve_body)
    }

    pub fn with_probes(version: &str, solvers_json: &str, solve_body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("solvers.json"), solvers_json).unwrap();
        let script = format!(
            r#"#!/bin/sh
DIR="$(cd "$(dirname "$0")" && pwd)"
case "$1" in
  --version)
    echo "{version}"
    exit 0 ;;
  --config-dirs)
    echo '{{"userConfigFile":"'"$DIR"'/Preferences.json","userSolverConfigDir":"'"$DIR"'/solvers","mznStdlibDir":"'"$DIR"'/std"}}'
    exit 0 ;;
  --solvers-json)
    cat "$DIR/solvers.json"
    exit 0 ;;
  --solver-json)
    exit 1 ;;
esac
printf '%s\n' "$@" > "$DIR/args.txt"
for model in "$@"; do :; done
{solve_body}
"#
        );
        let path = dir.path().join("minizinc");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        FakeToolchain { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn registry(&self) -> Arc<DriverRegistry> {
        let registry = DriverRegistry::shared();
        registry.set_location(Some(self.path())).unwrap();
        registry
    }

    /// Arguments of the last solve invocation.
    pub fn last_args(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("args.txt"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Built-in configuration of the default solver.
pub fn default_config(registry: &DriverRegistry) -> SolveConfiguration {
    SolveConfiguration::builtin(registry.default_solver().unwrap())
}

/// Non-zombie processes whose process group is `pgid`, read from `/proc`.
///
/// Always empty where `/proc` is unavailable.
pub fn live_group_members(pgid: u32) -> Vec<u32> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| {
            let pid: u32 = entry.ok()?.file_name().to_str()?.parse().ok()?;
            let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
            // Fields after the parenthesised command name: state ppid pgrp ...
            let rest = stat.get(stat.rfind(')')? + 2..)?;
            let mut fields = rest.split_whitespace();
            let state = fields.next()?;
            let _ppid = fields.next()?;
            let pgrp: u32 = fields.next()?.parse().ok()?;
            (pgrp == pgid && state != "Z").then_some(pid)
        })
        .collect()
}
