use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

const SOLVERS_JSON: &str = r#"[
  {"id": "org.gecode.gecode", "name": "Gecode", "version": "6.3.0",
   "stdFlags": ["-a", "-f", "-n", "-p", "-r", "-s", "-t"],
   "extraInfo": {"isDefault": true}},
  {"id": "org.chuffed.chuffed", "name": "Chuffed", "version": "0.13.2",
   "stdFlags": ["-a", "-f", "-n", "-r", "-s", "-t", "-v"]}
]"#;

const SOLUTION: &str =
    r#"{"type": "solution", "output": {"default": "x = 3;\n"}, "sections": ["default"], "time": 12}"#;
const STATUS: &str = r#"{"type": "status", "status": "OPTIMAL_SOLUTION", "time": 20}"#;

fn mzr(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("mzr").unwrap();
    cmd.env("MZR_HOME", home).env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_commands() {
    let home = tempdir().unwrap();
    mzr(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("solvers"))
        .stdout(predicate::str::contains("decode"));
}

#[test]
fn decode_prints_json_events() {
    let tmp = tempdir().unwrap();
    let out = tmp.path().join("stdout.txt");
    let err = tmp.path().join("stderr.txt");
    fs::write(&out, format!("{SOLUTION}\n{STATUS}\n")).unwrap();
    fs::write(&err, "model.mzn:3.1-3.5:\nMiniZinc: type error: bad\n").unwrap();

    let assert = mzr(tmp.path())
        .args(["decode", out.to_str().unwrap(), "--stderr", err.to_str().unwrap()])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let kinds: Vec<_> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();
    assert_eq!(kinds, ["solution_output", "final_status", "error_output"]);
    assert_eq!(events[1]["status"], "OPTIMAL_SOLUTION");
    assert_eq!(events[2]["location"]["last_column"], 5);
}

#[test]
fn args_uses_offline_solver_list() {
    let tmp = tempdir().unwrap();
    let solvers = tmp.path().join("solvers.json");
    fs::write(&solvers, SOLVERS_JSON).unwrap();

    mzr(tmp.path())
        .args([
            "--solvers-json",
            solvers.to_str().unwrap(),
            "args",
            "--solver",
            "chuffed",
            "-a",
            "-p",
            "4",
            "model.mzn",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("org.chuffed.chuffed@0.13.2"))
        .stdout(predicate::str::contains("--all-solutions"))
        .stdout(predicate::str::contains("--parallel").not())
        .stdout(predicate::str::ends_with("model.mzn\n"));
}

#[test]
fn unknown_solver_is_an_error() {
    let tmp = tempdir().unwrap();
    let solvers = tmp.path().join("solvers.json");
    fs::write(&solvers, SOLVERS_JSON).unwrap();

    mzr(tmp.path())
        .args(["--solvers-json", solvers.to_str().unwrap(), "args", "--solver", "cplex"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cplex"));
}

#[test]
fn solvers_lists_offline_solvers() {
    let tmp = tempdir().unwrap();
    let solvers = tmp.path().join("solvers.json");
    fs::write(&solvers, SOLVERS_JSON).unwrap();

    mzr(tmp.path())
        .args(["--solvers-json", solvers.to_str().unwrap(), "solvers"])
        .assert()
        .success()
        .stdout(predicate::str::contains("org.gecode.gecode"))
        .stdout(predicate::str::contains("Chuffed"));
}

#[test]
fn settings_init_and_show() {
    let home = tempdir().unwrap();
    mzr(home.path())
        .args(["settings", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
    mzr(home.path())
        .args(["settings", "init"])
        .assert()
        .success();
    assert!(home.path().join("config.toml").exists());
    mzr(home.path())
        .args(["settings", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    mzr(home.path())
        .args(["settings", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("interrupt_grace_ms = 500"));
}

#[cfg(unix)]
mod with_toolchain {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn fake_toolchain(dir: &Path, solve_body: &str) {
        fs::write(dir.join("solvers.json"), SOLVERS_JSON).unwrap();
        let script = format!(
            r#"#!/bin/sh
DIR="$(cd "$(dirname "$0")" && pwd)"
case "$1" in
  --version) echo "MiniZinc to FlatZinc converter, version 2.8.5"; exit 0 ;;
  --config-dirs) echo '{{}}'; exit 0 ;;
  --solvers-json) cat "$DIR/solvers.json"; exit 0 ;;
esac
{solve_body}
"#
        );
        let path = dir.join("minizinc");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn solve_streams_events() {
        let tmp = tempdir().unwrap();
        fake_toolchain(tmp.path(), &format!("printf '%s\\n' '{SOLUTION}'\nprintf '%s\\n' '{STATUS}'"));
        let model = tmp.path().join("model.mzn");
        fs::write(&model, "var 1..3: x;").unwrap();

        mzr(tmp.path())
            .args(["--toolchain", tmp.path().to_str().unwrap(), "solve", model.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("x = 3;\n----------\n=========="));

        mzr(tmp.path())
            .args([
                "--toolchain",
                tmp.path().to_str().unwrap(),
                "solve",
                "--json",
                model.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""event":"solution_output""#))
            .stdout(predicate::str::contains(r#""event":"finished""#));
    }

    #[test]
    fn failing_solver_exits_nonzero() {
        let tmp = tempdir().unwrap();
        fake_toolchain(tmp.path(), "echo 'MiniZinc: evaluation error' >&2\nexit 1");
        let model = tmp.path().join("model.mzn");
        fs::write(&model, "constraint false;").unwrap();

        mzr(tmp.path())
            .args(["--toolchain", tmp.path().to_str().unwrap(), "solve", model.to_str().unwrap()])
            .assert()
            .failure()
            .stderr(predicate::str::contains("non-zero exit"));
    }

    #[test]
    fn batch_writes_manifest() {
        let tmp = tempdir().unwrap();
        fake_toolchain(tmp.path(), &format!("printf '%s\\n' '{SOLUTION}'\nprintf '%s\\n' '{STATUS}'"));
        fs::write(tmp.path().join("a.mzn"), "var 1..3: x;").unwrap();
        fs::write(
            tmp.path().join("jobs.json"),
            r#"[{"id": "first", "model": "a.mzn"}, {"id": "second", "model": "a.mzn", "solver": "chuffed"}]"#,
        )
        .unwrap();
        let manifest = tmp.path().join("out").join("manifest.json");

        mzr(tmp.path())
            .args([
                "--toolchain",
                tmp.path().to_str().unwrap(),
                "batch",
                tmp.path().join("jobs.json").to_str().unwrap(),
                "--out",
                manifest.to_str().unwrap(),
                "--concurrency",
                "2",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("2 ok, 0 failed"));

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&manifest).unwrap()).unwrap();
        assert_eq!(parsed["num_jobs"], 2);
        assert_eq!(parsed["jobs"][1]["solver"], "org.chuffed.chuffed@0.13.2");
        assert_eq!(parsed["jobs"][0]["final_status"], "OPTIMAL_SOLUTION");
    }
}
