#![cfg(unix)]

mod common;

use std::path::PathBuf;
use std::time::Duration;

use common::{default_config, FakeToolchain};
use mzr_driver::{
    Escalation, FailureKind, ProtocolEvent, SessionError, SessionOptions, SessionState,
    SolveInput, SolveStatus, SolverSession,
};

const SOLUTION: &str =
    r#"{"type": "solution", "output": {"default": "x = 3;\n"}, "sections": ["default"], "time": 12}"#;
const STATUS: &str = r#"{"type": "status", "status": "OPTIMAL_SOLUTION", "time": 20}"#;

fn kinds(events: &[ProtocolEvent]) -> Vec<&'static str> {
    events.iter().map(ProtocolEvent::kind).collect()
}

fn group_alive(pid: u32) -> bool {
    !common::live_group_members(pid).is_empty()
}

#[tokio::test]
async fn basic_solve_yields_solution_status_finished() {
    let fake = FakeToolchain::new(&format!("printf '%s\\n' '{SOLUTION}'\nprintf '%s\\n' '{STATUS}'\nexit 0"));
    let registry = fake.registry();
    let session = SolverSession::new(registry.clone());
    let config = default_config(&registry);
    let model = fake.file("model.mzn");
    std::fs::write(&model, "var 1..3: x; solve maximize x;").unwrap();

    let stream = session
        .start(&config, SolveInput::model_file(&model))
        .await
        .unwrap();
    let events = stream.collect().await;

    assert_eq!(kinds(&events), ["started", "solution", "status", "finished"]);
    match &events[1] {
        ProtocolEvent::SolutionOutput { sections, elapsed } => {
            assert_eq!(sections.get("default"), Some("x = 3;\n"));
            assert_eq!(*elapsed, Some(Duration::from_millis(12)));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        events[2],
        ProtocolEvent::FinalStatus {
            status: SolveStatus::OptimalSolution,
            ..
        }
    ));
    assert!(matches!(
        events[3],
        ProtocolEvent::Finished {
            exit_code: Some(0),
            elapsed: Some(_)
        }
    ));
    assert_eq!(session.state(), SessionState::Idle);

    let args = fake.last_args();
    assert_eq!(args[0], "--solver");
    assert_eq!(args[1], "org.gecode.gecode@6.3.0");
    assert!(args.contains(&"--json-stream".to_string()));
    assert_eq!(args.last().map(PathBuf::from), Some(model));
}

#[tokio::test]
async fn nonzero_exit_reports_failure_after_errors() {
    let fake = FakeToolchain::new(
        "printf 'model.mzn:3.1-3.5:\\nMiniZinc: type error: undefined identifier\\n' >&2\nexit 1",
    );
    let registry = fake.registry();
    let session = SolverSession::new(registry.clone());
    let events = session
        .start(&default_config(&registry), SolveInput::model_text("x"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(kinds(&events), ["started", "error", "failure"]);
    match &events[1] {
        ProtocolEvent::ErrorOutput(diag) => {
            let loc = diag.location.as_ref().unwrap();
            assert_eq!((loc.first_line, loc.first_column), (3, 1));
            assert_eq!((loc.last_line, loc.last_column), (3, 5));
            assert_eq!(diag.what.as_deref(), Some("type error"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        events[2],
        ProtocolEvent::Failure {
            exit_code: Some(1),
            kind: FailureKind::NonZeroExit
        }
    );
}

#[tokio::test]
async fn in_memory_model_is_scoped_to_the_run() {
    let fake = FakeToolchain::new("test -f \"$model\" || exit 3\necho '% model present'");
    let registry = fake.registry();
    let session = SolverSession::new(registry.clone());
    let events = session
        .start(
            &default_config(&registry),
            SolveInput::model_text("solve satisfy;"),
        )
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(kinds(&events), ["started", "comment", "finished"]);
    let model = PathBuf::from(fake.last_args().last().unwrap());
    assert_eq!(model.file_name().unwrap(), "model.mzn");
    assert!(!model.exists());
}

#[tokio::test]
async fn second_start_while_running_is_rejected() {
    let fake = FakeToolchain::new("exec sleep 30");
    let registry = fake.registry();
    let session = SolverSession::new(registry.clone());
    let config = default_config(&registry);
    let stream = session
        .start(&config, SolveInput::model_text("x"))
        .await
        .unwrap();

    let err = session
        .start(&config, SolveInput::model_text("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AlreadyRunning));

    assert!(session.stop());
    let events = stream.collect().await;
    assert!(events.last().unwrap().is_terminal());
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn stop_mid_stream_ends_with_one_terminal_event() {
    let fake = FakeToolchain::new(&format!("printf '%s\\n' '{SOLUTION}'\nexec sleep 30"));
    let registry = fake.registry();
    let session = SolverSession::new(registry.clone());
    let mut stream = session
        .start(&default_config(&registry), SolveInput::model_text("x"))
        .await
        .unwrap();

    assert_eq!(stream.next().await, Some(ProtocolEvent::Started));
    assert!(matches!(
        stream.next().await,
        Some(ProtocolEvent::SolutionOutput { .. })
    ));
    assert!(session.is_running());
    assert!(session.stop());

    let rest = tokio::time::timeout(Duration::from_secs(10), async {
        let mut rest = Vec::new();
        while let Some(event) = stream.next().await {
            rest.push(event);
        }
        rest
    })
    .await
    .unwrap();

    assert_eq!(rest.len(), 1);
    assert!(matches!(
        rest[0],
        ProtocolEvent::Finished { exit_code: None, .. }
    ));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.elapsed().unwrap() < Duration::from_secs(10));
}

#[tokio::test]
async fn stop_after_exit_keeps_the_failure() {
    // The background child holds stdout open after the leader has exited.
    let fake = FakeToolchain::new("sleep 30 &\nexit 1");
    let registry = fake.registry();
    let session = SolverSession::new(registry.clone());
    let stream = session
        .start(&default_config(&registry), SolveInput::model_text("x"))
        .await
        .unwrap();
    let pid = session.pid().unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(session.stop());
    let events = tokio::time::timeout(Duration::from_secs(10), stream.collect())
        .await
        .unwrap();
    assert_eq!(
        events.last(),
        Some(&ProtocolEvent::Failure {
            exit_code: Some(1),
            kind: FailureKind::NonZeroExit
        })
    );
    assert!(!group_alive(pid));
}

#[tokio::test]
async fn ignored_interrupt_escalates_to_kill() {
    let fake = FakeToolchain::new("trap '' INT\nsleep 30 &\nwait");
    let registry = fake.registry();
    let options = SessionOptions {
        escalation: Escalation {
            interrupt_grace: Duration::from_millis(100),
            kill_grace: Duration::from_millis(500),
        },
        ..SessionOptions::default()
    };
    let session = SolverSession::with_options(registry.clone(), options);
    let stream = session
        .start(&default_config(&registry), SolveInput::model_text("x"))
        .await
        .unwrap();
    let pid = session.pid().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    session.stop();
    let events = tokio::time::timeout(Duration::from_secs(10), stream.collect())
        .await
        .unwrap();
    assert!(matches!(
        events.last(),
        Some(ProtocolEvent::Finished { exit_code: None, .. })
    ));
    assert!(!group_alive(pid));
}

#[tokio::test]
async fn terminate_kills_the_whole_group() {
    let fake = FakeToolchain::new("sleep 30 &\nsleep 30 &\nwait");
    let registry = fake.registry();
    let session = SolverSession::new(registry.clone());
    let stream = session
        .start(&default_config(&registry), SolveInput::model_text("x"))
        .await
        .unwrap();
    let pid = session.pid().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(group_alive(pid));

    tokio::time::timeout(Duration::from_secs(10), session.terminate())
        .await
        .unwrap();
    assert!(!group_alive(pid));
    assert_eq!(session.state(), SessionState::Idle);

    let events = stream.collect().await;
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn supervisory_timeout_stops_the_run() {
    let fake = FakeToolchain::new("exec sleep 30");
    let registry = fake.registry();
    let options = SessionOptions {
        supervisory_timeout: Some(Duration::from_millis(200)),
        ..SessionOptions::default()
    };
    let session = SolverSession::with_options(registry.clone(), options);
    let events = tokio::time::timeout(Duration::from_secs(10), async {
        session
            .start(&default_config(&registry), SolveInput::model_text("x"))
            .await
            .unwrap()
            .collect()
            .await
    })
    .await
    .unwrap();
    assert!(matches!(
        events.last(),
        Some(ProtocolEvent::Finished { exit_code: None, .. })
    ));
}

#[tokio::test]
async fn launch_failure_leaves_session_idle() {
    let fake = FakeToolchain::new("exit 0");
    let registry = fake.registry();
    let config = default_config(&registry);
    std::fs::remove_file(fake.file("minizinc")).unwrap();

    let session = SolverSession::new(registry);
    let err = session
        .start(&config, SolveInput::model_text("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Launch(_)));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn run_blocking_queries_the_toolchain() {
    let fake = FakeToolchain::new("exit 0");
    let session = SolverSession::new(fake.registry());
    let out = session
        .run_blocking(&["--version".to_string()], None)
        .unwrap();
    assert!(out.success());
    assert!(out.stdout.contains("version 2.8.5"));
}
