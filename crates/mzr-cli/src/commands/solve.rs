use std::sync::Arc;

use anyhow::{bail, Result};
use mzr_cli::RunArgs;
use mzr_driver::{
    DriverRegistry, ProtocolEvent, RunnerSettings, SessionOptions, SolverSession,
};
use tracing::info;

use super::{configuration, runtime, solve_input};

pub fn handle(
    registry: Arc<DriverRegistry>,
    settings: &RunnerSettings,
    run: &RunArgs,
    json: bool,
) -> Result<()> {
    let config = configuration(&registry, run)?;
    let input = solve_input(run);
    let options = SessionOptions::from_settings(&settings.process);
    let terminal = runtime()?.block_on(async move {
        let session = SolverSession::with_options(registry, options);
        let mut stream = session.start(&config, input).await?;
        let mut stopping = false;
        let mut terminal = None;
        loop {
            tokio::select! {
                event = stream.next() => match event {
                    Some(event) => {
                        print_event(&event, json)?;
                        if event.is_terminal() {
                            terminal = Some(event);
                        }
                    }
                    None => break,
                },
                _ = tokio::signal::ctrl_c(), if !stopping => {
                    info!("interrupt received, stopping solver");
                    stopping = true;
                    session.stop();
                }
            }
        }
        anyhow::Ok(terminal)
    })?;

    match terminal {
        Some(ProtocolEvent::Finished { .. }) => Ok(()),
        Some(ProtocolEvent::Failure { exit_code, kind }) => match exit_code {
            Some(code) => bail!("solver failed ({kind}, exit code {code})"),
            None => bail!("solver failed ({kind})"),
        },
        _ => bail!("solver run ended without a result"),
    }
}

fn print_event(event: &ProtocolEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        ProtocolEvent::SolutionOutput { sections, .. } => {
            let text = sections
                .get("default")
                .or_else(|| sections.get("raw"))
                .map(str::to_string)
                .unwrap_or_else(|| {
                    sections
                        .iter()
                        .map(|(_, text)| text)
                        .collect::<Vec<_>>()
                        .join("")
                });
            print!("{text}");
            if !text.is_empty() && !text.ends_with('\n') {
                println!();
            }
            println!("----------");
        }
        ProtocolEvent::FinalStatus { status, .. } => {
            let line = status.legacy_line();
            if !line.is_empty() {
                println!("{line}");
            }
        }
        ProtocolEvent::StatisticsOutput { statistics } => {
            for (key, value) in statistics {
                println!("%%%mzn-stat: {key}={value}");
            }
            println!("%%%mzn-stat-end");
        }
        ProtocolEvent::CommentOutput { text } => println!("{text}"),
        ProtocolEvent::ErrorOutput(diag) | ProtocolEvent::WarningOutput(diag) => {
            let label = if matches!(event, ProtocolEvent::ErrorOutput(_)) {
                "Error"
            } else {
                "Warning"
            };
            if let Some(loc) = &diag.location {
                eprintln!(
                    "{}:{}.{}-{}.{}:",
                    loc.filename, loc.first_line, loc.first_column, loc.last_line, loc.last_column
                );
            }
            match &diag.what {
                Some(what) => eprintln!("{label}: {what}: {}", diag.message),
                None => eprintln!("{label}: {}", diag.message),
            }
        }
        ProtocolEvent::UnknownOutput { text, .. } => {
            eprintln!("{}", text.trim_end_matches('\n'));
        }
        ProtocolEvent::TraceOutput { payload, .. } => match payload.as_str() {
            Some(text) => eprint!("{text}"),
            None => eprintln!("{payload}"),
        },
        _ => {}
    }
    Ok(())
}
