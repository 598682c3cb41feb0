use anyhow::Result;
use clap::Parser;
use mzr_cli::{Cli, Commands};
use mzr_driver::RunnerSettings;
use tracing_subscriber::EnvFilter;

mod commands;

fn init_logging(level: Option<tracing::Level>, fallback: &str) {
    let filter = match level {
        Some(level) => EnvFilter::new(level.as_str().to_ascii_lowercase()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli, settings: &RunnerSettings) -> Result<()> {
    match &cli.command {
        Commands::Solvers { json } => {
            let registry = commands::registry(cli, settings)?;
            commands::solvers::handle(&registry, *json)
        }
        Commands::Args { run } => {
            let registry = commands::registry(cli, settings)?;
            commands::args::handle(&registry, run)
        }
        Commands::Solve { run, json } => {
            let registry = commands::registry(cli, settings)?;
            commands::solve::handle(registry, settings, run, *json)
        }
        Commands::Decode { stdout, stderr } => commands::decode::handle(stdout, stderr.as_deref()),
        Commands::Batch {
            jobs,
            out,
            concurrency,
        } => {
            let registry = commands::registry(cli, settings)?;
            commands::batch::handle(registry, settings, jobs, out, *concurrency)
        }
        Commands::Settings { command } => commands::settings::handle(command, settings),
    }
}

fn main() {
    let cli = Cli::parse();
    let (settings, load_error) = match RunnerSettings::load() {
        Ok(settings) => (settings, None),
        Err(e) => (RunnerSettings::default(), Some(e)),
    };
    init_logging(cli.log_level, &settings.logging.level);
    if let Some(e) = load_error {
        tracing::warn!("ignoring settings file: {e}");
    }

    if let Err(err) = run(&cli, &settings) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
