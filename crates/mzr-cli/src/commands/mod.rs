use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use mzr_cli::{Cli, RunArgs};
use mzr_driver::{DriverRegistry, RunnerSettings, SolveConfiguration, SolveInput, SolverIdentity};
use tracing::warn;

pub mod args;
pub mod batch;
pub mod decode;
pub mod settings;
pub mod solve;
pub mod solvers;

/// Registry from `--solvers-json`, or probed from the configured toolchain.
pub fn registry(cli: &Cli, settings: &RunnerSettings) -> Result<Arc<DriverRegistry>> {
    if let Some(path) = &cli.solvers_json {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading solver list '{}'", path.display()))?;
        let solvers = SolverIdentity::parse_descriptor_list(&text)
            .with_context(|| format!("parsing solver list '{}'", path.display()))?;
        return Ok(Arc::new(DriverRegistry::with_solvers(solvers)));
    }
    let registry = DriverRegistry::new().with_probe_timeout(settings.toolchain.probe_timeout());
    let location = cli.toolchain.as_deref().or(settings.toolchain.dir.as_deref());
    registry
        .set_location(location)
        .context("locating the MiniZinc toolchain")?;
    Ok(Arc::new(registry))
}

/// Configuration from `--config`, `--solver` or the default solver, with
/// command-line overrides applied.
pub fn configuration(registry: &DriverRegistry, run: &RunArgs) -> Result<SolveConfiguration> {
    let mut config = match (&run.config, &run.solver) {
        (Some(path), _) => {
            let (config, warnings) = SolveConfiguration::load_json_file(path, registry)
                .with_context(|| format!("loading configuration '{}'", path.display()))?;
            for warning in warnings {
                warn!("{}: {warning}", path.display());
            }
            config
        }
        (None, Some(query)) => SolveConfiguration::builtin(
            registry
                .lookup(query)
                .with_context(|| format!("resolving solver '{query}'"))?,
        ),
        (None, None) => SolveConfiguration::builtin(
            registry
                .default_solver()
                .ok_or_else(|| anyhow!("the toolchain reports no solvers"))?,
        ),
    };
    if let (Some(query), Some(_)) = (&run.solver, &run.config) {
        let identity = registry
            .lookup(query)
            .with_context(|| format!("resolving solver '{query}'"))?;
        config.solver = identity.tag();
        config.identity = identity;
    }
    apply_overrides(&mut config, run);
    Ok(config)
}

fn apply_overrides(config: &mut SolveConfiguration, run: &RunArgs) {
    if let Some(ms) = run.time_limit {
        config.time_limit = (ms > 0).then(|| Duration::from_millis(ms));
    }
    if run.all_solutions {
        config.num_solutions = 0;
    } else if let Some(n) = run.num_solutions {
        config.num_solutions = n;
    }
    if run.statistics {
        config.compilation_stats = true;
        config.solving_stats = true;
    }
    if run.free_search {
        config.free_search = true;
    }
    if let Some(threads) = run.parallel {
        config.num_threads = threads;
    }
    if let Some(seed) = run.random_seed {
        config.random_seed = Some(seed.into());
    }
    if let Some(level) = run.optimization_level {
        config.optimization_level = level.min(5);
    }
}

pub fn solve_input(run: &RunArgs) -> SolveInput {
    let mut input = run
        .model
        .as_ref()
        .map(|model| SolveInput::model_file(model))
        .unwrap_or_default();
    for data in &run.data {
        input = input.data_file(data);
    }
    input
        .args(run.extra.iter().cloned())
        .mode(run.mode.into())
        .json_stream(!run.no_json_stream)
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")
}

pub fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut std::io::stdin(), &mut buf).context("reading stdin")?;
        return Ok(buf);
    }
    std::fs::read(path).with_context(|| format!("reading '{}'", path.display()))
}
