use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use mzr_driver::batch::{run_batch_with, write_batch_manifest};
use mzr_driver::{BatchJob, DriverRegistry, RunnerSettings, SessionOptions, SolveConfiguration, SolveInput};
use serde::Deserialize;
use tracing::warn;

use super::runtime;

/// One entry of the jobs file.
#[derive(Debug, Deserialize)]
struct JobSpec {
    id: String,
    model: PathBuf,
    #[serde(default)]
    data: Vec<PathBuf>,
    /// Saved configuration; relative paths resolve against the jobs file.
    config: Option<PathBuf>,
    solver: Option<String>,
    #[serde(default)]
    args: Vec<String>,
}

pub fn handle(
    registry: Arc<DriverRegistry>,
    settings: &RunnerSettings,
    jobs_file: &Path,
    out: &Path,
    concurrency: Option<usize>,
) -> Result<()> {
    let text = std::fs::read_to_string(jobs_file)
        .with_context(|| format!("reading jobs file '{}'", jobs_file.display()))?;
    let specs: Vec<JobSpec> = serde_json::from_str(&text)
        .with_context(|| format!("parsing jobs file '{}'", jobs_file.display()))?;
    if specs.is_empty() {
        return Err(anyhow!("jobs file '{}' contains no jobs", jobs_file.display()));
    }
    let base = jobs_file.parent().unwrap_or(Path::new("."));
    let jobs = specs
        .into_iter()
        .map(|spec| build_job(&registry, base, spec))
        .collect::<Result<Vec<_>>>()?;

    let concurrency = concurrency.unwrap_or(settings.batch.concurrency);
    let options = SessionOptions::from_settings(&settings.process);
    let summary = runtime()?.block_on(run_batch_with(registry, jobs, concurrency, options));

    write_batch_manifest(out, &summary.manifest())
        .with_context(|| format!("writing batch manifest '{}'", out.display()))?;
    println!(
        "Batch complete: {} ok, {} failed. Manifest: {}",
        summary.success,
        summary.failure,
        out.display()
    );
    Ok(())
}

fn build_job(registry: &DriverRegistry, base: &Path, spec: JobSpec) -> Result<BatchJob> {
    let config = match (&spec.config, &spec.solver) {
        (Some(path), _) => {
            let path = base.join(path);
            let (config, warnings) = SolveConfiguration::load_json_file(&path, registry)
                .with_context(|| format!("job {}: loading '{}'", spec.id, path.display()))?;
            for warning in warnings {
                warn!(job = %spec.id, "{warning}");
            }
            config
        }
        (None, Some(query)) => SolveConfiguration::builtin(
            registry
                .lookup(query)
                .with_context(|| format!("job {}: resolving solver '{query}'", spec.id))?,
        ),
        (None, None) => SolveConfiguration::builtin(
            registry
                .default_solver()
                .ok_or_else(|| anyhow!("the toolchain reports no solvers"))?,
        ),
    };
    let mut input = SolveInput::model_file(base.join(&spec.model)).args(spec.args);
    for data in &spec.data {
        input = input.data_file(base.join(data));
    }
    Ok(BatchJob {
        job_id: spec.id,
        config,
        input,
    })
}
