use anyhow::Result;
use mzr_cli::RunArgs;
use mzr_driver::{CommandBuilder, DriverRegistry};
use tracing::info;

use super::configuration;

/// Print the toolchain arguments, one per line.
pub fn handle(registry: &DriverRegistry, run: &RunArgs) -> Result<()> {
    let config = configuration(registry, run)?;
    let mut builder = CommandBuilder::new(&config, run.mode.into())
        .json_stream(!run.no_json_stream)
        .extra_args(run.extra.iter().cloned());
    if let Some(model) = &run.model {
        builder = builder.model(model);
    }
    for data in &run.data {
        builder = builder.data(data);
    }
    let cmd = builder.build();
    if let Some(dir) = &cmd.working_dir {
        info!(dir = %dir.display(), "working directory");
    }
    if let Some(dir) = &cmd.path_prefix {
        info!(dir = %dir.display(), "solver directory prepended to PATH");
    }
    for arg in &cmd.args {
        println!("{arg}");
    }
    Ok(())
}
