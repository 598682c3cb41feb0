use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use mzr_driver::OperationMode;

#[derive(Parser, Debug)]
#[command(name = "mzr", version, about = "Run MiniZinc solvers and decode their output")]
pub struct Cli {
    /// Set the logging level (overrides RUST_LOG and the settings file)
    #[arg(long, global = true)]
    pub log_level: Option<tracing::Level>,

    /// MiniZinc installation directory or executable
    #[arg(long, global = true)]
    pub toolchain: Option<PathBuf>,

    /// Use solver descriptions from a `--solvers-json` dump instead of probing
    #[arg(long, global = true)]
    pub solvers_json: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the solvers the toolchain provides
    Solvers {
        /// Print the full descriptions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the command line a solve would use
    Args {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Solve a model, streaming results
    Solve {
        #[command(flatten)]
        run: RunArgs,

        /// Print every event as one JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Decode captured solver output into events
    Decode {
        /// Captured stdout ("-" reads standard input)
        stdout: PathBuf,

        /// Captured stderr
        #[arg(long)]
        stderr: Option<PathBuf>,
    },
    /// Run several solves concurrently
    Batch {
        /// JSON file with the list of jobs
        jobs: PathBuf,

        /// Where to write the manifest
        #[arg(short, long, default_value = "batch_manifest.json")]
        out: PathBuf,

        /// Concurrent sessions (default from settings; 0 = one per CPU)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Inspect or initialise runner settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Print the effective settings as TOML
    Show,
    /// Print the settings file location
    Path,
    /// Write a settings file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Compile,
    Solve,
    Both,
}

impl From<ModeArg> for OperationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Compile => OperationMode::CompileOnly,
            ModeArg::Solve => OperationMode::Solve,
            ModeArg::Both => OperationMode::Both,
        }
    }
}

/// Options shared by `args` and `solve`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Model file
    pub model: Option<PathBuf>,

    /// Data files
    pub data: Vec<PathBuf>,

    /// Saved solver configuration (.mpc JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Solver id, name or tag (default: the toolchain's default solver)
    #[arg(long)]
    pub solver: Option<String>,

    #[arg(long, value_enum, default_value = "both")]
    pub mode: ModeArg,

    /// Time limit in milliseconds
    #[arg(short = 't', long)]
    pub time_limit: Option<u64>,

    /// Report all solutions
    #[arg(short = 'a', long)]
    pub all_solutions: bool,

    /// Stop after this many solutions
    #[arg(short = 'n', long)]
    pub num_solutions: Option<u32>,

    /// Compiler and solver statistics
    #[arg(short = 's', long)]
    pub statistics: bool,

    /// Free search
    #[arg(short = 'f', long)]
    pub free_search: bool,

    /// Number of solver threads
    #[arg(short = 'p', long)]
    pub parallel: Option<u32>,

    /// Random seed
    #[arg(short = 'r', long)]
    pub random_seed: Option<i64>,

    /// Optimisation level 0-5
    #[arg(short = 'O', long)]
    pub optimization_level: Option<u8>,

    /// Disable the JSON output stream
    #[arg(long)]
    pub no_json_stream: bool,

    /// Extra arguments passed through to the toolchain
    #[arg(last = true)]
    pub extra: Vec<String>,
}
