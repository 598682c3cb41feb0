pub mod cli;

pub use cli::{Cli, Commands, ModeArg, RunArgs, SettingsCommands};
