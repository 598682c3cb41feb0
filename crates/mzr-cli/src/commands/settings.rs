use anyhow::{bail, Result};
use mzr_cli::SettingsCommands;
use mzr_driver::settings::settings_path;
use mzr_driver::RunnerSettings;

pub fn handle(command: &SettingsCommands, settings: &RunnerSettings) -> Result<()> {
    match command {
        SettingsCommands::Show => print!("{}", toml::to_string_pretty(settings)?),
        SettingsCommands::Path => println!("{}", settings_path()?.display()),
        SettingsCommands::Init { force } => {
            let path = settings_path()?;
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            RunnerSettings::default().save_to(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
