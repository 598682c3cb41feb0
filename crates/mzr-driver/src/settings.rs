//! Runner settings stored in `~/.mzr/config.toml`.
//!
//! The home directory can be moved with `MZR_HOME`. A missing file means
//! defaults; every section and key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::process::Escalation;

/// All runner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunnerSettings {
    #[serde(default)]
    pub toolchain: ToolchainSettings,
    #[serde(default)]
    pub process: ProcessSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub batch: BatchSettings,
}

/// Where the toolchain lives and how long probing it may take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolchainSettings {
    /// Installation directory; unset means search `PATH`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            dir: None,
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

/// Stop escalation and the optional supervisory timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSettings {
    #[serde(default = "default_interrupt_grace_ms")]
    pub interrupt_grace_ms: u64,
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    /// Hard wall-clock cap on any run, in seconds (0 = none).
    #[serde(default)]
    pub supervisory_timeout_secs: u64,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            interrupt_grace_ms: default_interrupt_grace_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            supervisory_timeout_secs: 0,
        }
    }
}

fn default_interrupt_grace_ms() -> u64 {
    500
}

fn default_kill_grace_ms() -> u64 {
    1000
}

impl ProcessSettings {
    pub fn escalation(&self) -> Escalation {
        Escalation {
            interrupt_grace: Duration::from_millis(self.interrupt_grace_ms),
            kill_grace: Duration::from_millis(self.kill_grace_ms),
        }
    }

    pub fn supervisory_timeout(&self) -> Option<Duration> {
        (self.supervisory_timeout_secs > 0)
            .then(|| Duration::from_secs(self.supervisory_timeout_secs))
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Batch runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BatchSettings {
    /// Concurrent sessions (0 = one per CPU).
    #[serde(default)]
    pub concurrency: usize,
}

impl BatchSettings {
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            num_cpus::get().max(1)
        } else {
            self.concurrency
        }
    }
}

impl ToolchainSettings {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// The settings directory: `$MZR_HOME`, else `~/.mzr`.
pub fn mzr_home() -> Result<PathBuf, ConfigError> {
    if let Some(home) = std::env::var_os("MZR_HOME") {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|h| h.join(".mzr"))
        .ok_or_else(|| ConfigError::Settings("cannot determine home directory".into()))
}

/// Location of the settings file.
pub fn settings_path() -> Result<PathBuf, ConfigError> {
    Ok(mzr_home()?.join("config.toml"))
}

impl RunnerSettings {
    /// Load from the default location, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&settings_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents)
            .map_err(|e| ConfigError::Settings(format!("{}: {e}", path.display())))
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = settings_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Read {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Settings(e.to_string()))?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
    }
}
