//! Configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};

use crate::controller::{ControllerConfig, DEFAULT_EXIT_GRACE, scaled_interval};
use crate::mode::Mode;
use crate::protocol::SuspendPolicy;
use crate::worker::{DEFAULT_GENERATOR_PAUSE, DEFAULT_ITERATIONS, DEFAULT_SLEEP, WorkerConfig};

/// Environment variable holding the timeout-scale factor
pub const TIMEOUT_FACTOR_ENV: &str = "IH_TIMEOUT_FACTOR";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Append every target event to this JSONL file
    pub journal: Option<PathBuf>,

    pub run: RunConfig,

    pub watchdog: WatchdogConfig,
}

/// How the target is driven
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    /// Worker in a child `ih target` process
    #[default]
    Process,
    /// Worker on a thread of the controller process
    InProcess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub iterations: u32,

    /// Length of each blocking wait
    #[serde(rename = "sleep-ms")]
    pub sleep_ms: u64,

    /// Pace of the aggressive and remote generators
    #[serde(rename = "interrupt-pause-ms")]
    pub interrupt_pause_ms: u64,

    pub suspend: SuspendPolicy,

    pub transport: Transport,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            sleep_ms: DEFAULT_SLEEP.as_millis() as u64,
            interrupt_pause_ms: DEFAULT_GENERATOR_PAUSE.as_millis() as u64,
            suspend: SuspendPolicy::Thread,
            transport: Transport::Process,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Check interval before scaling
    #[serde(rename = "base-interval-ms")]
    pub base_interval_ms: u64,

    /// Multiplier for the check interval, for slow or instrumented hosts
    #[serde(rename = "timeout-factor")]
    pub timeout_factor: f64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 20_000,
            timeout_factor: 1.0,
        }
    }
}

impl WatchdogConfig {
    pub fn interval(&self) -> Result<Duration> {
        scaled_interval(Duration::from_millis(self.base_interval_ms), self.timeout_factor)
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .interrupthang.yml
        let local_config = PathBuf::from(".interrupthang.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/interrupthang/interrupthang.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("interrupthang").join("interrupthang.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Peek at the configured log level before logging is set up
    ///
    /// Any load error is ignored here; `load` reports it once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(factor) = timeout_factor_from(std::env::var(TIMEOUT_FACTOR_ENV).ok())? {
            tracing::debug!(factor, "Config::apply_env: timeout factor from environment");
            self.watchdog.timeout_factor = factor;
        }
        Ok(())
    }

    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.run.iterations == 0 {
            return Err(eyre!("run.iterations must be at least 1"));
        }
        let factor = self.watchdog.timeout_factor;
        if !factor.is_finite() || factor <= 0.0 {
            return Err(eyre!("watchdog.timeout-factor must be a positive number, got {}", factor));
        }
        if self.watchdog.base_interval_ms == 0 {
            return Err(eyre!("watchdog.base-interval-ms must be at least 1"));
        }
        self.watchdog.interval().context("watchdog.timeout-factor is too large")?;
        Ok(())
    }

    pub fn worker_config(&self, mode: Mode) -> WorkerConfig {
        WorkerConfig {
            mode,
            iterations: self.run.iterations,
            sleep: Duration::from_millis(self.run.sleep_ms),
            generator_pause: Duration::from_millis(self.run.interrupt_pause_ms),
        }
    }

    pub fn controller_config(&self, mode: Mode) -> Result<ControllerConfig> {
        Ok(ControllerConfig {
            mode,
            watchdog_interval: self.watchdog.interval()?,
            suspend: self.run.suspend,
            remote_pause: Duration::from_millis(self.run.interrupt_pause_ms),
            exit_grace: DEFAULT_EXIT_GRACE,
        })
    }
}

/// Parse a timeout factor override; `None` when unset or blank
pub fn timeout_factor_from(value: Option<String>) -> Result<Option<f64>> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    let factor: f64 = value
        .trim()
        .parse()
        .context(format!("Invalid {} value '{}'", TIMEOUT_FACTOR_ENV, value))?;
    Ok(Some(factor))
}
