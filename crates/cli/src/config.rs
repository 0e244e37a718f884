//! Configuration management for the CLI
//!
//! Layered with the `config` crate: built-in defaults, then a config file,
//! then `MEMDIAG_` environment variables (`__` separates nested keys, e.g.
//! `MEMDIAG_DETECTOR__WINDOW_SIZE=20` or `MEMDIAG_ALERTS__SWAP_PERCENT=60`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use memdiag_lib::anomaly::{DetectorConfig, ThresholdConfig};
use memdiag_lib::report::ScoringConfig;
use memdiag_lib::DiagError;
use serde::Deserialize;

/// Sliding-window detector settings as they appear in the config file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub window_size: usize,
    pub min_samples: Option<usize>,
    pub growth_threshold: f64,
    pub trend_threshold: f64,
    pub cooldown_secs: u64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        let defaults = DetectorConfig::default();
        Self {
            window_size: defaults.window_size,
            min_samples: defaults.min_samples,
            growth_threshold: defaults.growth_threshold,
            trend_threshold: defaults.trend_threshold,
            cooldown_secs: defaults.cooldown.as_secs(),
        }
    }
}

impl DetectorSettings {
    pub fn to_config(&self) -> Result<DetectorConfig, DiagError> {
        let config = DetectorConfig {
            window_size: self.window_size,
            min_samples: self.min_samples,
            growth_threshold: self.growth_threshold,
            trend_threshold: self.trend_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Fixed memory and swap limits checked by `watch`, in percent
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub memory_percent: f64,
    pub memory_critical_percent: f64,
    pub swap_percent: f64,
    pub cooldown_secs: u64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        let defaults = ThresholdConfig::default();
        Self {
            memory_percent: defaults.memory_percent,
            memory_critical_percent: defaults.memory_critical_percent,
            swap_percent: defaults.swap_percent,
            cooldown_secs: defaults.cooldown.as_secs(),
        }
    }
}

impl AlertSettings {
    pub fn to_config(&self) -> Result<ThresholdConfig, DiagError> {
        let config = ThresholdConfig {
            memory_percent: self.memory_percent,
            memory_critical_percent: self.memory_critical_percent,
            swap_percent: self.swap_percent,
            cooldown: Duration::from_secs(self.cooldown_secs),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Seconds between watch ticks
    pub interval_secs: f64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self { interval_secs: 5.0 }
    }
}

/// CLI configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Node name attached to structured logs
    pub node_name: String,
    /// Root of the proc filesystem
    pub proc_root: PathBuf,
    pub detector: DetectorSettings,
    pub scoring: ScoringConfig,
    pub alerts: AlertSettings,
    pub watch: WatchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            proc_root: PathBuf::from("/proc"),
            detector: DetectorSettings::default(),
            scoring: ScoringConfig::default(),
            alerts: AlertSettings::default(),
            watch: WatchSettings::default(),
        }
    }
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "localhost".to_string())
}

impl Settings {
    /// Load configuration from the config file and environment
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, DiagError> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(dir) = Self::config_dir() {
                    for name in ["config.toml", "config.json"] {
                        builder =
                            builder.add_source(config::File::from(dir.join(name)).required(false));
                    }
                }
            }
        }

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix("MEMDIAG")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DiagError::invalid_config(format!("failed to load configuration: {}", e)))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), DiagError> {
        self.detector.to_config()?;
        self.scoring.validate()?;
        self.alerts.to_config()?;
        secs_to_duration(self.watch.interval_secs, "watch.interval_secs")?;
        Ok(())
    }

    pub fn watch_interval(&self) -> Result<Duration, DiagError> {
        secs_to_duration(self.watch.interval_secs, "watch.interval_secs")
    }

    /// `$XDG_CONFIG_HOME/memdiag`, or the platform equivalent
    fn config_dir() -> Option<PathBuf> {
        dirs_next::config_dir().map(|dir| dir.join("memdiag"))
    }
}

/// Convert a user supplied number of seconds, rejecting zero, negative and non-finite values
pub fn secs_to_duration(secs: f64, what: &str) -> Result<Duration, DiagError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(DiagError::invalid_config(format!(
            "{} must be a positive number of seconds, got {}",
            what, secs
        ))),
    }
}
