//! Configuration management for Tollgate.
//!
//! Settings come from an optional YAML file, then `TOLLGATE__*` environment
//! variables (e.g. `TOLLGATE__RECLAIM__INTERVAL_MS=5000`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{PolicyConfig, PolicyTable, RateLimiter};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for Tollgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Named policies layered over the built-in table
    #[serde(default)]
    pub policies: HashMap<String, PolicyConfig>,

    /// Expired-window reclamation
    #[serde(default)]
    pub reclaim: ReclaimConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reclaimer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimConfig {
    /// Background sweep period in milliseconds; 0 disables the timer
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Fraction of checks that also sweep, between 0 and 1
    #[serde(default)]
    pub sweep_probability: f64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            sweep_probability: 0.0,
        }
    }
}

impl ReclaimConfig {
    /// Timer period, or `None` when the timer is disabled.
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_ms > 0).then(|| Duration::from_millis(self.interval_ms))
    }
}

fn default_interval_ms() -> u64 {
    60_000
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from an optional file plus environment overrides.
    ///
    /// The file is parsed as written, so policy names and camelCase keys keep
    /// their case. Environment values are merged over it section by section.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut tree = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                if !path.exists() {
                    return Err(TollgateError::Config(format!(
                        "configuration file not found: {}",
                        path.display()
                    )));
                }
                let contents = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&contents).map_err(|e| {
                    TollgateError::Config(format!("Failed to parse configuration: {}", e))
                })?
            }
            None => serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        };
        // An empty file parses as null.
        if tree.is_null() {
            tree = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        }

        let overrides: serde_yaml::Value = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        merge(&mut tree, overrides);

        let settings: Settings = serde_yaml::from_value(tree)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check every policy and the reclaimer settings.
    pub fn validate(&self) -> Result<()> {
        let p = self.reclaim.sweep_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(TollgateError::Config(format!(
                "reclaim.sweep_probability must be between 0 and 1, got {}",
                p
            )));
        }
        self.policy_table().map(|_| ())
    }

    /// Build the policy table these settings describe.
    pub fn policy_table(&self) -> Result<PolicyTable> {
        PolicyTable::from_config(&self.policies)
    }

    /// Build a limiter from these settings.
    ///
    /// The background reclaimer is not started here; see
    /// [`crate::ratelimit::Reclaimer`].
    pub fn build_limiter(&self) -> Result<RateLimiter> {
        Ok(RateLimiter::builder()
            .policies(self.policy_table()?)
            .sweep_probability(self.reclaim.sweep_probability)
            .build())
    }
}

/// Recursively overlay `overlay` onto `base`; non-mapping values replace.
fn merge(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base), serde_yaml::Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
