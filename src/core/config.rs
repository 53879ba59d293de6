//! Configuration parsing and validation.
//!
//! Registry configuration is loaded from TOML files with CLI overrides.
//! Every field has a default, so an empty file is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level registry configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Namespace scoping every key.
    #[serde(default)]
    pub namespace: NamespaceConfig,

    /// Lease bounds and expiry sweep.
    #[serde(default)]
    pub leases: LeaseConfig,

    /// Watch delivery.
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Namespace configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Key prefix shared by every entry of this registry.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

/// Lease configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Minimum granted TTL in milliseconds.
    #[serde(default = "default_min_ttl_ms")]
    pub min_ttl_ms: u64,

    /// Maximum granted TTL in milliseconds.
    #[serde(default = "default_max_ttl_ms")]
    pub max_ttl_ms: u64,

    /// Clamp out-of-range TTLs into bounds instead of rejecting them.
    #[serde(default = "default_clamp_ttl")]
    pub clamp_ttl: bool,

    /// Period of the background expiry sweep in milliseconds.
    #[serde(default = "default_sweep_period_ms")]
    pub sweep_period_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            min_ttl_ms: default_min_ttl_ms(),
            max_ttl_ms: default_max_ttl_ms(),
            clamp_ttl: default_clamp_ttl(),
            sweep_period_ms: default_sweep_period_ms(),
        }
    }
}

impl LeaseConfig {
    /// Minimum TTL as a duration.
    pub fn min_ttl(&self) -> Duration {
        Duration::from_millis(self.min_ttl_ms)
    }

    /// Maximum TTL as a duration.
    pub fn max_ttl(&self) -> Duration {
        Duration::from_millis(self.max_ttl_ms)
    }

    /// Sweep period as a duration.
    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis(self.sweep_period_ms)
    }
}

/// Watch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Events buffered per subscription before it is terminated with Overrun.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_prefix() -> String {
    "/registry/".to_string()
}

fn default_min_ttl_ms() -> u64 {
    5_000
}

fn default_max_ttl_ms() -> u64 {
    600_000
}

fn default_clamp_ttl() -> bool {
    true
}

fn default_sweep_period_ms() -> u64 {
    500
}

fn default_buffer_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Start building a configuration from defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render config")
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref prefix) = overrides.namespace {
            self.namespace.prefix = prefix.clone();
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_namespace()?;
        self.validate_leases()?;
        self.validate_watch()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_namespace(&self) -> Result<()> {
        let prefix = &self.namespace.prefix;
        if prefix.is_empty() {
            anyhow::bail!("namespace.prefix must not be empty");
        }
        if !prefix.ends_with('/') {
            anyhow::bail!("namespace.prefix must end with '/', got: {}", prefix);
        }
        Ok(())
    }

    fn validate_leases(&self) -> Result<()> {
        if self.leases.min_ttl_ms == 0 {
            anyhow::bail!("leases.min_ttl_ms must be > 0");
        }
        if self.leases.min_ttl_ms > self.leases.max_ttl_ms {
            anyhow::bail!(
                "leases.min_ttl_ms ({}) cannot exceed leases.max_ttl_ms ({})",
                self.leases.min_ttl_ms,
                self.leases.max_ttl_ms
            );
        }
        if self.leases.sweep_period_ms == 0 {
            anyhow::bail!("leases.sweep_period_ms must be > 0");
        }
        Ok(())
    }

    fn validate_watch(&self) -> Result<()> {
        if self.watch.buffer_capacity == 0 {
            anyhow::bail!("watch.buffer_capacity must be > 0");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override namespace prefix.
    pub namespace: Option<String>,
}

/// Programmatic configuration builder.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the namespace prefix.
    pub fn namespace(mut self, prefix: impl Into<String>) -> Self {
        self.config.namespace.prefix = prefix.into();
        self
    }

    /// Set the lease TTL bounds.
    pub fn lease_ttl_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.config.leases.min_ttl_ms = duration_ms(min);
        self.config.leases.max_ttl_ms = duration_ms(max);
        self
    }

    /// Clamp (true) or reject (false) out-of-range TTLs.
    pub fn clamp_ttl(mut self, clamp: bool) -> Self {
        self.config.leases.clamp_ttl = clamp;
        self
    }

    /// Set the expiry sweep period.
    pub fn sweep_period(mut self, period: Duration) -> Self {
        self.config.leases.sweep_period_ms = duration_ms(period);
        self
    }

    /// Set the per-watch buffer capacity.
    pub fn watch_buffer(mut self, capacity: usize) -> Self {
        self.config.watch.buffer_capacity = capacity;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.telemetry.log_level = level.into();
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
