//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for the acquisition
//! pipeline. Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/sensortag.toml` by default)
//! 2. Environment variables (prefixed with `SENSORTAG_DAQ_`, `__` between levels)
//!
//! Every interval of the pipeline lives here instead of being compiled in, so a
//! deployment can change its fleet or cadence without a rebuild.
//!
//! # Example
//! ```no_run
//! use sensortag_daq::config::DaqConfig;
//!
//! let config = DaqConfig::load()?;
//! config.validate()?;
//! println!("Sampling {} devices", config.devices.len());
//! # Ok::<(), sensortag_daq::error::DaqError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppResult, DaqError};
use crate::hardware::channels::Channel;
use crate::reading::SchemaPolicy;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/sensortag.toml";

/// Prefix for environment overrides, e.g. `SENSORTAG_DAQ_STORAGE__OUTPUT_PATH`.
pub const ENV_PREFIX: &str = "SENSORTAG_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// The fleet of sensor tags to sample
    pub devices: Vec<DeviceDescriptor>,
    /// Hardware channels sampled on every device
    #[serde(default = "default_channels")]
    pub channels: Vec<Channel>,
    /// Pipeline cadence
    #[serde(default)]
    pub timing: TimingConfig,
    /// Connection retry behaviour
    #[serde(default)]
    pub link: LinkConfig,
    /// Output log settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Device access backend
    #[serde(default)]
    pub driver: DriverConfig,
}

/// Identity of one fleet member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Physical (BLE MAC) address
    pub address: String,
    /// Human-readable label written into every row
    pub label: String,
}

impl DeviceDescriptor {
    /// Convenience constructor, mostly for tests and demos.
    pub fn new(address: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            label: label.into(),
        }
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Colored output for the pretty and compact formats
    #[serde(default = "default_log_ansi")]
    pub log_ansi: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_ansi: default_log_ansi(),
        }
    }
}

/// Intervals that drive the acquisition and persistence loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Spacing of the sampling grid
    #[serde(with = "humantime_serde", default = "default_sampling_period")]
    pub sampling_period: Duration,
    /// Warm-up after enabling channels, also subtracted from recorded timestamps
    #[serde(with = "humantime_serde", default = "one_second")]
    pub settle_delay: Duration,
    /// Pause between two buffer drains
    #[serde(with = "humantime_serde", default = "one_second")]
    pub writer_interval: Duration,
    /// Delay between starting two consecutive workers
    #[serde(with = "humantime_serde", default = "one_second")]
    pub startup_stagger: Duration,
    /// Wait after the last worker starts before the writer starts
    #[serde(with = "humantime_serde", default = "default_init_grace")]
    pub init_grace: Duration,
    /// Wait between two connection attempts
    #[serde(with = "humantime_serde", default = "default_retry_interval")]
    pub retry_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            sampling_period: default_sampling_period(),
            settle_delay: one_second(),
            writer_interval: one_second(),
            startup_stagger: one_second(),
            init_grace: default_init_grace(),
            retry_interval: default_retry_interval(),
        }
    }
}

/// Connection retry observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Consecutive failed attempts after which retries are logged as errors
    #[serde(default = "default_escalate_after")]
    pub escalate_after: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            escalate_after: default_escalate_after(),
        }
    }
}

/// Output log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// CSV file the readings are appended to
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    /// What to do with readings that do not fit the header
    #[serde(default)]
    pub schema_policy: SchemaPolicy,
    /// Attempts per snapshot before the writer gives up
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
    /// Pause between two write attempts
    #[serde(with = "humantime_serde", default = "default_write_backoff")]
    pub write_backoff: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            schema_policy: SchemaPolicy::default(),
            max_write_attempts: default_max_write_attempts(),
            write_backoff: default_write_backoff(),
        }
    }
}

/// Device access backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// In-process simulated sensor tags
    #[default]
    Simulated,
}

/// Device access backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Which backend to use
    #[serde(default)]
    pub kind: DriverKind,
    /// Centre of the simulated light level in lux
    #[serde(default = "default_base_lux")]
    pub base_lux: f64,
    /// Probability that a simulated connect attempt fails
    #[serde(default)]
    pub connect_failure_rate: f64,
    /// Probability that a simulated channel read faults
    #[serde(default)]
    pub read_failure_rate: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            kind: DriverKind::default(),
            base_lux: default_base_lux(),
            connect_failure_rate: 0.0,
            read_failure_rate: 0.0,
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "sensortag-daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_ansi() -> bool {
    true
}

fn default_channels() -> Vec<Channel> {
    vec![Channel::Light]
}

fn default_sampling_period() -> Duration {
    Duration::from_secs(5)
}

fn one_second() -> Duration {
    Duration::from_secs(1)
}

fn default_init_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_escalate_after() -> u32 {
    12
}

fn default_output_path() -> PathBuf {
    PathBuf::from("lux.csv")
}

fn default_max_write_attempts() -> u32 {
    3
}

fn default_write_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_base_lux() -> f64 {
    320.0
}

impl DaqConfig {
    /// Build a configuration for `devices` with every other setting at its default.
    pub fn for_devices(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            application: ApplicationConfig::default(),
            devices,
            channels: default_channels(),
            timing: TimingConfig::default(),
            link: LinkConfig::default(),
            storage: StorageConfig::default(),
            driver: DriverConfig::default(),
        }
    }

    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables override the file with prefix `SENSORTAG_DAQ_`.
    /// Example: `SENSORTAG_DAQ_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// The provider stack behind [`load_from`](Self::load_from).
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(DaqError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.devices.is_empty() {
            return invalid("At least one device must be configured".to_string());
        }

        let mut labels = HashSet::new();
        let mut addresses = HashSet::new();
        for device in &self.devices {
            if device.label.trim().is_empty() {
                return invalid(format!("Device {} has an empty label", device.address));
            }
            if device.address.trim().is_empty() {
                return invalid(format!("Device '{}' has an empty address", device.label));
            }
            if !labels.insert(device.label.as_str()) {
                return invalid(format!("Duplicate device label: {}", device.label));
            }
            if !addresses.insert(device.address.to_uppercase()) {
                return invalid(format!("Duplicate device address: {}", device.address));
            }
        }

        if self.channels.is_empty() {
            return invalid("At least one channel must be sampled".to_string());
        }
        let mut fields = HashSet::new();
        for channel in &self.channels {
            for field in channel.field_names() {
                if !fields.insert(*field) {
                    return invalid(format!("Channel '{}' is listed more than once", channel));
                }
            }
        }

        let timing = &self.timing;
        if timing.sampling_period < Duration::from_secs(1)
            || timing.sampling_period.subsec_nanos() != 0
        {
            return invalid(format!(
                "sampling_period must be a whole number of seconds >= 1s, got {:?}",
                timing.sampling_period
            ));
        }
        if timing.settle_delay >= timing.sampling_period {
            return invalid(format!(
                "settle_delay ({:?}) must be shorter than sampling_period ({:?})",
                timing.settle_delay, timing.sampling_period
            ));
        }
        if timing.writer_interval.is_zero() {
            return invalid("writer_interval must be non-zero".to_string());
        }
        if timing.retry_interval.is_zero() {
            return invalid("retry_interval must be non-zero".to_string());
        }

        if self.storage.max_write_attempts == 0 {
            return invalid("max_write_attempts must be at least 1".to_string());
        }

        for (name, rate) in [
            ("connect_failure_rate", self.driver.connect_failure_rate),
            ("read_failure_rate", self.driver.read_failure_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return invalid(format!("{} must be within 0.0..=1.0, got {}", name, rate));
            }
        }

        Ok(())
    }
}
