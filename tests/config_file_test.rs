//! Tests for the shipped configuration file.

use sensortag_daq::config::{DaqConfig, DriverKind, DEFAULT_CONFIG_PATH};
use sensortag_daq::hardware::Channel;
use sensortag_daq::reading::SchemaPolicy;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_shipped_config_loads_and_validates() {
    let config = assert_ok!(DaqConfig::load_from(DEFAULT_CONFIG_PATH));
    assert_ok!(config.validate());

    let labels: Vec<&str> = config.devices.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, ["a", "b", "c", "d", "e", "f"]);
    assert_eq!(config.channels, vec![Channel::Light]);
    assert_eq!(config.driver.kind, DriverKind::Simulated);
    assert_eq!(config.storage.schema_policy, SchemaPolicy::Strict);
}

#[test]
fn test_shipped_config_matches_defaults() {
    let config = DaqConfig::load_from(DEFAULT_CONFIG_PATH).unwrap();

    assert_eq!(config.timing.sampling_period, Duration::from_secs(5));
    assert_eq!(config.timing.settle_delay, Duration::from_secs(1));
    assert_eq!(config.timing.writer_interval, Duration::from_secs(1));
    assert_eq!(config.timing.init_grace, Duration::from_secs(5));
    assert_eq!(config.timing.retry_interval, Duration::from_secs(5));
    assert_eq!(config.storage.write_backoff, Duration::from_millis(500));
}

#[test]
fn test_missing_file_without_devices_fails() {
    assert_err!(DaqConfig::load_from("config/does-not-exist.toml"));
}
