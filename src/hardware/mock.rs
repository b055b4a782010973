//! Simulated Sensor Tags
//!
//! Provides an in-process stand-in for the BLE device-access library so the pipeline
//! can run, and be tested, without physical tags.
//! All operations are immediate; timing belongs to the link and worker layers.
//!
//! # Behaviour
//!
//! - Values: a per-channel baseline plus optional uniform noise, or a fixed tuple set
//!   with [`SimulatedDriver::with_fixed_values`]
//! - Random faults: connect and read failures drawn with configurable probabilities
//! - Scripted faults: fail the next N connects of an address, fault specific read
//!   calls, or make an address permanently unreachable
//! - Counters: connect attempts, successful connects, reads and disables per address

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::config::DriverConfig;
use crate::hardware::capabilities::{SensorTagDriver, SensorTagSession};
use crate::hardware::channels::Channel;

#[derive(Debug, Default)]
struct AddressStats {
    connect_attempts: u64,
    connects: u64,
    read_calls: u64,
    disable_calls: u64,
    pending_connect_failures: u32,
    unreachable: bool,
    faulted_reads: BTreeSet<u64>,
}

#[derive(Debug)]
struct SimState {
    base_lux: f64,
    noise: f64,
    connect_failure_rate: f64,
    read_failure_rate: f64,
    fixed: HashMap<Channel, Vec<f64>>,
    addresses: HashMap<String, AddressStats>,
}

impl SimState {
    fn stats(&mut self, address: &str) -> &mut AddressStats {
        self.addresses.entry(address.to_string()).or_default()
    }

    fn baseline(&self, channel: Channel) -> Vec<f64> {
        match channel {
            Channel::IrTemp => vec![24.5, 21.0],
            Channel::Accelerometer => vec![0.0, 0.0, 1.0],
            Channel::Humidity => vec![22.8, 41.0],
            Channel::Magnetometer => vec![12.0, -30.5, 44.0],
            Channel::Barometer => vec![22.9, 1013.25],
            Channel::Gyroscope => vec![0.0, 0.0, 0.0],
            Channel::Battery => vec![87.0],
            Channel::Light => vec![self.base_lux],
        }
    }
}

/// Simulated device-access backend.
///
/// Cloning is cheap and clones share all state, so a test can keep a handle for
/// scripting and assertions while the pipeline owns another.
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDriver {
    /// Noise-free driver that never fails on its own.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                base_lux: 320.0,
                noise: 0.0,
                connect_failure_rate: 0.0,
                read_failure_rate: 0.0,
                fixed: HashMap::new(),
                addresses: HashMap::new(),
            })),
        }
    }

    /// Driver tuned from the `[driver]` configuration section, with light noise.
    pub fn from_config(config: &DriverConfig) -> Self {
        let driver = Self::new();
        {
            let mut state = driver.state.lock();
            state.base_lux = config.base_lux;
            state.noise = (config.base_lux * 0.05).abs();
            state.connect_failure_rate = config.connect_failure_rate;
            state.read_failure_rate = config.read_failure_rate;
        }
        driver
    }

    /// Always return `values` when `channel` is read.
    pub fn with_fixed_values(self, channel: Channel, values: Vec<f64>) -> Self {
        self.state.lock().fixed.insert(channel, values);
        self
    }

    /// Fail the next `count` connect attempts to `address`.
    pub fn fail_next_connects(&self, address: &str, count: u32) {
        self.state.lock().stats(address).pending_connect_failures += count;
    }

    /// Make every connect attempt to `address` fail.
    pub fn set_unreachable(&self, address: &str, unreachable: bool) {
        self.state.lock().stats(address).unreachable = unreachable;
    }

    /// Fault the read call with the given zero-based index on `address`.
    ///
    /// Read calls are counted per address across sessions, one per channel read.
    pub fn fault_read_call(&self, address: &str, index: u64) {
        self.state.lock().stats(address).faulted_reads.insert(index);
    }

    /// Number of connect attempts made to `address`, successful or not.
    pub fn connect_attempts(&self, address: &str) -> u64 {
        self.state.lock().addresses.get(address).map_or(0, |s| s.connect_attempts)
    }

    /// Number of successful connects to `address`.
    pub fn connects(&self, address: &str) -> u64 {
        self.state.lock().addresses.get(address).map_or(0, |s| s.connects)
    }

    /// Number of channel read calls on `address`.
    pub fn read_calls(&self, address: &str) -> u64 {
        self.state.lock().addresses.get(address).map_or(0, |s| s.read_calls)
    }

    /// Number of channel disable calls on `address`.
    pub fn disable_calls(&self, address: &str) -> u64 {
        self.state.lock().addresses.get(address).map_or(0, |s| s.disable_calls)
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorTagDriver for SimulatedDriver {
    type Session = SimulatedSession;

    async fn connect(&self, address: &str) -> Result<SimulatedSession> {
        let mut state = self.state.lock();
        let failure_rate = state.connect_failure_rate;
        let stats = state.stats(address);
        stats.connect_attempts += 1;

        if stats.unreachable {
            bail!("Device {} not found", address);
        }
        if stats.pending_connect_failures > 0 {
            stats.pending_connect_failures -= 1;
            bail!("Failed to connect to peripheral {}", address);
        }
        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate) {
            bail!("Failed to connect to peripheral {}", address);
        }

        stats.connects += 1;
        Ok(SimulatedSession {
            address: address.to_string(),
            enabled: HashSet::new(),
            state: Arc::clone(&self.state),
        })
    }
}

/// A live session handed out by [`SimulatedDriver`].
#[derive(Debug)]
pub struct SimulatedSession {
    address: String,
    enabled: HashSet<Channel>,
    state: Arc<Mutex<SimState>>,
}

#[async_trait]
impl SensorTagSession for SimulatedSession {
    async fn enable(&mut self, channel: Channel) -> Result<()> {
        self.enabled.insert(channel);
        Ok(())
    }

    async fn disable(&mut self, channel: Channel) -> Result<()> {
        self.state.lock().stats(&self.address).disable_calls += 1;
        self.enabled.remove(&channel);
        Ok(())
    }

    async fn read(&mut self, channel: Channel) -> Result<Vec<f64>> {
        if !self.enabled.contains(&channel) {
            return Err(anyhow!("Channel {} read while disabled", channel));
        }

        let mut state = self.state.lock();
        let failure_rate = state.read_failure_rate;
        let stats = state.stats(&self.address);
        let index = stats.read_calls;
        stats.read_calls += 1;
        if stats.faulted_reads.remove(&index) {
            bail!("Device {} disconnected during read", self.address);
        }
        if failure_rate > 0.0 && rand::thread_rng().gen_bool(failure_rate) {
            bail!("Device {} disconnected during read", self.address);
        }

        if let Some(values) = state.fixed.get(&channel) {
            return Ok(values.clone());
        }
        let noise = state.noise;
        let mut rng = rand::thread_rng();
        Ok(state
            .baseline(channel)
            .into_iter()
            .map(|v| if noise > 0.0 { v + rng.gen_range(-noise..noise) } else { v })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_connect_failures_run_out() {
        let driver = SimulatedDriver::new();
        driver.fail_next_connects("AA", 2);

        assert!(driver.connect("AA").await.is_err());
        assert!(driver.connect("AA").await.is_err());
        assert!(driver.connect("AA").await.is_ok());
        assert_eq!(driver.connect_attempts("AA"), 3);
        assert_eq!(driver.connects("AA"), 1);
    }

    #[tokio::test]
    async fn read_requires_enable() {
        let driver = SimulatedDriver::new();
        let mut session = driver.connect("AA").await.unwrap();
        assert!(session.read(Channel::Light).await.is_err());

        session.enable(Channel::Light).await.unwrap();
        assert_eq!(session.read(Channel::Light).await.unwrap(), vec![320.0]);
    }

    #[tokio::test]
    async fn faulted_read_index_fires_once() {
        let driver = SimulatedDriver::new().with_fixed_values(Channel::Light, vec![5.0]);
        driver.fault_read_call("AA", 1);
        let mut session = driver.connect("AA").await.unwrap();
        session.enable(Channel::Light).await.unwrap();

        assert!(session.read(Channel::Light).await.is_ok());
        assert!(session.read(Channel::Light).await.is_err());
        assert!(session.read(Channel::Light).await.is_ok());
        assert_eq!(driver.read_calls("AA"), 3);
    }

    #[tokio::test]
    async fn configured_driver_adds_noise_around_base() {
        let config = DriverConfig {
            base_lux: 100.0,
            ..DriverConfig::default()
        };
        let driver = SimulatedDriver::from_config(&config);
        let mut session = driver.connect("AA").await.unwrap();
        session.enable(Channel::Light).await.unwrap();
        let lux = session.read(Channel::Light).await.unwrap()[0];
        assert!((95.0..=105.0).contains(&lux));
    }
}
