//! Device Link: the live connection to one sensor tag.
//!
//! A link owns at most one session with its device and is owned by exactly one
//! acquisition worker. It never gives up on connecting: failures are logged and
//! retried after a fixed interval for as long as the process runs.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect()──> Connecting{attempt} ──ok──> Connected
//!                                 ▲      │                   │ read()
//!                                 │   failure                ▼
//!                                 │  (sleep, attempt+1)   Sampling
//!                                 │                          │
//!                                 └──── reconnect() ◄── fault / done → Connected
//! ```
//!
//! The current state is published on a [`watch`] channel so health reporting can
//! observe a link without touching it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::DeviceDescriptor;
use crate::hardware::capabilities::{SensorTagDriver, SensorTagSession};
use crate::hardware::channels::Channel;
use crate::reading::{round2, Reading};

/// Connection state of a [`DeviceLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No session and no attempt in progress.
    Disconnected,
    /// Connection attempt in progress.
    Connecting {
        /// Attempt number within the current connect cycle (1-based)
        attempt: u32,
    },
    /// Session open and idle.
    Connected,
    /// Channels enabled, read in progress.
    Sampling,
}

impl LinkState {
    /// Returns true if a session is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Sampling)
    }

    /// Returns a short status label for display.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting { .. } => "connecting",
            Self::Connected => "connected",
            Self::Sampling => "sampling",
        }
    }
}

/// Retry behaviour while connecting.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Wait between two attempts.
    pub retry_interval: Duration,
    /// Consecutive failures after which each further failure is logged as an error.
    pub escalate_after: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            escalate_after: 12,
        }
    }
}

/// Connection and read capability for one device.
pub struct DeviceLink<D: SensorTagDriver> {
    device: DeviceDescriptor,
    driver: Arc<D>,
    session: Option<D::Session>,
    policy: ReconnectPolicy,
    settle_delay: Duration,
    state_tx: watch::Sender<LinkState>,
}

impl<D: SensorTagDriver> DeviceLink<D> {
    /// Create a disconnected link.
    pub fn new(
        device: DeviceDescriptor,
        driver: Arc<D>,
        policy: ReconnectPolicy,
        settle_delay: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            device,
            driver,
            session: None,
            policy,
            settle_delay,
            state_tx,
        }
    }

    /// Identity of the linked device.
    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: LinkState) {
        self.state_tx.send_replace(state);
    }

    /// Connect, retrying forever. Returns only once a session is open.
    pub async fn connect(&mut self) {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            self.set_state(LinkState::Connecting { attempt });
            debug!(label = %self.device.label, address = %self.device.address, attempt, "Connecting");

            match self.driver.connect(&self.device.address).await {
                Ok(session) => {
                    self.session = Some(session);
                    self.set_state(LinkState::Connected);
                    info!(label = %self.device.label, address = %self.device.address, attempt, "Connected");
                    return;
                }
                Err(e) => {
                    if attempt >= self.policy.escalate_after {
                        error!(
                            label = %self.device.label,
                            address = %self.device.address,
                            attempt,
                            error = %e,
                            "Still unable to connect, will retry in {:?}",
                            self.policy.retry_interval
                        );
                    } else {
                        warn!(
                            label = %self.device.label,
                            address = %self.device.address,
                            attempt,
                            error = %e,
                            "Connection failed, will retry in {:?}",
                            self.policy.retry_interval
                        );
                    }
                    tokio::time::sleep(self.policy.retry_interval).await;
                }
            }
        }
    }

    /// Drop the current session and connect again, retrying forever.
    pub async fn reconnect(&mut self) {
        self.session = None;
        self.set_state(LinkState::Disconnected);
        info!(label = %self.device.label, address = %self.device.address, "Re-connecting");
        self.connect().await;
    }

    /// Power up `channels` and wait the settle delay.
    ///
    /// On error the channels enabled so far stay enabled; callers disable the whole
    /// set afterwards.
    pub async fn enable(&mut self, channels: &[Channel]) -> anyhow::Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Device {} is not connected", self.device.address))?;
        for channel in channels {
            session.enable(*channel).await?;
        }
        tokio::time::sleep(self.settle_delay).await;
        Ok(())
    }

    /// Power down `channels`.
    pub async fn disable(&mut self, channels: &[Channel]) -> anyhow::Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Device {} is not connected", self.device.address))?;
        for channel in channels {
            session.disable(*channel).await?;
        }
        Ok(())
    }

    /// Sample `channels` once.
    ///
    /// Values are rounded to two decimals and the reading is stamped with
    /// `acquired_at`, the Unix second at which acquisition began. Any link fault
    /// yields `None`: channels are disabled best-effort and no partial reading is
    /// returned.
    pub async fn read(&mut self, channels: &[Channel], acquired_at: i64) -> Option<Reading> {
        self.set_state(LinkState::Sampling);
        let result = self.try_read(channels, acquired_at).await;
        match result {
            Ok(reading) => {
                self.set_state(LinkState::Connected);
                Some(reading)
            }
            Err(e) => {
                warn!(
                    label = %self.device.label,
                    address = %self.device.address,
                    error = %e,
                    "Unable to take sensor readings"
                );
                if let Err(disable_err) = self.disable(channels).await {
                    debug!(
                        label = %self.device.label,
                        error = %disable_err,
                        "Best-effort disable after fault failed"
                    );
                }
                self.set_state(if self.session.is_some() {
                    LinkState::Connected
                } else {
                    LinkState::Disconnected
                });
                None
            }
        }
    }

    async fn try_read(&mut self, channels: &[Channel], acquired_at: i64) -> anyhow::Result<Reading> {
        self.enable(channels).await?;

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Device {} is not connected", self.device.address))?;
        let mut reading = Reading::new(acquired_at, self.device.label.clone());
        for channel in channels {
            let values = session.read(*channel).await?;
            let fields = channel.field_names();
            if values.len() != fields.len() {
                anyhow::bail!(
                    "Channel {} returned {} values, expected {}",
                    channel,
                    values.len(),
                    fields.len()
                );
            }
            for (field, value) in fields.iter().zip(values) {
                if !value.is_finite() {
                    anyhow::bail!("Channel {} returned non-finite {} = {}", channel, field, value);
                }
                reading.insert(*field, round2(value));
            }
        }

        self.disable(channels).await?;
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::SimulatedDriver;
    use tracing_test::traced_test;

    fn link(driver: &SimulatedDriver) -> DeviceLink<SimulatedDriver> {
        DeviceLink::new(
            DeviceDescriptor::new("AA", "x"),
            Arc::new(driver.clone()),
            ReconnectPolicy {
                retry_interval: Duration::from_secs(5),
                escalate_after: 2,
            },
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn connect_retries_until_device_answers() {
        let driver = SimulatedDriver::new();
        driver.fail_next_connects("AA", 3);
        let mut link = link(&driver);
        let states = link.subscribe();

        let started = tokio::time::Instant::now();
        link.connect().await;

        assert_eq!(driver.connect_attempts("AA"), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(*states.borrow(), LinkState::Connected);
        assert!(logs_contain("Connection failed, will retry"));
        assert!(logs_contain("Still unable to connect"));
    }

    #[tokio::test(start_paused = true)]
    async fn read_rounds_values_and_uses_given_timestamp() {
        let driver =
            SimulatedDriver::new().with_fixed_values(Channel::Light, vec![123.4567]);
        let mut link = link(&driver);
        link.connect().await;

        let started = tokio::time::Instant::now();
        let reading = link.read(&[Channel::Light], 99).await.unwrap();

        assert_eq!(reading.timestamp, 99);
        assert_eq!(reading.label, "x");
        assert_eq!(reading.values.get("light"), Some(&123.46));
        // Settle delay elapsed before the read.
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        // Channels are switched off again after every sample.
        assert_eq!(driver.disable_calls("AA"), 1);
        assert_eq!(link.state(), LinkState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn faulted_read_is_all_or_nothing() {
        let driver = SimulatedDriver::new();
        // Second channel read of the first sample fails.
        driver.fault_read_call("AA", 1);
        let mut link = link(&driver);
        link.connect().await;

        let reading = link.read(&[Channel::Light, Channel::Humidity], 10).await;
        assert!(reading.is_none());
        // Best-effort disable covered both channels.
        assert_eq!(driver.disable_calls("AA"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_tuple_width_is_a_fault() {
        let driver = SimulatedDriver::new().with_fixed_values(Channel::Light, vec![1.0, 2.0]);
        let mut link = link(&driver);
        link.connect().await;
        assert!(link.read(&[Channel::Light], 10).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn non_finite_values_are_faults() {
        let driver = SimulatedDriver::new().with_fixed_values(Channel::Light, vec![f64::NAN]);
        let mut link = link(&driver);
        link.connect().await;
        assert!(link.read(&[Channel::Light], 10).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn read_without_session_fails_cleanly() {
        let driver = SimulatedDriver::new();
        let mut link = link(&driver);
        assert!(link.read(&[Channel::Light], 10).await.is_none());
        assert_eq!(driver.read_calls("AA"), 0);
        assert_eq!(link.state(), LinkState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_opens_a_fresh_session() {
        let driver = SimulatedDriver::new();
        let mut link = link(&driver);
        link.connect().await;
        link.reconnect().await;
        assert_eq!(driver.connects("AA"), 2);
        assert!(link.state().is_connected());
    }
}
