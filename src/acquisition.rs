//! Acquisition Worker: one per device, running for the life of the process.
//!
//! ```text
//! connect ──> wait for grid boundary ──> read ──ok──> append to buffer ──┐
//!                  ▲                        │                              │
//!                  │                      fault                            │
//!                  │                        ▼                              │
//!                  └──────────────── reconnect (retry forever) ◄───────────┘
//! ```
//!
//! Each cycle sleeps until the next boundary of the shared sampling grid, so all
//! workers sample at the same instants regardless of when they started. The recorded
//! timestamp is the boundary minus the settle delay, approximating the moment the
//! light actually hit the sensor rather than when the read call returned.
//!
//! All faults are absorbed here. A failed read records nothing for that cycle and
//! forces a reconnect; a device that never comes back only stalls its own worker.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::buffer::ReadingBuffer;
use crate::clock::{sleep_until, unix_seconds, Clock, SamplingGrid};
use crate::hardware::capabilities::SensorTagDriver;
use crate::hardware::channels::Channel;
use crate::link::{DeviceLink, LinkState};

/// Result of one sampling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A reading with this timestamp was appended to the buffer.
    Recorded {
        /// Unix seconds written into the reading
        timestamp: i64,
    },
    /// The read faulted; the link was re-established and nothing was recorded.
    Faulted {
        /// Grid slot that produced no reading
        slot: u64,
    },
}

/// Drives one [`DeviceLink`] through the sampling loop.
pub struct AcquisitionWorker<D: SensorTagDriver> {
    link: DeviceLink<D>,
    channels: Vec<Channel>,
    buffer: Arc<ReadingBuffer>,
    clock: Arc<dyn Clock>,
    grid: SamplingGrid,
    settle_compensation: Duration,
    last_slot: Option<u64>,
}

impl<D: SensorTagDriver> AcquisitionWorker<D> {
    /// Create a worker; nothing happens until [`run`](Self::run) or
    /// [`start`](Self::start) is awaited.
    pub fn new(
        link: DeviceLink<D>,
        channels: Vec<Channel>,
        buffer: Arc<ReadingBuffer>,
        clock: Arc<dyn Clock>,
        sampling_period: Duration,
        settle_delay: Duration,
    ) -> Self {
        Self {
            link,
            channels,
            buffer,
            clock,
            grid: SamplingGrid::new(sampling_period),
            settle_compensation: settle_delay,
            last_slot: None,
        }
    }

    /// Observe the link state of this worker.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }

    /// Establish the first connection, retrying forever.
    pub async fn start(&mut self) {
        let device = self.link.device();
        info!(label = %device.label, address = %device.address, "Starting collection");
        self.link.connect().await;
    }

    /// Connect, then sample forever.
    pub async fn run(mut self) {
        self.start().await;
        loop {
            self.run_cycle().await;
        }
    }

    /// Wait for the next grid boundary and take one sample.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let slot = self.grid.next_slot(self.clock.now(), self.last_slot);
        let boundary = self.grid.boundary(slot);
        sleep_until(self.clock.as_ref(), boundary).await;
        self.last_slot = Some(slot);

        let acquired_at = unix_seconds(boundary.saturating_sub(self.settle_compensation));
        match self.link.read(&self.channels, acquired_at).await {
            Some(reading) => {
                debug!(
                    label = %reading.label,
                    timestamp = reading.timestamp,
                    values = ?reading.values,
                    "Sample recorded"
                );
                self.buffer.append(reading);
                CycleOutcome::Recorded {
                    timestamp: acquired_at,
                }
            }
            None => {
                self.link.reconnect().await;
                CycleOutcome::Faulted { slot }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::config::DeviceDescriptor;
    use crate::hardware::mock::SimulatedDriver;
    use crate::link::ReconnectPolicy;

    fn worker(
        driver: &SimulatedDriver,
        buffer: &Arc<ReadingBuffer>,
        start_at: Duration,
    ) -> AcquisitionWorker<SimulatedDriver> {
        let link = DeviceLink::new(
            DeviceDescriptor::new("AA", "x"),
            Arc::new(driver.clone()),
            ReconnectPolicy {
                retry_interval: Duration::from_secs(5),
                escalate_after: 3,
            },
            Duration::from_secs(1),
        );
        AcquisitionWorker::new(
            link,
            vec![Channel::Light],
            Arc::clone(buffer),
            Arc::new(TokioClock::starting_at(start_at)),
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn timestamps_follow_the_grid_minus_settle() {
        let driver = SimulatedDriver::new();
        let buffer = Arc::new(ReadingBuffer::new());
        let mut worker = worker(&driver, &buffer, Duration::from_millis(97_500));
        worker.start().await;

        let mut stamps = Vec::new();
        for _ in 0..4 {
            match worker.run_cycle().await {
                CycleOutcome::Recorded { timestamp } => stamps.push(timestamp),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(stamps, vec![99, 104, 109, 114]);
        assert_eq!(buffer.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fault_leaves_a_gap_then_resumes() {
        let driver = SimulatedDriver::new();
        driver.fault_read_call("AA", 1);
        let buffer = Arc::new(ReadingBuffer::new());
        let mut worker = worker(&driver, &buffer, Duration::from_secs(98));
        worker.start().await;

        assert_eq!(worker.run_cycle().await, CycleOutcome::Recorded { timestamp: 99 });
        assert_eq!(worker.run_cycle().await, CycleOutcome::Faulted { slot: 21 });
        assert_eq!(worker.run_cycle().await, CycleOutcome::Recorded { timestamp: 109 });

        let mut stamps: Vec<i64> = buffer.drain_snapshot().iter().map(|r| r.timestamp).collect();
        stamps.sort();
        assert_eq!(stamps, vec![99, 109]);
        assert_eq!(driver.connects("AA"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reconnect_skips_slots_without_resampling() {
        let driver = SimulatedDriver::new();
        driver.fault_read_call("AA", 0);
        let buffer = Arc::new(ReadingBuffer::new());
        let mut worker = worker(&driver, &buffer, Duration::from_secs(98));
        worker.start().await;
        // Reconnect needs three attempts: ~10s of retries after the fault at t=101.
        driver.fail_next_connects("AA", 2);

        assert_eq!(worker.run_cycle().await, CycleOutcome::Faulted { slot: 20 });
        assert_eq!(worker.run_cycle().await, CycleOutcome::Recorded { timestamp: 114 });
    }
}
