//! Startup Coordinator: brings the pipeline up in order and hands back a handle.
//!
//! Startup sequence:
//! 1. Validate configuration and open the output log (adopting an existing header)
//! 2. Spawn one acquisition worker per device, `startup_stagger` apart
//! 3. Wait `init_grace` so the first connections can settle
//! 4. Spawn the persistence writer
//!
//! Shutdown sequence (see [`Pipeline::shutdown`]):
//! 1. Abort all workers; readings already buffered are kept
//! 2. Signal the writer, which performs one last drain
//! 3. Wait up to [`SHUTDOWN_TIMEOUT`] for it, then abort

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::acquisition::AcquisitionWorker;
use crate::buffer::ReadingBuffer;
use crate::clock::Clock;
use crate::config::DaqConfig;
use crate::data::storage::CsvLog;
use crate::data::writer::PersistenceWriter;
use crate::error::{AppResult, DaqError};
use crate::error_recovery::RetryPolicy;
use crate::hardware::capabilities::SensorTagDriver;
use crate::link::{DeviceLink, LinkState, ReconnectPolicy};

/// How long [`Pipeline::shutdown`] waits for the writer's final flush.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Wires configuration, driver and clock into a running pipeline.
pub struct Coordinator<D: SensorTagDriver> {
    config: DaqConfig,
    driver: Arc<D>,
    clock: Arc<dyn Clock>,
}

impl<D: SensorTagDriver> Coordinator<D> {
    /// Create a coordinator. Nothing runs until [`start`](Self::start).
    pub fn new(config: DaqConfig, driver: Arc<D>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            driver,
            clock,
        }
    }

    /// The configuration this coordinator starts from.
    pub fn config(&self) -> &DaqConfig {
        &self.config
    }

    /// Start every worker, then the writer.
    ///
    /// Returns once the writer has been spawned, i.e. after roughly
    /// `devices × startup_stagger + init_grace`.
    pub async fn start(&self) -> AppResult<Pipeline> {
        self.config.validate()?;
        let timing = &self.config.timing;
        let storage = &self.config.storage;

        let log = CsvLog::open(&storage.output_path, storage.schema_policy)?;
        let buffer = Arc::new(ReadingBuffer::new());
        let policy = ReconnectPolicy {
            retry_interval: timing.retry_interval,
            escalate_after: self.config.link.escalate_after,
        };

        info!(
            devices = self.config.devices.len(),
            channels = ?self.config.channels,
            period = ?timing.sampling_period,
            "Starting acquisition workers"
        );

        let mut workers = JoinSet::new();
        let mut link_states = Vec::with_capacity(self.config.devices.len());
        for device in &self.config.devices {
            let link = DeviceLink::new(
                device.clone(),
                Arc::clone(&self.driver),
                policy.clone(),
                timing.settle_delay,
            );
            let worker = AcquisitionWorker::new(
                link,
                self.config.channels.clone(),
                Arc::clone(&buffer),
                Arc::clone(&self.clock),
                timing.sampling_period,
                timing.settle_delay,
            );
            link_states.push((device.label.clone(), worker.subscribe()));
            workers.spawn(worker.run());
            sleep(timing.startup_stagger).await;
        }

        info!(grace = ?timing.init_grace, "All workers started, waiting before persistence");
        sleep(timing.init_grace).await;

        let writer = PersistenceWriter::new(
            log,
            Arc::clone(&buffer),
            timing.writer_interval,
            RetryPolicy {
                max_attempts: storage.max_write_attempts,
                backoff_delay: storage.write_backoff,
            },
        );
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let writer_task = tokio::spawn(writer.run(shutdown_rx));

        Ok(Pipeline {
            buffer,
            link_states,
            workers,
            writer_task: Some(writer_task),
            writer_shutdown_tx: Some(shutdown_tx),
            writer_failure: None,
        })
    }
}

/// Overall condition of a running pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineHealth {
    /// Workers sampling and the writer persisting.
    Healthy,
    /// The writer stopped for good; workers keep sampling into the buffer.
    Degraded {
        /// Why persistence stopped
        reason: String,
    },
}

/// Handle to a running pipeline.
pub struct Pipeline {
    buffer: Arc<ReadingBuffer>,
    link_states: Vec<(String, watch::Receiver<LinkState>)>,
    workers: JoinSet<()>,
    writer_task: Option<JoinHandle<AppResult<()>>>,
    writer_shutdown_tx: Option<oneshot::Sender<()>>,
    writer_failure: Option<String>,
}

impl Pipeline {
    /// The shared reading buffer.
    pub fn buffer(&self) -> &Arc<ReadingBuffer> {
        &self.buffer
    }

    /// Link state receivers, one per device label, in configuration order.
    pub fn link_states(&self) -> &[(String, watch::Receiver<LinkState>)] {
        &self.link_states
    }

    /// Labels whose link currently reports a live session.
    pub fn connected_labels(&self) -> Vec<String> {
        self.link_states
            .iter()
            .filter(|(_, rx)| rx.borrow().is_connected())
            .map(|(label, _)| label.clone())
            .collect()
    }

    /// Whether readings are still being persisted.
    pub fn health(&self) -> PipelineHealth {
        match &self.writer_failure {
            Some(reason) => PipelineHealth::Degraded {
                reason: reason.clone(),
            },
            None => PipelineHealth::Healthy,
        }
    }

    /// Number of worker tasks still running.
    pub fn active_workers(&self) -> usize {
        self.workers.len()
    }

    /// Wait until the writer stops on its own, which only happens on a fatal
    /// persistence error.
    ///
    /// Cancel-safe: dropping the future leaves the writer running.
    pub async fn wait_writer(&mut self) -> AppResult<()> {
        let Some(task) = self.writer_task.as_mut() else {
            return Ok(());
        };
        let joined = task.await;
        self.writer_task = None;
        self.writer_shutdown_tx = None;
        let result = flatten(joined);
        if let Err(err) = &result {
            warn!(
                error = %err,
                buffered = self.buffer.len(),
                "Persistence stopped, acquisition continues without it"
            );
            self.writer_failure = Some(err.to_string());
        }
        result
    }

    /// Stop the workers and let the writer flush what is left.
    pub async fn shutdown(mut self) -> AppResult<()> {
        info!(workers = self.workers.len(), "Stopping acquisition workers");
        self.workers.shutdown().await;

        let Some(mut task) = self.writer_task.take() else {
            return Ok(());
        };

        info!("Sending shutdown signal to persistence writer");
        let signalled = self
            .writer_shutdown_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false);
        if !signalled {
            // Writer already returned; collect its result.
            return flatten(task.await);
        }

        match timeout(SHUTDOWN_TIMEOUT, &mut task).await {
            Ok(joined) => {
                let result = flatten(joined);
                if result.is_ok() {
                    info!(
                        remaining = self.buffer.len(),
                        "Persistence writer stopped gracefully"
                    );
                }
                result
            }
            Err(_) => {
                warn!(timeout = ?SHUTDOWN_TIMEOUT, "Persistence writer did not stop in time, aborting");
                task.abort();
                Err(DaqError::Task(format!(
                    "persistence writer did not stop within {:?}",
                    SHUTDOWN_TIMEOUT
                )))
            }
        }
    }
}

fn flatten(joined: Result<AppResult<()>, JoinError>) -> AppResult<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(DaqError::Task(format!("persistence writer task failed: {}", e))),
    }
}
