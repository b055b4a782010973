//! Persistence Writer: drains the shared buffer into the CSV log on a fixed cadence.
//!
//! ```text
//! Workers (every sampling period) → ReadingBuffer
//!                                        ↓
//!                             PersistenceWriter (every writer interval)
//!                                        ↓
//!                                     lux.csv
//! ```
//!
//! The writer never holds the buffer lock while touching the disk, so producers are
//! never slowed down by I/O. A snapshot that fails to persist is retried under the
//! configured [`RetryPolicy`]; when that budget runs out the writer stops with
//! [`DaqError::PersistenceFailed`] and the acquisition workers carry on unaffected.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::storage::{AppendReport, CsvLog};
use crate::buffer::ReadingBuffer;
use crate::error::{AppResult, DaqError};
use crate::error_recovery::{retry_with_policy, RetryPolicy};

/// Background writer that persists the reading buffer.
pub struct PersistenceWriter {
    log: CsvLog,
    buffer: Arc<ReadingBuffer>,
    flush_interval: Duration,
    retry: RetryPolicy,
    rows_written: u64,
    rows_rejected: u64,
}

impl PersistenceWriter {
    /// Create a writer draining `buffer` into `log`.
    pub fn new(
        log: CsvLog,
        buffer: Arc<ReadingBuffer>,
        flush_interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            log,
            buffer,
            flush_interval,
            retry,
            rows_written: 0,
            rows_rejected: 0,
        }
    }

    /// Rows written since the writer was created.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Readings rejected by the schema policy since the writer was created.
    pub fn rows_rejected(&self) -> u64 {
        self.rows_rejected
    }

    /// Drain the buffer once and persist the snapshot.
    ///
    /// Transient failures are retried with the same snapshot in hand; only after the
    /// retry budget is spent does this return an error.
    pub async fn flush_once(&mut self) -> AppResult<AppendReport> {
        let snapshot = self.buffer.drain_snapshot();
        if snapshot.is_empty() {
            return Ok(AppendReport::default());
        }

        let log = &mut self.log;
        let report = retry_with_policy(&self.retry, "Appending readings to log", || {
            log.append(&snapshot)
        })
        .await?;

        self.rows_written += report.written as u64;
        self.rows_rejected += report.rejected as u64;
        debug!(
            rows = report.written,
            rejected = report.rejected,
            total = self.rows_written,
            "Flushed readings"
        );
        Ok(report)
    }

    /// Run the writer loop until `shutdown` fires or persistence fails for good.
    ///
    /// On shutdown one final drain is performed so readings already in the buffer
    /// reach the disk.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> AppResult<()> {
        info!(path = %self.log.path().display(), "Starting processing");
        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.flush_once().await {
                        error!(error = %err, "Persistence writer stopping");
                        return Err(err);
                    }
                }
                _ = &mut shutdown => {
                    info!("Persistence writer received shutdown signal");
                    let result = self.flush_once().await;
                    info!(rows = self.rows_written, rejected = self.rows_rejected, "Persistence writer stopped");
                    return result.map(|_| ());
                }
            }
        }
    }
}

impl std::fmt::Debug for PersistenceWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceWriter")
            .field("path", &self.log.path())
            .field("flush_interval", &self.flush_interval)
            .field("rows_written", &self.rows_written)
            .finish()
    }
}

/// Whether an error ended the writer for good.
pub fn is_fatal(err: &DaqError) -> bool {
    matches!(err, DaqError::PersistenceFailed { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{Reading, SchemaPolicy};
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn writer(dir: &TempDir, buffer: &Arc<ReadingBuffer>) -> PersistenceWriter {
        let log = CsvLog::open(dir.path().join("lux.csv"), SchemaPolicy::Strict).unwrap();
        PersistenceWriter::new(
            log,
            Arc::clone(buffer),
            Duration::from_secs(1),
            RetryPolicy {
                max_attempts: 2,
                backoff_delay: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test]
    async fn flush_of_empty_buffer_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let buffer = Arc::new(ReadingBuffer::new());
        let mut writer = writer(&dir, &buffer);

        assert_eq!(writer.flush_once().await.unwrap(), AppendReport::default());
        assert!(!dir.path().join("lux.csv").exists());
    }

    #[tokio::test]
    async fn flush_moves_buffer_to_disk() {
        let dir = TempDir::new().unwrap();
        let buffer = Arc::new(ReadingBuffer::new());
        let mut writer = writer(&dir, &buffer);

        buffer.append(Reading::new(99, "x").with_value("light", 123.45));
        buffer.append(Reading::new(99, "y").with_value("light", 123.45));
        let report = writer.flush_once().await.unwrap();

        assert_eq!(report.written, 2);
        assert!(buffer.is_empty());
        assert_eq!(writer.rows_written(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unwritable_log_fails_after_retry_budget() {
        let dir = TempDir::new().unwrap();
        let buffer = Arc::new(ReadingBuffer::new());
        let log = CsvLog::open(dir.path().join("lux.csv"), SchemaPolicy::Strict).unwrap();
        // A directory where the file should be makes every open fail.
        std::fs::create_dir(dir.path().join("lux.csv")).unwrap();
        let mut writer = PersistenceWriter::new(
            log,
            Arc::clone(&buffer),
            Duration::from_secs(1),
            RetryPolicy {
                max_attempts: 2,
                backoff_delay: Duration::from_millis(100),
            },
        );

        buffer.append(Reading::new(1, "x").with_value("light", 1.0));
        let err = writer.flush_once().await.unwrap_err();
        assert!(is_fatal(&err));
        assert!(matches!(err, DaqError::PersistenceFailed { attempts: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn shutdown_performs_a_final_flush() {
        let dir = TempDir::new().unwrap();
        let buffer = Arc::new(ReadingBuffer::new());
        let writer = writer(&dir, &buffer);
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(writer.run(rx));

        // Let the first (immediate) tick pass with an empty buffer.
        tokio::time::sleep(Duration::from_millis(10)).await;
        buffer.append(Reading::new(5, "x").with_value("light", 2.0));
        tx.send(()).unwrap();
        task.await.unwrap().unwrap();

        let (_, readings) = CsvLog::read_all(dir.path().join("lux.csv")).unwrap();
        assert_eq!(readings.len(), 1);
        assert!(logs_contain("Persistence writer received shutdown signal"));
    }
}
