//! Shared Reading Buffer.
//!
//! The single synchronization point between the acquisition workers (many producers)
//! and the persistence writer (one consumer). Readings are independent, self-timestamped
//! facts, so the buffer keeps no order: a drain hands back whatever is pending.
//!
//! The lock is held only for a `push` or a `mem::take`, never across I/O or an
//! `.await`, so producers are never blocked by the writer's disk work.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::reading::Reading;

/// Concurrency-safe multiset of pending readings.
#[derive(Debug, Default)]
pub struct ReadingBuffer {
    pending: Mutex<Vec<Reading>>,
    appended: AtomicU64,
}

impl ReadingBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one reading. Safe to call from any number of tasks at once.
    pub fn append(&self, reading: Reading) {
        self.pending.lock().push(reading);
        self.appended.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically remove and return every reading present at the time of the call.
    ///
    /// Draining an empty buffer returns an empty vector.
    pub fn drain_snapshot(&self) -> Vec<Reading> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Number of readings waiting to be drained.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is waiting to be drained.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Readings appended since the buffer was created.
    pub fn total_appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn drain_of_empty_buffer_is_empty() {
        let buffer = ReadingBuffer::new();
        assert!(buffer.drain_snapshot().is_empty());
        assert!(buffer.drain_snapshot().is_empty());
        assert_eq!(buffer.total_appended(), 0);
    }

    #[test]
    fn drain_takes_everything_once() {
        let buffer = ReadingBuffer::new();
        buffer.append(Reading::new(1, "a"));
        buffer.append(Reading::new(2, "b"));
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.drain_snapshot().len(), 2);
        assert!(buffer.is_empty());
        assert!(buffer.drain_snapshot().is_empty());
        assert_eq!(buffer.total_appended(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_and_drainer_lose_nothing() {
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: i64 = 500;

        let buffer = Arc::new(ReadingBuffer::new());
        let mut producers = Vec::new();
        for p in 0..PRODUCERS {
            let buffer = Arc::clone(&buffer);
            producers.push(tokio::spawn(async move {
                for i in 0..PER_PRODUCER {
                    buffer.append(Reading::new(i, format!("dev-{p}")));
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }

        let drainer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while seen.len() < PRODUCERS * PER_PRODUCER as usize {
                    seen.extend(buffer.drain_snapshot());
                    tokio::task::yield_now().await;
                }
                seen
            })
        };

        for producer in producers {
            producer.await.unwrap();
        }
        let seen = drainer.await.unwrap();

        let unique: HashSet<(String, i64)> =
            seen.iter().map(|r| (r.label.clone(), r.timestamp)).collect();
        assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER as usize);
        assert_eq!(unique.len(), seen.len());
        assert!(buffer.is_empty());
    }
}
