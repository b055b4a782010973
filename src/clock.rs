//! Wall-clock access and the sampling grid.
//!
//! Workers align their samples to instants that are whole multiples of the sampling
//! period since the Unix epoch, so every device samples at the same moments no matter
//! when its worker started. Instead of polling the clock, a worker computes the next
//! grid boundary and sleeps until it.

use std::time::Duration;

/// Source of wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Time elapsed since the Unix epoch.
    fn now(&self) -> Duration;
}

/// The host's real-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        let micros = chrono::Utc::now().timestamp_micros();
        Duration::from_micros(u64::try_from(micros).unwrap_or(0))
    }
}

/// A clock that starts at a chosen Unix time and advances with tokio's timer.
///
/// Under `#[tokio::test(start_paused = true)]` it moves only when the runtime
/// auto-advances, which makes grid waits instantaneous and deterministic.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Duration,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    /// Clock reading `origin` now.
    pub fn starting_at(origin: Duration) -> Self {
        Self {
            origin,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin + self.anchor.elapsed()
    }
}

/// Whole Unix seconds of a clock reading.
pub fn unix_seconds(time: Duration) -> i64 {
    i64::try_from(time.as_secs()).unwrap_or(i64::MAX)
}

/// Boundaries spaced by a fixed period, counted from the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingGrid {
    period: Duration,
}

impl SamplingGrid {
    /// Grid with the given spacing. A zero period is bumped to one nanosecond.
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_nanos(1)),
        }
    }

    /// Spacing of the grid.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Index of the first boundary at or after `now`.
    pub fn slot_at_or_after(&self, now: Duration) -> u64 {
        let period = self.period.as_nanos();
        let slot = now.as_nanos().div_ceil(period);
        u64::try_from(slot).unwrap_or(u64::MAX)
    }

    /// Instant of boundary `slot`.
    pub fn boundary(&self, slot: u64) -> Duration {
        let nanos = self.period.as_nanos().saturating_mul(u128::from(slot));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Slot to sample next: the first boundary not before `now` and strictly after
    /// `last`, so a slot is never sampled twice.
    pub fn next_slot(&self, now: Duration, last: Option<u64>) -> u64 {
        let slot = self.slot_at_or_after(now);
        match last {
            Some(last) if slot <= last => last + 1,
            _ => slot,
        }
    }
}

/// Sleep until `clock` reads at least `target`.
///
/// Re-checks after every wake, so an early wake-up or a clock step only costs another
/// short sleep.
pub async fn sleep_until(clock: &dyn Clock, target: Duration) {
    loop {
        let now = clock.now();
        if now >= target {
            return;
        }
        tokio::time::sleep(target - now).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_rounds_up_to_the_next_boundary() {
        let grid = SamplingGrid::new(Duration::from_secs(5));
        assert_eq!(grid.slot_at_or_after(Duration::from_secs(100)), 20);
        assert_eq!(grid.slot_at_or_after(Duration::from_millis(100_001)), 21);
        assert_eq!(grid.slot_at_or_after(Duration::from_millis(97_500)), 20);
        assert_eq!(grid.boundary(20), Duration::from_secs(100));
    }

    #[test]
    fn next_slot_never_repeats() {
        let grid = SamplingGrid::new(Duration::from_secs(5));
        // Read finished inside the slot it sampled.
        assert_eq!(grid.next_slot(Duration::from_secs(100), Some(20)), 21);
        // Long reconnect skipped several slots.
        assert_eq!(grid.next_slot(Duration::from_secs(131), Some(20)), 27);
        assert_eq!(grid.next_slot(Duration::from_secs(131), None), 27);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_until_reaches_target_on_tokio_clock() {
        let clock = TokioClock::starting_at(Duration::from_millis(97_500));
        sleep_until(&clock, Duration::from_secs(100)).await;
        assert_eq!(clock.now(), Duration::from_secs(100));
    }

    #[test]
    fn system_clock_is_past_2020() {
        assert!(unix_seconds(SystemClock.now()) > 1_577_836_800);
    }
}
