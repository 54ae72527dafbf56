//! Delay accounting for polls.
//!
//! A [`Countdown`] is decremented in small steps instead of sleeping through
//! the whole delay at once, so a snapshot taken at any moment sees an
//! accurate remaining value. Across restarts the remaining delay is frozen
//! into the snapshot and re-aged with [`remaining_after_downtime`].
//!
//! All sleeping goes through `tokio::time`, which lets tests pause and
//! fast-forward the clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Monotonic countdown shared between its owning task and snapshot readers.
///
/// Only the owning task calls [`Countdown::consume`]; everyone else reads.
#[derive(Debug)]
pub struct Countdown {
    remaining_ms: AtomicU64,
}

impl Countdown {
    pub fn new(delay: Duration) -> Self {
        Self {
            remaining_ms: AtomicU64::new(duration_to_ms(delay)),
        }
    }

    /// Build from a signed number of seconds. Zero or negative means "already expired".
    pub fn from_secs(secs: i64) -> Self {
        Self::new(Duration::from_secs(u64::try_from(secs).unwrap_or(0)))
    }

    pub fn remaining(&self) -> Duration {
        Duration::from_millis(self.remaining_ms.load(Ordering::Acquire))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_ms.load(Ordering::Acquire) == 0
    }

    /// Subtract `elapsed`, clamping at zero. Returns what is left.
    pub fn consume(&self, elapsed: Duration) -> Duration {
        let elapsed_ms = duration_to_ms(elapsed);
        let previous = self
            .remaining_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |ms| {
                Some(ms.saturating_sub(elapsed_ms))
            })
            .unwrap_or(0);
        Duration::from_millis(previous.saturating_sub(elapsed_ms))
    }

    /// Sleep in steps of at most `tick` until the countdown reaches zero.
    ///
    /// Dropping the future mid-step loses at most one partial step.
    pub async fn run(&self, tick: Duration) {
        let tick = tick.max(Duration::from_millis(1));
        while !self.is_expired() {
            let step = tick.min(self.remaining());
            let started = Instant::now();
            tokio::time::sleep(step).await;
            self.consume(started.elapsed());
        }
    }
}

/// Age a persisted remaining delay by the wall-clock time since it was saved.
///
/// A snapshot timestamp in the future (clock skew) counts as zero elapsed.
pub fn remaining_after_downtime(
    saved_remaining: Duration,
    saved_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Duration {
    let elapsed = (now - saved_at).to_std().unwrap_or(Duration::ZERO);
    saved_remaining.saturating_sub(elapsed)
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub(crate) fn duration_to_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_seconds_start_expired() {
        let countdown = Countdown::from_secs(-30);
        assert!(countdown.is_expired());
        assert_eq!(countdown.remaining(), Duration::ZERO);
    }

    #[test]
    fn consume_clamps_at_zero() {
        let countdown = Countdown::new(Duration::from_secs(2));
        assert_eq!(countdown.consume(Duration::from_millis(500)), Duration::from_millis(1500));
        assert_eq!(countdown.consume(Duration::from_secs(10)), Duration::ZERO);
        assert!(countdown.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn run_counts_down_in_steps() {
        let countdown = Countdown::new(Duration::from_millis(2500));
        let started = Instant::now();
        countdown.run(Duration::from_secs(1)).await;
        assert!(countdown.is_expired());
        assert_eq!(started.elapsed(), Duration::from_millis(2500));
    }

    #[test]
    fn milliseconds_saturate() {
        assert_eq!(duration_to_ms(Duration::from_millis(1_500)), 1_500);
        assert_eq!(duration_to_ms(Duration::MAX), u64::MAX);
    }

    #[test]
    fn downtime_reduces_remaining() {
        let saved_at = Utc::now();
        let now = saved_at + chrono::Duration::seconds(40);
        let left = remaining_after_downtime(Duration::from_secs(100), saved_at, now);
        assert_eq!(left, Duration::from_secs(60));
    }

    #[test]
    fn downtime_longer_than_delay_clamps() {
        let saved_at = Utc::now();
        let now = saved_at + chrono::Duration::hours(3);
        let left = remaining_after_downtime(Duration::from_secs(100), saved_at, now);
        assert_eq!(left, Duration::ZERO);
    }

    #[test]
    fn future_timestamp_counts_as_no_downtime() {
        let now = Utc::now();
        let saved_at = now + chrono::Duration::seconds(30);
        let left = remaining_after_downtime(Duration::from_secs(100), saved_at, now);
        assert_eq!(left, Duration::from_secs(100));
    }
}
