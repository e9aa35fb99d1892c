//! Settle windows and jitter
//!
//! Two kinds of pause: a fixed settle window that lets a transfer become
//! spendable at its recipient, and a short random jitter between sibling
//! legs so sends don't leave a uniform timing fingerprint.

use crate::structured_logging::RelayLogger;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_SETTLE_WINDOW: Duration = Duration::from_secs(25 * 60);
pub const DEFAULT_JITTER_MIN: Duration = Duration::from_secs(5);
pub const DEFAULT_JITTER_MAX: Duration = Duration::from_secs(10);
pub const DEFAULT_PER_MIDDLEMAN: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingPolicy {
    settle_window: Duration,
    jitter_min: Duration,
    jitter_max: Duration,
    /// Rough wall-clock cost of one fan-in leg, for estimates only
    per_middleman: Duration,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            settle_window: DEFAULT_SETTLE_WINDOW,
            jitter_min: DEFAULT_JITTER_MIN,
            jitter_max: DEFAULT_JITTER_MAX,
            per_middleman: DEFAULT_PER_MIDDLEMAN,
        }
    }
}

impl TimingPolicy {
    /// Jitter bounds are swapped if given in the wrong order
    pub fn new(settle_window: Duration, jitter_min: Duration, jitter_max: Duration) -> Self {
        let (jitter_min, jitter_max) = if jitter_min <= jitter_max {
            (jitter_min, jitter_max)
        } else {
            (jitter_max, jitter_min)
        };
        Self {
            settle_window,
            jitter_min,
            jitter_max,
            per_middleman: DEFAULT_PER_MIDDLEMAN,
        }
    }

    /// No pauses at all. Estimates keep their defaults.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_per_middleman(mut self, per_middleman: Duration) -> Self {
        self.per_middleman = per_middleman;
        self
    }

    pub fn settle_window(&self) -> Duration {
        self.settle_window
    }

    pub fn jitter_range(&self) -> (Duration, Duration) {
        (self.jitter_min, self.jitter_max)
    }

    pub fn settle_window_minutes(&self) -> u64 {
        self.settle_window.as_secs() / 60
    }

    pub fn per_middleman_minutes(&self) -> u64 {
        self.per_middleman.as_secs() / 60
    }

    /// Uniform random duration in `[jitter_min, jitter_max]`
    pub fn jitter_duration(&self) -> Duration {
        let min = self.jitter_min.as_millis() as u64;
        let max = self.jitter_max.as_millis() as u64;
        if max <= min {
            return self.jitter_min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Sleep for the settle window
    pub async fn settle(&self, logger: &RelayLogger, reason: &str) {
        logger.log_wait(reason, self.settle_window.as_secs());
        sleep(self.settle_window).await;
    }

    /// Sleep for a random jitter; returns how long it slept
    pub async fn jitter(&self, logger: &RelayLogger) -> Duration {
        let delay = self.jitter_duration();
        logger.log_wait("jitter", delay.as_secs());
        sleep(delay).await;
        delay
    }

    /// `hops × settle_window` in minutes
    pub fn sequential_estimate_minutes(&self, hops: usize) -> u64 {
        (hops as u64).saturating_mul(self.settle_window_minutes())
    }

    /// `settle_window + middlemen × per_middleman` in minutes
    pub fn fan_estimate_minutes(&self, middlemen: usize) -> u64 {
        self.settle_window_minutes()
            .saturating_add((middlemen as u64).saturating_mul(self.per_middleman_minutes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_defaults() {
        let timing = TimingPolicy::default();
        assert_eq!(timing.settle_window_minutes(), 25);
        assert_eq!(timing.per_middleman_minutes(), 15);
        assert_eq!(
            timing.jitter_range(),
            (Duration::from_secs(5), Duration::from_secs(10))
        );
    }

    #[test]
    fn test_jitter_within_range() {
        let timing = TimingPolicy::default();
        for _ in 0..200 {
            let d = timing.jitter_duration();
            assert!(d >= Duration::from_secs(5) && d <= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_jitter_bounds_normalised() {
        let timing = TimingPolicy::new(
            Duration::from_secs(60),
            Duration::from_secs(9),
            Duration::from_secs(3),
        );
        assert_eq!(
            timing.jitter_range(),
            (Duration::from_secs(3), Duration::from_secs(9))
        );
    }

    #[test]
    fn test_estimates() {
        let timing = TimingPolicy::default();
        assert_eq!(timing.sequential_estimate_minutes(3), 75);
        assert_eq!(timing.fan_estimate_minutes(2), 55);
        assert_eq!(TimingPolicy::immediate().sequential_estimate_minutes(3), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_sleeps_full_window() {
        let timing = TimingPolicy::default();
        let logger = RelayLogger::new("test");
        let start = Instant::now();
        timing.settle(&logger, "settle").await;
        assert_eq!(start.elapsed(), Duration::from_secs(25 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_sleep_matches_returned_delay() {
        let timing = TimingPolicy::default();
        let logger = RelayLogger::new("test");
        let start = Instant::now();
        let slept = timing.jitter(&logger).await;
        assert_eq!(start.elapsed(), slept);
    }
}
