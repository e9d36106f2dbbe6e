//! Sliding-window throughput measurement.
//!
//! Progress is recorded as `(time, amount)` samples. A sample recorded at `t`
//! counts towards the window `(now - window, now]`, so it expires once
//! `now >= t + window`. The measured speed is the windowed total divided by
//! the window length.

use std::collections::VecDeque;

/// One recorded amount of progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sample {
    time_us: u64,
    amount: u128,
}

/// Sliding-window speed monitor.
#[derive(Debug, Clone)]
pub struct SpeedMonitor {
    window_us: u64,
    samples: VecDeque<Sample>,
    /// Wide enough that summing `u64` amounts never overflows.
    total: u128,
}

impl SpeedMonitor {
    /// Creates a monitor averaging over `window_us` microseconds.
    ///
    /// A zero window is treated as one microsecond.
    #[must_use]
    pub fn new(window_us: u64) -> Self {
        Self {
            window_us: window_us.max(1),
            samples: VecDeque::new(),
            total: 0,
        }
    }

    /// Returns the window length in microseconds.
    #[must_use]
    pub const fn window_us(&self) -> u64 {
        self.window_us
    }

    /// Records `amount` units of progress at `now_us`.
    pub fn record(&mut self, amount: u64, now_us: u64) {
        self.evict(now_us);
        let amount = u128::from(amount);
        self.total += amount;
        match self.samples.back_mut() {
            Some(last) if last.time_us == now_us => last.amount += amount,
            _ => self.samples.push_back(Sample {
                time_us: now_us,
                amount,
            }),
        }
    }

    /// Drops samples that left the window at `now_us`.
    ///
    /// Time going backwards evicts nothing.
    pub fn evict(&mut self, now_us: u64) {
        while let Some(front) = self.samples.front() {
            if front.time_us.saturating_add(self.window_us) > now_us {
                break;
            }
            self.total -= front.amount;
            self.samples.pop_front();
        }
    }

    /// Returns the total recorded within the window ending at `now_us`,
    /// saturating at `u64::MAX`.
    pub fn total_in_window(&mut self, now_us: u64) -> u64 {
        self.evict(now_us);
        self.raw_total()
    }

    /// Returns the average speed over the window, in units per second.
    #[allow(clippy::cast_precision_loss)] // Speed is informational.
    pub fn speed(&mut self, now_us: u64) -> f64 {
        let total = self.total_in_window(now_us);
        total as f64 * 1_000_000.0 / self.window_us as f64
    }

    /// Returns the samples still in the window, oldest first, as `(time_us, amount)`.
    ///
    /// Call [`Self::evict`] first for an exact view.
    pub(crate) fn samples(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.samples
            .iter()
            .map(|s| (s.time_us, u64::try_from(s.amount).unwrap_or(u64::MAX)))
    }

    /// Returns the windowed total without evicting.
    pub(crate) fn raw_total(&self) -> u64 {
        u64::try_from(self.total).unwrap_or(u64::MAX)
    }

    /// Forgets all samples.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_within_window() {
        let mut monitor = SpeedMonitor::new(1_000_000);
        monitor.record(100, 0);
        monitor.record(50, 500_000);

        assert_eq!(monitor.total_in_window(900_000), 150);
        // First sample expires exactly one window after it was recorded.
        assert_eq!(monitor.total_in_window(1_000_000), 50);
        assert_eq!(monitor.total_in_window(1_500_000), 0);
    }

    #[test]
    fn test_speed() {
        let mut monitor = SpeedMonitor::new(2_000_000);
        monitor.record(1000, 0);
        monitor.record(1000, 1_000_000);

        let speed = monitor.speed(1_500_000);
        assert!((speed - 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_same_instant_samples_merge() {
        let mut monitor = SpeedMonitor::new(1_000);
        monitor.record(1, 10);
        monitor.record(2, 10);
        assert_eq!(monitor.samples().count(), 1);
        assert_eq!(monitor.total_in_window(10), 3);
    }

    #[test]
    fn test_time_going_backwards() {
        let mut monitor = SpeedMonitor::new(1_000);
        monitor.record(5, 10_000);
        // Earlier timestamp: nothing evicted, nothing panics.
        assert_eq!(monitor.total_in_window(0), 5);
        monitor.record(1, 0);
        assert_eq!(monitor.raw_total(), 6);
    }

    #[test]
    fn test_huge_amounts_expire_cleanly() {
        let mut monitor = SpeedMonitor::new(1_000);
        monitor.record(u64::MAX, 0);
        monitor.record(u64::MAX, 500);
        assert_eq!(monitor.total_in_window(500), u64::MAX);

        // Evicting the first sample leaves the second one whole.
        assert_eq!(monitor.total_in_window(1_000), u64::MAX);
        monitor.record(1, 1_200);
        assert_eq!(monitor.total_in_window(1_500), 1);
        assert_eq!(monitor.total_in_window(10_000), 0);
    }

    #[test]
    fn test_reset() {
        let mut monitor = SpeedMonitor::new(1_000);
        monitor.record(5, 0);
        monitor.reset();
        assert_eq!(monitor.total_in_window(0), 0);
        assert_eq!(monitor.speed(0), 0.0);
    }

    #[test]
    fn test_zero_window_treated_as_one() {
        let monitor = SpeedMonitor::new(0);
        assert_eq!(monitor.window_us(), 1);
    }
}
