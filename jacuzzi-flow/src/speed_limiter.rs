//! Sliding-window speed limiter.
//!
//! The limiter keeps the average over the last window at or below a
//! configured limit. Unlike a token bucket it never lets a burst exceed one
//! window's budget, except for a single oversized request which is admitted
//! once the window is empty.

use crate::error::{FlowError, FlowResult};
use crate::speed_monitor::SpeedMonitor;

/// Configuration for a speed limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedLimiterConfig {
    /// Units per second. `None` means unlimited.
    pub limit: Option<u64>,

    /// Averaging window in microseconds.
    pub window_us: u64,
}

impl SpeedLimiterConfig {
    /// Default averaging window (one second).
    pub const DEFAULT_WINDOW_US: u64 = 1_000_000;

    /// Creates a limited configuration.
    #[must_use]
    pub const fn new(limit: u64, window_us: u64) -> Self {
        Self {
            limit: Some(limit),
            window_us,
        }
    }

    /// Creates an unlimited configuration.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            limit: None,
            window_us: Self::DEFAULT_WINDOW_US,
        }
    }

    /// Creates a configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            limit: Some(1_000),
            window_us: 100_000,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` for a zero window or a zero limit.
    pub fn validate(&self) -> FlowResult<()> {
        if self.window_us == 0 {
            return Err(FlowError::InvalidConfig {
                message: "window_us must be positive".to_string(),
            });
        }
        if self.limit == Some(0) {
            return Err(FlowError::InvalidConfig {
                message: "speed limit must be positive, use None for unlimited".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for SpeedLimiterConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// A sliding-window speed limiter.
#[derive(Debug, Clone)]
pub struct SpeedLimiter {
    limit: Option<u64>,
    monitor: SpeedMonitor,
}

impl SpeedLimiter {
    /// Creates a new limiter.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: SpeedLimiterConfig) -> FlowResult<Self> {
        config.validate()?;
        Ok(Self {
            limit: config.limit,
            monitor: SpeedMonitor::new(config.window_us),
        })
    }

    /// Returns the current limit in units per second.
    #[must_use]
    pub const fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Replaces the limit. Recorded history is kept.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` for a zero limit.
    pub fn set_limit(&mut self, limit: Option<u64>) -> FlowResult<()> {
        SpeedLimiterConfig {
            limit,
            window_us: self.monitor.window_us(),
        }
        .validate()?;
        self.limit = limit;
        Ok(())
    }

    /// Returns the averaging window in microseconds.
    #[must_use]
    pub const fn window_us(&self) -> u64 {
        self.monitor.window_us()
    }

    /// Units allowed within one window.
    fn budget(&self, limit: u64) -> u64 {
        let budget = u128::from(limit) * u128::from(self.monitor.window_us()) / 1_000_000;
        u64::try_from(budget).unwrap_or(u64::MAX).max(1)
    }

    /// Returns how long to wait, in microseconds, before `amount` may be consumed.
    ///
    /// Zero means the amount can be consumed now.
    pub fn wait_time_us(&mut self, amount: u64, now_us: u64) -> u64 {
        let Some(limit) = self.limit else {
            return 0;
        };
        self.monitor.evict(now_us);

        let budget = self.budget(limit);
        let mut total = self.monitor.raw_total();
        if total.saturating_add(amount) <= budget {
            return 0;
        }

        // The window total must drop to this before `amount` fits.
        let target = budget.saturating_sub(amount);
        let window_us = self.monitor.window_us();
        for (time_us, sample) in self.monitor.samples() {
            total = total.saturating_sub(sample);
            if total <= target {
                return time_us.saturating_add(window_us).saturating_sub(now_us);
            }
        }
        0
    }

    /// Records consumed units. Recording is unconditional.
    pub fn record(&mut self, amount: u64, now_us: u64) {
        self.monitor.record(amount, now_us);
    }

    /// Consumes `amount` if it fits under the limit right now.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::RateLimitExceeded` with the required wait otherwise.
    pub fn try_acquire(&mut self, amount: u64, now_us: u64) -> FlowResult<()> {
        let wait_us = self.wait_time_us(amount, now_us);
        if wait_us > 0 {
            return Err(FlowError::RateLimitExceeded {
                requested: amount,
                wait_us,
            });
        }
        self.record(amount, now_us);
        Ok(())
    }

    /// Returns the measured speed in units per second.
    pub fn speed(&mut self, now_us: u64) -> f64 {
        self.monitor.speed(now_us)
    }

    /// Returns the total consumed within the window ending at `now_us`.
    pub fn total_in_window(&mut self, now_us: u64) -> u64 {
        self.monitor.total_in_window(now_us)
    }
}
