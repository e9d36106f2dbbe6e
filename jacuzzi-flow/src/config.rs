//! Resource deliverer configuration.

use jacuzzi_core::Limits;

use crate::error::{FlowError, FlowResult};
use crate::fair_queue::FairQueueConfig;
use crate::speed_limiter::SpeedLimiterConfig;

/// Environment variable overriding the speed limit, in units per second.
/// `0`, `none` and `unlimited` disable the limit.
pub const SPEED_LIMIT_ENV: &str = "JACUZZI_SPEED_LIMIT";

/// Configuration for a [`ResourceDeliverer`](crate::ResourceDeliverer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelivererConfig {
    /// Units per second across all targets. `None` means unlimited.
    pub speed_limit: Option<u64>,

    /// Speed averaging window in microseconds.
    pub window_us: u64,

    /// Maximum number of registered targets.
    pub max_targets: usize,

    /// Maximum backlog per target.
    pub max_resources_per_target: usize,

    /// Deliveries buffered between the scheduler and the targets.
    /// Small values keep priority changes effective sooner.
    pub queue_capacity: usize,
}

impl DelivererConfig {
    /// Sets the speed limit.
    #[must_use]
    pub const fn with_speed_limit(mut self, limit: Option<u64>) -> Self {
        self.speed_limit = limit;
        self
    }

    /// Sets the averaging window.
    #[must_use]
    pub const fn with_window_us(mut self, window_us: u64) -> Self {
        self.window_us = window_us;
        self
    }

    /// Creates a configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        let limits = Limits::for_testing();
        Self {
            speed_limit: None,
            window_us: 100_000,
            max_targets: limits.max_targets as usize,
            max_resources_per_target: limits.max_resources_per_target as usize,
            queue_capacity: 1,
        }
    }

    /// Default configuration with the speed limit taken from
    /// `JACUZZI_SPEED_LIMIT` when it is set and parseable.
    #[must_use]
    pub fn from_env() -> Self {
        let value = std::env::var(SPEED_LIMIT_ENV).ok();
        Self::default().with_speed_limit_override(value.as_deref())
    }

    /// Applies a textual speed limit override. Unparseable values are ignored.
    #[must_use]
    pub fn with_speed_limit_override(mut self, value: Option<&str>) -> Self {
        let Some(value) = value.map(str::trim) else {
            return self;
        };
        if value.eq_ignore_ascii_case("none") || value.eq_ignore_ascii_case("unlimited") {
            self.speed_limit = None;
            return self;
        }
        match value.parse::<u64>() {
            Ok(0) => self.speed_limit = None,
            Ok(limit) => self.speed_limit = Some(limit),
            Err(_) => {
                tracing::warn!(
                    variable = SPEED_LIMIT_ENV,
                    value,
                    "ignoring unparseable speed limit"
                );
            }
        }
        self
    }

    /// Returns the speed limiter part of this configuration.
    #[must_use]
    pub const fn limiter_config(&self) -> SpeedLimiterConfig {
        SpeedLimiterConfig {
            limit: self.speed_limit,
            window_us: self.window_us,
        }
    }

    /// Returns the fair queue part of this configuration.
    #[must_use]
    pub const fn queue_config(&self) -> FairQueueConfig {
        FairQueueConfig {
            max_targets: self.max_targets,
            max_resources_per_target: self.max_resources_per_target,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` describing the first bad field.
    pub fn validate(&self) -> FlowResult<()> {
        self.limiter_config().validate()?;
        self.queue_config().validate()?;
        if self.queue_capacity == 0 {
            return Err(FlowError::InvalidConfig {
                message: "queue_capacity must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for DelivererConfig {
    fn default() -> Self {
        let limits = Limits::new();
        Self {
            speed_limit: None,
            window_us: SpeedLimiterConfig::DEFAULT_WINDOW_US,
            max_targets: limits.max_targets as usize,
            max_resources_per_target: limits.max_resources_per_target as usize,
            queue_capacity: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(DelivererConfig::default().validate().is_ok());
        assert!(DelivererConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        let config = DelivererConfig {
            queue_capacity: 0,
            ..DelivererConfig::for_testing()
        };
        assert!(matches!(
            config.validate(),
            Err(FlowError::InvalidConfig { .. })
        ));

        let config = DelivererConfig::for_testing().with_speed_limit(Some(0));
        assert!(config.validate().is_err());

        let config = DelivererConfig::for_testing().with_window_us(0);
        assert!(config.validate().is_err());

        let config = DelivererConfig {
            max_targets: 0,
            ..DelivererConfig::for_testing()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_speed_limit_override() {
        let base = DelivererConfig::for_testing().with_speed_limit(Some(10));

        assert_eq!(base.with_speed_limit_override(None).speed_limit, Some(10));
        assert_eq!(
            base.with_speed_limit_override(Some(" 2048 ")).speed_limit,
            Some(2048)
        );
        assert_eq!(base.with_speed_limit_override(Some("0")).speed_limit, None);
        assert_eq!(
            base.with_speed_limit_override(Some("Unlimited")).speed_limit,
            None
        );
        assert_eq!(
            base.with_speed_limit_override(Some("fast")).speed_limit,
            Some(10)
        );
    }

    #[test]
    fn test_sub_configs() {
        let config = DelivererConfig::for_testing().with_speed_limit(Some(500));
        assert_eq!(config.limiter_config().limit, Some(500));
        assert_eq!(config.queue_config().max_targets, config.max_targets);
    }
}
