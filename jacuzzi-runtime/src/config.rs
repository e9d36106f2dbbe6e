//! Runtime configuration.
//!
//! Each component takes a small config struct with a `Default`, a
//! `for_testing()` preset and a `validate()` check run at spawn time.

use std::time::Duration;

/// Configuration for a [`crate::Daemon`].
#[derive(Debug, Clone, Copy)]
pub struct DaemonConfig {
    /// Delay between `solve_state` attempts that did not resolve the state.
    pub retry_delay: Duration,
    /// Command channel capacity.
    pub channel_capacity: usize,
}

impl DaemonConfig {
    /// Creates a configuration with the given retry delay.
    #[must_use]
    pub const fn new(retry_delay: Duration) -> Self {
        Self {
            retry_delay,
            channel_capacity: 16,
        }
    }

    /// Sets the command channel capacity.
    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Creates a configuration suitable for testing (no retry delay).
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            retry_delay: Duration::ZERO,
            channel_capacity: 4,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the channel capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidCapacity {
                name: "channel_capacity",
            });
        }
        Ok(())
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

/// Configuration for a [`crate::MessageProcessor`].
#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    /// Messages buffered between the reader and the handler.
    pub queue_capacity: usize,
}

impl ProcessorConfig {
    /// Creates a configuration with the given queue capacity.
    #[must_use]
    pub const fn new(queue_capacity: usize) -> Self {
        Self { queue_capacity }
    }

    /// Sets the queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Creates a configuration suitable for testing (tiny queue).
    #[must_use]
    pub const fn for_testing() -> Self {
        Self { queue_capacity: 2 }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the queue capacity is zero or above
    /// `Limits::max_pending_messages`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidCapacity {
                name: "queue_capacity",
            });
        }
        let max = jacuzzi_core::Limits::new().max_pending_messages as usize;
        if self.queue_capacity > max {
            return Err(ConfigError::AboveLimit {
                name: "queue_capacity",
                max,
            });
        }
        Ok(())
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::new(jacuzzi_core::Limits::new().max_pending_messages as usize)
    }
}

/// Configuration for an [`crate::ObjectPool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Maximum number of objects checked out at once.
    pub max_size: usize,
    /// Maximum number of idle objects kept for reuse.
    pub max_idle: usize,
}

impl PoolConfig {
    /// Creates a configuration keeping up to `max_size` idle objects.
    #[must_use]
    pub const fn new(max_size: usize) -> Self {
        Self {
            max_size,
            max_idle: max_size,
        }
    }

    /// Sets the idle object cap.
    #[must_use]
    pub const fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Creates a small pool configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        let max_size = jacuzzi_core::Limits::for_testing().max_pool_size as usize;
        Self {
            max_size,
            max_idle: max_size / 2,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if `max_size` is zero or `max_idle` exceeds it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::InvalidCapacity { name: "max_size" });
        }
        if self.max_idle > self.max_size {
            return Err(ConfigError::Inconsistent {
                message: "max_idle must be <= max_size".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(jacuzzi_core::Limits::new().max_pool_size as usize)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A capacity was zero.
    InvalidCapacity {
        /// Name of the field.
        name: &'static str,
    },
    /// A setting exceeded its system limit.
    AboveLimit {
        /// Name of the field.
        name: &'static str,
        /// Largest accepted value.
        max: usize,
    },
    /// Two settings contradict each other.
    Inconsistent {
        /// Error description.
        message: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCapacity { name } => write!(f, "invalid capacity: {name} must be positive"),
            Self::AboveLimit { name, max } => write!(f, "{name} exceeds the limit of {max}"),
            Self::Inconsistent { message } => write!(f, "inconsistent config: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}
