//! Flow control error types.

use jacuzzi_core::TargetId;

/// Flow control error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    /// Speed limit reached.
    #[error("rate limit exceeded: {requested} units requested, retry in {wait_us}us")]
    RateLimitExceeded {
        /// Units requested.
        requested: u64,
        /// Microseconds until the request would be admitted.
        wait_us: u64,
    },

    /// A target's backlog is full.
    #[error("queue full for {target}: {size} resources (max {max_size})")]
    QueueFull {
        /// The target.
        target: TargetId,
        /// Current backlog length.
        size: usize,
        /// Maximum backlog length.
        max_size: usize,
    },

    /// Target not registered.
    #[error("{target} not found")]
    TargetNotFound {
        /// The target.
        target: TargetId,
    },

    /// Target already registered.
    #[error("{target} already registered")]
    TargetExists {
        /// The target.
        target: TargetId,
    },

    /// Too many targets registered.
    #[error("too many targets (max {max})")]
    TooManyTargets {
        /// Maximum number of targets.
        max: usize,
    },

    /// Priority must be finite and positive.
    #[error("invalid priority {priority}: must be finite and > 0")]
    InvalidPriority {
        /// The rejected priority.
        priority: f32,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// Shutdown in progress.
    #[error("shutdown in progress")]
    Shutdown,
}

/// Result type for flow control operations.
pub type FlowResult<T> = Result<T, FlowError>;
