//! Runtime error types.

use crate::config::ConfigError;

/// Errors returned by daemons, processors and timers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// The background task has shut down.
    #[error("shutdown in progress")]
    Shutdown,

    /// A bounded queue is full.
    #[error("queue full (capacity {capacity})")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },

    /// The supplied configuration is invalid.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors returned by [`crate::ObjectPool`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Every object is checked out.
    #[error("pool exhausted: {max_size} objects in use")]
    Exhausted {
        /// Pool size.
        max_size: usize,
    },

    /// The pool was closed.
    #[error("pool closed")]
    Closed,

    /// The factory failed to create an object.
    #[error("object factory failed: {message}")]
    Factory {
        /// Factory error message.
        message: String,
    },
}
