//! State machine error types.

/// State machine error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsmError {
    /// Input was fed to a machine that already stopped.
    #[error("state machine is no longer active")]
    Inactive,

    /// No transition is defined for the current state and input.
    #[error("no transition from state {state} on input {input}")]
    NoTransition {
        /// Debug rendering of the state.
        state: String,
        /// Debug rendering of the input.
        input: String,
    },

    /// The machine performed more transitions than allowed.
    #[error("transition limit reached: {max}")]
    TransitionLimit {
        /// Configured maximum.
        max: u64,
    },

    /// The action rejected the input.
    #[error("transition failed: {message}")]
    Rejected {
        /// Why the input was rejected.
        message: String,
    },
}

/// Result type for state machine operations.
pub type FsmResult<T> = Result<T, FsmError>;
