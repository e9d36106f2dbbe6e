//! System limits and configuration bounds.
//!
//! Every queue, pool and table in jacuzzi has an explicit maximum size.

/// Limits shared by the jacuzzi crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    // Resource delivery.
    /// Maximum number of delivery targets registered at once.
    pub max_targets: u32,
    /// Maximum number of undelivered resources queued per target.
    pub max_resources_per_target: u32,

    // Message processing.
    /// Maximum number of messages buffered between a reader and its handler.
    pub max_pending_messages: u32,

    // Pools.
    /// Maximum number of objects a pool hands out concurrently.
    pub max_pool_size: u32,

    // State machines.
    /// Maximum number of transitions a single state machine may perform.
    pub max_fsm_transitions: u64,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_targets: 4096,
            max_resources_per_target: 16_384,
            max_pending_messages: 1024,
            max_pool_size: 256,
            max_fsm_transitions: u64::MAX,
        }
    }

    /// Creates small limits for tests, so bounds are easy to hit.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_targets: 16,
            max_resources_per_target: 64,
            max_pending_messages: 8,
            max_pool_size: 4,
            max_fsm_transitions: 1000,
        }
    }

    /// Validates that all limits are usable.
    ///
    /// # Errors
    /// Returns an error if any limit is zero.
    pub const fn validate(&self) -> crate::Result<()> {
        if self.max_targets == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_targets",
                reason: "must be positive",
            });
        }
        if self.max_resources_per_target == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_resources_per_target",
                reason: "must be positive",
            });
        }
        if self.max_pending_messages == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_pending_messages",
                reason: "must be positive",
            });
        }
        if self.max_pool_size == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_pool_size",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_are_valid() {
        assert!(Limits::new().validate().is_ok());
        assert!(Limits::for_testing().validate().is_ok());
    }

    #[test]
    fn test_zero_targets_rejected() {
        let mut limits = Limits::new();
        limits.max_targets = 0;
        assert_eq!(
            limits.validate(),
            Err(crate::Error::InvalidArgument {
                name: "max_targets",
                reason: "must be positive",
            })
        );
    }

    #[test]
    fn test_zero_pool_rejected() {
        let mut limits = Limits::new();
        limits.max_pool_size = 0;
        assert!(limits.validate().is_err());
    }
}
