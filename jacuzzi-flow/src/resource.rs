//! Resources and the targets that receive them.

use async_trait::async_trait;
use bytes::Bytes;

/// A unit of work handed to a target. Its size is what gets rate limited
/// and what fairness is measured in.
pub trait Resource: Send + 'static {
    /// Size of the resource in limiter units (typically bytes).
    fn size(&self) -> u64;
}

impl Resource for Bytes {
    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl Resource for Vec<u8> {
    fn size(&self) -> u64 {
        self.len() as u64
    }
}

/// Result of handing a resource to a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The target took the resource.
    Accepted,
    /// The target is gone. It is unregistered and its backlog dropped.
    Closed,
}

/// A consumer registered with a resource deliverer.
#[async_trait]
pub trait TargetResource<R: Resource>: Send + 'static {
    /// Takes delivery of one resource.
    async fn deliver(&mut self, resource: R) -> DeliveryOutcome;

    /// Called once when the target is unregistered or the deliverer stops.
    async fn on_removed(&mut self) {}
}
