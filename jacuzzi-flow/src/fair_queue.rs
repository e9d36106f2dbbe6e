//! Weighted fair queue of resources across delivery targets.
//!
//! Each target owns a FIFO backlog and a priority. Fairness uses virtual time
//! scheduling: after a delivery the target's virtual time advances by
//! `size * PRECISION / priority`, and the active target with the smallest
//! virtual time is served next. Over time each target's delivered share is
//! proportional to its priority.
//!
//! Active targets sit in a binary heap ordered by virtual time, then by the
//! order in which targets became active, then by target id. Heap entries are
//! never removed in place; each carries the generation it was issued under
//! and is skipped once the target's generation moves on (priority change,
//! removal). The heap is rebuilt once stale entries outnumber live ones.
//!
//! A target that becomes active is lifted to the smallest active virtual time,
//! so idling never banks credit.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use jacuzzi_core::{Limits, TargetId};

use crate::error::{FlowError, FlowResult};
use crate::resource::Resource;

/// Scale applied to virtual time increments so small resources still advance.
const PRECISION: f64 = 1_000_000.0;

/// Stale heap entries tolerated before a rebuild, on top of one per target.
const STALE_SLACK: usize = 64;

/// Configuration for the fair delivery queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FairQueueConfig {
    /// Maximum number of registered targets.
    pub max_targets: usize,

    /// Maximum backlog length per target.
    pub max_resources_per_target: usize,
}

impl FairQueueConfig {
    /// Creates a configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        let limits = Limits::for_testing();
        Self {
            max_targets: limits.max_targets as usize,
            max_resources_per_target: limits.max_resources_per_target as usize,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` if either bound is zero.
    pub fn validate(&self) -> FlowResult<()> {
        if self.max_targets == 0 {
            return Err(FlowError::InvalidConfig {
                message: "max_targets must be positive".to_string(),
            });
        }
        if self.max_resources_per_target == 0 {
            return Err(FlowError::InvalidConfig {
                message: "max_resources_per_target must be positive".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for FairQueueConfig {
    fn default() -> Self {
        let limits = Limits::new();
        Self {
            max_targets: limits.max_targets as usize,
            max_resources_per_target: limits.max_resources_per_target as usize,
        }
    }
}

/// A resource chosen for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery<R> {
    /// Receiving target.
    pub target: TargetId,
    /// Registration of the target the resource was queued under.
    ///
    /// A target removed and added again under the same id gets a new one.
    pub registration: u64,
    /// The resource.
    pub resource: R,
    /// `resource.size()` at the time it was queued.
    pub size: u64,
}

/// Per-target state.
struct TargetQueue<R> {
    registration: u64,
    priority: f32,
    backlog: VecDeque<(R, u64)>,
    virtual_time: u64,
    /// Position in the order targets became active. Kept while active.
    activation: u64,
    /// Generation of this target's live heap entry.
    generation: u64,
    delivered: u64,
    delivered_count: u64,
}

impl<R> TargetQueue<R> {
    /// Virtual time cost of delivering `size` units at this priority.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )] // Float to int casts saturate.
    fn cost(&self, size: u64) -> u64 {
        (size as f64 * PRECISION / f64::from(self.priority)) as u64
    }
}

/// Heap entry. Ordered so that `BinaryHeap` pops the smallest
/// `(virtual_time, activation, target)` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    virtual_time: u64,
    activation: u64,
    target: TargetId,
    generation: u64,
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        (
            other.virtual_time,
            other.activation,
            other.target,
            other.generation,
        )
            .cmp(&(
                self.virtual_time,
                self.activation,
                self.target,
                self.generation,
            ))
    }
}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A weighted fair queue of resources keyed by target.
pub struct FairDeliveryQueue<R> {
    targets: HashMap<TargetId, TargetQueue<R>>,
    heap: BinaryHeap<Slot>,
    config: FairQueueConfig,
    next_registration: u64,
    next_activation: u64,
    next_generation: u64,
    /// Virtual time of the last served entry.
    floor: u64,
    total_pending: usize,
    total_enqueued: u64,
    total_delivered: u64,
    delivered_bytes: u64,
}

impl<R: Resource> FairDeliveryQueue<R> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(config: FairQueueConfig) -> Self {
        Self {
            targets: HashMap::new(),
            heap: BinaryHeap::new(),
            config,
            next_registration: 1,
            next_activation: 1,
            next_generation: 1,
            floor: 0,
            total_pending: 0,
            total_enqueued: 0,
            total_delivered: 0,
            delivered_bytes: 0,
        }
    }

    fn check_priority(priority: f32) -> FlowResult<()> {
        if priority.is_finite() && priority > 0.0 {
            Ok(())
        } else {
            Err(FlowError::InvalidPriority { priority })
        }
    }

    /// Registers a target and returns its registration number, unique for the
    /// lifetime of this queue.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPriority`, `TargetExists` or `TooManyTargets`.
    pub fn add_target(&mut self, target: TargetId, priority: f32) -> FlowResult<u64> {
        Self::check_priority(priority)?;
        if self.targets.contains_key(&target) {
            return Err(FlowError::TargetExists { target });
        }
        if self.targets.len() >= self.config.max_targets {
            return Err(FlowError::TooManyTargets {
                max: self.config.max_targets,
            });
        }
        let registration = self.next_registration;
        self.next_registration += 1;
        self.targets.insert(
            target,
            TargetQueue {
                registration,
                priority,
                backlog: VecDeque::new(),
                virtual_time: 0,
                activation: 0,
                generation: 0,
                delivered: 0,
                delivered_count: 0,
            },
        );
        Ok(registration)
    }

    /// Unregisters a target and returns its undelivered resources.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::TargetNotFound` if the target is unknown.
    pub fn remove_target(&mut self, target: TargetId) -> FlowResult<Vec<R>> {
        let queue = self
            .targets
            .remove(&target)
            .ok_or(FlowError::TargetNotFound { target })?;
        self.total_pending -= queue.backlog.len();
        Ok(queue.backlog.into_iter().map(|(resource, _)| resource).collect())
    }

    /// Changes a target's priority. Only future deliveries are affected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPriority` or `TargetNotFound`.
    pub fn set_priority(&mut self, target: TargetId, priority: f32) -> FlowResult<()> {
        Self::check_priority(priority)?;
        let queue = self
            .targets
            .get_mut(&target)
            .ok_or(FlowError::TargetNotFound { target })?;
        queue.priority = priority;
        if !queue.backlog.is_empty() {
            // Reissue the heap entry so the old one goes stale.
            self.issue(target);
        }
        Ok(())
    }

    /// Pushes a fresh heap entry for an active target at its current virtual time.
    fn issue(&mut self, target: TargetId) {
        let generation = self.next_generation;
        let Some(queue) = self.targets.get_mut(&target) else {
            return;
        };
        self.next_generation += 1;
        queue.generation = generation;
        self.heap.push(Slot {
            virtual_time: queue.virtual_time,
            activation: queue.activation,
            target,
            generation,
        });
        if self.heap.len() > 2 * self.targets.len() + STALE_SLACK {
            self.compact();
        }
    }

    /// Drops every stale heap entry.
    fn compact(&mut self) {
        let targets = &self.targets;
        self.heap.retain(|slot| {
            targets.get(&slot.target).is_some_and(|queue| {
                queue.generation == slot.generation && !queue.backlog.is_empty()
            })
        });
    }

    /// Queues a resource for a target.
    ///
    /// # Errors
    ///
    /// Returns `TargetNotFound` or `QueueFull`.
    pub fn push(&mut self, target: TargetId, resource: R) -> FlowResult<()> {
        let (was_idle, own_time) = {
            let queue = self
                .targets
                .get(&target)
                .ok_or(FlowError::TargetNotFound { target })?;
            if queue.backlog.len() >= self.config.max_resources_per_target {
                return Err(FlowError::QueueFull {
                    target,
                    size: queue.backlog.len(),
                    max_size: self.config.max_resources_per_target,
                });
            }
            (queue.backlog.is_empty(), queue.virtual_time)
        };

        let lifted = if was_idle {
            Some(own_time.max(self.min_active_virtual_time()))
        } else {
            None
        };
        let activation = self.next_activation;

        let Some(queue) = self.targets.get_mut(&target) else {
            return Err(FlowError::TargetNotFound { target });
        };
        let size = resource.size();
        queue.backlog.push_back((resource, size));
        if let Some(virtual_time) = lifted {
            queue.virtual_time = virtual_time;
            queue.activation = activation;
            self.next_activation += 1;
            self.issue(target);
        }
        self.total_pending += 1;
        self.total_enqueued += 1;
        Ok(())
    }

    /// Drops stale entries from the top of the heap.
    fn settle(&mut self) {
        while let Some(slot) = self.heap.peek() {
            let live = self.targets.get(&slot.target).is_some_and(|queue| {
                queue.generation == slot.generation && !queue.backlog.is_empty()
            });
            if live {
                return;
            }
            self.heap.pop();
        }
    }

    /// Smallest virtual time among active targets, or the last served one.
    fn min_active_virtual_time(&mut self) -> u64 {
        self.settle();
        self.heap
            .peek()
            .map_or(self.floor, |slot| slot.virtual_time.max(self.floor))
    }

    /// Returns the target and size of the next delivery without taking it.
    pub fn peek(&mut self) -> Option<(TargetId, u64)> {
        self.settle();
        let slot = self.heap.peek()?;
        let queue = self.targets.get(&slot.target)?;
        let (_, size) = queue.backlog.front()?;
        Some((slot.target, *size))
    }

    /// Takes the next resource by fairness.
    pub fn pop(&mut self) -> Option<Delivery<R>> {
        self.settle();
        let slot = self.heap.pop()?;
        let queue = self.targets.get_mut(&slot.target)?;
        let (resource, size) = queue.backlog.pop_front()?;

        self.floor = self.floor.max(slot.virtual_time);
        queue.virtual_time = slot.virtual_time.saturating_add(queue.cost(size));
        queue.delivered = queue.delivered.saturating_add(size);
        queue.delivered_count += 1;
        let registration = queue.registration;

        if queue.backlog.is_empty() {
            queue.generation = 0;
        } else {
            // Keeps its activation while it stays active.
            self.issue(slot.target);
        }

        self.total_pending -= 1;
        self.total_delivered += 1;
        self.delivered_bytes = self.delivered_bytes.saturating_add(size);
        Some(Delivery {
            target: slot.target,
            registration,
            resource,
            size,
        })
    }

    /// Returns a target's backlog length.
    #[must_use]
    pub fn pending(&self, target: TargetId) -> Option<usize> {
        self.targets.get(&target).map(|queue| queue.backlog.len())
    }

    /// Returns the number of queued resources across all targets.
    #[must_use]
    pub const fn total_pending(&self) -> usize {
        self.total_pending
    }

    /// Returns whether nothing is queued.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_pending == 0
    }

    /// Returns the total size handed out for a target.
    #[must_use]
    pub fn delivered(&self, target: TargetId) -> Option<u64> {
        self.targets.get(&target).map(|queue| queue.delivered)
    }

    /// Returns a target's priority.
    #[must_use]
    pub fn priority(&self, target: TargetId) -> Option<f32> {
        self.targets.get(&target).map(|queue| queue.priority)
    }

    /// Returns a target's registration number.
    #[must_use]
    pub fn registration(&self, target: TargetId) -> Option<u64> {
        self.targets.get(&target).map(|queue| queue.registration)
    }

    /// Returns whether a target is registered.
    #[must_use]
    pub fn contains(&self, target: TargetId) -> bool {
        self.targets.contains_key(&target)
    }

    /// Returns registered targets in id order.
    #[must_use]
    pub fn target_ids(&self) -> Vec<TargetId> {
        let mut ids: Vec<TargetId> = self.targets.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns statistics about the queue.
    #[must_use]
    pub fn stats(&self) -> FairQueueStats {
        FairQueueStats {
            targets: self.targets.len(),
            active_targets: self
                .targets
                .values()
                .filter(|queue| !queue.backlog.is_empty())
                .count(),
            pending: self.total_pending,
            total_enqueued: self.total_enqueued,
            total_delivered: self.total_delivered,
            delivered_bytes: self.delivered_bytes,
        }
    }
}

impl<R> std::fmt::Debug for FairDeliveryQueue<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FairDeliveryQueue")
            .field("targets", &self.targets.len())
            .field("pending", &self.total_pending)
            .field("floor", &self.floor)
            .finish_non_exhaustive()
    }
}

/// Statistics about the fair queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FairQueueStats {
    /// Registered targets.
    pub targets: usize,
    /// Targets with a non-empty backlog.
    pub active_targets: usize,
    /// Queued resources.
    pub pending: usize,
    /// Resources ever queued.
    pub total_enqueued: u64,
    /// Resources handed out.
    pub total_delivered: u64,
    /// Sum of the sizes handed out.
    pub delivered_bytes: u64,
}
