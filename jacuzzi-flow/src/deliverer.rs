//! Rate-limited, priority-weighted resource delivery.
//!
//! A [`ResourceDeliverer`] owns a [`FairDeliveryQueue`] and a [`SpeedLimiter`]
//! behind a shared lock and runs a message processor over them:
//!
//! ```text
//!  submit() ──▶ FairDeliveryQueue ──▶ ResourceDelivererMessageReader ──▶ DeliveryHandler ──▶ TargetResource
//!                      ▲                (waits on the SpeedLimiter)
//!                      └── add_target / set_priority / remove_target
//! ```
//!
//! The reader only takes a resource out of the queue once the limiter admits
//! it, so a cancelled read never loses a resource and priority changes apply
//! to everything not yet handed over.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use jacuzzi_core::TargetId;
use jacuzzi_runtime::{
    HandleOutcome, MessageHandler, MessageProcessor, MessageReader, ProcessorConfig,
    ProcessorHandle, ReadOutcome,
};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::DelivererConfig;
use crate::error::{FlowError, FlowResult};
use crate::fair_queue::{Delivery, FairDeliveryQueue};
use crate::resource::{DeliveryOutcome, Resource, TargetResource};
use crate::speed_limiter::SpeedLimiter;

type SharedTarget<R> = Arc<tokio::sync::Mutex<Box<dyn TargetResource<R>>>>;

/// A sink together with the queue registration it belongs to.
struct Registered<R> {
    registration: u64,
    sink: SharedTarget<R>,
}

/// Delivery statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelivererStats {
    /// Registered targets. Zero once stopped.
    pub targets: usize,
    /// Resources waiting in target backlogs. Kept after a stop until the
    /// target is removed.
    pub pending: usize,
    /// Resources accepted by targets.
    pub delivered_resources: u64,
    /// Sum of the sizes accepted by targets.
    pub delivered_bytes: u64,
    /// Targets that reported themselves closed.
    pub closed_targets: u64,
    /// Resources discarded because their target went away.
    pub dropped: u64,
}

struct DelivererState<R> {
    queue: FairDeliveryQueue<R>,
    limiter: SpeedLimiter,
    /// Sinks still owed `on_removed`. Their ids are a subset of the queue's.
    targets: HashMap<TargetId, Registered<R>>,
    stopped: bool,
    delivered_resources: u64,
    delivered_bytes: u64,
    closed_targets: u64,
    dropped: u64,
}

/// What the reader should do next.
enum Step<R> {
    Ready(Delivery<R>),
    Wait(u64),
    Idle,
    Stopped,
}

struct Shared<R> {
    state: Mutex<DelivererState<R>>,
    wake: Notify,
    epoch: Instant,
}

impl<R: Resource> Shared<R> {
    fn lock(&self) -> MutexGuard<'_, DelivererState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now_us(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    fn next_step(&self) -> Step<R> {
        let now_us = self.now_us();
        let mut state = self.lock();
        if state.stopped {
            return Step::Stopped;
        }
        let Some((_, size)) = state.queue.peek() else {
            return Step::Idle;
        };
        let wait_us = state.limiter.wait_time_us(size, now_us);
        if wait_us > 0 {
            return Step::Wait(wait_us);
        }
        match state.queue.pop() {
            Some(delivery) => {
                state.limiter.record(delivery.size, now_us);
                Step::Ready(delivery)
            }
            None => Step::Idle,
        }
    }

    /// Returns the sink of `target` if it is still the given registration.
    fn sink(&self, target: TargetId, registration: u64) -> Option<SharedTarget<R>> {
        self.lock()
            .targets
            .get(&target)
            .filter(|registered| registered.registration == registration)
            .map(|registered| Arc::clone(&registered.sink))
    }

    /// Unregisters a target, optionally only a specific registration of it.
    ///
    /// Returns the sink if it is still owed `on_removed` (not after a stop),
    /// and the undelivered backlog.
    fn unregister(
        &self,
        target: TargetId,
        registration: Option<u64>,
    ) -> FlowResult<(Option<SharedTarget<R>>, Vec<R>)> {
        let mut state = self.lock();
        let current = state
            .queue
            .registration(target)
            .ok_or(FlowError::TargetNotFound { target })?;
        if registration.is_some_and(|registration| registration != current) {
            return Err(FlowError::TargetNotFound { target });
        }
        let backlog = state.queue.remove_target(target)?;
        let sink = state.targets.remove(&target).map(|registered| registered.sink);
        Ok((sink, backlog))
    }
}

/// Message reader that hands out resources in fair order at the allowed speed.
///
/// It waits until some target has a backlog, waits until the speed limiter
/// admits the next resource, records it and yields it. It finishes once the
/// deliverer is stopped.
pub struct ResourceDelivererMessageReader<R> {
    shared: Arc<Shared<R>>,
}

#[async_trait]
impl<R: Resource> MessageReader<Delivery<R>> for ResourceDelivererMessageReader<R> {
    async fn read(&mut self) -> ReadOutcome<Delivery<R>> {
        loop {
            match self.shared.next_step() {
                Step::Ready(delivery) => {
                    trace!(target_id = %delivery.target, size = delivery.size, "resource admitted");
                    return ReadOutcome::Message(delivery);
                }
                Step::Stopped => return ReadOutcome::Finished,
                Step::Idle => self.shared.wake.notified().await,
                Step::Wait(wait_us) => {
                    trace!(wait_us, "waiting for speed limit");
                    // Woken early when the limit changes or the deliverer stops.
                    tokio::select! {
                        () = tokio::time::sleep(Duration::from_micros(wait_us)) => {}
                        () = self.shared.wake.notified() => {}
                    }
                }
            }
        }
    }
}

/// Message handler that hands each delivery to its target.
pub struct DeliveryHandler<R> {
    shared: Arc<Shared<R>>,
}

impl<R: Resource> DeliveryHandler<R> {
    async fn close_target(&self, target: TargetId, registration: u64) {
        let Ok((sink, backlog)) = self.shared.unregister(target, Some(registration)) else {
            // Already removed by the owner.
            return;
        };
        {
            let mut state = self.shared.lock();
            state.closed_targets += 1;
            state.dropped += backlog.len() as u64;
        }
        info!(target_id = %target, dropped = backlog.len(), "target closed");
        if let Some(sink) = sink {
            sink.lock().await.on_removed().await;
        }
    }
}

#[async_trait]
impl<R: Resource> MessageHandler<Delivery<R>> for DeliveryHandler<R> {
    async fn handle(&mut self, delivery: Delivery<R>) -> HandleOutcome {
        let Delivery {
            target,
            registration,
            resource,
            size,
        } = delivery;
        let Some(sink) = self.shared.sink(target, registration) else {
            debug!(target_id = %target, registration, "dropping resource for removed target");
            self.shared.lock().dropped += 1;
            return HandleOutcome::Continue;
        };

        let outcome = sink.lock().await.deliver(resource).await;
        match outcome {
            DeliveryOutcome::Accepted => {
                let mut state = self.shared.lock();
                state.delivered_resources += 1;
                state.delivered_bytes = state.delivered_bytes.saturating_add(size);
            }
            DeliveryOutcome::Closed => {
                self.shared.lock().dropped += 1;
                self.close_target(target, registration).await;
            }
        }
        HandleOutcome::Continue
    }

    async fn on_finish(&mut self) {
        let sinks: Vec<(TargetId, SharedTarget<R>)> = {
            let mut state = self.shared.lock();
            state.stopped = true;
            state
                .targets
                .drain()
                .map(|(target, registered)| (target, registered.sink))
                .collect()
        };
        for (target, sink) in sinks {
            trace!(target_id = %target, "removing target on shutdown");
            sink.lock().await.on_removed().await;
        }
    }
}

/// Handle to a running resource deliverer. Cheap to clone.
pub struct ResourceDeliverer<R> {
    shared: Arc<Shared<R>>,
    processor: Arc<ProcessorHandle>,
}

impl<R> Clone for ResourceDeliverer<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            processor: Arc::clone(&self.processor),
        }
    }
}

impl<R: Resource> ResourceDeliverer<R> {
    /// Spawns a deliverer on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` if the configuration is invalid.
    pub fn spawn(config: DelivererConfig) -> FlowResult<Self> {
        config.validate()?;
        let limiter = SpeedLimiter::new(config.limiter_config())?;
        let shared = Arc::new(Shared {
            state: Mutex::new(DelivererState {
                queue: FairDeliveryQueue::new(config.queue_config()),
                limiter,
                targets: HashMap::new(),
                stopped: false,
                delivered_resources: 0,
                delivered_bytes: 0,
                closed_targets: 0,
                dropped: 0,
            }),
            wake: Notify::new(),
            epoch: Instant::now(),
        });

        let reader = ResourceDelivererMessageReader {
            shared: Arc::clone(&shared),
        };
        let handler = DeliveryHandler {
            shared: Arc::clone(&shared),
        };
        let processor = MessageProcessor::spawn(
            "resource-deliverer",
            reader,
            handler,
            ProcessorConfig::new(config.queue_capacity),
        )
        .map_err(|e| FlowError::InvalidConfig {
            message: e.to_string(),
        })?;

        info!(
            speed_limit = ?config.speed_limit,
            window_us = config.window_us,
            max_targets = config.max_targets,
            "resource deliverer started"
        );
        Ok(Self {
            shared,
            processor: Arc::new(processor),
        })
    }

    /// Registers a target with the given priority.
    ///
    /// # Errors
    ///
    /// Returns `Shutdown`, `InvalidPriority`, `TargetExists` or `TooManyTargets`.
    pub fn add_target<T>(&self, target: TargetId, priority: f32, sink: T) -> FlowResult<()>
    where
        T: TargetResource<R>,
    {
        let mut state = self.shared.lock();
        if state.stopped {
            return Err(FlowError::Shutdown);
        }
        let registration = state.queue.add_target(target, priority)?;
        let sink: Box<dyn TargetResource<R>> = Box::new(sink);
        state.targets.insert(
            target,
            Registered {
                registration,
                sink: Arc::new(tokio::sync::Mutex::new(sink)),
            },
        );
        debug!(target_id = %target, registration, priority, "target added");
        Ok(())
    }

    /// Unregisters a target and returns its undelivered resources.
    ///
    /// Waits for an in-flight delivery to that target, then calls `on_removed`.
    /// After a stop the sink was already told, so only the backlog is returned.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::TargetNotFound` if the target is unknown.
    pub async fn remove_target(&self, target: TargetId) -> FlowResult<Vec<R>> {
        let (sink, backlog) = self.shared.unregister(target, None)?;
        debug!(target_id = %target, returned = backlog.len(), "target removed");
        if let Some(sink) = sink {
            sink.lock().await.on_removed().await;
        }
        Ok(backlog)
    }

    /// Changes a target's priority.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPriority` or `TargetNotFound`.
    pub fn set_priority(&self, target: TargetId, priority: f32) -> FlowResult<()> {
        self.shared.lock().queue.set_priority(target, priority)?;
        debug!(target_id = %target, priority, "priority changed");
        Ok(())
    }

    /// Queues a resource for a target.
    ///
    /// # Errors
    ///
    /// Returns `Shutdown`, `TargetNotFound` or `QueueFull`.
    pub fn submit(&self, target: TargetId, resource: R) -> FlowResult<()> {
        {
            let mut state = self.shared.lock();
            if state.stopped {
                return Err(FlowError::Shutdown);
            }
            state.queue.push(target, resource)?;
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Replaces the speed limit. `None` removes it.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` for a zero limit.
    pub fn set_speed_limit(&self, limit: Option<u64>) -> FlowResult<()> {
        self.shared.lock().limiter.set_limit(limit)?;
        info!(speed_limit = ?limit, "speed limit changed");
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Returns the current speed limit.
    #[must_use]
    pub fn speed_limit(&self) -> Option<u64> {
        self.shared.lock().limiter.limit()
    }

    /// Returns the measured delivery speed in units per second.
    #[must_use]
    pub fn speed(&self) -> f64 {
        let now_us = self.shared.now_us();
        self.shared.lock().limiter.speed(now_us)
    }

    /// Returns a target's backlog length.
    #[must_use]
    pub fn pending(&self, target: TargetId) -> Option<usize> {
        self.shared.lock().queue.pending(target)
    }

    /// Returns current statistics.
    #[must_use]
    pub fn stats(&self) -> DelivererStats {
        let state = self.shared.lock();
        DelivererStats {
            targets: state.targets.len(),
            pending: state.queue.total_pending(),
            delivered_resources: state.delivered_resources,
            delivered_bytes: state.delivered_bytes,
            closed_targets: state.closed_targets,
            dropped: state.dropped,
        }
    }

    /// Returns whether the deliverer was stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.lock().stopped
    }

    /// Stops delivering. Resources already handed to the handler are
    /// delivered, every target gets `on_removed`, backlogs are kept for
    /// inspection.
    ///
    /// Every caller, from any clone, returns only once shutdown is complete.
    pub async fn stop(&self) -> DelivererStats {
        let already = std::mem::replace(&mut self.shared.lock().stopped, true);
        if !already {
            self.shared.wake.notify_one();
        }
        let processor = self.processor.join().await;
        let stats = self.stats();
        if stats.pending > 0 {
            warn!(pending = stats.pending, "deliverer stopped with undelivered resources");
        }
        info!(
            delivered = stats.delivered_resources,
            delivered_bytes = stats.delivered_bytes,
            handed_over = processor.handled,
            "resource deliverer stopped"
        );
        stats
    }
}
