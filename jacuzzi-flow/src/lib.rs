//! Speed limiting and weighted fair resource delivery.
//!
//! - **Speed monitoring**: sliding-window throughput measurement.
//! - **Speed limiting**: keeps the windowed average under a limit.
//! - **Fair delivery queue**: per-target backlogs served in proportion to
//!   target priority.
//! - **Resource deliverer**: an async service combining the two, handing
//!   resources to registered [`TargetResource`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     ResourceDeliverer                         │
//! │                                                               │
//! │  ┌──────────────────┐   ┌──────────────┐   ┌───────────────┐  │
//! │  │ FairDeliveryQueue │──▶│ SpeedLimiter │──▶│ TargetResource│  │
//! │  │  (per target)     │   │  (global)    │   │  (per target) │  │
//! │  └──────────────────┘   └──────────────┘   └───────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Deterministic time
//!
//! [`SpeedMonitor`], [`SpeedLimiter`] and [`FairDeliveryQueue`] take the
//! current time in microseconds as a parameter, so they can be driven by a
//! simulated clock. The deliverer measures time with `tokio::time`, which
//! tests pause.
//!
//! # Example
//!
//! ```rust
//! use jacuzzi_core::TargetId;
//! use jacuzzi_flow::{FairDeliveryQueue, FairQueueConfig};
//!
//! let mut queue = FairDeliveryQueue::new(FairQueueConfig::for_testing());
//! queue.add_target(TargetId::new(1), 1.0).unwrap();
//! queue.add_target(TargetId::new(2), 2.0).unwrap();
//!
//! queue.push(TargetId::new(1), vec![0_u8; 100]).unwrap();
//! queue.push(TargetId::new(2), vec![0_u8; 100]).unwrap();
//!
//! while let Some(delivery) = queue.pop() {
//!     println!("{} gets {} bytes", delivery.target, delivery.size);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod deliverer;
pub mod error;
pub mod fair_queue;
pub mod resource;
pub mod speed_limiter;
pub mod speed_monitor;

pub use config::{DelivererConfig, SPEED_LIMIT_ENV};
pub use deliverer::{
    DelivererStats, DeliveryHandler, ResourceDeliverer, ResourceDelivererMessageReader,
};
pub use error::{FlowError, FlowResult};
pub use fair_queue::{Delivery, FairDeliveryQueue, FairQueueConfig, FairQueueStats};
pub use resource::{DeliveryOutcome, Resource, TargetResource};
pub use speed_limiter::{SpeedLimiter, SpeedLimiterConfig};
pub use speed_monitor::SpeedMonitor;
