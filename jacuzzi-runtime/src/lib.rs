//! Jacuzzi Runtime - Background task building blocks on tokio.
//!
//! This crate provides the long-running pieces the rest of jacuzzi is built
//! from. Every component follows the same handle/actor shape: a cloneable
//! handle sends commands over a bounded channel to a task spawned with
//! `tokio::spawn`, and replies come back on oneshot channels.
//!
//! - [`Daemon`]: re-runs a "solve state" action until it reports success,
//!   each time the state is signalled as changed.
//! - [`MessageProcessor`]: a reader task and a handler task joined by a
//!   bounded queue, with pause/resume and orderly stop.
//! - [`QueueProcessor`]: a message processor fed from a channel.
//! - [`Timer`]: periodic or rescheduling wake-ups.
//! - [`ObjectPool`]: bounded reuse of expensive objects.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use jacuzzi_runtime::{HandleOutcome, MessageHandler, ProcessorConfig, QueueProcessor};
//!
//! struct Sum(u64);
//!
//! #[async_trait]
//! impl MessageHandler<u64> for Sum {
//!     async fn handle(&mut self, message: u64) -> HandleOutcome {
//!         self.0 += message;
//!         HandleOutcome::Continue
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (sender, processor) =
//!     QueueProcessor::spawn("sum", Sum(0), ProcessorConfig::default()).unwrap();
//! sender.send(1).await.unwrap();
//! sender.send(2).await.unwrap();
//! drop(sender);
//! let stats = processor.join().await;
//! assert_eq!(stats.handled, 2);
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod daemon;
mod error;
mod pool;
mod processor;
mod queue;
mod timer;

pub use config::{ConfigError, DaemonConfig, PoolConfig, ProcessorConfig};
pub use daemon::{Daemon, DaemonAction, DaemonHandle};
pub use error::{PoolError, RuntimeError, RuntimeResult};
pub use pool::{ObjectPool, PoolStats, Pooled};
pub use processor::{
    HandleOutcome, MessageHandler, MessageProcessor, MessageReader, ProcessorHandle,
    ProcessorStats, ReadOutcome,
};
pub use queue::{ChannelReader, QueueProcessor, QueueSender};
pub use timer::{Timer, TimerAction, TimerHandle, TimerOutcome};
