//! Jacuzzi Core - Typed identifiers, id factories, errors and limits.
//!
//! This crate holds the small pieces every other jacuzzi crate leans on:
//!
//! - **Strongly-typed IDs**: `TargetId` cannot be confused with `TaskId`
//! - **Id factories**: sequential, alphanumeric and random id generation
//! - **Explicit limits**: every queue, pool and table has a bounded maximum
//!
//! Time-dependent logic elsewhere in the workspace takes the current time as
//! a parameter, so nothing here touches the system clock.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod id;
mod limits;
mod types;

pub use error::{Error, Result};
pub use id::{random_alphanumeric, random_id, AlphaNumFactory, IdFactory};
pub use limits::Limits;
pub use types::{ProcessorId, TargetId, TaskId, TimerId};
