//! Generic finite-state machine dispatcher.
//!
//! An [`Fsm`] owns an [`FsmAction`] that maps `(state, input)` to the next
//! state. The machine runs until it reaches a final state, a transition fails,
//! or its transition budget is spent.
//!
//! Two ways to describe the machine:
//!
//! - Implement [`FsmAction`] directly when transitions need logic.
//! - Use a [`TransitionTable`] when they are a fixed lookup.
//!
//! # Example
//!
//! ```rust
//! use jacuzzi_fsm::{Fsm, TransitionTable};
//!
//! let table = TransitionTable::new("idle")
//!     .on("idle", 'c', "connected")
//!     .on("connected", 'd', "done")
//!     .finals(["done"]);
//!
//! let mut fsm = Fsm::new(table);
//! assert!(fsm.input('c').unwrap());
//! assert!(!fsm.input('d').unwrap());
//! assert_eq!(*fsm.state(), "done");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod machine;
pub mod table;

pub use error::{FsmError, FsmResult};
pub use machine::{Fsm, FsmAction};
pub use table::TransitionTable;
