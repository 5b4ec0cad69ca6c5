//! Oz Runtime: the cooperative multi-threaded bytecode VM (§4.7, §4.8).
//!
//! This crate executes the instruction set `oz_core::bytecode` defines
//! against an `oz_core::Store`: call stacks, exception unwinding, the
//! per-instruction dispatch loop, and a round-robin scheduler with a small
//! table of built-in natives.
//!
//! # Modules
//!
//! - `error`: `ThreadFault`, the dispatch loop's failure shape
//! - `thread`: call frames and the `Thread` object itself
//! - `dispatch`: the `step` function — one instruction in, one outcome out
//! - `engine`: `Native`, `NativeRegistry`, and the `Engine` scheduler

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod thread;

pub use engine::{Engine, Native, NativeRegistry};
pub use error::ThreadFault;
pub use thread::{RunOutcome, Thread};
