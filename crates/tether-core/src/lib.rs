//! This crate implements the execution-control core of a native debugger.
//!
//! It manages the run/stop state of a single traced thread, steps it one
//! instruction at a time (transparently stepping over software breakpoints),
//! and gives access to its CPU registers.
//!
//! The OS-specific primitives (resuming, single-stepping, register and memory
//! access) are provided by an [ExecutionBackend](self::backend::ExecutionBackend)
//! implementation, such as the `ptrace` one from `tether-ptrace`.
//!
//! ```no_run
//! use tether_core::backend::ExecutionBackend;
//! use tether_core::thread::Thread;
//!
//! fn step_twice<B: ExecutionBackend>(
//!     thread: &mut Thread<B>,
//! ) -> Result<u64, tether_core::Error<B::Error>> {
//!     thread.step_instruction()?;
//!     thread.step_instruction()?;
//!     thread.pc()
//! }
//! ```
//!
//! # Process termination
//!
//! Whenever the whole target terminates, operations return
//! [Error::ProcessExited], never wrapped into another error variant, so that
//! callers can tell it apart from a mechanical failure by pattern matching.

/// Module containing the execution backend trait.
pub mod backend;

/// Module containing the breakpoint table.
pub mod breakpoint;

mod error;

/// Module containing the link between a thread and its process.
pub mod process;

/// Module containing the register snapshot types.
pub mod registers;

/// Module containing the wait status of a thread.
pub mod status;

/// Module containing the traced thread.
pub mod thread;

#[cfg(test)]
mod sim;

pub use self::error::{Error, ProcessExited, Result};
