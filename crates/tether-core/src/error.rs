use crate::status::ExitStatus;

/// The target process has terminated.
///
/// This condition is never wrapped into another error.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("process {pid} has exited{}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
pub struct ProcessExited {
    /// ID of the terminated process.
    pub pid: u64,

    /// Exit status, if it was observed.
    pub status: Option<ExitStatus>,
}

/// Error type of this crate.
///
/// `E` is the error type of the execution backend.
#[derive(thiserror::Error, Debug)]
pub enum Error<E> {
    /// The target process has exited.
    #[error(transparent)]
    ProcessExited(#[from] ProcessExited),

    /// Single-stepping failed.
    #[error("step failed: {0}")]
    Step(#[source] E),

    /// Resuming failed.
    #[error("resume failed: {0}")]
    Resume(#[source] E),

    /// Waiting for the thread to change state failed.
    #[error("wait failed: {0}")]
    Wait(#[source] E),

    /// Restoring the original bytes of a breakpoint failed.
    #[error("could not clear breakpoint at {addr:#x}: {source}")]
    BreakpointClear {
        /// Breakpoint address.
        addr: u64,
        /// Backend error.
        #[source]
        source: E,
    },

    /// Injecting the trap instruction of a breakpoint failed.
    #[error("could not insert breakpoint at {addr:#x}: {source}")]
    BreakpointInsert {
        /// Breakpoint address.
        addr: u64,
        /// Backend error.
        #[source]
        source: E,
    },

    /// Memory could not be read.
    #[error("could not read memory at {addr:#x}: {source}")]
    MemoryRead {
        /// Read address.
        addr: u64,
        /// Backend error.
        #[source]
        source: E,
    },

    /// Register state could not be fetched.
    #[error("could not read registers: {0}")]
    RegisterRead(#[source] E),

    /// Register state could not be applied.
    #[error("could not write registers: {0}")]
    RegisterWrite(#[source] E),

    /// Fewer bytes than requested were written.
    #[error("wrote {written} bytes at {addr:#x} instead of {expected}")]
    PartialWrite {
        /// Write address.
        addr: u64,
        /// Bytes actually written.
        written: usize,
        /// Bytes requested.
        expected: usize,
    },

    /// The register isn't part of the snapshot.
    #[error("unknown register: {0}")]
    UnknownRegister(String),

    /// The thread's process was dropped.
    #[error("thread is detached from its process")]
    Detached,
}

impl<E> Error<E> {
    /// Returns whether this error reports the termination of the target.
    pub const fn is_process_exited(&self) -> bool {
        matches!(self, Self::ProcessExited(_))
    }
}

/// Result type of this crate.
pub type Result<T, E> = core::result::Result<T, Error<E>>;
