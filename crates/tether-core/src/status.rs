use std::fmt;

/// Outcome of the last wait cycle of a thread.
///
/// There is no history: each wait overwrites the previous status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The thread is stopped by a signal.
    Stopped {
        /// Stop signal number.
        signal: i32,
    },

    /// The process exited normally.
    Exited {
        /// Exit code.
        code: i32,
    },

    /// The process was terminated by a signal.
    Signaled {
        /// Terminating signal number.
        signal: i32,
        /// Whether a core dump was produced.
        core_dumped: bool,
    },

    /// The thread was resumed and not observed stopped since.
    Running,
}

impl WaitStatus {
    /// Returns whether the thread is stopped.
    pub const fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }

    /// Returns whether the process has terminated.
    pub const fn is_exited(&self) -> bool {
        matches!(self, Self::Exited { .. } | Self::Signaled { .. })
    }

    /// Returns the stop signal, if the thread is stopped.
    pub const fn stop_signal(&self) -> Option<i32> {
        match self {
            Self::Stopped { signal } => Some(*signal),
            _ => None,
        }
    }

    /// Returns the exit status, if the process has terminated.
    pub const fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            Self::Exited { code } => Some(ExitStatus::Code(*code)),
            Self::Signaled { signal, .. } => Some(ExitStatus::Signal(*signal)),
            _ => None,
        }
    }
}

impl fmt::Display for WaitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped { signal } => write!(f, "stopped by signal {signal}"),
            Self::Exited { code } => write!(f, "exited with code {code}"),
            Self::Signaled {
                signal,
                core_dumped,
            } => {
                write!(f, "terminated by signal {signal}")?;
                if *core_dumped {
                    f.write_str(" (core dumped)")?;
                }
                Ok(())
            }
            Self::Running => f.write_str("running"),
        }
    }
}

/// Exit status of a terminated process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with the given code.
    Code(i32),

    /// Termination by the given signal.
    Signal(i32),
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

impl From<ExitStatus> for WaitStatus {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Code(code) => Self::Exited { code },
            ExitStatus::Signal(signal) => Self::Signaled {
                signal,
                core_dumped: false,
            },
        }
    }
}
