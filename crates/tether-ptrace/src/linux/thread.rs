use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{self, WaitPidFlag, waitpid};
use nix::unistd::Pid;
use tether_core::ProcessExited;
use tether_core::backend::{BackendError, ExecutionBackend};
use tether_core::registers::{Arch, RegisterSet};
use tether_core::status::{ExitStatus, WaitStatus};

/// `ptrace(2)` execution backend of a traced thread.
#[derive(Debug)]
pub struct PtraceThread {
    /// ID of the process.
    pid: Pid,

    /// ID of the thread.
    tid: Pid,

    /// Architecture of the thread.
    arch: Arch,
}

impl PtraceThread {
    /// Creates the backend of the given stopped thread.
    pub fn new(pid: Pid, tid: Pid) -> crate::Result<Self> {
        let arch = super::regs::thread_arch(tid)?;

        tracing::debug!(pid = pid.as_raw(), tid = tid.as_raw(), %arch, "thread attached");

        Ok(Self { pid, tid, arch })
    }

    /// Returns the ID of the thread.
    pub const fn tid(&self) -> Pid {
        self.tid
    }

    fn exited(&self, status: Option<ExitStatus>) -> BackendError<crate::Error> {
        BackendError::ProcessExited(ProcessExited {
            pid: self.pid.as_raw() as u64,
            status,
        })
    }

    fn backend_error(&self, e: crate::Error) -> BackendError<crate::Error> {
        match e {
            // the thread is either gone or not stopped
            crate::Error::Os(Errno::ESRCH) => match self.peek_exit() {
                Some(status) => self.exited(status),
                None => BackendError::Os(e),
            },
            e => BackendError::Os(e),
        }
    }

    /// Returns the exit status of the thread if it has terminated, without
    /// reaping it.
    ///
    /// The inner status is `None` if the thread was already reaped.
    fn peek_exit(&self) -> Option<Option<ExitStatus>> {
        let flags = WaitPidFlag::WEXITED
            | WaitPidFlag::WNOHANG
            | WaitPidFlag::WNOWAIT
            | WaitPidFlag::__WALL;

        match wait::waitid(wait::Id::Pid(self.tid), flags) {
            Ok(status) => convert_wait_status(status).exit_status().map(Some),
            Err(Errno::ECHILD) => Some(None),
            Err(e) => {
                tracing::error!(error = %e, tid = self.tid.as_raw(), "waitid");
                None
            }
        }
    }

    fn wait_status(&self) -> Result<WaitStatus, BackendError<crate::Error>> {
        let status = waitpid(self.tid, Some(WaitPidFlag::__WALL)).map_err(|e| match e {
            Errno::ECHILD => self.exited(None),
            e => BackendError::Os(e.into()),
        })?;

        tracing::trace!(?status, "waitpid");

        Ok(convert_wait_status(status))
    }
}

impl ExecutionBackend for PtraceThread {
    type Error = crate::Error;

    fn arch(&self) -> Arch {
        self.arch
    }

    fn resume(&mut self) -> Result<(), BackendError<Self::Error>> {
        ptrace::cont(self.tid, None)
            .inspect_err(|e| tracing::error!(error = %e, "ptrace(PTRACE_CONT)"))
            .map_err(|e| self.backend_error(e.into()))
    }

    fn single_step(&mut self) -> Result<WaitStatus, BackendError<Self::Error>> {
        ptrace::step(self.tid, None)
            .inspect_err(|e| tracing::error!(error = %e, "ptrace(PTRACE_SINGLESTEP)"))
            .map_err(|e| self.backend_error(e.into()))?;

        let status = self.wait_status()?;

        match status.exit_status() {
            Some(exit_status) => Err(self.exited(Some(exit_status))),
            None => Ok(status),
        }
    }

    fn wait(&mut self) -> Result<WaitStatus, BackendError<Self::Error>> {
        self.wait_status()
    }

    fn read_registers(
        &self,
        floating_point: bool,
    ) -> Result<RegisterSet, BackendError<Self::Error>> {
        super::regs::read_registers(self.tid, floating_point).map_err(|e| self.backend_error(e))
    }

    fn write_registers(&mut self, regs: &RegisterSet) -> Result<(), BackendError<Self::Error>> {
        super::regs::write_registers(self.tid, regs).map_err(|e| self.backend_error(e))
    }

    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> Result<(), BackendError<Self::Error>> {
        super::mem::read_process_memory(self.pid, addr, buf).map_err(|e| self.backend_error(e))
    }

    fn write_memory(&mut self, addr: u64, buf: &[u8]) -> Result<usize, BackendError<Self::Error>> {
        super::mem::write_process_memory(self.tid, addr, buf).map_err(|e| self.backend_error(e))
    }
}

/// Converts a `waitpid(2)` status.
pub(crate) fn convert_wait_status(status: wait::WaitStatus) -> WaitStatus {
    match status {
        wait::WaitStatus::Exited(_, code) => WaitStatus::Exited { code },
        wait::WaitStatus::Signaled(_, signal, core_dumped) => WaitStatus::Signaled {
            signal: signal as i32,
            core_dumped,
        },
        wait::WaitStatus::Stopped(_, signal) | wait::WaitStatus::PtraceEvent(_, signal, _) => {
            WaitStatus::Stopped {
                signal: signal as i32,
            }
        }
        wait::WaitStatus::PtraceSyscall(_) => WaitStatus::Stopped {
            signal: Signal::SIGTRAP as i32,
        },
        wait::WaitStatus::Continued(_) | wait::WaitStatus::StillAlive => WaitStatus::Running,
    }
}
