use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use crate::backend::{BackendError, ExecutionBackend};
use crate::breakpoint::rearm;
use crate::process::Process;
use crate::registers::{RegisterSet, RegisterValue, Registers};
use crate::status::WaitStatus;
use crate::{Error, ProcessExited};

/// Thread of a traced process.
///
/// Only one resume or step operation may be in flight for a thread at a time,
/// which is enforced by every operation taking `&mut self`.
pub struct Thread<B: ExecutionBackend> {
    /// ID of the thread.
    id: u64,

    /// ID of the owning process.
    process_id: u64,

    /// Status observed by the last wait.
    status: WaitStatus,

    /// Owning process.
    process: Weak<dyn Process>,

    /// Whether a single-step is in progress.
    single_stepping: bool,

    /// OS-specific execution primitives.
    backend: B,

    metadata: ThreadMetadata,
}

/// Architecture-agnostic information attached to a thread.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ThreadMetadata {
    /// Optional name of the thread.
    pub name: Option<String>,

    /// Address of the breakpoint the thread last stopped on.
    pub current_breakpoint: Option<u64>,

    /// Number of instructions single-stepped so far.
    pub instructions_stepped: u64,
}

impl<B: ExecutionBackend> Thread<B> {
    /// Creates a thread owned by the given process.
    ///
    /// The thread only keeps a weak reference to its process.
    pub fn new<P: Process + 'static>(
        id: u64,
        status: WaitStatus,
        process: &Arc<P>,
        backend: B,
    ) -> Self {
        let process_id = process.id();
        let process: Weak<P> = Arc::downgrade(process);
        let process: Weak<dyn Process> = process;

        Self {
            id,
            process_id,
            status,
            process,
            single_stepping: false,
            backend,
            metadata: ThreadMetadata::default(),
        }
    }

    /// Returns the thread's ID.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the status observed by the last wait.
    pub const fn status(&self) -> WaitStatus {
        self.status
    }

    /// Returns the process owning this thread, unless it was dropped.
    pub fn process(&self) -> Option<Arc<dyn Process>> {
        self.process.upgrade()
    }

    /// Returns whether a single-step is in progress.
    pub const fn is_single_stepping(&self) -> bool {
        self.single_stepping
    }

    /// Returns the architecture-agnostic information of this thread.
    pub const fn metadata(&self) -> &ThreadMetadata {
        &self.metadata
    }

    /// Returns the architecture-agnostic information of this thread.
    pub const fn metadata_mut(&mut self) -> &mut ThreadMetadata {
        &mut self.metadata
    }

    /// Returns the execution backend of this thread.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) const fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Resumes the thread's execution.
    ///
    /// If the thread is stopped on a breakpoint, the original instruction is
    /// executed first and the breakpoint is armed again. The resulting stop
    /// must be observed with [wait](Self::wait).
    #[tracing::instrument(name = "Continue", skip_all, fields(thread_id = self.id))]
    pub fn resume(&mut self) -> crate::Result<(), B::Error> {
        if let Some(exited) = self.exit_condition() {
            return Err(exited.into());
        }

        let pc = self.pc()?;
        let on_breakpoint = self
            .process()
            .ok_or(Error::Detached)?
            .breakpoint_at(pc)
            .is_some();

        if on_breakpoint {
            tracing::debug!(pc = format_args!("{pc:#x}"), "stepping over breakpoint");
            self.step_instruction()?;

            if let Some(exited) = self.exit_condition() {
                return Err(exited.into());
            }
        }

        match self.backend.resume() {
            Ok(()) => {
                self.status = WaitStatus::Running;
                self.metadata.current_breakpoint = None;
                Ok(())
            }
            Err(BackendError::ProcessExited(exited)) => Err(exited.into()),
            Err(BackendError::Os(e)) => Err(Error::Resume(e)),
        }
    }

    /// Executes exactly one instruction.
    ///
    /// If the thread is stopped on a breakpoint, its original bytes are
    /// restored for the duration of the step and the trap is injected again
    /// afterwards.
    #[tracing::instrument(name = "StepInstruction", skip_all, fields(thread_id = self.id))]
    pub fn step_instruction(&mut self) -> crate::Result<(), B::Error> {
        let mut thread = SingleStepGuard::enter(self);
        thread.step_over_breakpoint()
    }

    fn step_over_breakpoint(&mut self) -> crate::Result<(), B::Error> {
        if let Some(exited) = self.exit_condition() {
            return Err(exited.into());
        }

        let process = self.process().ok_or(Error::Detached)?;

        let pc = match self.backend.read_registers(false) {
            Ok(regs) => regs.pc(),
            Err(BackendError::ProcessExited(exited)) => return Err(self.record_exit(exited)),
            Err(BackendError::Os(e)) => return Err(Error::Step(e)),
        };

        let breakpoint = process.breakpoint_at(pc);
        drop(process);

        if let Some(bk) = breakpoint.as_ref() {
            self.clear_breakpoint(bk.addr, &bk.original_data)?;
        }

        let stepped = match self.backend.single_step() {
            Ok(status) => match status.exit_status() {
                Some(exit_status) => {
                    return Err(self.record_exit(ProcessExited {
                        pid: self.process_id,
                        status: Some(exit_status),
                    }));
                }
                None => {
                    self.status = status;
                    self.metadata.instructions_stepped += 1;
                    Ok(())
                }
            },
            Err(BackendError::ProcessExited(exited)) => return Err(self.record_exit(exited)),
            Err(BackendError::Os(e)) => Err(Error::Step(e)),
        };

        if let Some(bk) = breakpoint {
            let rearmed = rearm(&mut self.backend, bk.addr).map_err(|e| match e {
                Error::ProcessExited(exited) => self.record_exit(exited),
                e => e,
            });

            if let (Err(step_err), Err(rearm_err)) = (&stepped, &rearmed) {
                tracing::error!(error = %rearm_err, step_error = %step_err, "breakpoint not re-armed");
            }

            return stepped.and(rearmed);
        }

        stepped
    }

    /// Waits for the next state change of the thread, and records it.
    pub fn wait(&mut self) -> crate::Result<WaitStatus, B::Error> {
        match self.backend.wait() {
            Ok(status) => {
                self.status = status;
                Ok(status)
            }
            Err(BackendError::ProcessExited(exited)) => Err(self.record_exit(exited)),
            Err(BackendError::Os(e)) => Err(Error::Wait(e)),
        }
    }

    /// Removes a breakpoint by writing back its original bytes.
    ///
    /// The current content at `addr` is not checked.
    pub fn clear_breakpoint(&mut self, addr: u64, original_data: &[u8]) -> crate::Result<(), B::Error> {
        let written = match self.backend.write_memory(addr, original_data) {
            Ok(written) => written,
            Err(BackendError::ProcessExited(exited)) => return Err(self.record_exit(exited)),
            Err(BackendError::Os(source)) => return Err(Error::BreakpointClear { addr, source }),
        };

        if written != original_data.len() {
            return Err(Error::PartialWrite {
                addr,
                written,
                expected: original_data.len(),
            });
        }

        Ok(())
    }

    /// Reads data from the thread's address space.
    pub fn read_memory(&self, addr: u64, buf: &mut [u8]) -> crate::Result<(), B::Error> {
        self.backend.read_memory(addr, buf).map_err(|e| match e {
            BackendError::ProcessExited(exited) => Error::ProcessExited(exited),
            BackendError::Os(source) => Error::MemoryRead { addr, source },
        })
    }

    /// Returns a snapshot of the thread's registers.
    ///
    /// The floating point registers are only captured if requested.
    pub fn registers(&self, floating_point: bool) -> crate::Result<RegisterSet, B::Error> {
        self.backend
            .read_registers(floating_point)
            .map_err(|e| match e {
                BackendError::ProcessExited(exited) => Error::ProcessExited(exited),
                BackendError::Os(e) => Error::RegisterRead(e),
            })
    }

    /// Writes a previously captured snapshot back into the thread.
    pub fn restore_registers(&mut self, regs: &RegisterSet) -> crate::Result<(), B::Error> {
        self.backend.write_registers(regs).map_err(|e| match e {
            BackendError::ProcessExited(exited) => Error::ProcessExited(exited),
            BackendError::Os(e) => Error::RegisterWrite(e),
        })
    }

    /// Returns the thread's program counter.
    pub fn pc(&self) -> crate::Result<u64, B::Error> {
        self.registers(false).map(|regs| regs.pc())
    }

    /// Modifies the thread's program counter.
    pub fn set_pc(&mut self, addr: u64) -> crate::Result<(), B::Error> {
        let mut regs = self.registers(false)?;
        regs.set_pc(addr);
        self.restore_registers(&regs)
    }

    /// Modifies a single register of the thread.
    ///
    /// Vector values are only accepted for floating point registers.
    pub fn set_register(&mut self, name: &str, value: RegisterValue) -> crate::Result<(), B::Error> {
        let mut regs = self.registers(matches!(value, RegisterValue::Vector(_)))?;
        regs.set(name, value).map_err(Error::UnknownRegister)?;
        self.restore_registers(&regs)
    }

    fn exit_condition(&self) -> Option<ProcessExited> {
        self.status.exit_status().map(|status| ProcessExited {
            pid: self.process_id,
            status: Some(status),
        })
    }

    fn record_exit(&mut self, exited: ProcessExited) -> Error<B::Error> {
        if let Some(status) = exited.status {
            self.status = status.into();
        }

        Error::ProcessExited(exited)
    }
}

/// Marks a thread as single-stepping for the guard's lifetime.
struct SingleStepGuard<'a, B: ExecutionBackend>(&'a mut Thread<B>);

impl<'a, B: ExecutionBackend> SingleStepGuard<'a, B> {
    fn enter(thread: &'a mut Thread<B>) -> Self {
        thread.single_stepping = true;
        Self(thread)
    }
}

impl<B: ExecutionBackend> Drop for SingleStepGuard<'_, B> {
    fn drop(&mut self) {
        self.0.single_stepping = false;
    }
}

impl<B: ExecutionBackend> Deref for SingleStepGuard<'_, B> {
    type Target = Thread<B>;

    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl<B: ExecutionBackend> DerefMut for SingleStepGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0
    }
}
