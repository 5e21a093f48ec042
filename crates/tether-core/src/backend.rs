use crate::ProcessExited;
use crate::registers::{Arch, RegisterSet};
use crate::status::WaitStatus;

/// Error returned by an [ExecutionBackend].
#[derive(thiserror::Error, Debug)]
pub enum BackendError<E> {
    /// The target process has exited.
    #[error(transparent)]
    ProcessExited(ProcessExited),

    /// OS-specific failure.
    #[error(transparent)]
    Os(E),
}

/// Trait implementing the OS/architecture-specific execution primitives of a
/// single thread.
///
/// A [Thread](crate::thread::Thread) owns exactly one backend, selected when
/// the thread is created. All operations are blocking.
pub trait ExecutionBackend {
    /// OS-specific error.
    type Error: std::error::Error;

    /// Returns the architecture of the thread.
    fn arch(&self) -> Arch;

    /// Resumes the thread's execution.
    ///
    /// The resulting stop is observed by a later call to [wait](Self::wait).
    fn resume(&mut self) -> Result<(), BackendError<Self::Error>>;

    /// Executes exactly one instruction and waits for the thread to stop.
    fn single_step(&mut self) -> Result<WaitStatus, BackendError<Self::Error>>;

    /// Waits for the next state change of the thread.
    fn wait(&mut self) -> Result<WaitStatus, BackendError<Self::Error>>;

    /// Retrieves the registers of the stopped thread.
    fn read_registers(
        &self,
        floating_point: bool,
    ) -> Result<RegisterSet, BackendError<Self::Error>>;

    /// Modifies the registers of the stopped thread.
    fn write_registers(&mut self, regs: &RegisterSet) -> Result<(), BackendError<Self::Error>>;

    /// Reads data from the thread's address space.
    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> Result<(), BackendError<Self::Error>>;

    /// Writes data to the thread's address space.
    ///
    /// Returns the number of bytes written.
    fn write_memory(&mut self, addr: u64, buf: &[u8]) -> Result<usize, BackendError<Self::Error>>;
}
