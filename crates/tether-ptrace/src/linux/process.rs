use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{self, waitpid};
use nix::unistd::Pid;
use tether_core::backend::ExecutionBackend;
use tether_core::breakpoint::{Breakpoint, BreakpointTable};
use tether_core::process::Process;
use tether_core::registers::Arch;
use tether_core::status::WaitStatus;
use tether_core::thread::Thread;

use super::thread::{PtraceThread, convert_wait_status};

/// Process spawned in debug-mode, with a single traced thread.
///
/// The process is killed when dropped.
pub struct TracedProcess {
    /// State shared with the thread.
    shared: Arc<SharedState>,

    /// Main thread.
    thread: Thread<PtraceThread>,

    /// Child handle.
    child: Child,

    /// Status reaped by [kill](Self::kill).
    killed: Option<WaitStatus>,
}

struct SharedState {
    pid: Pid,
    breakpoints: Mutex<BreakpointTable>,
}

impl SharedState {
    fn breakpoints(&self) -> MutexGuard<'_, BreakpointTable> {
        self.breakpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Process for SharedState {
    fn id(&self) -> u64 {
        self.pid.as_raw() as u64
    }

    fn breakpoint_at(&self, addr: u64) -> Option<Breakpoint> {
        self.breakpoints().get(addr)
    }
}

impl TracedProcess {
    /// Spawns a new child process.
    ///
    /// The process is stopped right after `execve`, before running any
    /// instruction of the program.
    #[tracing::instrument(name = "Spawn", skip_all, fields(program = ?command.get_program()))]
    pub fn spawn(command: &mut Command) -> crate::Result<Self> {
        // On Linux, if a `pre_exec` closure is specified, `rust-std` will
        // spawn the process with `fork`+`exec`, otherwise `posix_spawn` is used.
        unsafe {
            command.pre_exec(|| ptrace::traceme().map_err(|e| io::Error::from_raw_os_error(e as i32)))
        };

        let mut child = command.spawn()?;
        let pid = Pid::from_raw(child.id() as i32);

        let (status, backend) = reap_on_error(&mut child, attach(pid))?;

        let shared = Arc::new(SharedState {
            pid,
            breakpoints: Mutex::new(BreakpointTable::new()),
        });

        let thread = Thread::new(pid.as_raw() as u64, status, &shared, backend);

        tracing::debug!(pid = pid.as_raw(), "process spawned");

        Ok(Self {
            shared,
            thread,
            child,
            killed: None,
        })
    }

    /// Returns the process ID.
    pub fn id(&self) -> u64 {
        self.shared.id()
    }

    /// Returns the main thread.
    pub const fn thread(&self) -> &Thread<PtraceThread> {
        &self.thread
    }

    /// Returns the main thread.
    pub const fn thread_mut(&mut self) -> &mut Thread<PtraceThread> {
        &mut self.thread
    }

    /// Returns the architecture of the main thread.
    pub fn arch(&self) -> Arch {
        self.thread.backend().arch()
    }

    /// Returns the program's entry point.
    pub fn entry_point(&self) -> crate::Result<u64> {
        super::auxv::auxv_value(self.shared.pid, self.arch(), super::auxv::AT_ENTRY)
    }

    /// Returns the addresses of the armed breakpoints.
    pub fn breakpoints(&self) -> Vec<u64> {
        let mut addrs: Vec<_> = self.shared.breakpoints().addrs().collect();
        addrs.sort_unstable();
        addrs
    }

    /// Arms a breakpoint at the given address.
    pub fn add_breakpoint(&mut self, addr: u64) -> tether_core::Result<Breakpoint, crate::Error> {
        self.shared.breakpoints().insert(&mut self.thread, addr)
    }

    /// Disarms the breakpoint at the given address.
    pub fn remove_breakpoint(&mut self, addr: u64) -> tether_core::Result<(), crate::Error> {
        self.shared.breakpoints().remove(&mut self.thread, addr)
    }

    /// Waits for the main thread to stop or exit.
    ///
    /// If the thread stopped by triggering a breakpoint, its program counter
    /// is rewound to the breakpoint address.
    #[tracing::instrument(name = "WaitStop", skip_all, fields(pid = self.shared.pid.as_raw()))]
    pub fn wait_stop(&mut self) -> tether_core::Result<WaitStatus, crate::Error> {
        let status = self.thread.wait()?;

        if status.stop_signal() != Some(Signal::SIGTRAP as i32) {
            return Ok(status);
        }

        let arch = self.arch();
        let pc = self.thread.pc()?;
        let trap_addr = pc.wrapping_sub(arch.trap_pc_offset());

        if !self.shared.breakpoints().contains(trap_addr) {
            return Ok(status);
        }

        tracing::debug!(addr = format_args!("{trap_addr:#x}"), "breakpoint hit");

        if trap_addr != pc {
            self.thread.set_pc(trap_addr)?;
        }

        self.thread.metadata_mut().current_breakpoint = Some(trap_addr);

        Ok(status)
    }

    /// Kills the process.
    pub fn kill(&mut self) -> crate::Result<WaitStatus> {
        if self.thread.status().is_exited() {
            return Ok(self.thread.status());
        }

        if let Some(status) = self.killed {
            return Ok(status);
        }

        self.child.kill()?;

        let status = waitpid(self.shared.pid, None).map(convert_wait_status)?;
        self.killed = Some(status);

        tracing::debug!(pid = self.shared.pid.as_raw(), "process killed");

        Ok(status)
    }
}

impl Drop for TracedProcess {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            tracing::error!(error = %e, pid = self.shared.pid.as_raw(), "kill");
        }
    }
}

/// Waits for the spawned child to stop after `execve`, and attaches to its
/// main thread.
fn attach(pid: Pid) -> crate::Result<(WaitStatus, PtraceThread)> {
    let status = wait_for_exec(pid)?;
    let backend = PtraceThread::new(pid, pid)?;

    Ok((status, backend))
}

/// Kills and reaps the child if `res` is an error.
fn reap_on_error<T>(child: &mut Child, res: crate::Result<T>) -> crate::Result<T> {
    if res.is_err() {
        let _ = child.kill();
        let _ = child.wait();
    }

    res
}

fn wait_for_exec(pid: Pid) -> crate::Result<WaitStatus> {
    let status = waitpid(pid, None)?;

    if !matches!(status, wait::WaitStatus::Stopped(_, Signal::SIGTRAP)) {
        return Err(crate::Error::BadChildWait(status));
    }

    // make sure the debuggee doesn't outlive the debugger
    ptrace::setoptions(pid, ptrace::Options::PTRACE_O_EXITKILL)?;

    Ok(convert_wait_status(status))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::os::unix::process::ExitStatusExt;
    use std::process::{Command, Stdio};

    use nix::unistd::Pid;
    use test_log::test;

    use super::{attach, reap_on_error};

    #[test]
    fn attach_to_untraced_child_fails() {
        let mut child = Command::new("/bin/true")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();

        let res = attach(Pid::from_raw(child.id() as i32));
        assert!(matches!(res, Err(crate::Error::BadChildWait(_))));

        // already reaped by the failed attach
        assert!(child.try_wait().is_err());
    }

    #[test]
    fn failed_attach_reaps_child() {
        let mut child = Command::new("/bin/sleep").arg("5").spawn().unwrap();

        let res: crate::Result<()> = reap_on_error(&mut child, Err(crate::Error::MissingAuxv(0)));
        assert!(res.is_err());

        let status = child.try_wait().unwrap().unwrap();
        assert_eq!(status.signal(), Some(9));
    }

    #[test]
    fn successful_attach_keeps_child() {
        let mut child = Command::new("/bin/sleep").arg("5").spawn().unwrap();

        assert_eq!(reap_on_error(&mut child, Ok(1)).unwrap(), 1);
        assert!(child.try_wait().unwrap().is_none());

        child.kill().unwrap();
        child.wait().unwrap();
    }
}
