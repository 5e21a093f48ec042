//! Simulated single-thread CPU used as execution backend in tests.
//!
//! Instructions are one byte long: [NOP] advances the program counter, [EXIT]
//! terminates the process and `0xcc` traps.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::{Arc, Mutex};

use crate::ProcessExited;
use crate::backend::{BackendError, ExecutionBackend};
use crate::breakpoint::{Breakpoint, BreakpointTable};
use crate::process::Process;
use crate::registers::{Arch, RegisterSet, RegisterValue};
use crate::status::{ExitStatus, WaitStatus};
use crate::thread::Thread;

pub const NOP: u8 = 0x90;
pub const EXIT: u8 = 0xf4;
const TRAP: u8 = 0xcc;

const SIGTRAP: i32 = 5;
const SIGSEGV: i32 = 11;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SimError {
    #[error("memory fault at {0:#x}")]
    Fault(u64),

    #[error("register set of another architecture")]
    ArchMismatch,

    #[error("single-step rejected")]
    StepRejected,
}

pub struct SimCpu {
    base: u64,
    memory: Vec<u8>,
    pc: u64,
    rax: u64,
    rsp: u64,
    xmm0: u128,
    exit_code: Option<i32>,
    executed: Vec<u64>,
    writes: usize,

    pub(crate) fail_next_step: bool,
    pub(crate) panic_on_step: bool,
    pub(crate) short_writes: bool,
    pub(crate) killed: bool,
    pub(crate) exit_as_status: bool,
    pub(crate) exit_at_write: Option<(usize, i32)>,
}

enum Executed {
    Instruction,
    Trap,
    Exit(i32),
    Fault,
}

impl SimCpu {
    pub fn new(base: u64, code: &[u8]) -> Self {
        Self {
            base,
            memory: code.to_vec(),
            pc: base,
            rax: 0,
            rsp: 0x7ff0,
            xmm0: 0x1234,
            exit_code: None,
            executed: Vec::new(),
            writes: 0,
            fail_next_step: false,
            panic_on_step: false,
            short_writes: false,
            killed: false,
            exit_as_status: false,
            exit_at_write: None,
        }
    }

    /// Returns the byte at the given address.
    pub fn byte_at(&self, addr: u64) -> u8 {
        self.memory[(addr - self.base) as usize]
    }

    /// Returns the addresses of executed instructions (traps excluded).
    pub fn executed(&self) -> &[u64] {
        &self.executed
    }

    /// Returns the number of memory writes.
    pub fn writes(&self) -> usize {
        self.writes
    }

    fn offset(&self, addr: u64, len: usize) -> Result<usize, SimError> {
        addr.checked_sub(self.base)
            .map(|off| off as usize)
            .filter(|off| off + len <= self.memory.len())
            .ok_or(SimError::Fault(addr))
    }

    fn check_alive(&self) -> Result<(), BackendError<SimError>> {
        if self.killed {
            return Err(BackendError::ProcessExited(ProcessExited {
                pid: SimProcess::PID,
                status: None,
            }));
        }

        match self.exit_code {
            Some(code) => Err(BackendError::ProcessExited(ProcessExited {
                pid: SimProcess::PID,
                status: Some(ExitStatus::Code(code)),
            })),
            None => Ok(()),
        }
    }

    fn execute(&mut self) -> Executed {
        let Ok(off) = self.offset(self.pc, 1) else {
            return Executed::Fault;
        };

        match self.memory[off] {
            TRAP => {
                self.pc += 1;
                Executed::Trap
            }
            EXIT => {
                self.executed.push(self.pc);
                self.exit_code = Some(0);
                Executed::Exit(0)
            }
            _ => {
                self.executed.push(self.pc);
                self.pc += 1;
                Executed::Instruction
            }
        }
    }
}

impl ExecutionBackend for SimCpu {
    type Error = SimError;

    fn arch(&self) -> Arch {
        Arch::X86_64
    }

    fn resume(&mut self) -> Result<(), BackendError<Self::Error>> {
        self.check_alive()
    }

    fn single_step(&mut self) -> Result<WaitStatus, BackendError<Self::Error>> {
        self.check_alive()?;

        if self.panic_on_step {
            panic!("simulated crash");
        }

        if std::mem::take(&mut self.fail_next_step) {
            return Err(BackendError::Os(SimError::StepRejected));
        }

        match self.execute() {
            Executed::Instruction | Executed::Trap => Ok(WaitStatus::Stopped { signal: SIGTRAP }),
            Executed::Exit(code) if self.exit_as_status => Ok(WaitStatus::Exited { code }),
            Executed::Exit(code) => Err(BackendError::ProcessExited(ProcessExited {
                pid: SimProcess::PID,
                status: Some(ExitStatus::Code(code)),
            })),
            Executed::Fault => Ok(WaitStatus::Stopped { signal: SIGSEGV }),
        }
    }

    fn wait(&mut self) -> Result<WaitStatus, BackendError<Self::Error>> {
        self.check_alive()?;

        loop {
            match self.execute() {
                Executed::Instruction => continue,
                Executed::Trap => break Ok(WaitStatus::Stopped { signal: SIGTRAP }),
                Executed::Exit(code) => break Ok(WaitStatus::Exited { code }),
                Executed::Fault => break Ok(WaitStatus::Stopped { signal: SIGSEGV }),
            }
        }
    }

    fn read_registers(
        &self,
        floating_point: bool,
    ) -> Result<RegisterSet, BackendError<Self::Error>> {
        self.check_alive()?;

        let regs = RegisterSet::new(
            Arch::X86_64,
            [("rax", self.rax), ("rsp", self.rsp), ("rip", self.pc)],
        );

        if floating_point {
            Ok(regs.with_floating_point([("xmm0", self.xmm0)]))
        } else {
            Ok(regs)
        }
    }

    fn write_registers(&mut self, regs: &RegisterSet) -> Result<(), BackendError<Self::Error>> {
        self.check_alive()?;

        if regs.arch() != Arch::X86_64 {
            return Err(BackendError::Os(SimError::ArchMismatch));
        }

        for (name, value) in regs.iter() {
            match name {
                "rax" => self.rax = value,
                "rsp" => self.rsp = value,
                "rip" => self.pc = value,
                _ => (),
            }
        }

        if let Some(RegisterValue::Vector(xmm0)) = regs.get("xmm0") {
            self.xmm0 = xmm0;
        }

        Ok(())
    }

    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> Result<(), BackendError<Self::Error>> {
        self.check_alive()?;

        let off = self.offset(addr, buf.len()).map_err(BackendError::Os)?;
        buf.copy_from_slice(&self.memory[off..off + buf.len()]);

        Ok(())
    }

    fn write_memory(&mut self, addr: u64, buf: &[u8]) -> Result<usize, BackendError<Self::Error>> {
        self.check_alive()?;

        let off = self.offset(addr, buf.len()).map_err(BackendError::Os)?;

        if let Some((_, code)) = self.exit_at_write.filter(|&(at, _)| at == self.writes) {
            self.exit_code = Some(code);
            return self.check_alive().map(|()| 0);
        }

        if self.short_writes {
            return Ok(0);
        }

        self.memory[off..off + buf.len()].copy_from_slice(buf);
        self.writes += 1;

        Ok(buf.len())
    }
}

pub struct SimProcess {
    pub breakpoints: Mutex<BreakpointTable>,
}

impl SimProcess {
    pub const PID: u64 = 42;

    /// Creates a process whose main thread runs on the given CPU.
    pub fn spawn(cpu: SimCpu) -> (Arc<Self>, Thread<SimCpu>) {
        let process = Arc::new(Self {
            breakpoints: Mutex::new(BreakpointTable::new()),
        });

        let thread = Thread::new(
            Self::PID,
            WaitStatus::Stopped { signal: SIGTRAP },
            &process,
            cpu,
        );

        (process, thread)
    }
}

impl Process for SimProcess {
    fn id(&self) -> u64 {
        Self::PID
    }

    fn breakpoint_at(&self, addr: u64) -> Option<Breakpoint> {
        self.breakpoints.lock().unwrap().get(addr)
    }
}

/// Returns a thread whose process is already gone.
pub fn thread_of(cpu: SimCpu) -> Thread<SimCpu> {
    SimProcess::spawn(cpu).1
}

/// Arms a breakpoint within the process of the given thread.
pub fn arm(process: &SimProcess, thread: &mut Thread<SimCpu>, addr: u64) {
    process
        .breakpoints
        .lock()
        .unwrap()
        .insert(thread, addr)
        .unwrap();
}
