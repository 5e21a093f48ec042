use std::fmt;

use indexmap::IndexMap;

/// CPU architecture of a traced thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// 32-bit x86.
    X86,

    /// 64-bit x86.
    X86_64,

    /// 32-bit ARM.
    Arm,

    /// 64-bit ARM.
    Aarch64,
}

impl Arch {
    /// Returns the name of the program counter register.
    pub const fn pc_name(self) -> &'static str {
        match self {
            Self::X86 => "eip",
            Self::X86_64 => "rip",
            Self::Arm | Self::Aarch64 => "pc",
        }
    }

    /// Returns the name of the stack pointer register.
    pub const fn sp_name(self) -> &'static str {
        match self {
            Self::X86 => "esp",
            Self::X86_64 => "rsp",
            Self::Arm | Self::Aarch64 => "sp",
        }
    }

    /// Returns the size (in bytes) of a general purpose register.
    pub const fn word_size(self) -> usize {
        match self {
            Self::X86 | Self::Arm => 4,
            Self::X86_64 | Self::Aarch64 => 8,
        }
    }

    /// Returns the opcodes of the trap instruction used for breakpoints.
    pub const fn trap_opcodes(self) -> &'static [u8] {
        match self {
            Self::X86 | Self::X86_64 => &[0xcc],
            // brk #0
            Self::Aarch64 => &[0x00, 0x00, 0x20, 0xd4],
            // udf #16 (Linux ARM breakpoint)
            Self::Arm => &[0xf0, 0x01, 0xf0, 0xe7],
        }
    }

    /// Returns how far the program counter is past the breakpoint address once
    /// the trap instruction has been executed.
    pub const fn trap_pc_offset(self) -> u64 {
        match self {
            Self::X86 | Self::X86_64 => 1,
            Self::Arm | Self::Aarch64 => 0,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::X86 => "x86",
            Self::X86_64 => "x86_64",
            Self::Arm => "arm",
            Self::Aarch64 => "aarch64",
        })
    }
}

/// Value of a single register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue {
    /// General purpose register value.
    Word(u64),

    /// Floating point or vector register value (little-endian).
    Vector(u128),
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(v) => write!(f, "{v:#x}"),
            Self::Vector(v) => write!(f, "{v:#034x}"),
        }
    }
}

/// Architecture-agnostic view over a register snapshot.
pub trait Registers {
    /// Returns the program counter.
    fn pc(&self) -> u64;

    /// Sets the program counter.
    fn set_pc(&mut self, addr: u64);

    /// Returns the stack pointer.
    fn sp(&self) -> u64;

    /// Returns whether the floating point subset was captured.
    fn has_floating_point(&self) -> bool;
}

/// Snapshot of the CPU registers of a thread.
///
/// Modifying a snapshot has no effect on the thread until it is written back
/// with [Thread::restore_registers](crate::thread::Thread::restore_registers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSet {
    arch: Arch,
    general: IndexMap<&'static str, u64>,
    floating_point: Option<IndexMap<&'static str, u128>>,
}

impl RegisterSet {
    /// Creates a snapshot from general purpose register values.
    ///
    /// The program counter and stack pointer of `arch` are added (zeroed) if
    /// missing.
    pub fn new(arch: Arch, general: impl IntoIterator<Item = (&'static str, u64)>) -> Self {
        let mut general: IndexMap<_, _> = general.into_iter().collect();
        general.entry(arch.pc_name()).or_insert(0);
        general.entry(arch.sp_name()).or_insert(0);

        Self {
            arch,
            general,
            floating_point: None,
        }
    }

    /// Attaches the floating point registers to the snapshot.
    pub fn with_floating_point(
        mut self,
        regs: impl IntoIterator<Item = (&'static str, u128)>,
    ) -> Self {
        self.floating_point = Some(regs.into_iter().collect());
        self
    }

    /// Returns the architecture of the snapshot.
    pub const fn arch(&self) -> Arch {
        self.arch
    }

    /// Returns the value of the given register.
    pub fn get(&self, name: &str) -> Option<RegisterValue> {
        self.general
            .get(name)
            .copied()
            .map(RegisterValue::Word)
            .or_else(|| {
                self.floating_point
                    .as_ref()
                    .and_then(|fp| fp.get(name))
                    .copied()
                    .map(RegisterValue::Vector)
            })
    }

    /// Modifies the value of the given register.
    ///
    /// Fails with the register's name if it isn't part of the snapshot (or if
    /// the value kind doesn't match the register kind).
    pub fn set(&mut self, name: &str, value: RegisterValue) -> Result<(), String> {
        match value {
            RegisterValue::Word(v) => {
                if let Some(reg) = self.general.get_mut(name) {
                    *reg = v;
                    return Ok(());
                }
            }
            RegisterValue::Vector(v) => {
                if let Some(reg) = self.floating_point.as_mut().and_then(|fp| fp.get_mut(name)) {
                    *reg = v;
                    return Ok(());
                }
            }
        }

        Err(name.to_owned())
    }

    /// Iterates over the general purpose registers, in layout order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.general.iter().map(|(name, v)| (*name, *v))
    }

    /// Returns the floating point registers, if captured.
    pub fn floating_point(&self) -> Option<impl Iterator<Item = (&'static str, u128)> + '_> {
        self.floating_point
            .as_ref()
            .map(|fp| fp.iter().map(|(name, v)| (*name, *v)))
    }

    fn word(&self, name: &str) -> u64 {
        self.general.get(name).copied().unwrap_or_default()
    }
}

impl Registers for RegisterSet {
    fn pc(&self) -> u64 {
        self.word(self.arch.pc_name())
    }

    fn set_pc(&mut self, addr: u64) {
        self.general.insert(self.arch.pc_name(), addr);
    }

    fn sp(&self) -> u64 {
        self.word(self.arch.sp_name())
    }

    fn has_floating_point(&self) -> bool {
        self.floating_point.is_some()
    }
}
