use std::ffi::c_void;

use byteorder::{ByteOrder, NativeEndian};
use nix::errno::Errno;
use nix::libc;
use nix::sys::ptrace;
use nix::unistd::Pid;
use tether_core::registers::{Arch, RegisterSet, RegisterValue};

/// Layout of `user_regs_struct` (x86_64).
const X86_64_GENERAL: &[&str] = &[
    "r15", "r14", "r13", "r12", "rbp", "rbx", "r11", "r10", "r9", "r8", "rax", "rcx", "rdx", "rsi",
    "rdi", "orig_rax", "rip", "cs", "eflags", "rsp", "ss", "fs_base", "gs_base", "ds", "es", "fs",
    "gs",
];

/// Layout of `user_regs_struct` (i386).
const X86_GENERAL: &[&str] = &[
    "ebx", "ecx", "edx", "esi", "edi", "ebp", "eax", "ds", "es", "fs", "gs", "orig_eax", "eip",
    "cs", "eflags", "esp", "ss",
];

/// Layout of `user_pt_regs` (aarch64).
const AARCH64_GENERAL: &[&str] = &[
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14",
    "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27",
    "x28", "x29", "x30", "sp", "pc", "pstate",
];

/// Layout of `user_regs` (arm).
const ARM_GENERAL: &[&str] = &[
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "fp", "ip", "sp", "lr",
    "pc", "cpsr", "orig_r0",
];

/// Floating point register: name, offset and size (in bytes).
type FpField = (&'static str, usize, usize);

/// Layout of `user_fpregs_struct` (x86_64, `fxsave` format).
const X86_64_FP: &[FpField] = &[
    ("fcw", 0, 2),
    ("fsw", 2, 2),
    ("ftw", 4, 2),
    ("fop", 6, 2),
    ("fip", 8, 8),
    ("fdp", 16, 8),
    ("mxcsr", 24, 4),
    ("mxcsr_mask", 28, 4),
    ("st0", 32, 10),
    ("st1", 48, 10),
    ("st2", 64, 10),
    ("st3", 80, 10),
    ("st4", 96, 10),
    ("st5", 112, 10),
    ("st6", 128, 10),
    ("st7", 144, 10),
    ("xmm0", 160, 16),
    ("xmm1", 176, 16),
    ("xmm2", 192, 16),
    ("xmm3", 208, 16),
    ("xmm4", 224, 16),
    ("xmm5", 240, 16),
    ("xmm6", 256, 16),
    ("xmm7", 272, 16),
    ("xmm8", 288, 16),
    ("xmm9", 304, 16),
    ("xmm10", 320, 16),
    ("xmm11", 336, 16),
    ("xmm12", 352, 16),
    ("xmm13", 368, 16),
    ("xmm14", 384, 16),
    ("xmm15", 400, 16),
];

/// Layout of `user_fpsimd_state` (aarch64).
const AARCH64_FP: &[FpField] = &[
    ("v0", 0, 16),
    ("v1", 16, 16),
    ("v2", 32, 16),
    ("v3", 48, 16),
    ("v4", 64, 16),
    ("v5", 80, 16),
    ("v6", 96, 16),
    ("v7", 112, 16),
    ("v8", 128, 16),
    ("v9", 144, 16),
    ("v10", 160, 16),
    ("v11", 176, 16),
    ("v12", 192, 16),
    ("v13", 208, 16),
    ("v14", 224, 16),
    ("v15", 240, 16),
    ("v16", 256, 16),
    ("v17", 272, 16),
    ("v18", 288, 16),
    ("v19", 304, 16),
    ("v20", 320, 16),
    ("v21", 336, 16),
    ("v22", 352, 16),
    ("v23", 368, 16),
    ("v24", 384, 16),
    ("v25", 400, 16),
    ("v26", 416, 16),
    ("v27", 432, 16),
    ("v28", 448, 16),
    ("v29", 464, 16),
    ("v30", 480, 16),
    ("v31", 496, 16),
    ("fpsr", 512, 4),
    ("fpcr", 516, 4),
];

const GENERAL_MAX_SIZE: usize = 34 * 8;
const FP_MAX_SIZE: usize = 528;

const fn general_layout(arch: Arch) -> &'static [&'static str] {
    match arch {
        Arch::X86 => X86_GENERAL,
        Arch::X86_64 => X86_64_GENERAL,
        Arch::Arm => ARM_GENERAL,
        Arch::Aarch64 => AARCH64_GENERAL,
    }
}

/// Returns the floating point layout and its total size.
///
/// Only native (64-bit) threads are supported.
const fn fp_layout(arch: Arch) -> Option<(&'static [FpField], usize)> {
    match arch {
        Arch::X86_64 => Some((X86_64_FP, 512)),
        Arch::Aarch64 => Some((AARCH64_FP, 528)),
        Arch::X86 | Arch::Arm => None,
    }
}

/// Returns the (native, compat) architectures of the host.
const fn host_archs() -> (Arch, Arch) {
    #[cfg(target_arch = "x86_64")]
    {
        (Arch::X86_64, Arch::X86)
    }
    #[cfg(target_arch = "aarch64")]
    {
        (Arch::Aarch64, Arch::Arm)
    }
}

fn get_regset(tid: Pid, regset: libc::c_int, buf: &mut [u8]) -> crate::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };

    unsafe {
        Errno::result(libc::ptrace(
            ptrace::Request::PTRACE_GETREGSET as _,
            tid.as_raw(),
            regset as usize as *mut c_void,
            &mut iov as *mut libc::iovec,
        ))
        .inspect_err(|e| tracing::error!(error = %e, regset, "ptrace(PTRACE_GETREGSET)"))?
    };

    Ok(iov.iov_len)
}

fn set_regset(tid: Pid, regset: libc::c_int, buf: &[u8]) -> crate::Result<()> {
    let mut iov = libc::iovec {
        iov_base: buf.as_ptr() as *mut c_void,
        iov_len: buf.len(),
    };

    unsafe {
        Errno::result(libc::ptrace(
            ptrace::Request::PTRACE_SETREGSET as _,
            tid.as_raw(),
            regset as usize as *mut c_void,
            &mut iov as *mut libc::iovec,
        ))
        .inspect_err(|e| tracing::error!(error = %e, regset, "ptrace(PTRACE_SETREGSET)"))?
    };

    Ok(())
}

/// Reads the raw general purpose registers, and detects the architecture of
/// the thread from their size.
fn read_general(tid: Pid) -> crate::Result<(Arch, [u8; GENERAL_MAX_SIZE], usize)> {
    let mut buf = [0u8; GENERAL_MAX_SIZE];
    let len = get_regset(tid, libc::NT_PRSTATUS, &mut buf)?;

    let (native, compat) = host_archs();

    let arch = if len == general_layout(native).len() * native.word_size() {
        native
    } else if len == general_layout(compat).len() * compat.word_size() {
        compat
    } else {
        return Err(crate::Error::RegisterLayout(len));
    };

    Ok((arch, buf, len))
}

/// Returns the architecture of the given stopped thread.
pub fn thread_arch(tid: Pid) -> crate::Result<Arch> {
    read_general(tid).map(|(arch, _, _)| arch)
}

/// Retrieves the registers of the given stopped thread.
pub fn read_registers(tid: Pid, floating_point: bool) -> crate::Result<RegisterSet> {
    let (arch, buf, _) = read_general(tid)?;
    let word_size = arch.word_size();

    let general = general_layout(arch)
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let offset = i * word_size;
            (*name, NativeEndian::read_uint(&buf[offset..], word_size))
        })
        .collect::<Vec<_>>();

    let regs = RegisterSet::new(arch, general);

    let Some((layout, size)) = fp_layout(arch).filter(|_| floating_point) else {
        return Ok(regs);
    };

    let mut buf = [0u8; FP_MAX_SIZE];
    let len = get_regset(tid, libc::NT_PRFPREG, &mut buf[..size])?;

    if len != size {
        return Err(crate::Error::RegisterLayout(len));
    }

    let fp = layout
        .iter()
        .map(|(name, offset, size)| (*name, NativeEndian::read_uint128(&buf[*offset..], *size)));

    Ok(regs.with_floating_point(fp))
}

/// Applies the given registers to the stopped thread.
///
/// Registers missing from the snapshot keep their current value.
pub fn write_registers(tid: Pid, regs: &RegisterSet) -> crate::Result<()> {
    let (arch, mut buf, len) = read_general(tid)?;

    if regs.arch() != arch {
        return Err(crate::Error::ArchMismatch(regs.arch(), arch));
    }

    let word_size = arch.word_size();

    for (i, name) in general_layout(arch).iter().enumerate() {
        if let Some(RegisterValue::Word(value)) = regs.get(name) {
            if word_size < 8 && value >> (word_size * 8) != 0 {
                return Err(crate::Error::RegisterOverflow(*name));
            }

            let offset = i * word_size;
            NativeEndian::write_uint(&mut buf[offset..offset + word_size], value, word_size);
        }
    }

    set_regset(tid, libc::NT_PRSTATUS, &buf[..len])?;

    let Some((layout, size)) = fp_layout(arch) else {
        return Ok(());
    };

    let Some(fp) = regs.floating_point() else {
        return Ok(());
    };

    let mut buf = [0u8; FP_MAX_SIZE];
    get_regset(tid, libc::NT_PRFPREG, &mut buf[..size])?;

    for (name, value) in fp {
        let Some((name, offset, size)) = layout.iter().find(|(n, _, _)| *n == name) else {
            continue;
        };

        if *size < 16 && value >> (size * 8) != 0 {
            return Err(crate::Error::RegisterOverflow(*name));
        }

        NativeEndian::write_uint128(&mut buf[*offset..*offset + *size], value, *size);
    }

    set_regset(tid, libc::NT_PRFPREG, &buf[..size])
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::{AARCH64_FP, ARM_GENERAL, X86_64_FP, X86_GENERAL, X86_64_GENERAL};
    use super::{AARCH64_GENERAL, fp_layout, general_layout};
    use tether_core::registers::Arch;

    #[test]
    fn general_layouts_contain_pc_and_sp() {
        for arch in [Arch::X86, Arch::X86_64, Arch::Arm, Arch::Aarch64] {
            let layout = general_layout(arch);
            assert!(layout.contains(&arch.pc_name()), "{arch}");
            assert!(layout.contains(&arch.sp_name()), "{arch}");
        }
    }

    #[test]
    fn general_layout_sizes() {
        assert_eq!(X86_64_GENERAL.len() * 8, 216);
        assert_eq!(X86_GENERAL.len() * 4, 68);
        assert_eq!(AARCH64_GENERAL.len() * 8, 272);
        assert_eq!(ARM_GENERAL.len() * 4, 72);
    }

    #[test]
    fn fp_layouts_fit() {
        for layout in [X86_64_FP, AARCH64_FP] {
            for window in layout.windows(2) {
                let (_, offset, size) = window[0];
                assert!(offset + size <= window[1].1);
            }
        }

        for arch in [Arch::X86_64, Arch::Aarch64] {
            let Some((layout, total)) = fp_layout(arch) else {
                unreachable!();
            };
            let (_, offset, size) = layout[layout.len() - 1];
            assert!(offset + size <= total);
        }

        assert!(fp_layout(Arch::X86).is_none());
    }
}
