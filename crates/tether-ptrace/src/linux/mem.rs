use nix::errno::Errno;
use nix::libc::{iovec, process_vm_readv};
use nix::sys::ptrace;
use nix::unistd::Pid;

/// Reads memory from the process with the given ID.
pub fn read_process_memory(pid: Pid, addr: u64, buf: &mut [u8]) -> crate::Result<()> {
    let local_iov = iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };

    let remote_iov = iovec {
        iov_base: addr as *mut _,
        iov_len: buf.len(),
    };

    let len = unsafe {
        Errno::result(process_vm_readv(
            pid.as_raw(),
            &local_iov as *const _,
            1,
            &remote_iov as *const _,
            1,
            0,
        ))
        .inspect_err(
            |e| tracing::error!(error = %e, addr = format_args!("{addr:#x}"), "process_vm_readv"),
        )
        .map(|len| len as usize)?
    };

    if len != buf.len() {
        Err(crate::Error::PartialMemOp(len, buf.len()))
    } else {
        Ok(())
    }
}

/// Writes memory into the address space of the given stopped thread.
///
/// Read-only mappings (e.g., code) are writable this way. Returns the number
/// of bytes written.
pub fn write_process_memory(tid: Pid, addr: u64, buf: &[u8]) -> crate::Result<usize> {
    let mut data_to_write = buf.chunks_exact(size_of::<u64>());

    let mut write_addr = addr;

    for chunk in &mut data_to_write {
        let mut word = [0u8; size_of::<u64>()];
        word.copy_from_slice(chunk);

        ptrace::write(tid, write_addr as *mut _, i64::from_le_bytes(word))
            .inspect_err(|e| tracing::error!(error = %e, addr = format_args!("{write_addr:#x}"), "ptrace(PTRACE_POKEDATA)"))?;

        write_addr += chunk.len() as u64;
    }

    let remainder = data_to_write.remainder();

    if !remainder.is_empty() {
        let mut old_data = ptrace::read(tid, write_addr as *mut _)
            .inspect_err(|e| tracing::error!(error = %e, addr = format_args!("{write_addr:#x}"), "ptrace(PTRACE_PEEKDATA)"))?
            .to_le_bytes();

        for (old, new) in old_data.iter_mut().zip(remainder) {
            *old = *new;
        }

        ptrace::write(tid, write_addr as *mut _, i64::from_le_bytes(old_data))
            .inspect_err(|e| tracing::error!(error = %e, addr = format_args!("{write_addr:#x}"), "ptrace(PTRACE_POKEDATA)"))?;
    }

    Ok(buf.len())
}
