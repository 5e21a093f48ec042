use std::path::PathBuf;

use nix::unistd::Pid;
use scroll::Pread;
use tether_core::registers::Arch;

/// Program entry point.
pub const AT_ENTRY: u64 = 9;

/// Returns the value of the given auxiliary vector entry of the process.
pub fn auxv_value(pid: Pid, arch: Arch, key: u64) -> crate::Result<u64> {
    let path: PathBuf = format!("/proc/{pid}/auxv").into();

    let data = std::fs::read(&path).map_err(|e| crate::Error::File(path, e))?;

    auxv_entries(&data, arch)
        .find_map(|(ty, val)| (ty == key).then_some(val))
        .ok_or(crate::Error::MissingAuxv(key))
}

/// Iterates over the (type, value) pairs of a raw auxiliary vector.
fn auxv_entries(data: &[u8], arch: Arch) -> impl Iterator<Item = (u64, u64)> + '_ {
    let mut offset = 0;

    std::iter::from_fn(move || {
        let (ty, val) = if arch.word_size() == 8 {
            let ty: u64 = data.gread_with(&mut offset, scroll::NATIVE).ok()?;
            let val: u64 = data.gread_with(&mut offset, scroll::NATIVE).ok()?;
            (ty, val)
        } else {
            let ty: u32 = data.gread_with(&mut offset, scroll::NATIVE).ok()?;
            let val: u32 = data.gread_with(&mut offset, scroll::NATIVE).ok()?;
            (ty as u64, val as u64)
        };

        // AT_NULL
        (ty != 0).then_some((ty, val))
    })
}
