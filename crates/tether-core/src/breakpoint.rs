use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::backend::{BackendError, ExecutionBackend};
use crate::thread::Thread;

/// Software breakpoint placed within the debuggee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Address of the trap instruction.
    pub addr: u64,

    /// Bytes overwritten by the trap instruction.
    pub original_data: Vec<u8>,
}

/// Breakpoints armed within the debuggee, keyed by address.
#[derive(Debug, Default)]
pub struct BreakpointTable {
    bks: HashMap<u64, BreakpointContext>,
}

#[derive(Debug)]
struct BreakpointContext {
    original_data: Vec<u8>,
    ref_count: usize,
}

impl BreakpointTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the breakpoint at the given address.
    pub fn get(&self, addr: u64) -> Option<Breakpoint> {
        self.bks.get(&addr).map(|cx| Breakpoint {
            addr,
            original_data: cx.original_data.clone(),
        })
    }

    /// Returns whether a breakpoint is armed at the given address.
    pub fn contains(&self, addr: u64) -> bool {
        self.bks.contains_key(&addr)
    }

    /// Returns the number of armed breakpoints.
    pub fn len(&self) -> usize {
        self.bks.len()
    }

    /// Returns whether no breakpoint is armed.
    pub fn is_empty(&self) -> bool {
        self.bks.is_empty()
    }

    /// Iterates over the armed breakpoint addresses.
    pub fn addrs(&self) -> impl Iterator<Item = u64> + '_ {
        self.bks.keys().copied()
    }

    /// Arms a breakpoint at the given address, or increments its usage if it
    /// is already armed.
    pub fn insert<B: ExecutionBackend>(
        &mut self,
        thread: &mut Thread<B>,
        addr: u64,
    ) -> crate::Result<Breakpoint, B::Error> {
        let cx = match self.bks.entry(addr) {
            Entry::Occupied(mut e) => {
                e.get_mut().ref_count = e.get().ref_count.saturating_add(1);
                e.into_mut()
            }
            Entry::Vacant(v) => {
                let original_data = write_trap(thread, addr)?;
                tracing::debug!(addr = format_args!("{addr:#x}"), "breakpoint armed");

                v.insert(BreakpointContext {
                    original_data,
                    ref_count: 1,
                })
            }
        };

        Ok(Breakpoint {
            addr,
            original_data: cx.original_data.clone(),
        })
    }

    /// Decrements the usage of the breakpoint at the given address, and
    /// disarms it once unused.
    pub fn remove<B: ExecutionBackend>(
        &mut self,
        thread: &mut Thread<B>,
        addr: u64,
    ) -> crate::Result<(), B::Error> {
        let mut bk = match self.bks.entry(addr) {
            Entry::Occupied(e) => e,
            Entry::Vacant(_) => return Ok(()),
        };

        if bk.get().ref_count > 1 {
            bk.get_mut().ref_count -= 1;
            return Ok(());
        }

        // keep the entry until the trap is gone
        thread.clear_breakpoint(addr, &bk.get().original_data)?;
        bk.remove();

        tracing::debug!(addr = format_args!("{addr:#x}"), "breakpoint disarmed");

        Ok(())
    }
}

/// Injects the trap instruction at the given address, returning the bytes it
/// replaced.
pub(crate) fn write_trap<B: ExecutionBackend>(
    thread: &mut Thread<B>,
    addr: u64,
) -> crate::Result<Vec<u8>, B::Error> {
    let trap = thread.backend().arch().trap_opcodes();

    let mut original_data = vec![0u8; trap.len()];
    thread
        .backend()
        .read_memory(addr, &mut original_data)
        .map_err(|e| insert_error(addr, e))?;

    let written = thread
        .backend_mut()
        .write_memory(addr, trap)
        .map_err(|e| insert_error(addr, e))?;

    if written != trap.len() {
        return Err(crate::Error::PartialWrite {
            addr,
            written,
            expected: trap.len(),
        });
    }

    Ok(original_data)
}

/// Re-injects the trap instruction of an already armed breakpoint.
pub(crate) fn rearm<B: ExecutionBackend>(
    backend: &mut B,
    addr: u64,
) -> crate::Result<(), B::Error> {
    let trap = backend.arch().trap_opcodes();

    let written = backend
        .write_memory(addr, trap)
        .map_err(|e| insert_error(addr, e))?;

    if written != trap.len() {
        return Err(crate::Error::PartialWrite {
            addr,
            written,
            expected: trap.len(),
        });
    }

    Ok(())
}

fn insert_error<E>(addr: u64, e: BackendError<E>) -> crate::Error<E> {
    match e {
        BackendError::ProcessExited(exited) => crate::Error::ProcessExited(exited),
        BackendError::Os(source) => crate::Error::BreakpointInsert { addr, source },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use test_log::test;

    use super::BreakpointTable;
    use crate::sim::{NOP, SimCpu, thread_of};

    #[test]
    fn insert_is_reference_counted() {
        let mut thread = thread_of(SimCpu::new(0x1000, &[NOP; 16]));
        let mut table = BreakpointTable::new();

        let bk = table.insert(&mut thread, 0x1004).unwrap();
        assert_eq!(bk.original_data, [NOP]);
        assert_eq!(thread.backend().byte_at(0x1004), 0xcc);

        // second insertion must not save the trap as original data
        let bk = table.insert(&mut thread, 0x1004).unwrap();
        assert_eq!(bk.original_data, [NOP]);
        assert_eq!(table.len(), 1);

        table.remove(&mut thread, 0x1004).unwrap();
        assert!(table.contains(0x1004));
        assert_eq!(thread.backend().byte_at(0x1004), 0xcc);

        table.remove(&mut thread, 0x1004).unwrap();
        assert!(table.is_empty());
        assert_eq!(thread.backend().byte_at(0x1004), NOP);
    }

    #[test]
    fn failed_remove_keeps_breakpoint_armed() {
        let mut thread = thread_of(SimCpu::new(0x1000, &[NOP; 4]));
        let mut table = BreakpointTable::new();

        table.insert(&mut thread, 0x1002).unwrap();
        thread.backend_mut().short_writes = true;

        let err = table.remove(&mut thread, 0x1002).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::PartialWrite {
                addr: 0x1002,
                written: 0,
                expected: 1
            }
        ));
        assert!(table.contains(0x1002));
        assert_eq!(table.get(0x1002).map(|bk| bk.original_data), Some(vec![NOP]));
        assert_eq!(thread.backend().byte_at(0x1002), 0xcc);

        thread.backend_mut().short_writes = false;
        table.remove(&mut thread, 0x1002).unwrap();
        assert!(table.is_empty());
        assert_eq!(thread.backend().byte_at(0x1002), NOP);
    }

    #[test]
    fn remove_unknown_breakpoint() {
        let mut thread = thread_of(SimCpu::new(0x1000, &[NOP; 4]));
        let mut table = BreakpointTable::new();

        table.remove(&mut thread, 0x1002).unwrap();
        assert_eq!(thread.backend().writes(), 0);
    }

    #[test]
    fn insert_outside_of_memory() {
        let mut thread = thread_of(SimCpu::new(0x1000, &[NOP; 4]));
        let mut table = BreakpointTable::new();

        let err = table.insert(&mut thread, 0x9000).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::BreakpointInsert { addr: 0x9000, .. }
        ));
        assert!(table.is_empty());
    }
}
