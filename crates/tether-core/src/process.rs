use crate::breakpoint::Breakpoint;

/// Trait providing the process-wide information a thread needs.
///
/// Threads only hold a weak reference to their process.
pub trait Process: Send + Sync {
    /// Returns the process ID.
    fn id(&self) -> u64;

    /// Returns the breakpoint armed at the given address, if any.
    fn breakpoint_at(&self, addr: u64) -> Option<Breakpoint>;
}
