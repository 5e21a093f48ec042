use nix::sys::wait::WaitStatus;

/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// File open/read error.
    #[error("{0}: {1}")]
    File(std::path::PathBuf, std::io::Error),

    /// Unexpected wait status of the spawned child.
    #[error("bad child wait status: {0:?}")]
    BadChildWait(WaitStatus),

    /// System call error.
    #[error("os error: {0}")]
    Os(#[from] nix::Error),

    /// Memory operation on fewer bytes than requested.
    #[error("memory read/write {0} bytes instead of {1}")]
    PartialMemOp(usize, usize),

    /// Register set of unexpected size returned by the kernel.
    #[error("unsupported register set layout ({0} bytes)")]
    RegisterLayout(usize),

    /// Register snapshot taken from another architecture.
    #[error("register set of {0} cannot be applied to a {1} thread")]
    ArchMismatch(tether_core::registers::Arch, tether_core::registers::Arch),

    /// Register value that doesn't fit into its register.
    #[error("value of register {0} is out of range")]
    RegisterOverflow(&'static str),

    /// Missing auxiliary vector entry.
    #[error("missing auxv value {0}")]
    MissingAuxv(u64),
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
