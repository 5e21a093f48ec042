mod auxv;
mod error;
pub mod mem;
mod process;
mod regs;
mod thread;

pub use self::error::{Error, Result};
pub use self::process::TracedProcess;
pub use self::thread::PtraceThread;
