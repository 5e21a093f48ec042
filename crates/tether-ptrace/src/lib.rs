//! This crate provides the Linux `ptrace(2)` execution backend of
//! `tether-core`.
//!
//! It also provides a minimal [TracedProcess], able to spawn a program in
//! debug-mode and to own its breakpoints and main thread.
//!
//! # Supported Platforms
//!
//! <table>
//!     <thead>
//!         <tr>
//!             <th>Host Machine</th>
//!             <th>Debuggee Platform</th>
//!         </tr>
//!     </thead>
//!     <tbody>
//!         <tr>
//!             <td rowspan="2">Linux <code>x86_64</code></td>
//!             <td><code>x86_64</code></td>
//!         </tr>
//!         <tr>
//!             <td><code>i386</code> (no floating point registers)</td>
//!         </tr>
//!         <tr>
//!             <td rowspan="2">Linux <code>aarch64</code></td>
//!             <td><code>aarch64</code></td>
//!         </tr>
//!         <tr>
//!             <td><code>arm</code> (no floating point registers)</td>
//!         </tr>
//!     </tbody>
//! </table>

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;

#[cfg(not(target_os = "linux"))]
compile_error!("No ptrace backend is available for this platform.");

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("No ptrace backend is available for this architecture.");
