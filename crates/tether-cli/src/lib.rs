//! Crate implementing the CLI commands.

mod cli;
mod config;
mod run;

pub use self::cli::{CliAction, CliOpts};
pub use self::config::{BreakpointConfig, RunConfig};
pub use self::run::{evaluate_run, parse_run_config};
