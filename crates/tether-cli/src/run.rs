use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use miette::IntoDiagnostic;
use tether_core::registers::Registers;
use tether_core::status::{ExitStatus, WaitStatus};
use tether_ptrace::TracedProcess;

use crate::RunConfig;

/// Runs the subcommand for running a program under control.
///
/// Stops are reported into `output`. Returns the program's exit code.
pub fn evaluate_run(
    config: String,
    program: PathBuf,
    args: Vec<String>,
    mut output: impl Write,
) -> miette::Result<i32> {
    let config = parse_run_config(config)?;

    let mut command = Command::new(program);
    command.args(args);

    let mut process = TracedProcess::spawn(&mut command).into_diagnostic()?;
    let entry_point = process.entry_point().into_diagnostic()?;

    if config.entry_breakpoint {
        process.add_breakpoint(entry_point).into_diagnostic()?;
    }

    for bk in &config.breakpoints {
        process
            .add_breakpoint(bk.resolve(entry_point))
            .into_diagnostic()?;
    }

    writeln!(
        output,
        "process {} spawned ({}), entry point at {entry_point:#x}",
        process.id(),
        process.arch()
    )
    .into_diagnostic()?;

    for stop in 1..=config.max_stops {
        process.thread_mut().resume().into_diagnostic()?;

        let status = process.wait_stop().into_diagnostic()?;

        if let Some(exit_status) = status.exit_status() {
            writeln!(output, "process {status}").into_diagnostic()?;
            return Ok(exit_code(exit_status));
        }

        report_stop(&mut output, &process, stop, status, config.floating_point)?;

        if process.thread().metadata().current_breakpoint.is_none() {
            continue;
        }

        for _ in 0..config.step_count {
            let thread = process.thread_mut();

            if let Err(e) = thread.step_instruction() {
                if !e.is_process_exited() {
                    return Err(e).into_diagnostic();
                }
                break;
            }

            let pc = thread.pc().into_diagnostic()?;
            writeln!(output, "  stepped to {pc:#x}").into_diagnostic()?;
        }

        if let Some(exit_status) = process.thread().status().exit_status() {
            writeln!(output, "process {}", process.thread().status()).into_diagnostic()?;
            return Ok(exit_code(exit_status));
        }
    }

    tracing::warn!(max_stops = config.max_stops, "stop limit reached");

    let status = process.kill().into_diagnostic()?;
    writeln!(output, "stop limit reached, process {status}").into_diagnostic()?;

    Ok(status.exit_status().map_or(1, exit_code))
}

/// Parses a run configuration, either inline or from a `.kdl` file.
pub fn parse_run_config(config: String) -> miette::Result<RunConfig> {
    let path = Path::new(&config);

    let config = if let Some((filename, "kdl")) = path
        .file_name()
        .and_then(OsStr::to_str)
        .zip(path.extension().and_then(OsStr::to_str))
    {
        let content = std::fs::read_to_string(path).into_diagnostic()?;
        knus::parse(filename, &content)?
    } else {
        knus::parse("<content>", &config)?
    };

    Ok(config)
}

fn report_stop(
    output: &mut impl Write,
    process: &TracedProcess,
    stop: usize,
    status: WaitStatus,
    floating_point: bool,
) -> miette::Result<()> {
    let thread = process.thread();
    let regs = thread.registers(floating_point).into_diagnostic()?;

    match thread.metadata().current_breakpoint {
        Some(addr) => writeln!(output, "stop #{stop}: breakpoint at {addr:#x}"),
        None => writeln!(output, "stop #{stop}: {status} at {:#x}", regs.pc()),
    }
    .into_diagnostic()?;

    for (name, value) in regs.iter() {
        writeln!(output, "  {name:>10} = {value:#x}").into_diagnostic()?;
    }

    if let Some(fp) = regs.floating_point() {
        for (name, value) in fp {
            writeln!(output, "  {name:>10} = {value:#034x}").into_diagnostic()?;
        }
    }

    Ok(())
}

const fn exit_code(status: ExitStatus) -> i32 {
    match status {
        ExitStatus::Code(code) => code,
        ExitStatus::Signal(signal) => 128 + signal,
    }
}
