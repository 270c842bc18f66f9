use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process;

use legacy16::common::{Personality, Trace};
use legacy16::exec::{EmulatorArgs, Process};
use legacy16::loader;
use legacy16::os::{self, Minix, Os, UnixV6I8086, UnixV6Pdp11};

/// Runs Minix 2 and Unix V6 executables on an emulated 8086 or PDP-11.
#[derive(Parser, Debug)]
#[command(name = "legacy16", version)]
struct Cli {
    /// Directory that absolute paths of the emulated program are resolved in
    #[arg(short = 'r', value_name = "ROOTDIR")]
    root: Option<PathBuf>,
    /// Trace system calls, instructions and registers
    #[arg(short = 'm', group = "trace")]
    memory: bool,
    /// Trace system calls and instructions
    #[arg(short = 'v', group = "trace")]
    verbose: bool,
    /// Trace system calls
    #[arg(short = 's', group = "trace")]
    syscalls: bool,
    /// Disassemble the text segment instead of running
    #[arg(short = 'd')]
    disassemble: bool,
    /// Treat the binary as a PDP-11 executable
    #[arg(short = 'p')]
    pdp11: bool,
    /// The executable to run, followed by its arguments
    #[arg(value_name = "BINARY", trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}
impl Cli {
    fn trace(&self) -> Trace {
        if self.memory { Trace::Memory }
        else if self.verbose { Trace::Instructions }
        else if self.syscalls { Trace::Syscalls }
        else { Trace::Off }
    }
}

fn init_logging(trace: Trace) {
    let default = match trace {
        Trace::Off => "warn",
        Trace::Syscalls => "debug",
        Trace::Instructions | Trace::Memory => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .without_time()
        .with_target(false)
        .init();
}

/// Loads the binary under `O` and either lists it or runs it, returning the exit code.
fn start<O: Os>(path: &Path, argv: &[String], args: EmulatorArgs, disassemble: bool) -> anyhow::Result<i32> {
    let mut p = Process::<O>::load(path, argv, args).with_context(|| format!("can not load {}", path.display()))?;
    if disassemble {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        p.disassemble(&mut out)?;
        out.flush()?;
        return Ok(0);
    }
    Ok(p.run())
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let (binary, rest) = match cli.command.split_first() {
        Some((b, rest)) => (b.clone(), rest),
        None => {
            Cli::command().print_help()?;
            return Ok(1);
        }
    };
    let trace = cli.trace();
    init_logging(trace);

    let path = os::convert_path(cli.root.as_deref(), &binary);
    let bytes = loader::read_binary(&path).map_err(anyhow::Error::msg)?;
    let personality = loader::detect(&bytes, cli.pdp11);
    tracing::debug!("{}: {}", binary, personality);

    let mut argv = vec![binary];
    argv.extend(rest.iter().cloned());
    let args = EmulatorArgs { root: cli.root.clone(), trace, ..Default::default() };

    match personality {
        Personality::Minix => start::<Minix>(&path, &argv, args, cli.disassemble),
        Personality::UnixV6Pdp11 => start::<UnixV6Pdp11>(&path, &argv, args, cli.disassemble),
        Personality::UnixV6I8086 => start::<UnixV6I8086>(&path, &argv, args, cli.disassemble),
    }
}

fn main() {
    match run(Cli::parse()) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{:#}", e);
            process::exit(1);
        }
    }
}
