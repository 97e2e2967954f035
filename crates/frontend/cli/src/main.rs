use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use px86_core::cpu_i386::ExitReason;
use px86_core::logging::{LogCategory, LogConfig, LogLevel};
use px86_core::System;
use px86_pc::{MachineConfig, PcSystem, BINARY_MOUNT_POINT};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "px86", version, about = "Run a raw 32-bit x86 binary from 0x7C00")]
struct Args {
    /// Raw binary image to load and run
    file: PathBuf,

    /// Do not trace executed instructions
    #[arg(short, long, default_value_t = false)]
    quiet: bool,

    /// Machine configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Guest memory size in bytes
    #[arg(long)]
    memory_size: Option<usize>,

    /// Address the image is loaded at; also the initial EIP and ESP
    #[arg(long, value_parser = parse_address)]
    load_address: Option<u32>,

    /// Global core log level (off, error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    /// CPU log level, overrides the trace setting
    #[arg(long)]
    log_cpu: Option<String>,

    /// Write core logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Dump the final machine state to this file as JSON
    #[arg(long)]
    save: Option<PathBuf>,
}

/// Decimal or 0x-prefixed hexadecimal address
fn parse_address(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", s, e))
}

/// Status for a rejected command line: 1 for usage errors, 0 for --help/--version
fn parse_error_status(e: &clap::Error) -> i32 {
    if e.use_stderr() {
        1
    } else {
        0
    }
}

fn parse_args() -> Args {
    Args::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        process::exit(parse_error_status(&e));
    })
}

fn parse_level(s: &str) -> Result<LogLevel> {
    LogLevel::from_str(s).with_context(|| format!("invalid log level '{}'", s))
}

fn configure_logging(args: &Args) -> Result<()> {
    let config = LogConfig::global();

    if let Some(level) = &args.log_level {
        config.set_global_level(parse_level(level)?);
    }

    // One trace line per instruction; the rate limiter would drop most of them
    if !args.quiet {
        config.set_level(LogCategory::CPU, LogLevel::Trace);
        config.set_rate_limit(0);
    }

    if let Some(level) = &args.log_cpu {
        config.set_level(LogCategory::CPU, parse_level(level)?);
    }

    if let Some(path) = &args.log_file {
        config
            .set_log_file(path.clone())
            .with_context(|| format!("cannot open log file {}", path.display()))?;
    }

    Ok(())
}

fn machine_config(args: &Args) -> Result<MachineConfig> {
    let mut config = match &args.config {
        Some(path) => MachineConfig::load(path)
            .with_context(|| format!("cannot read config {}", path.display()))?,
        None => MachineConfig::default(),
    };

    if let Some(size) = args.memory_size {
        config.memory_size = size;
    }
    if let Some(address) = args.load_address {
        config.load_address = address;
        config.initial_eip = address;
        config.initial_esp = address;
    }

    Ok(config)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = parse_args();

    configure_logging(&args)?;
    let config = machine_config(&args)?;

    let image = fs::read(&args.file)
        .with_context(|| format!("cannot open {}", args.file.display()))?;

    let mut sys = PcSystem::with_stdio(config);
    sys.mount(BINARY_MOUNT_POINT, &image)?;
    info!(
        "Loaded {} ({} bytes) at {:#010X}",
        args.file.display(),
        image.len(),
        sys.config().load_address
    );

    match sys.run() {
        Ok(ExitReason::EndOfProgram) => {
            println!("\n\nend of program.\n");
        }
        Ok(ExitReason::EipOutOfRange) => {
            warn!("EIP {:#010X} left guest memory", sys.registers().eip);
        }
        Err(e) => {
            println!("{}", e);
        }
    }

    println!("{}", sys.registers());

    if let Some(path) = &args.save {
        let state = sys.save_state();
        let mut f =
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
        write!(f, "{}", serde_json::to_string_pretty(&state)?)?;
    }

    Ok(())
}
