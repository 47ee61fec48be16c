//! CLI entrypoint for the bufhandle workload harness.

use std::path::{Path, PathBuf};

use bufhandle_core::{IoConfig, LogEmitter, LogLevel, Registry};
use bufhandle_harness::{CopyOptions, copy_file, count_lines, echo_roundtrip, parse_buffer_mode};
use clap::{Parser, Subcommand};

/// Drive bufhandle workloads and print JSON reports.
#[derive(Debug, Parser)]
#[command(name = "bufhandle-harness")]
#[command(about = "Workload harness for buffered handle I/O")]
struct Cli {
    /// Append JSONL log lines to this file.
    #[arg(long, global = true)]
    log: Option<PathBuf>,
    /// Minimum log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream a file through two handles and digest it.
    Copy {
        #[arg(long)]
        src: PathBuf,
        #[arg(long)]
        dst: PathBuf,
        /// Buffering mode: none, line, or block.
        #[arg(long, default_value = "block")]
        mode: String,
        /// Buffer capacity in bytes.
        #[arg(long)]
        buffer_size: Option<usize>,
    },
    /// Count lines, starting from a buffer of the given capacity.
    Lines {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = 256)]
        capacity: usize,
    },
    /// Echo a generated payload across a socket pair.
    Echo {
        /// Payload length in bytes.
        #[arg(long, default_value_t = 65536)]
        bytes: usize,
    },
}

fn emitter(path: Option<&Path>, scope: &str, level: LogLevel) -> std::io::Result<LogEmitter> {
    match path {
        Some(path) => LogEmitter::to_file(path, scope, level),
        None => Ok(LogEmitter::sink()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = LogLevel::from_str_loose(&cli.log_level)
        .ok_or_else(|| format!("unknown log level '{}'", cli.log_level))?;

    let config = IoConfig::from_env();
    let registry = Registry::new(config, emitter(cli.log.as_deref(), "registry", level)?);
    let mut log = emitter(cli.log.as_deref(), "harness", level)?;

    let report = match cli.command {
        Command::Copy {
            src,
            dst,
            mode,
            buffer_size,
        } => {
            let opts = CopyOptions {
                mode: parse_buffer_mode(&mode)?,
                buffer_size,
            };
            serde_json::to_string_pretty(&copy_file(&registry, &src, &dst, opts, &mut log)?)?
        }
        Command::Lines { path, capacity } => {
            serde_json::to_string_pretty(&count_lines(&registry, &path, capacity, &mut log)?)?
        }
        Command::Echo { bytes } => {
            let payload: Vec<u8> = (0..bytes).map(|i| (i % 251) as u8).collect();
            serde_json::to_string_pretty(&echo_roundtrip(&registry, &payload, &mut log)?)?
        }
    };

    let teardown = registry.teardown();
    if !teardown.is_clean() {
        eprintln!("teardown reported {} failure(s)", teardown.failures.len());
    }
    println!("{report}");
    Ok(())
}
