//! Workload harness for bufhandle.
//!
//! Each workload drives the public verbs of `bufhandle-core` end to end and
//! returns a serializable report:
//! - [`copy::copy_file`] streams a file through two handles and digests it
//! - [`lines::count_lines`] reads a file line by line at a chosen capacity
//! - [`echo::echo_roundtrip`] bounces a payload across a socket pair

#![forbid(unsafe_code)]

pub mod copy;
pub mod echo;
pub mod lines;

use bufhandle_core::{BufferMode, HandleError, LogEmitter, LogLevel};
use thiserror::Error;

pub use copy::{CopyOptions, CopyReport, copy_file};
pub use echo::{EchoReport, echo_roundtrip};
pub use lines::{LineReport, count_lines};

/// Failure of a harness workload.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("handle: {0}")]
    Handle(#[from] HandleError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("echo mismatch: sent {sent} bytes, received {received}")]
    EchoMismatch { sent: usize, received: usize },
    #[error("echo peer thread panicked")]
    EchoPeer,
    #[error("unknown buffering mode '{0}' (expected none, line, or block)")]
    UnknownMode(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Parse a buffering mode name as accepted on the command line.
pub fn parse_buffer_mode(raw: &str) -> Result<BufferMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "none" | "unbuffered" => Ok(BufferMode::Unbuffered),
        "line" => Ok(BufferMode::Line),
        "block" | "full" => Ok(BufferMode::Block),
        _ => Err(HarnessError::UnknownMode(raw.to_string())),
    }
}

#[must_use]
pub fn buffer_mode_name(mode: BufferMode) -> &'static str {
    match mode {
        BufferMode::Unbuffered => "none",
        BufferMode::Line => "line",
        BufferMode::Block => "block",
    }
}

/// Emit one `<workload>_done` entry carrying the serialized report.
pub(crate) fn log_report<T: serde::Serialize>(
    log: &mut LogEmitter,
    workload: &str,
    bytes: u64,
    report: &T,
) -> Result<()> {
    let details = serde_json::to_value(report).map_err(std::io::Error::other)?;
    let entry = log
        .entry(LogLevel::Info, &format!("{workload}_done"))
        .with_op(workload)
        .with_bytes(bytes)
        .with_details(details);
    log.emit_entry(entry)?;
    log.flush()?;
    Ok(())
}
