//! Line counting at a chosen buffer capacity.

use std::path::Path;

use bufhandle_core::{LogEmitter, Registry, api};
use serde::Serialize;

use crate::{Result, log_report};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineReport {
    pub lines: u64,
    pub bytes: u64,
    pub longest: usize,
    /// Whether the last line lacked a terminator.
    pub unterminated_tail: bool,
    pub final_capacity: usize,
}

/// Count the lines of `path`, starting from a `capacity`-byte buffer.
///
/// The file is read in binary mode so arbitrary bytes decode one to one.
/// Lines longer than the buffer grow it.
pub fn count_lines(
    reg: &Registry,
    path: &Path,
    capacity: usize,
    log: &mut LogEmitter,
) -> Result<LineReport> {
    let h = api::open(reg, path, "<b")?;
    api::setbuf(&h, capacity)?;

    let mut report = LineReport {
        lines: 0,
        bytes: 0,
        longest: 0,
        unterminated_tail: false,
        final_capacity: capacity,
    };
    loop {
        let line = api::readline(&h)?;
        if line.is_empty() {
            break;
        }
        let len = line.chars().count();
        report.lines += 1;
        report.bytes += len as u64;
        report.longest = report.longest.max(len);
        report.unterminated_tail = !line.ends_with('\n');
    }
    report.final_capacity = h.lock().buffer_capacity();
    api::close(reg, &h)?;

    log_report(log, "lines", report.bytes, &report)?;
    Ok(report)
}
