//! File copy through a pair of handles.

use std::path::Path;

use bufhandle_core::{BufferMode, LogEmitter, Registry, api};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{Result, buffer_mode_name, log_report};

/// Chunk handed to each `read` call. Deliberately not a power of two so
/// reads straddle buffer boundaries.
pub const COPY_CHUNK: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    pub mode: BufferMode,
    /// Buffer capacity; the configured block size when `None`.
    pub buffer_size: Option<usize>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            mode: BufferMode::Block,
            buffer_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyReport {
    pub bytes: u64,
    pub sha256: String,
    pub mode: String,
    pub reads: u64,
}

/// Copy `src` to `dst`, applying `opts` to both handles.
pub fn copy_file(
    reg: &Registry,
    src: &Path,
    dst: &Path,
    opts: CopyOptions,
    log: &mut LogEmitter,
) -> Result<CopyReport> {
    let input = api::open(reg, src, "<b")?;
    let output = api::open(reg, dst, ">b")?;
    for h in [&input, &output] {
        api::set_buffer_mode(h, opts.mode.selector())?;
        if let Some(size) = opts.buffer_size
            && opts.mode != BufferMode::Unbuffered
        {
            api::setbuf(h, size)?;
        }
    }

    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; COPY_CHUNK];
    let mut bytes = 0u64;
    let mut reads = 0u64;
    loop {
        let n = api::read(&input, &mut chunk)?;
        reads += 1;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
        api::write(&output, &chunk[..n])?;
        bytes += n as u64;
    }
    api::close(reg, &output)?;
    api::close(reg, &input)?;

    let report = CopyReport {
        bytes,
        sha256: hex_lower(&hasher.finalize()),
        mode: buffer_mode_name(opts.mode).to_string(),
        reads,
    };
    log_report(log, "copy", bytes, &report)?;
    Ok(report)
}

pub(crate) fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
