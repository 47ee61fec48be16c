//! Buffering and transport tunables.
//!
//! Values come from environment variables, parsed loosely: an unparsable
//! value falls back to the default rather than failing startup.
//!
//! - `BUFHANDLE_BLOCK_SIZE`: block buffer size (default 8192).
//! - `BUFHANDLE_LINE_SIZE`: line buffer size and readline growth floor
//!   (default 256).
//! - `BUFHANDLE_MAX_LINE`: readline growth ceiling (default 16m).
//! - `BUFHANDLE_MAX_BUFFER`: largest size `setbuf` accepts (default 64m).
//! - `BUFHANDLE_RECV_CHUNK`: default `recv` size (default 2048).
//! - `BUFHANDLE_LOG_LEVEL`: minimum structured-log level (default `warn`).
//!
//! Sizes accept a `k` or `m` suffix.

use crate::buffer::{BLOCK_SIZE, LINE_BUFFER_SIZE};
use crate::log::LogLevel;

pub const DEFAULT_MAX_LINE: usize = 16 * 1024 * 1024;
pub const DEFAULT_MAX_BUFFER: usize = 64 * 1024 * 1024;
pub const DEFAULT_RECV_CHUNK: usize = 2048;

/// Resolved I/O configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoConfig {
    pub block_size: usize,
    pub line_buffer_size: usize,
    pub max_line_length: usize,
    pub max_buffer_size: usize,
    pub recv_chunk_size: usize,
    pub log_level: LogLevel,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            line_buffer_size: LINE_BUFFER_SIZE,
            max_line_length: DEFAULT_MAX_LINE,
            max_buffer_size: DEFAULT_MAX_BUFFER,
            recv_chunk_size: DEFAULT_RECV_CHUNK,
            log_level: LogLevel::Warn,
        }
    }
}

impl IoConfig {
    /// Read the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let size = |key: &str, fallback: usize| {
            lookup(key)
                .and_then(|raw| parse_size(&raw))
                .filter(|&n| n > 0)
                .unwrap_or(fallback)
        };

        let line_buffer_size = size("BUFHANDLE_LINE_SIZE", defaults.line_buffer_size);
        let max_line_length =
            size("BUFHANDLE_MAX_LINE", defaults.max_line_length).max(line_buffer_size);

        Self {
            block_size: size("BUFHANDLE_BLOCK_SIZE", defaults.block_size),
            line_buffer_size,
            max_line_length,
            max_buffer_size: size("BUFHANDLE_MAX_BUFFER", defaults.max_buffer_size),
            recv_chunk_size: size("BUFHANDLE_RECV_CHUNK", defaults.recv_chunk_size),
            log_level: lookup("BUFHANDLE_LOG_LEVEL")
                .and_then(|raw| LogLevel::from_str_loose(&raw))
                .unwrap_or(defaults.log_level),
        }
    }
}

/// Parse `"4096"`, `"64k"`, `"16M"`. Returns `None` on garbage or overflow.
#[must_use]
pub fn parse_size(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    let (digits, mult) = match raw.chars().last()? {
        'k' | 'K' => (&raw[..raw.len() - 1], 1024usize),
        'm' | 'M' => (&raw[..raw.len() - 1], 1024 * 1024),
        _ => (raw, 1),
    };
    digits.trim().parse::<usize>().ok()?.checked_mul(mult)
}
