//! Structured JSONL log for handle lifecycle events.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required and optional fields.
//! - [`LogEmitter`]: writes records at or above a minimum level.
//! - [`validate_log_line`]: checks a single line against the schema.
//!
//! Events emitted by the registry: `handle_open`, `handle_close` and
//! `std_swap` at debug/info, `teardown_flush_failed` and
//! `teardown_close_failed` at warn.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Case-insensitive parse; accepts `warning` for `warn`.
    #[must_use]
    pub fn from_str_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fd: Option<i32>,
    /// Operation that produced the event (`open`, `flush`, `close`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            handle_id: None,
            fd: None,
            op: None,
            errno: None,
            bytes: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_handle(mut self, handle_id: u64, fd: i32) -> Self {
        self.handle_id = Some(handle_id);
        self.fd = Some(fd);
        self
    }

    #[must_use]
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    #[must_use]
    pub fn with_errno(mut self, errno: i32) -> Self {
        self.errno = Some(errno);
        self
    }

    #[must_use]
    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// In-memory sink shared between an emitter and whoever inspects it.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Writes structured JSONL entries to a file, stderr, or memory.
pub struct LogEmitter {
    writer: Box<dyn Write + Send>,
    min_level: LogLevel,
    seq: u64,
    scope: String,
    run_id: String,
}

impl std::fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEmitter")
            .field("min_level", &self.min_level)
            .field("seq", &self.seq)
            .field("scope", &self.scope)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

impl LogEmitter {
    fn with_writer(writer: Box<dyn Write + Send>, scope: &str, min_level: LogLevel) -> Self {
        Self {
            writer,
            min_level,
            seq: 0,
            scope: scope.to_string(),
            run_id: format!("pid{}", std::process::id()),
        }
    }

    /// Append to `path`, creating it if needed.
    pub fn to_file(path: &Path, scope: &str, min_level: LogLevel) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::with_writer(
            Box::new(std::io::LineWriter::new(file)),
            scope,
            min_level,
        ))
    }

    #[must_use]
    pub fn to_stderr(scope: &str, min_level: LogLevel) -> Self {
        Self::with_writer(Box::new(std::io::stderr()), scope, min_level)
    }

    /// Emitter backed by memory, plus the handle used to read it back.
    #[must_use]
    pub fn to_buffer(scope: &str, min_level: LogLevel) -> (Self, SharedBuffer) {
        let sink = SharedBuffer::default();
        (
            Self::with_writer(Box::new(sink.clone()), scope, min_level),
            sink,
        )
    }

    /// Emitter that discards everything.
    #[must_use]
    pub fn sink() -> Self {
        Self::with_writer(Box::new(std::io::sink()), "null", LogLevel::Error)
    }

    #[must_use]
    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{}::{:03}", self.scope, self.run_id, self.seq)
    }

    /// Start an entry with a fresh trace id. Nothing is written until
    /// [`LogEmitter::emit_entry`].
    pub fn entry(&mut self, level: LogLevel, event: &str) -> LogEntry {
        let trace_id = self.next_trace_id();
        LogEntry::new(trace_id, level, event)
    }

    /// Write `entry` if its level passes the filter. Returns whether it was
    /// written.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<bool> {
        if !self.enabled(entry.level) {
            return Ok(false);
        }
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        Ok(true)
    }

    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<bool> {
        let entry = self.entry(level, event);
        self.emit_entry(entry)
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Validation error for a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let err = |field: &str, message: String| LogValidationError {
        line_number,
        field: field.to_string(),
        message,
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Err(vec![err("<json>", format!("invalid JSON: {e}"))]),
    };
    let Some(obj) = value.as_object() else {
        return Err(vec![err("<root>", "expected JSON object".to_string())]);
    };

    let mut errors = Vec::new();
    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(err(field, "required field missing".to_string()));
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !LogLevel::ALL.iter().any(|l| l.as_str() == level)
    {
        errors.push(err("level", format!("invalid level: '{level}'")));
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && trace_id.split("::").count() != 3
    {
        errors.push(err(
            "trace_id",
            format!("trace_id should follow <scope>::<run>::<seq>, got: '{trace_id}'"),
        ));
    }

    if obj.contains_key("handle_id") != obj.contains_key("fd") {
        errors.push(err(
            "handle_id",
            "handle_id and fd must appear together".to_string(),
        ));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value::<LogEntry>(value)
        .map_err(|e| vec![err("<deserialization>", format!("failed to deserialize: {e}"))])
}

/// RFC 3339 UTC timestamp with millisecond precision.
pub(crate) fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        duration.subsec_millis(),
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
