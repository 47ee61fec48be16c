//! Handle registry: standard slots, the live set, root marking, teardown.
//!
//! The registry is an explicit value owned by the runtime context. Standard
//! slots hold strong references; every other handle is tracked weakly, so a
//! record is reclaimed as soon as the runtime drops its last reference and
//! [`Registry::sweep`] prunes the stale entry.
//!
//! Lock order is registry, then handle. Operations that need both (accept)
//! finish their handle work and release that lock before registering.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::buffer::BufferMode;
use crate::config::IoConfig;
use crate::engine;
use crate::error::{HandleError, Result};
use crate::handle::{Handle, HandleId, HandleRef, WeakHandle};
use crate::log::{LogEmitter, LogLevel};
use crate::mode::{ModeFlags, parse_mode};
use crate::os::{self, RawHandle, STDERR_FILENO};
use crate::process;
use crate::socket::{self, SocketAddress, SocketInfo};

/// Standard handle slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdSlot {
    Input = 0,
    Output = 1,
    Error = 2,
}

impl StdSlot {
    pub const ALL: [StdSlot; 3] = [StdSlot::Input, StdSlot::Output, StdSlot::Error];

    pub fn from_index(index: i64) -> Result<StdSlot> {
        match index {
            0 => Ok(StdSlot::Input),
            1 => Ok(StdSlot::Output),
            2 => Ok(StdSlot::Error),
            other => Err(HandleError::invalid(format!(
                "standard handle slot {other} out of range"
            ))),
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// One failure recorded during teardown.
#[derive(Debug)]
pub struct TeardownFailure {
    pub handle: HandleId,
    pub fd: RawHandle,
    pub op: &'static str,
    pub error: HandleError,
}

/// Outcome of [`Registry::teardown`].
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub flushed: usize,
    pub closed: usize,
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Default)]
struct Slots {
    std: [Option<HandleRef>; 3],
    live: BTreeMap<HandleId, WeakHandle>,
}

pub struct Registry {
    slots: Mutex<Slots>,
    next_id: AtomicU64,
    config: IoConfig,
    log: Mutex<LogEmitter>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("live", &self.slots.lock().live.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Registry {
    #[must_use]
    pub fn new(config: IoConfig, log: LogEmitter) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            next_id: AtomicU64::new(1),
            config,
            log: Mutex::new(log),
        }
    }

    /// Configuration from the environment, logging to stderr.
    #[must_use]
    pub fn from_env() -> Self {
        let config = IoConfig::from_env();
        Self::new(config, LogEmitter::to_stderr("bufhandle", config.log_level))
    }

    #[must_use]
    pub fn config(&self) -> &IoConfig {
        &self.config
    }

    fn allocate_id(&self) -> HandleId {
        HandleId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn log_event(
        &self,
        level: LogLevel,
        event: &str,
        handle: HandleId,
        fd: RawHandle,
        op: &str,
        error: Option<&HandleError>,
    ) {
        let mut log = self.log.lock();
        if !log.enabled(level) {
            return;
        }
        let mut entry = log
            .entry(level, event)
            .with_handle(handle.0, fd)
            .with_op(op);
        if let Some(err) = error {
            if let Some(errno) = err.errno() {
                entry = entry.with_errno(errno);
            }
            entry = entry.with_details(serde_json::json!({ "error": err.to_string() }));
        }
        // A broken log sink must not turn into an I/O failure on the handle.
        let _ = log.emit_entry(entry);
    }

    /// Track a freshly built record.
    fn register(&self, handle: Handle, op: &str) -> HandleRef {
        let fd = handle.fd;
        let href = HandleRef::new(handle);
        self.slots.lock().live.insert(href.id(), href.downgrade());
        self.log_event(LogLevel::Debug, "handle_open", href.id(), fd, op, None);
        href
    }

    /// Open `path` with an open-mode string (`<`, `>`, `>>`, `+` prefix).
    pub fn open(&self, path: &Path, mode: &str) -> Result<HandleRef> {
        let flags = parse_mode(mode)?;
        let fd = os::open(path, flags.open_request())
            .map_err(|e| HandleError::from_errno("open", e))?;
        let handle =
            Handle::file(self.allocate_id(), fd, flags, self.config).with_path(path.to_path_buf());
        Ok(self.register(handle, "open"))
    }

    /// Wrap an existing descriptor. Descriptors 0-2 are never closed by the
    /// handle.
    pub fn fdopen(&self, fd: RawHandle, mode: &str) -> Result<HandleRef> {
        if fd < 0 {
            return Err(HandleError::invalid(format!("bad descriptor {fd}")));
        }
        let flags = parse_mode(mode)?;
        let handle = Handle::file(self.allocate_id(), fd, flags, self.config);
        Ok(self.register(handle, "fdopen"))
    }

    /// Run `command` under the shell with a pipe to it. Mode `<` reads the
    /// command's output, `>` writes its input; a `b` suffix selects binary.
    /// Closing the handle waits for the command to exit.
    pub fn open_pipe(&self, command: &str, mode: &str) -> Result<HandleRef> {
        let flags = parse_mode(mode)?;
        let (fd, child) = process::spawn_pipe(command, flags)?;
        let handle = Handle::file(self.allocate_id(), fd, flags, self.config).with_child(child);
        Ok(self.register(handle, "open_pipe"))
    }

    /// Connected `(reader, writer)` pair.
    pub fn pipe(&self) -> Result<(HandleRef, HandleRef)> {
        let (r, w) = os::pipe().map_err(|e| HandleError::from_errno("pipe", e))?;
        let reader = Handle::file(self.allocate_id(), r, ModeFlags::READ, self.config);
        let writer = Handle::file(self.allocate_id(), w, ModeFlags::WRITE, self.config);
        Ok((self.register(reader, "pipe"), self.register(writer, "pipe")))
    }

    /// New unbuffered socket handle. The record exists before the OS socket
    /// so a creation failure is logged against its id.
    pub fn socket(&self, info: SocketInfo) -> Result<HandleRef> {
        let mut handle = Handle::socket(self.allocate_id(), os::INVALID_HANDLE, info, self.config);
        match socket::open_socket(info) {
            Ok(fd) => handle.fd = fd,
            Err(err) => {
                self.log_event(
                    LogLevel::Warn,
                    "socket_create_failed",
                    handle.id(),
                    os::INVALID_HANDLE,
                    "socket",
                    Some(&err),
                );
                return Err(err);
            }
        }
        Ok(self.register(handle, "socket"))
    }

    pub fn socketpair(&self, info: SocketInfo) -> Result<(HandleRef, HandleRef)> {
        let (a, b) = socket::open_socketpair(info)?;
        let a = Handle::socket(self.allocate_id(), a, info, self.config);
        let b = Handle::socket(self.allocate_id(), b, info, self.config);
        Ok((
            self.register(a, "socketpair"),
            self.register(b, "socketpair"),
        ))
    }

    /// Accept on a listening handle; the new handle is registered.
    pub fn accept(&self, listener: &HandleRef) -> Result<(HandleRef, Option<SocketAddress>)> {
        let (fd, info, peer) = {
            let mut h = listener.lock();
            socket::accept_handle(&mut h)?
        };
        let handle = Handle::socket(self.allocate_id(), fd, info, self.config);
        Ok((self.register(handle, "accept"), peer))
    }

    /// Close and log. The record stays tracked until it becomes unreachable.
    pub fn close(&self, href: &HandleRef) -> Result<()> {
        let (fd, result) = {
            let mut h = href.lock();
            if h.is_closed() {
                return Ok(());
            }
            let fd = h.getfd();
            (fd, h.close())
        };
        let level = if result.is_ok() {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        };
        self.log_event(level, "handle_close", href.id(), fd, "close", result.as_ref().err());
        result
    }

    /// Current occupant of a slot.
    #[must_use]
    pub fn std_handle(&self, slot: StdSlot) -> Option<HandleRef> {
        self.slots.lock().std[slot.index()].clone()
    }

    /// Get a standard slot, or swap in `replacement` and return the previous
    /// occupant.
    pub fn stdhandle(
        &self,
        slot: i64,
        replacement: Option<HandleRef>,
    ) -> Result<Option<HandleRef>> {
        let slot = StdSlot::from_index(slot)?;
        let Some(new) = replacement else {
            return Ok(self.std_handle(slot));
        };
        let (id, previous) = {
            let mut slots = self.slots.lock();
            let id = new.id();
            slots.live.entry(id).or_insert_with(|| new.downgrade());
            (id, slots.std[slot.index()].replace(new))
        };
        self.log_event(
            LogLevel::Info,
            "std_swap",
            id,
            slot.index() as RawHandle,
            "stdhandle",
            None,
        );
        Ok(previous)
    }

    /// Wrap descriptors 0-2: input and output line-buffered, error
    /// unbuffered. Slots already occupied are left alone.
    pub fn init_standard_handles(&self) -> Result<()> {
        for (slot, mode) in [
            (StdSlot::Input, "<"),
            (StdSlot::Output, ">"),
            (StdSlot::Error, ">"),
        ] {
            if self.std_handle(slot).is_some() {
                continue;
            }
            let fd = slot.index() as RawHandle;
            let flags = parse_mode(mode)?;
            let mut handle = Handle::file(self.allocate_id(), fd, flags, self.config);
            engine::set_buffer_mode(&mut handle, default_std_mode(slot).selector())?;
            let href = self.register(handle, "stdhandle");
            self.slots.lock().std[slot.index()] = Some(href);
        }
        Ok(())
    }

    /// Visit every standard handle and every reachable registered handle
    /// exactly once, holding the registry lock throughout.
    pub fn mark_roots(&self, mut visit: impl FnMut(&HandleRef)) {
        let slots = self.slots.lock();
        let mut seen = HashSet::new();
        for href in slots.std.iter().flatten() {
            if seen.insert(href.id()) {
                visit(href);
            }
        }
        for weak in slots.live.values() {
            if let Some(href) = weak.upgrade()
                && seen.insert(href.id())
            {
                visit(&href);
            }
        }
    }

    /// Drop entries whose records were reclaimed. Returns how many went.
    pub fn sweep(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.live.len();
        slots.live.retain(|_, weak| !weak.is_reclaimed());
        before - slots.live.len()
    }

    /// Number of tracked records still reachable.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots
            .lock()
            .live
            .values()
            .filter(|w| !w.is_reclaimed())
            .count()
    }

    fn record_failure(
        &self,
        report: &mut TeardownReport,
        handle: HandleId,
        fd: RawHandle,
        op: &'static str,
        error: HandleError,
    ) {
        let event = format!("teardown_{op}_failed");
        self.log_event(LogLevel::Warn, &event, handle, fd, op, Some(&error));
        report.failures.push(TeardownFailure {
            handle,
            fd,
            op,
            error,
        });
    }

    /// Flush and close everything still open and reap command-pipe
    /// children. Descriptors 0-2 are flushed but stay open. Failures are
    /// collected, never raised.
    pub fn teardown(&self) -> TeardownReport {
        let handles: Vec<HandleRef> = {
            let mut slots = self.slots.lock();
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for href in slots.std.iter_mut().filter_map(Option::take) {
                if seen.insert(href.id()) {
                    out.push(href);
                }
            }
            for weak in std::mem::take(&mut slots.live).into_values() {
                if let Some(href) = weak.upgrade()
                    && seen.insert(href.id())
                {
                    out.push(href);
                }
            }
            out
        };

        let mut report = TeardownReport::default();
        for href in handles {
            let mut h = href.lock();
            if h.is_closed() {
                continue;
            }
            let fd = h.getfd();
            match engine::flush_buffer(&mut h) {
                Ok(()) => report.flushed += 1,
                Err(e) => self.record_failure(&mut report, href.id(), fd, "flush", e),
            }
            if fd <= STDERR_FILENO {
                continue;
            }
            match h.release() {
                Ok(()) => report.closed += 1,
                Err(e) => self.record_failure(&mut report, href.id(), fd, "close", e),
            }
            if let Err(e) = h.reap() {
                self.record_failure(&mut report, href.id(), fd, "wait", e);
            }
        }
        let _ = self.log.lock().flush();
        report
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(IoConfig::default(), LogEmitter::sink())
    }
}

/// Buffering mode a standard slot starts with.
#[must_use]
pub fn default_std_mode(slot: StdSlot) -> BufferMode {
    match slot {
        StdSlot::Error => BufferMode::Unbuffered,
        StdSlot::Input | StdSlot::Output => BufferMode::Line,
    }
}
