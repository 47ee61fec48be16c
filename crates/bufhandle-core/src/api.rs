//! Host-facing verbs.
//!
//! Every verb locks the handle for its whole duration and dispatches on the
//! handle variant: byte transfer on sockets goes to [`crate::socket`],
//! everything else to [`crate::engine`]. Verbs that create handles or touch
//! the standard slots take the [`Registry`].

use std::fmt;
use std::path::Path;

use crate::engine::{self, Whence};
use crate::error::{HandleError, Result};
use crate::handle::{HandleKind, HandleRef};
use crate::os::RawHandle;
use crate::registry::{Registry, StdSlot};
use crate::socket::{self, Family, Protocol, Readiness, SocketAddress, SocketInfo, SocketType};

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

pub fn open(reg: &Registry, path: impl AsRef<Path>, mode: &str) -> Result<HandleRef> {
    reg.open(path.as_ref(), mode)
}

pub fn fdopen(reg: &Registry, fd: RawHandle, mode: &str) -> Result<HandleRef> {
    reg.fdopen(fd, mode)
}

pub fn close(reg: &Registry, h: &HandleRef) -> Result<()> {
    reg.close(h)
}

pub fn pipe(reg: &Registry) -> Result<(HandleRef, HandleRef)> {
    reg.pipe()
}

/// Handle on a shell command's output (`<`) or input (`>`).
pub fn open_pipe(reg: &Registry, command: &str, mode: &str) -> Result<HandleRef> {
    reg.open_pipe(command, mode)
}

/// Exit status of a closed command pipe; `None` before it is reaped.
#[must_use]
pub fn exit_status(h: &HandleRef) -> Option<i32> {
    h.lock().exit_status()
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read into `out`. Sockets return after one `recv`; other handles fill
/// `out` unless the stream ends.
pub fn read(h: &HandleRef, out: &mut [u8]) -> Result<usize> {
    let mut h = h.lock();
    if h.kind().is_socket() {
        socket::recv_into(&mut h, out)
    } else {
        engine::read_buffer(&mut h, out)
    }
}

/// Read up to `len` bytes into a fresh vector.
pub fn reads(h: &HandleRef, len: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    let n = read(h, &mut out)?;
    out.truncate(n);
    Ok(out)
}

/// Next line decoded with the handle's encoding; empty at end of stream.
pub fn readline(h: &HandleRef) -> Result<String> {
    let mut h = h.lock();
    let encoding = h.encoding().clone();
    engine::readline_buffer(&mut h, encoding.as_ref())
}

pub fn peek(h: &HandleRef) -> Result<Option<u8>> {
    engine::peek_buffer(&mut h.lock())
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write all of `bytes` (or as much as a non-blocking handle takes).
pub fn write(h: &HandleRef, bytes: &[u8]) -> Result<usize> {
    let mut h = h.lock();
    if h.kind().is_socket() {
        socket::send_all(&mut h, bytes)
    } else {
        engine::write_buffer(&mut h, bytes)
    }
}

/// Encode `text` with the handle's encoding and write it.
pub fn puts(h: &HandleRef, text: &str) -> Result<usize> {
    let bytes = h.lock().encoding().encode(text)?;
    write(h, &bytes)
}

/// `printf(h, format_args!(...))`.
pub fn printf(h: &HandleRef, args: fmt::Arguments<'_>) -> Result<usize> {
    match args.as_str() {
        Some(text) => puts(h, text),
        None => puts(h, &fmt::format(args)),
    }
}

/// Formatted write to the standard error slot.
pub fn eprintf(reg: &Registry, args: fmt::Arguments<'_>) -> Result<usize> {
    let err = reg
        .std_handle(StdSlot::Error)
        .ok_or(HandleError::ClosedHandle)?;
    printf(&err, args)
}

// ---------------------------------------------------------------------------
// Positioning and buffering
// ---------------------------------------------------------------------------

pub fn seek(h: &HandleRef, offset: i64, whence: Whence) -> Result<i64> {
    engine::seek_buffer(&mut h.lock(), offset, whence)
}

pub fn tell(h: &HandleRef) -> Result<i64> {
    engine::tell(&h.lock())
}

pub fn flush(h: &HandleRef) -> Result<()> {
    engine::flush_buffer(&mut h.lock())
}

pub fn setbuf(h: &HandleRef, size: usize) -> Result<()> {
    engine::setbuf(&mut h.lock(), size)
}

pub fn setlinebuf(h: &HandleRef) -> Result<()> {
    engine::setlinebuf(&mut h.lock())
}

/// Block buffering sized to the descriptor's preferred I/O block.
pub fn setbuf_default(h: &HandleRef) -> Result<()> {
    engine::setbuf_default(&mut h.lock())
}

/// Apply a buffering-mode selector (0 none, 1 line, 2 block).
pub fn set_buffer_mode(h: &HandleRef, selector: i32) -> Result<()> {
    engine::set_buffer_mode(&mut h.lock(), selector)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[must_use]
pub fn is_closed(h: &HandleRef) -> bool {
    h.lock().is_closed()
}

pub fn is_tty(h: &HandleRef) -> Result<bool> {
    h.lock().is_tty()
}

#[must_use]
pub fn eof(h: &HandleRef) -> bool {
    h.lock().eof()
}

#[must_use]
pub fn getfd(h: &HandleRef) -> RawHandle {
    h.lock().getfd()
}

pub fn get_blksize(h: &HandleRef) -> Result<usize> {
    h.lock().get_blksize()
}

pub fn set_nonblocking(h: &HandleRef, on: bool) -> Result<()> {
    h.lock().set_nonblocking(on)
}

// ---------------------------------------------------------------------------
// Sockets
// ---------------------------------------------------------------------------

fn socket_info(family: i32, ty: i32, protocol: i32) -> Result<SocketInfo> {
    Ok(SocketInfo::new(
        Family::from_code(family)?,
        SocketType::from_code(ty)?,
        Protocol::from_code(protocol)?,
    ))
}

/// New socket from portable family/type/protocol codes.
pub fn socket(reg: &Registry, family: i32, ty: i32, protocol: i32) -> Result<HandleRef> {
    reg.socket(socket_info(family, ty, protocol)?)
}

pub fn socketpair(
    reg: &Registry,
    family: i32,
    ty: i32,
    protocol: i32,
) -> Result<(HandleRef, HandleRef)> {
    reg.socketpair(socket_info(family, ty, protocol)?)
}

pub fn bind(h: &HandleRef, addr: &SocketAddress) -> Result<()> {
    socket::bind_handle(&mut h.lock(), addr)
}

pub fn listen(h: &HandleRef, backlog: i32) -> Result<()> {
    socket::listen_handle(&mut h.lock(), backlog)
}

pub fn connect(h: &HandleRef, addr: &SocketAddress) -> Result<()> {
    socket::connect_handle(&mut h.lock(), addr)
}

pub fn accept(reg: &Registry, h: &HandleRef) -> Result<HandleRef> {
    reg.accept(h).map(|(accepted, _peer)| accepted)
}

/// One `send` call.
pub fn send(h: &HandleRef, bytes: &[u8]) -> Result<usize> {
    socket::send_handle(&mut h.lock(), bytes)
}

/// One `recv` call of up to `max_len` bytes (the configured chunk when
/// `None`).
pub fn recv(h: &HandleRef, max_len: Option<usize>) -> Result<Vec<u8>> {
    socket::recv_handle(&mut h.lock(), max_len)
}

/// Poll with a READ=1/WRITE=2/ERROR=4 mask; returns the observed mask.
pub fn poll(h: &HandleRef, which: u32, timeout_sec: i64, timeout_usec: i64) -> Result<u32> {
    let which = Readiness::from_bits_truncate(which);
    socket::poll_handle(&mut h.lock(), which, timeout_sec, timeout_usec).map(Readiness::bits)
}

pub fn local_address(h: &HandleRef) -> Result<SocketAddress> {
    socket::local_address(&h.lock())
}

pub fn shutdown(h: &HandleRef, how: socket::Shutdown) -> Result<()> {
    socket::shutdown_handle(&mut h.lock(), how)
}

// ---------------------------------------------------------------------------
// Standard handles
// ---------------------------------------------------------------------------

fn std_slot(reg: &Registry, slot: StdSlot) -> Result<HandleRef> {
    reg.std_handle(slot).ok_or(HandleError::ClosedHandle)
}

pub fn stdin(reg: &Registry) -> Result<HandleRef> {
    std_slot(reg, StdSlot::Input)
}

pub fn stdout(reg: &Registry) -> Result<HandleRef> {
    std_slot(reg, StdSlot::Output)
}

pub fn stderr(reg: &Registry) -> Result<HandleRef> {
    std_slot(reg, StdSlot::Error)
}

/// Get, or swap and return the previous occupant of, a standard slot.
pub fn stdhandle(
    reg: &Registry,
    slot: i64,
    replacement: Option<HandleRef>,
) -> Result<Option<HandleRef>> {
    reg.stdhandle(slot, replacement)
}

/// Variant tag as a string, for diagnostics.
#[must_use]
pub fn kind_name(h: &HandleRef) -> &'static str {
    match h.lock().kind() {
        HandleKind::File => "file",
        HandleKind::Socket(_) => "socket",
    }
}
