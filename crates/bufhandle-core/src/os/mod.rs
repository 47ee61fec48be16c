//! OS handle adapter.
//!
//! Thin wrappers over the descriptor syscalls the buffer engine and socket
//! layer need. Each wrapper returns `Result<_, errno>`; callers classify the
//! errno with [`crate::HandleError::from_errno`].
//!
//! `EINTR` is retried here, so interrupted calls never surface. Short reads and
//! writes are returned as-is: the buffer engine decides whether to loop.
//!
//! Every syscall attempt bumps a per-thread counter ([`os_calls`]) so tests
//! can assert that a buffered operation was satisfied without the OS.

#[allow(unsafe_code)]
mod sys;

use std::cell::Cell;
use std::path::Path;

pub use sys::SockAddr;

/// Raw OS descriptor.
pub type RawHandle = i32;

/// Descriptor value of a closed or never-opened handle.
pub const INVALID_HANDLE: RawHandle = -1;

/// Standard descriptor numbers.
pub const STDIN_FILENO: RawHandle = 0;
pub const STDOUT_FILENO: RawHandle = 1;
pub const STDERR_FILENO: RawHandle = 2;

/// Fallback block size when `fstat` cannot tell us one.
pub const DEFAULT_BLKSIZE: usize = 8192;

/// `lseek` origins.
pub const SEEK_SET: i32 = libc::SEEK_SET;
pub const SEEK_CUR: i32 = libc::SEEK_CUR;
pub const SEEK_END: i32 = libc::SEEK_END;

thread_local! {
    static OS_CALLS: Cell<u64> = const { Cell::new(0) };
}

/// Number of syscalls issued through this adapter by the current thread.
pub fn os_calls() -> u64 {
    OS_CALLS.get()
}

#[inline]
fn counted<T>(mut f: impl FnMut() -> Result<T, i32>) -> Result<T, i32> {
    loop {
        OS_CALLS.set(OS_CALLS.get() + 1);
        match f() {
            Err(libc::EINTR) => continue,
            other => return other,
        }
    }
}

/// Open flags for `open(2)`, already translated from [`crate::ModeFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenRequest {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
    pub nonblocking: bool,
}

impl OpenRequest {
    fn oflags(&self) -> libc::c_int {
        let mut oflags = match (self.read, self.write) {
            (true, true) => libc::O_RDWR,
            (false, true) => libc::O_WRONLY,
            _ => libc::O_RDONLY,
        };
        if self.create {
            oflags |= libc::O_CREAT;
        }
        if self.truncate {
            oflags |= libc::O_TRUNC;
        }
        if self.append {
            oflags |= libc::O_APPEND;
        }
        if self.nonblocking {
            oflags |= libc::O_NONBLOCK;
        }
        oflags
    }
}

pub fn open(path: &Path, req: OpenRequest) -> Result<RawHandle, i32> {
    counted(|| sys::open(path, req.oflags(), 0o666))
}

/// Close a descriptor. `EINTR` from close is treated as success: the
/// descriptor is released either way on the platforms we target.
pub fn close(fd: RawHandle) -> Result<(), i32> {
    OS_CALLS.set(OS_CALLS.get() + 1);
    match sys::close(fd) {
        Err(libc::EINTR) => Ok(()),
        other => other,
    }
}

pub fn read(fd: RawHandle, buf: &mut [u8]) -> Result<usize, i32> {
    counted(|| sys::read(fd, buf))
}

pub fn write(fd: RawHandle, buf: &[u8]) -> Result<usize, i32> {
    counted(|| sys::write(fd, buf))
}

pub fn lseek(fd: RawHandle, offset: i64, whence: i32) -> Result<i64, i32> {
    counted(|| sys::lseek(fd, offset, whence))
}

pub fn dup(fd: RawHandle) -> Result<RawHandle, i32> {
    counted(|| sys::dup(fd))
}

/// Returns `(reader, writer)`.
pub fn pipe() -> Result<(RawHandle, RawHandle), i32> {
    counted(sys::pipe)
}

pub fn isatty(fd: RawHandle) -> bool {
    OS_CALLS.set(OS_CALLS.get() + 1);
    sys::isatty(fd)
}

/// Preferred I/O block size for `fd`, or [`DEFAULT_BLKSIZE`].
pub fn blksize(fd: RawHandle) -> usize {
    match counted(|| sys::blksize(fd)) {
        Ok(n) if n > 0 => n,
        _ => DEFAULT_BLKSIZE,
    }
}

pub fn set_nonblocking(fd: RawHandle, on: bool) -> Result<(), i32> {
    let flags = counted(|| sys::get_status_flags(fd))?;
    let wanted = if on {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if wanted == flags {
        return Ok(());
    }
    counted(|| sys::set_status_flags(fd, wanted))
}

pub fn socket(domain: i32, ty: i32, proto: i32) -> Result<RawHandle, i32> {
    counted(|| sys::socket(domain, ty, proto))
}

pub fn socketpair(domain: i32, ty: i32, proto: i32) -> Result<(RawHandle, RawHandle), i32> {
    counted(|| sys::socketpair(domain, ty, proto))
}

/// Connect. An interrupted connect keeps going in the background, so `EINTR`
/// is reported as in-progress rather than retried.
pub fn connect(fd: RawHandle, addr: &SockAddr) -> Result<(), i32> {
    OS_CALLS.set(OS_CALLS.get() + 1);
    match sys::connect(fd, addr) {
        Err(libc::EINTR) => Err(libc::EINPROGRESS),
        other => other,
    }
}

pub fn bind(fd: RawHandle, addr: &SockAddr) -> Result<(), i32> {
    counted(|| sys::bind(fd, addr))
}

pub fn listen(fd: RawHandle, backlog: i32) -> Result<(), i32> {
    counted(|| sys::listen(fd, backlog))
}

pub fn accept(fd: RawHandle) -> Result<(RawHandle, SockAddr), i32> {
    counted(|| sys::accept(fd))
}

pub fn getsockname(fd: RawHandle) -> Result<SockAddr, i32> {
    counted(|| sys::getsockname(fd))
}

pub fn send(fd: RawHandle, buf: &[u8]) -> Result<usize, i32> {
    counted(|| sys::send(fd, buf))
}

pub fn recv(fd: RawHandle, buf: &mut [u8]) -> Result<usize, i32> {
    counted(|| sys::recv(fd, buf))
}

pub fn shutdown(fd: RawHandle, how: i32) -> Result<(), i32> {
    counted(|| sys::shutdown(fd, how))
}

/// Poll a single descriptor. Returns the observed `revents` (0 on timeout).
pub fn poll(fd: RawHandle, events: i16, timeout_ms: i32) -> Result<i16, i32> {
    counted(|| sys::poll(fd, events, timeout_ms))
}
