//! The handle record shared by files, pipes, ttys and sockets.
//!
//! A [`Handle`] is only ever mutated through its [`HandleRef`] lock, so one
//! record never sees two operations at once. Closing releases the descriptor
//! and buffer memory, but the record itself lives until the last reference
//! goes away.

use std::fmt;
use std::path::PathBuf;
use std::process::Child;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::buffer::{BufferMode, HandleBuffer};
use crate::config::IoConfig;
use crate::encoding::{EncodingRef, Latin1, Utf8};
use crate::engine;
use crate::error::{HandleError, Result};
use crate::mode::ModeFlags;
use crate::os::{self, INVALID_HANDLE, RawHandle, STDERR_FILENO};
use crate::process;
use crate::socket::SocketInfo;

/// Registry-unique handle identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// File-like or socket-like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleKind {
    /// Regular file, pipe, or terminal.
    File,
    Socket(SocketInfo),
}

impl HandleKind {
    #[must_use]
    pub fn is_socket(&self) -> bool {
        matches!(self, HandleKind::Socket(_))
    }
}

#[derive(Debug)]
pub struct Handle {
    pub(crate) id: HandleId,
    pub(crate) fd: RawHandle,
    pub(crate) flags: ModeFlags,
    pub(crate) buffer_mode: BufferMode,
    pub(crate) buffer: Option<HandleBuffer>,
    /// Logical stream offset seen by callers.
    pub(crate) position: i64,
    pub(crate) kind: HandleKind,
    pub(crate) closed: bool,
    pub(crate) eof: bool,
    pub(crate) seekable: bool,
    pub(crate) encoding: EncodingRef,
    pub(crate) path: Option<PathBuf>,
    pub(crate) config: IoConfig,
    /// False for the standard descriptors, which are flushed but never
    /// closed on our behalf.
    pub(crate) owns_descriptor: bool,
    /// Command-pipe child, until it is reaped.
    pub(crate) child: Option<Child>,
    pub(crate) child_pid: Option<u32>,
    pub(crate) exit_status: Option<i32>,
}

impl Handle {
    /// Wrap an already-open descriptor as a file-like handle.
    ///
    /// Probes seekability with one `lseek(fd, 0, SEEK_CUR)`; the result also
    /// seeds the logical position, so descriptors inherited mid-file report
    /// the right offset.
    pub(crate) fn file(id: HandleId, fd: RawHandle, flags: ModeFlags, config: IoConfig) -> Self {
        let (seekable, position) = match os::lseek(fd, 0, os::SEEK_CUR) {
            Ok(pos) => (true, pos),
            Err(_) => (false, 0),
        };
        let encoding: EncodingRef = if flags.contains(ModeFlags::BINARY) {
            Arc::new(Latin1)
        } else {
            Arc::new(Utf8)
        };
        Self {
            id,
            fd,
            flags,
            buffer_mode: BufferMode::Block,
            buffer: Some(HandleBuffer::with_capacity(config.block_size)),
            position,
            kind: HandleKind::File,
            closed: false,
            eof: false,
            seekable,
            encoding,
            path: None,
            config,
            owns_descriptor: fd > STDERR_FILENO,
            child: None,
            child_pid: None,
            exit_status: None,
        }
    }

    /// Wrap a socket descriptor. Sockets start unbuffered and never seek.
    pub(crate) fn socket(id: HandleId, fd: RawHandle, info: SocketInfo, config: IoConfig) -> Self {
        Self {
            id,
            fd,
            flags: ModeFlags::READ | ModeFlags::WRITE | ModeFlags::BINARY,
            buffer_mode: BufferMode::Unbuffered,
            buffer: None,
            position: 0,
            kind: HandleKind::Socket(info),
            closed: false,
            eof: false,
            seekable: false,
            encoding: Arc::new(Latin1),
            path: None,
            config,
            owns_descriptor: true,
            child: None,
            child_pid: None,
            exit_status: None,
        }
    }

    pub(crate) fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub(crate) fn with_child(mut self, child: Child) -> Self {
        self.child_pid = Some(child.id());
        self.child = Some(child);
        self
    }

    /// Process id of a command pipe's child.
    #[must_use]
    pub fn child_pid(&self) -> Option<u32> {
        self.child_pid
    }

    /// Exit status of a reaped command-pipe child: the exit code, or the
    /// negated signal number.
    #[must_use]
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> &HandleKind {
        &self.kind
    }

    #[must_use]
    pub fn flags(&self) -> ModeFlags {
        self.flags
    }

    #[must_use]
    pub fn buffer_mode(&self) -> BufferMode {
        self.buffer_mode
    }

    /// Current buffer capacity, 0 when there is no buffer.
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, HandleBuffer::capacity)
    }

    /// Unread read-ahead held in memory.
    #[must_use]
    pub fn buffered_unread(&self) -> usize {
        self.buffer.as_ref().map_or(0, HandleBuffer::readable)
    }

    /// Dirty bytes not yet handed to the OS.
    #[must_use]
    pub fn buffered_dirty(&self) -> usize {
        self.buffer
            .as_ref()
            .map_or(0, |b| b.pending_write_data().len())
    }

    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn encoding(&self) -> &EncodingRef {
        &self.encoding
    }

    pub fn set_encoding(&mut self, encoding: EncodingRef) {
        self.encoding = encoding;
    }

    #[must_use]
    pub fn config(&self) -> &IoConfig {
        &self.config
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(HandleError::ClosedHandle)
        } else {
            Ok(())
        }
    }

    pub(crate) fn ensure_readable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.flags.is_readable() {
            Ok(())
        } else {
            Err(HandleError::invalid(format!("{} is not open for reading", self.id)))
        }
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.flags.is_writable() {
            Ok(())
        } else {
            Err(HandleError::invalid(format!("{} is not open for writing", self.id)))
        }
    }

    /// Raw descriptor, or [`INVALID_HANDLE`] once closed.
    #[must_use]
    pub fn getfd(&self) -> RawHandle {
        self.fd
    }

    /// End of stream was observed and nothing is left in the buffer.
    #[must_use]
    pub fn eof(&self) -> bool {
        self.eof && self.buffered_unread() == 0
    }

    pub fn is_tty(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(os::isatty(self.fd))
    }

    /// Preferred I/O block size of the descriptor.
    pub fn get_blksize(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(os::blksize(self.fd))
    }

    pub fn set_nonblocking(&mut self, on: bool) -> Result<()> {
        self.ensure_open()?;
        os::set_nonblocking(self.fd, on).map_err(|e| HandleError::from_errno("fcntl", e))?;
        self.flags.set(ModeFlags::NONBLOCKING, on);
        Ok(())
    }

    /// Flush, release the descriptor and buffer, then wait for a command
    /// pipe's child. Idempotent.
    ///
    /// The handle ends up closed even when the flush fails; errors are
    /// returned in the order flush, close, wait.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let flushed = engine::flush_buffer(self);
        let released = self.release();
        let reaped = self.reap();
        flushed.and(released).and(reaped)
    }

    /// Wait for the command-pipe child, if any, and record its status.
    pub(crate) fn reap(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        self.exit_status = Some(process::wait_child(&mut child)?);
        Ok(())
    }

    /// Mark closed and close the descriptor without flushing.
    pub(crate) fn release(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buffer = None;
        let fd = std::mem::replace(&mut self.fd, INVALID_HANDLE);
        if self.owns_descriptor && fd != INVALID_HANDLE {
            os::close(fd).map_err(|e| HandleError::from_errno("close", e))?;
        }
        Ok(())
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

/// Shared, lockable reference to a [`Handle`].
#[derive(Clone)]
pub struct HandleRef {
    id: HandleId,
    inner: Arc<Mutex<Handle>>,
}

impl fmt::Debug for HandleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandleRef").field(&self.id).finish()
    }
}

impl HandleRef {
    pub(crate) fn new(handle: Handle) -> Self {
        Self {
            id: handle.id,
            inner: Arc::new(Mutex::new(handle)),
        }
    }

    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn lock(&self) -> MutexGuard<'_, Handle> {
        self.inner.lock()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &HandleRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakHandle {
        WeakHandle {
            id: self.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning reference held by the registry's live set.
#[derive(Clone, Debug)]
pub struct WeakHandle {
    id: HandleId,
    inner: Weak<Mutex<Handle>>,
}

impl WeakHandle {
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<HandleRef> {
        self.inner.upgrade().map(|inner| HandleRef { id: self.id, inner })
    }

    #[must_use]
    pub fn is_reclaimed(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_pair() -> (Handle, Handle) {
        let (r, w) = os::pipe().unwrap();
        let cfg = IoConfig::default();
        (
            Handle::file(HandleId(1), r, ModeFlags::READ, cfg),
            Handle::file(HandleId(2), w, ModeFlags::WRITE, cfg),
        )
    }

    #[test]
    fn pipes_are_not_seekable() {
        let (r, w) = pipe_pair();
        assert!(!r.is_seekable());
        assert!(!w.is_seekable());
        assert_eq!(r.buffer_mode(), BufferMode::Block);
        assert_eq!(r.buffer_capacity(), IoConfig::default().block_size);
    }

    #[test]
    fn close_is_idempotent_and_invalidates_fd() {
        let (mut r, _w) = pipe_pair();
        r.close().unwrap();
        assert!(r.is_closed());
        assert_eq!(r.getfd(), INVALID_HANDLE);
        assert_eq!(r.buffer_capacity(), 0);
        r.close().unwrap();
        assert!(matches!(r.is_tty(), Err(HandleError::ClosedHandle)));
    }

    #[test]
    fn direction_checks() {
        let (r, w) = pipe_pair();
        assert!(r.ensure_readable().is_ok());
        assert!(matches!(
            r.ensure_writable(),
            Err(HandleError::InvalidArgument(_))
        ));
        assert!(w.ensure_writable().is_ok());
    }

    #[test]
    fn nonblocking_flag_tracks_descriptor() {
        let (mut r, _w) = pipe_pair();
        r.set_nonblocking(true).unwrap();
        assert!(r.flags().is_nonblocking());
        r.set_nonblocking(false).unwrap();
        assert!(!r.flags().is_nonblocking());
    }

    #[test]
    fn weak_reference_follows_reachability() {
        let (r, _w) = pipe_pair();
        let strong = HandleRef::new(r);
        let weak = strong.downgrade();
        assert!(weak.upgrade().is_some_and(|h| h.ptr_eq(&strong)));
        drop(strong);
        assert!(weak.is_reclaimed());
        assert!(weak.upgrade().is_none());
    }
}
