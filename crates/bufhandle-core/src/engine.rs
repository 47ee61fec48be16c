//! Buffer engine: fill, read, peek, line scan, flush, write, seek.
//!
//! Every function takes the locked [`Handle`] and keeps three things in step:
//! the buffer cursors, the logical position, and the OS offset. The OS offset
//! is always `position + unread` while reading and `position - dirty` while
//! writing; the OS is called only when the buffer cannot answer.

use crate::buffer::{BufferMode, Direction, HandleBuffer, LINE_GROWTH_FACTOR};
use crate::encoding::{TextEncoding, find_terminator};
use crate::error::{HandleError, Result};
use crate::handle::Handle;
use crate::mode::ModeFlags;
use crate::os;

/// Seek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

impl Whence {
    pub fn from_raw(raw: i32) -> Result<Whence> {
        match raw {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Current),
            2 => Ok(Whence::End),
            other => Err(HandleError::invalid(format!("bad whence {other}"))),
        }
    }
}

/// Make sure a read-ahead region exists. Unbuffered handles get one of the
/// line-buffer size on first need.
fn read_region(h: &mut Handle) -> &mut HandleBuffer {
    let size = h.config.line_buffer_size;
    h.buffer
        .get_or_insert_with(|| HandleBuffer::with_capacity(size))
}

fn flush_if_writing(h: &mut Handle) -> Result<()> {
    if h
        .buffer
        .as_ref()
        .is_some_and(|b| b.direction() == Direction::Writing)
    {
        flush_buffer(h)?;
    }
    Ok(())
}

/// Refill the buffer with at most one OS read.
///
/// Returns the number of bytes added; 0 means end of stream (and sets `eof`)
/// unless the buffer was already full of unread bytes, in which case no OS
/// call is made.
pub fn fill_readbuf(h: &mut Handle) -> Result<usize> {
    h.ensure_readable()?;
    flush_if_writing(h)?;

    let fd = h.fd;
    let buf = read_region(h);
    let tail = buf.prepare_fill();
    if tail.is_empty() {
        return Ok(0);
    }
    let n = os::read(fd, tail).map_err(|e| HandleError::from_errno("read", e))?;
    buf.commit_fill(n);
    if n == 0 {
        h.eof = true;
    }
    Ok(n)
}

/// Read up to `out.len()` bytes. Short only at end of stream, or when a
/// non-blocking handle would block after some bytes arrived.
pub fn read_buffer(h: &mut Handle, out: &mut [u8]) -> Result<usize> {
    h.ensure_readable()?;
    if out.is_empty() {
        return Ok(0);
    }
    flush_if_writing(h)?;

    let mut got = h.buffer.as_mut().map_or(0, |b| b.take(out));
    h.position += got as i64;

    while got < out.len() {
        let remaining = out.len() - got;
        let direct = h.buffer_mode == BufferMode::Unbuffered
            || h.buffer.as_ref().is_none_or(|b| remaining >= b.capacity());

        let step = if direct {
            // Bytes that bypass the buffer leave its seek window stale.
            if let Some(buf) = h.buffer.as_mut() {
                buf.reset();
            }
            os::read(h.fd, &mut out[got..]).map_err(|e| HandleError::from_errno("read", e))
        } else {
            fill_readbuf(h)
        };

        match step {
            Ok(0) => {
                h.eof = true;
                break;
            }
            Ok(n) => {
                let taken = if direct {
                    n
                } else {
                    h.buffer.as_mut().map_or(0, |b| b.take(&mut out[got..]))
                };
                got += taken;
                h.position += taken as i64;
            }
            Err(e) if e.is_would_block() && got > 0 => break,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

/// Next byte without consuming it; `None` at end of stream.
pub fn peek_buffer(h: &mut Handle) -> Result<Option<u8>> {
    h.ensure_readable()?;
    if h.buffered_unread() == 0 && fill_readbuf(h)? == 0 {
        return Ok(None);
    }
    Ok(h.buffer.as_ref().and_then(|b| b.unread().first().copied()))
}

/// Read one raw line, terminator included. Empty at end of stream.
///
/// A line that outgrows the buffer doubles it (at least to the line-buffer
/// size) up to `max_line_length`; a longer line is `InvalidArgument` and
/// its bytes stay buffered.
pub fn readline_bytes(h: &mut Handle, encoding: &dyn TextEncoding) -> Result<Vec<u8>> {
    h.ensure_readable()?;
    flush_if_writing(h)?;

    let term = encoding.terminator();
    let unit = encoding.unit_width().max(1);
    let floor = h.config.line_buffer_size;
    let ceiling = h.config.max_line_length;
    // Offset, relative to the cursor, below which no terminator can start.
    let mut scanned = 0usize;

    loop {
        let buf = read_region(h);
        let unread_len = buf.readable();
        let found = find_terminator(&buf.unread()[scanned.min(unread_len)..], term, unit);
        if let Some(at) = found {
            let len = scanned + at + term.len();
            let line = buf.consume(len).to_vec();
            h.position += len as i64;
            return Ok(line);
        }

        let tail_start = unread_len.saturating_sub(term.len().saturating_sub(1));
        scanned = scanned.max(tail_start - tail_start % unit);

        let cap = buf.capacity();
        if unread_len >= cap {
            if cap >= ceiling {
                return Err(HandleError::invalid(format!(
                    "line exceeds {ceiling} bytes without a terminator"
                )));
            }
            buf.grow(cap.saturating_mul(LINE_GROWTH_FACTOR).max(floor).min(ceiling));
        }

        if fill_readbuf(h)? == 0 {
            let buf = read_region(h);
            let n = buf.readable();
            let line = buf.consume(n).to_vec();
            h.position += n as i64;
            return Ok(line);
        }
    }
}

/// Read and decode one line with `encoding`.
pub fn readline_buffer(h: &mut Handle, encoding: &dyn TextEncoding) -> Result<String> {
    let bytes = readline_bytes(h, encoding)?;
    encoding.decode(&bytes)
}

/// Push dirty bytes to the OS. A no-op for clean or reading buffers.
///
/// Partial writes are retried. On `WouldBlock` the unwritten tail stays
/// buffered and the error is returned.
pub fn flush_buffer(h: &mut Handle) -> Result<()> {
    h.ensure_open()?;
    let fd = h.fd;
    let Some(buf) = h.buffer.as_mut() else {
        return Ok(());
    };
    if buf.direction() != Direction::Writing {
        return Ok(());
    }
    while !buf.pending_write_data().is_empty() {
        match os::write(fd, buf.pending_write_data()) {
            Ok(0) => return Err(HandleError::from_errno("write", libc::EIO)),
            Ok(n) => buf.mark_written(n),
            Err(e) => return Err(HandleError::from_errno("write", e)),
        }
    }
    buf.reset();
    resync_append(h);
    Ok(())
}

/// Appends land at end of file regardless of our offset, so pick up the
/// real one afterwards.
fn resync_append(h: &mut Handle) {
    if h.seekable
        && h.flags.contains(ModeFlags::APPEND)
        && let Ok(pos) = os::lseek(h.fd, 0, os::SEEK_CUR)
    {
        h.position = pos;
    }
}

/// Write straight to the OS, looping over short writes. Returns the count
/// written; a `WouldBlock` after partial progress returns the partial count.
fn write_direct(h: &mut Handle, bytes: &[u8]) -> Result<usize> {
    let mut done = 0;
    while done < bytes.len() {
        match os::write(h.fd, &bytes[done..]) {
            Ok(0) => return Err(HandleError::from_errno("write", libc::EIO)),
            Ok(n) => done += n,
            Err(e) => {
                let err = HandleError::from_errno("write", e);
                if err.is_would_block() && done > 0 {
                    break;
                }
                return Err(err);
            }
        }
    }
    h.position += done as i64;
    resync_append(h);
    Ok(done)
}

/// Buffered write. Returns the number of bytes accepted.
pub fn write_buffer(h: &mut Handle, bytes: &[u8]) -> Result<usize> {
    h.ensure_writable()?;
    if bytes.is_empty() {
        return Ok(0);
    }

    let unread = h.buffered_unread();
    if h
        .buffer
        .as_ref()
        .is_some_and(|b| b.direction() == Direction::Reading)
    {
        if unread > 0 {
            if !h.seekable {
                return write_direct(h, bytes);
            }
            os::lseek(h.fd, h.position, os::SEEK_SET)
                .map_err(|e| HandleError::from_errno("lseek", e))?;
        }
        if let Some(buf) = h.buffer.as_mut() {
            buf.reset();
        }
    }

    let capacity = h.buffer.as_ref().map_or(0, HandleBuffer::capacity);
    if capacity == 0 || h.buffer_mode == BufferMode::Unbuffered {
        return write_direct(h, bytes);
    }

    if bytes.len() >= capacity {
        flush_buffer(h)?;
        return write_direct(h, bytes);
    }

    if h.buffer.as_ref().is_some_and(|b| b.writable() < bytes.len()) {
        flush_buffer(h)?;
    }
    let full = match h.buffer.as_mut() {
        Some(buf) => {
            buf.append(bytes);
            buf.writable() == 0
        }
        None => return write_direct(h, bytes),
    };
    h.position += bytes.len() as i64;

    let newline = h.buffer_mode == BufferMode::Line && {
        let enc = &h.encoding;
        find_terminator(bytes, enc.terminator(), enc.unit_width()).is_some()
    };
    if full || newline {
        // The bytes are ours now; a would-block leaves them queued.
        match flush_buffer(h) {
            Err(e) if !e.is_would_block() => return Err(e),
            _ => {}
        }
    }
    Ok(bytes.len())
}

/// Move the logical position. Returns the new position.
pub fn seek_buffer(h: &mut Handle, offset: i64, whence: Whence) -> Result<i64> {
    h.ensure_open()?;
    if !h.seekable {
        return Err(HandleError::invalid(format!("{} is not seekable", h.id)));
    }

    let target = match whence {
        Whence::Set => Some(offset),
        Whence::Current => Some(
            h.position
                .checked_add(offset)
                .ok_or_else(|| HandleError::invalid("seek offset overflows"))?,
        ),
        Whence::End => None,
    };

    if let Some(target) = target {
        if target < 0 {
            return Err(HandleError::invalid(format!("negative seek target {target}")));
        }
        if target == h.position {
            h.eof = false;
            return Ok(target);
        }
        if let Some(buf) = h.buffer.as_mut()
            && buf.direction() == Direction::Reading
        {
            let (behind, ahead) = buf.read_window();
            let lo = h.position - behind as i64;
            let hi = h.position + ahead as i64;
            if (lo..=hi).contains(&target) {
                buf.set_read_cursor((target - lo) as usize);
                h.position = target;
                h.eof = false;
                return Ok(target);
            }
        }
    }

    flush_buffer(h)?;
    if let Some(buf) = h.buffer.as_mut() {
        buf.reset();
    }
    let (raw_offset, raw_whence) = match target {
        Some(t) => (t, os::SEEK_SET),
        None => (offset, os::SEEK_END),
    };
    let pos = os::lseek(h.fd, raw_offset, raw_whence).map_err(|e| match e {
        libc::EINVAL => HandleError::invalid(format!("seek to {raw_offset} rejected")),
        e => HandleError::from_errno("lseek", e),
    })?;
    h.position = pos;
    h.eof = false;
    Ok(pos)
}

/// Logical position. Never calls the OS.
pub fn tell(h: &Handle) -> Result<i64> {
    h.ensure_open()?;
    Ok(h.position)
}

/// Resize the buffer. `0` selects unbuffered; a line-buffered handle stays
/// line-buffered, anything else becomes block-buffered.
pub fn setbuf(h: &mut Handle, size: usize) -> Result<()> {
    h.ensure_open()?;
    if size > h.config.max_buffer_size {
        return Err(HandleError::invalid(format!(
            "buffer size {size} exceeds {}",
            h.config.max_buffer_size
        )));
    }
    flush_buffer(h)?;

    if size == 0 {
        h.buffer_mode = BufferMode::Unbuffered;
        if h.buffered_unread() == 0 {
            h.buffer = None;
        } else if let Some(buf) = h.buffer.as_mut() {
            buf.reallocate(0);
        }
        return Ok(());
    }

    if h.buffer_mode != BufferMode::Line {
        h.buffer_mode = BufferMode::Block;
    }
    match h.buffer.as_mut() {
        Some(buf) => buf.reallocate(size),
        None => h.buffer = Some(HandleBuffer::with_capacity(size)),
    }
    Ok(())
}

/// Switch to line buffering, keeping the current capacity when there is one.
pub fn setlinebuf(h: &mut Handle) -> Result<()> {
    h.ensure_open()?;
    flush_buffer(h)?;
    h.buffer_mode = BufferMode::Line;
    let size = h.config.line_buffer_size;
    match h.buffer.as_mut() {
        Some(buf) if buf.capacity() < size => buf.reallocate(size),
        Some(_) => {}
        None => h.buffer = Some(HandleBuffer::with_capacity(size)),
    }
    Ok(())
}

/// Block buffering at the descriptor's preferred block size.
pub fn setbuf_default(h: &mut Handle) -> Result<()> {
    h.ensure_open()?;
    let size = os::blksize(h.fd).min(h.config.max_buffer_size);
    h.buffer_mode = BufferMode::Block;
    setbuf(h, size)
}

/// Apply a buffering-mode selector (0 none, 1 line, 2 block).
pub fn set_buffer_mode(h: &mut Handle, selector: i32) -> Result<()> {
    match BufferMode::from_selector(selector)? {
        BufferMode::Unbuffered => setbuf(h, 0),
        BufferMode::Line => setlinebuf(h),
        BufferMode::Block => {
            let size = h.config.block_size;
            h.buffer_mode = BufferMode::Block;
            setbuf(h, size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoConfig;
    use crate::encoding::{Utf16Le, Utf8};
    use crate::handle::HandleId;
    use crate::mode::parse_mode;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static SEQ: AtomicU64 = AtomicU64::new(0);

    fn temp_path(tag: &str) -> PathBuf {
        let n = SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("bufhandle-engine-{tag}-{}-{n}", std::process::id()))
    }

    fn open(path: &std::path::Path, mode: &str, cfg: IoConfig) -> Handle {
        let flags = parse_mode(mode).unwrap();
        let fd = os::open(path, flags.open_request()).unwrap();
        Handle::file(HandleId(0), fd, flags, cfg)
    }

    fn pipe_pair(cfg: IoConfig) -> (Handle, Handle) {
        let (r, w) = os::pipe().unwrap();
        (
            Handle::file(HandleId(1), r, ModeFlags::READ, cfg),
            Handle::file(HandleId(2), w, ModeFlags::WRITE, cfg),
        )
    }

    fn small(block: usize) -> IoConfig {
        IoConfig {
            block_size: block,
            ..IoConfig::default()
        }
    }

    #[test]
    fn fill_then_read_from_buffer() {
        let (mut r, mut w) = pipe_pair(small(16));
        write_direct(&mut w, b"abcdef").unwrap();
        assert_eq!(fill_readbuf(&mut r).unwrap(), 6);
        let before = os::os_calls();
        let mut out = [0u8; 4];
        assert_eq!(read_buffer(&mut r, &mut out).unwrap(), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(os::os_calls(), before);
        assert_eq!(r.position, 4);
        assert_eq!(r.buffered_unread(), 2);
    }

    #[test]
    fn read_reports_eof_as_zero() {
        let (mut r, w) = pipe_pair(small(16));
        drop(w);
        let mut out = [0u8; 8];
        assert_eq!(read_buffer(&mut r, &mut out).unwrap(), 0);
        assert!(r.eof());
        assert_eq!(peek_buffer(&mut r).unwrap(), None);
    }

    #[test]
    fn zero_length_ops_skip_the_os() {
        let (mut r, mut w) = pipe_pair(small(16));
        let before = os::os_calls();
        assert_eq!(read_buffer(&mut r, &mut []).unwrap(), 0);
        assert_eq!(write_buffer(&mut w, b"").unwrap(), 0);
        assert_eq!(os::os_calls(), before);
    }

    #[test]
    fn peek_does_not_consume() {
        let (mut r, mut w) = pipe_pair(small(16));
        write_direct(&mut w, b"xy").unwrap();
        assert_eq!(peek_buffer(&mut r).unwrap(), Some(b'x'));
        assert_eq!(peek_buffer(&mut r).unwrap(), Some(b'x'));
        let mut out = [0u8; 2];
        read_buffer(&mut r, &mut out).unwrap();
        assert_eq!(&out, b"xy");
    }

    #[test]
    fn peek_on_unbuffered_allocates_read_ahead() {
        let (mut r, mut w) = pipe_pair(small(16));
        setbuf(&mut r, 0).unwrap();
        assert_eq!(r.buffer_capacity(), 0);
        write_direct(&mut w, b"q").unwrap();
        assert_eq!(peek_buffer(&mut r).unwrap(), Some(b'q'));
        assert_eq!(r.buffer_capacity(), IoConfig::default().line_buffer_size);
        assert_eq!(r.buffer_mode(), BufferMode::Unbuffered);
    }

    #[test]
    fn readline_grows_past_small_buffer() {
        let (mut r, mut w) = pipe_pair(small(4));
        write_direct(&mut w, b"a longer line\nshort\ntail").unwrap();
        drop(w);
        assert_eq!(readline_buffer(&mut r, &Utf8).unwrap(), "a longer line\n");
        assert!(r.buffer_capacity() >= IoConfig::default().line_buffer_size);
        assert_eq!(readline_buffer(&mut r, &Utf8).unwrap(), "short\n");
        assert_eq!(readline_buffer(&mut r, &Utf8).unwrap(), "tail");
        assert_eq!(readline_buffer(&mut r, &Utf8).unwrap(), "");
        assert_eq!(r.position, 24);
    }

    #[test]
    fn readline_over_ceiling_keeps_bytes() {
        let cfg = IoConfig {
            block_size: 4,
            line_buffer_size: 8,
            max_line_length: 16,
            ..IoConfig::default()
        };
        let (mut r, mut w) = pipe_pair(cfg);
        write_direct(&mut w, &[b'z'; 40]).unwrap();
        let err = readline_bytes(&mut r, &Utf8).unwrap_err();
        assert!(matches!(err, HandleError::InvalidArgument(_)));
        assert_eq!(r.buffered_unread(), 16);
        assert_eq!(r.position, 0);
    }

    #[test]
    fn readline_utf16_matches_aligned_terminator() {
        let (mut r, mut w) = pipe_pair(small(8));
        let bytes = Utf16Le.encode("\u{0a0a}x\nnext\n").unwrap();
        write_direct(&mut w, &bytes).unwrap();
        drop(w);
        assert_eq!(readline_buffer(&mut r, &Utf16Le).unwrap(), "\u{0a0a}x\n");
        assert_eq!(readline_buffer(&mut r, &Utf16Le).unwrap(), "next\n");
        assert_eq!(readline_buffer(&mut r, &Utf16Le).unwrap(), "");
    }

    #[test]
    fn block_writes_wait_for_flush() {
        let (mut r, mut w) = pipe_pair(small(64));
        r.set_nonblocking(true).unwrap();
        write_buffer(&mut w, b"held").unwrap();
        assert_eq!(w.buffered_dirty(), 4);
        let mut out = [0u8; 4];
        assert!(read_buffer(&mut r, &mut out).unwrap_err().is_would_block());
        flush_buffer(&mut w).unwrap();
        assert_eq!(read_buffer(&mut r, &mut out).unwrap(), 4);
        assert_eq!(&out, b"held");
    }

    #[test]
    fn line_mode_flushes_on_newline() {
        let (mut r, mut w) = pipe_pair(small(64));
        setlinebuf(&mut w).unwrap();
        write_buffer(&mut w, b"no newline").unwrap();
        assert_eq!(w.buffered_dirty(), 10);
        write_buffer(&mut w, b"!\n").unwrap();
        assert_eq!(w.buffered_dirty(), 0);
        let mut out = [0u8; 12];
        assert_eq!(read_buffer(&mut r, &mut out).unwrap(), 12);
    }

    #[test]
    fn large_write_bypasses_buffer() {
        let (mut r, mut w) = pipe_pair(small(4));
        write_buffer(&mut w, b"ab").unwrap();
        write_buffer(&mut w, b"cdefgh").unwrap();
        assert_eq!(w.buffered_dirty(), 0);
        let mut out = [0u8; 8];
        assert_eq!(read_buffer(&mut r, &mut out).unwrap(), 8);
        assert_eq!(&out, b"abcdefgh");
    }

    #[test]
    fn seek_is_rejected_on_pipes() {
        let (mut r, _w) = pipe_pair(small(4));
        let err = seek_buffer(&mut r, 0, Whence::Set).unwrap_err();
        assert!(matches!(err, HandleError::InvalidArgument(_)));
    }

    #[test]
    fn seek_within_read_window_moves_cursor_only() {
        let path = temp_path("window");
        std::fs::write(&path, b"0123456789").unwrap();
        let mut h = open(&path, "<", small(16));
        let mut out = [0u8; 6];
        read_buffer(&mut h, &mut out).unwrap();
        let before = os::os_calls();
        assert_eq!(seek_buffer(&mut h, 2, Whence::Set).unwrap(), 2);
        assert_eq!(seek_buffer(&mut h, 3, Whence::Current).unwrap(), 5);
        assert_eq!(os::os_calls(), before);
        let mut out = [0u8; 5];
        assert_eq!(read_buffer(&mut h, &mut out).unwrap(), 5);
        assert_eq!(&out, b"56789");
        drop(h);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn direct_read_invalidates_seek_window() {
        let path = temp_path("bypass");
        std::fs::write(&path, b"0123456789ABCDEFGHIJ").unwrap();
        let mut h = open(&path, "<", small(4));
        let mut out = [0u8; 2];
        read_buffer(&mut h, &mut out).unwrap();
        assert_eq!(&out, b"01");

        let mut out = [0u8; 10];
        assert_eq!(read_buffer(&mut h, &mut out).unwrap(), 10);
        assert_eq!(&out, b"23456789AB");
        assert_eq!(h.buffered_unread(), 0);

        assert_eq!(seek_buffer(&mut h, 9, Whence::Set).unwrap(), 9);
        let mut out = [0u8; 1];
        read_buffer(&mut h, &mut out).unwrap();
        assert_eq!(&out, b"9");
        drop(h);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn seek_outside_window_and_from_end() {
        let path = temp_path("end");
        std::fs::write(&path, b"0123456789").unwrap();
        let mut h = open(&path, "<", small(4));
        assert_eq!(seek_buffer(&mut h, -3, Whence::End).unwrap(), 7);
        let mut out = [0u8; 3];
        read_buffer(&mut h, &mut out).unwrap();
        assert_eq!(&out, b"789");
        assert!(matches!(
            seek_buffer(&mut h, -1, Whence::Set),
            Err(HandleError::InvalidArgument(_))
        ));
        assert!(matches!(
            seek_buffer(&mut h, -20, Whence::End),
            Err(HandleError::InvalidArgument(_))
        ));
        drop(h);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn seek_clears_eof() {
        let path = temp_path("eof");
        std::fs::write(&path, b"ab").unwrap();
        let mut h = open(&path, "<", small(4));
        let mut out = [0u8; 4];
        assert_eq!(read_buffer(&mut h, &mut out).unwrap(), 2);
        assert!(h.eof());
        seek_buffer(&mut h, 0, Whence::Set).unwrap();
        assert!(!h.eof());
        drop(h);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn write_after_read_lands_at_logical_position() {
        let path = temp_path("rw");
        std::fs::write(&path, b"0123456789").unwrap();
        let mut h = open(&path, "+<", small(16));
        let mut out = [0u8; 3];
        read_buffer(&mut h, &mut out).unwrap();
        write_buffer(&mut h, b"XY").unwrap();
        assert_eq!(tell(&h).unwrap(), 5);
        h.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"012XY56789");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn setbuf_carries_read_ahead() {
        let (mut r, mut w) = pipe_pair(small(16));
        write_direct(&mut w, b"abcdefgh").unwrap();
        fill_readbuf(&mut r).unwrap();
        let mut out = [0u8; 2];
        read_buffer(&mut r, &mut out).unwrap();
        setbuf(&mut r, 2).unwrap();
        assert_eq!(r.buffered_unread(), 6);
        setbuf(&mut r, 0).unwrap();
        assert_eq!(r.buffer_mode(), BufferMode::Unbuffered);
        let mut rest = [0u8; 6];
        assert_eq!(read_buffer(&mut r, &mut rest).unwrap(), 6);
        assert_eq!(&rest, b"cdefgh");
    }

    #[test]
    fn setbuf_rejects_oversize() {
        let (mut r, _w) = pipe_pair(small(16));
        let too_big = r.config.max_buffer_size + 1;
        assert!(matches!(
            setbuf(&mut r, too_big),
            Err(HandleError::InvalidArgument(_))
        ));
        assert!(set_buffer_mode(&mut r, 7).is_err());
        set_buffer_mode(&mut r, 1).unwrap();
        assert_eq!(r.buffer_mode(), BufferMode::Line);
    }

    #[test]
    fn closed_handle_rejects_everything() {
        let (mut r, _w) = pipe_pair(small(16));
        r.close().unwrap();
        let mut out = [0u8; 1];
        assert!(matches!(
            read_buffer(&mut r, &mut out),
            Err(HandleError::ClosedHandle)
        ));
        assert!(matches!(tell(&r), Err(HandleError::ClosedHandle)));
        assert!(matches!(flush_buffer(&mut r), Err(HandleError::ClosedHandle)));
    }
}
