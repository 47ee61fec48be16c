//! Handle buffer storage.
//!
//! Three modes: block-buffered, line-buffered, and unbuffered. The buffer is
//! one owned region with a cursor pair and a direction tag:
//!
//! ```text
//!   Reading:  [0 .. next)  consumed   [next .. end)  unread read-ahead
//!   Writing:  [0 .. next)  dirty      end == next
//!   Idle:     next == end == 0
//! ```
//!
//! Invariants:
//! - `next <= end <= data.len()`
//! - `data.len() > 0` whenever the owning handle is not unbuffered
//!
//! The algorithms that move bytes between this region and the OS live in
//! [`crate::engine`]; this module only keeps the cursors honest.

use crate::error::{HandleError, Result};

/// Default block buffer size.
pub const BLOCK_SIZE: usize = 8192;
/// Default line buffer size, also the floor for readline growth.
pub const LINE_BUFFER_SIZE: usize = 256;
/// Growth factor applied when a single line outgrows the buffer.
pub const LINE_GROWTH_FACTOR: usize = 2;

/// Buffering mode selector values.
pub const BUFFER_NONE: i32 = 0;
pub const BUFFER_LINE: i32 = 1;
pub const BUFFER_BLOCK: i32 = 2;

/// Buffering mode of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferMode {
    /// Every read and write goes to the OS.
    Unbuffered,
    /// Flush when the buffer fills or a newline is written.
    Line,
    /// Flush when the buffer fills.
    Block,
}

impl BufferMode {
    /// Convert from the integer selector.
    pub fn from_selector(selector: i32) -> Result<BufferMode> {
        match selector {
            BUFFER_NONE => Ok(BufferMode::Unbuffered),
            BUFFER_LINE => Ok(BufferMode::Line),
            BUFFER_BLOCK => Ok(BufferMode::Block),
            other => Err(HandleError::invalid(format!(
                "unknown buffering mode {other}"
            ))),
        }
    }

    #[must_use]
    pub const fn selector(self) -> i32 {
        match self {
            BufferMode::Unbuffered => BUFFER_NONE,
            BufferMode::Line => BUFFER_LINE,
            BufferMode::Block => BUFFER_BLOCK,
        }
    }
}

/// What the buffer currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Idle,
    /// Unread bytes fetched from the OS.
    Reading,
    /// Dirty bytes not yet written to the OS.
    Writing,
}

/// Owned buffer region with read/write cursors.
#[derive(Debug)]
pub struct HandleBuffer {
    data: Vec<u8>,
    next: usize,
    end: usize,
    direction: Direction,
}

impl HandleBuffer {
    /// Create an idle buffer. Capacity is clamped to at least one byte.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(1)],
            next: 0,
            end: 0,
            direction: Direction::Idle,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// True when the buffer holds neither read-ahead nor dirty bytes.
    pub fn is_clean(&self) -> bool {
        match self.direction {
            Direction::Idle => true,
            Direction::Reading => self.next == self.end,
            Direction::Writing => self.next == 0,
        }
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    /// Number of unread bytes.
    pub fn readable(&self) -> usize {
        if self.direction == Direction::Reading {
            self.end - self.next
        } else {
            0
        }
    }

    /// Unread bytes, without consuming them.
    pub fn unread(&self) -> &[u8] {
        if self.direction == Direction::Reading {
            &self.data[self.next..self.end]
        } else {
            &[]
        }
    }

    /// Copy up to `out.len()` unread bytes into `out` and consume them.
    pub fn take(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.readable());
        out[..n].copy_from_slice(&self.data[self.next..self.next + n]);
        self.next += n;
        n
    }

    /// Consume `n` unread bytes and return them.
    pub fn consume(&mut self, n: usize) -> &[u8] {
        let n = n.min(self.readable());
        let start = self.next;
        self.next += n;
        &self.data[start..start + n]
    }

    /// Move unread bytes to the front so the free tail is as large as
    /// possible. Returns the free tail for the next OS read.
    pub fn prepare_fill(&mut self) -> &mut [u8] {
        if self.direction != Direction::Reading {
            self.next = 0;
            self.end = 0;
        } else if self.next > 0 {
            self.data.copy_within(self.next..self.end, 0);
            self.end -= self.next;
            self.next = 0;
        }
        self.direction = Direction::Reading;
        &mut self.data[self.end..]
    }

    /// Record `n` bytes appended by the OS into the tail handed out by
    /// [`HandleBuffer::prepare_fill`].
    pub fn commit_fill(&mut self, n: usize) {
        debug_assert!(self.end + n <= self.data.len());
        self.end += n;
    }

    /// Logical offset of `data[0]` relative to the cursor, for seek windows:
    /// returns `(bytes_behind_cursor, bytes_ahead_of_cursor)`.
    pub fn read_window(&self) -> (usize, usize) {
        if self.direction == Direction::Reading {
            (self.next, self.end - self.next)
        } else {
            (0, 0)
        }
    }

    /// Move the read cursor to absolute index `pos` within `[0, end]`.
    pub fn set_read_cursor(&mut self, pos: usize) {
        debug_assert!(self.direction == Direction::Reading && pos <= self.end);
        self.next = pos.min(self.end);
    }

    /// Grow the region to `new_capacity`, keeping cursors and contents.
    pub fn grow(&mut self, new_capacity: usize) {
        if new_capacity > self.data.len() {
            self.data.resize(new_capacity, 0);
        }
    }

    // -----------------------------------------------------------------------
    // Write side
    // -----------------------------------------------------------------------

    /// Free space for dirty bytes.
    pub fn writable(&self) -> usize {
        match self.direction {
            Direction::Reading => 0,
            _ => self.data.len() - self.next,
        }
    }

    /// Append to the dirty region. Caller guarantees it fits.
    pub fn append(&mut self, bytes: &[u8]) {
        debug_assert!(self.direction != Direction::Reading);
        debug_assert!(bytes.len() <= self.writable());
        self.data[self.next..self.next + bytes.len()].copy_from_slice(bytes);
        self.next += bytes.len();
        self.end = self.next;
        self.direction = Direction::Writing;
    }

    /// Dirty bytes awaiting a flush.
    pub fn pending_write_data(&self) -> &[u8] {
        if self.direction == Direction::Writing {
            &self.data[..self.next]
        } else {
            &[]
        }
    }

    /// Drop the first `n` dirty bytes after the OS accepted them.
    pub fn mark_written(&mut self, n: usize) {
        debug_assert!(self.direction == Direction::Writing && n <= self.next);
        if n >= self.next {
            self.reset();
        } else {
            self.data.copy_within(n..self.next, 0);
            self.next -= n;
            self.end = self.next;
        }
    }

    /// Discard all contents and return to idle.
    pub fn reset(&mut self) {
        self.next = 0;
        self.end = 0;
        self.direction = Direction::Idle;
    }

    /// Rebuild into a region of `capacity` bytes, carrying unread read-ahead.
    /// The region is never smaller than the read-ahead it carries.
    pub fn reallocate(&mut self, capacity: usize) {
        let unread = self.unread().to_vec();
        let mut fresh = HandleBuffer::with_capacity(capacity.max(unread.len()));
        if !unread.is_empty() {
            fresh.prepare_fill()[..unread.len()].copy_from_slice(&unread);
            fresh.commit_fill(unread.len());
        }
        *self = fresh;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(cap: usize, bytes: &[u8]) -> HandleBuffer {
        let mut buf = HandleBuffer::with_capacity(cap);
        let tail = buf.prepare_fill();
        tail[..bytes.len()].copy_from_slice(bytes);
        buf.commit_fill(bytes.len());
        buf
    }

    #[test]
    fn mode_from_selector() {
        assert_eq!(BufferMode::from_selector(0).unwrap(), BufferMode::Unbuffered);
        assert_eq!(BufferMode::from_selector(1).unwrap(), BufferMode::Line);
        assert_eq!(BufferMode::from_selector(2).unwrap(), BufferMode::Block);
        assert!(BufferMode::from_selector(3).is_err());
        assert_eq!(BufferMode::Line.selector(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(HandleBuffer::with_capacity(0).capacity(), 1);
    }

    #[test]
    fn take_advances_cursor() {
        let mut buf = filled(16, b"hello world");
        let mut out = [0u8; 5];
        assert_eq!(buf.take(&mut out), 5);
        assert_eq!(&out, b"hello");
        assert_eq!(buf.unread(), b" world");
        assert_eq!(buf.read_window(), (5, 6));
    }

    #[test]
    fn prepare_fill_compacts_unread() {
        let mut buf = filled(8, b"abcdefgh");
        let _ = buf.consume(6);
        let tail = buf.prepare_fill();
        assert_eq!(tail.len(), 6);
        assert_eq!(buf.unread(), b"gh");
        assert_eq!(buf.read_window(), (0, 2));
    }

    #[test]
    fn append_and_partial_write() {
        let mut buf = HandleBuffer::with_capacity(8);
        buf.append(b"abc");
        buf.append(b"de");
        assert_eq!(buf.direction(), Direction::Writing);
        assert_eq!(buf.pending_write_data(), b"abcde");
        buf.mark_written(2);
        assert_eq!(buf.pending_write_data(), b"cde");
        buf.mark_written(3);
        assert!(buf.is_clean());
        assert_eq!(buf.direction(), Direction::Idle);
    }

    #[test]
    fn reading_buffer_has_no_write_room() {
        let buf = filled(8, b"xy");
        assert_eq!(buf.writable(), 0);
        assert!(buf.pending_write_data().is_empty());
    }

    #[test]
    fn grow_keeps_contents() {
        let mut buf = filled(4, b"abcd");
        assert_eq!(buf.readable(), buf.capacity());
        buf.grow(8);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.unread(), b"abcd");
        assert_eq!(buf.read_window(), (0, 4));
    }

    #[test]
    fn reallocate_carries_read_ahead() {
        let mut buf = filled(16, b"0123456789");
        let _ = buf.consume(4);
        buf.reallocate(2);
        assert_eq!(buf.capacity(), 6);
        assert_eq!(buf.unread(), b"456789");
    }
}
