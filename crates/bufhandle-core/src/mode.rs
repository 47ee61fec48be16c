//! Open-mode strings and the mode flag bitset.
//!
//! Grammar: an optional leading `+`, then one of `<` (read), `>` (write,
//! create, truncate) or `>>` (write, append, create), then an optional
//! trailing `b` for binary. `+` adds the other direction. Anything else is
//! rejected; there is no fallback mode.

use crate::error::{HandleError, Result};
use crate::os::OpenRequest;

/// Handle mode bitset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModeFlags(u32);

impl ModeFlags {
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x02);
    pub const APPEND: Self = Self(0x04);
    pub const CREATE: Self = Self(0x08);
    pub const TRUNCATE: Self = Self(0x10);
    pub const NONBLOCKING: Self = Self(0x20);
    pub const BINARY: Self = Self(0x40);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: Self, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.contains(Self::READ)
    }

    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITE)
    }

    #[must_use]
    pub const fn is_nonblocking(self) -> bool {
        self.contains(Self::NONBLOCKING)
    }

    /// Translate into an `open(2)` request.
    #[must_use]
    pub fn open_request(self) -> OpenRequest {
        OpenRequest {
            read: self.contains(Self::READ),
            write: self.contains(Self::WRITE),
            append: self.contains(Self::APPEND),
            create: self.contains(Self::CREATE),
            truncate: self.contains(Self::TRUNCATE),
            nonblocking: self.contains(Self::NONBLOCKING),
        }
    }
}

impl std::ops::BitOr for ModeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ModeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Parse an open-mode string into [`ModeFlags`].
pub fn parse_mode(mode: &str) -> Result<ModeFlags> {
    let bytes = mode.as_bytes();
    let mut pos = 0;
    let mut flags = ModeFlags::empty();

    let plus = bytes.first() == Some(&b'+');
    if plus {
        pos += 1;
    }

    match &bytes[pos..] {
        [b'>', b'>', ..] => {
            flags |= ModeFlags::WRITE | ModeFlags::APPEND | ModeFlags::CREATE;
            pos += 2;
        }
        [b'>', ..] => {
            flags |= ModeFlags::WRITE | ModeFlags::CREATE | ModeFlags::TRUNCATE;
            pos += 1;
        }
        [b'<', ..] => {
            flags |= ModeFlags::READ;
            pos += 1;
        }
        _ => return Err(HandleError::invalid(format!("bad open mode {mode:?}"))),
    }

    if plus {
        flags |= ModeFlags::READ | ModeFlags::WRITE;
    }

    match &bytes[pos..] {
        [] => {}
        [b'b'] => flags |= ModeFlags::BINARY,
        _ => return Err(HandleError::invalid(format!("bad open mode {mode:?}"))),
    }

    Ok(flags)
}
