//! Handle error kinds.
//!
//! End-of-stream is not an error: reads report it as a zero count or an empty
//! line. Interrupted syscalls are retried in [`crate::os`] and never reach
//! this type.

use thiserror::Error;

/// Errors surfaced by handle operations.
#[derive(Debug, Error)]
pub enum HandleError {
    /// Operation on a closed or never-opened handle.
    #[error("handle is closed")]
    ClosedHandle,
    /// Bad mode string, slot index, buffer size, seek target, or a seek on a
    /// descriptor that cannot seek.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Non-blocking handle not ready. Never retried internally.
    #[error("operation would block")]
    WouldBlock,
    /// OS-level failure carrying the OS diagnostic text.
    #[error("{op}: {message} (errno {errno})")]
    Transport {
        op: &'static str,
        errno: i32,
        message: String,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HandleError>;

impl HandleError {
    /// Classify an OS error number returned by operation `op`.
    #[must_use]
    pub fn from_errno(op: &'static str, errno: i32) -> Self {
        match errno {
            libc::EINPROGRESS => Self::WouldBlock,
            e if e == libc::EAGAIN || e == libc::EWOULDBLOCK => Self::WouldBlock,
            libc::ESPIPE => Self::InvalidArgument(format!("{op}: handle is not seekable")),
            _ => Self::Transport {
                op,
                errno,
                message: std::io::Error::from_raw_os_error(errno).to_string(),
            },
        }
    }

    /// Shorthand for [`HandleError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// OS error number behind this error, when there is one.
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Transport { errno, .. } => Some(*errno),
            Self::WouldBlock => Some(libc::EAGAIN),
            Self::ClosedHandle => Some(libc::EBADF),
            Self::InvalidArgument(_) => Some(libc::EINVAL),
        }
    }

    #[must_use]
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }
}
