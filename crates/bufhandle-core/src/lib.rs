//! # bufhandle-core
//!
//! Buffered handle I/O for a managed-runtime host.
//!
//! One handle record unifies files, pipes, and sockets. File-like handles go
//! through the buffer engine (block or line buffering, peek, seek, and
//! encoding-aware line scanning); socket handles share the same record and
//! flag state but transfer data with one OS call per verb.
//!
//! Layout, leaves first:
//!
//! - [`config`] and [`log`]: environment tunables and the JSONL event log.
//! - [`os`]: syscall adapter over `libc`, the only place `unsafe` is allowed.
//! - [`buffer`]: the owned byte region with its cursors and direction tag.
//! - [`process`]: command pipes to `/bin/sh -c` children.
//! - [`handle`]: the per-stream record and its lifecycle.
//! - [`engine`]: fill/read/peek/readline/flush/write/seek/setbuf.
//! - [`socket`]: portable socket codes, addresses, and the socket verbs.
//! - [`registry`]: standard handles, root enumeration, teardown.
//! - [`api`]: the host-facing verbs, dispatching on the handle variant.

#![deny(unsafe_code)]

pub mod api;
pub mod buffer;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod handle;
pub mod log;
pub mod mode;
pub mod os;
pub mod process;
pub mod registry;
pub mod socket;

pub use buffer::{BufferMode, Direction};
pub use config::IoConfig;
pub use encoding::{EncodingRef, TextEncoding, Utf8};
pub use engine::Whence;
pub use error::{HandleError, Result};
pub use handle::{Handle, HandleId, HandleKind, HandleRef, WeakHandle};
pub use mode::ModeFlags;
pub use log::{LogEmitter, LogLevel};
pub use registry::{Registry, StdSlot, TeardownReport};
pub use socket::{Family, Protocol, Readiness, Shutdown, SocketAddress, SocketInfo, SocketType};
