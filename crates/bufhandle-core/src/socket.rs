//! Socket verbs on top of the handle record.
//!
//! Data transfer here never goes through the buffer engine: one `send` or
//! `recv` is one OS call. The one exception is read-ahead left behind by a
//! `peek` or `readline` on the same handle, which `recv` and `poll` drain
//! first so no byte is skipped.
//!
//! Families, types and protocols travel as portable codes and are mapped to
//! native values only at the OS boundary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};
use std::path::PathBuf;

use crate::error::{HandleError, Result};
use crate::handle::{Handle, HandleKind};
use crate::os::{self, RawHandle, SockAddr};

// ---------------------------------------------------------------------------
// Portable codes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Local = 0,
    Unix = 1,
    Inet = 2,
    Inet6 = 3,
}

impl Family {
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Family::Local),
            1 => Ok(Family::Unix),
            2 => Ok(Family::Inet),
            3 => Ok(Family::Inet6),
            other => Err(HandleError::invalid(format!("unknown socket family {other}"))),
        }
    }

    #[must_use]
    pub const fn native(self) -> i32 {
        match self {
            Family::Local | Family::Unix => libc::AF_UNIX,
            Family::Inet => libc::AF_INET,
            Family::Inet6 => libc::AF_INET6,
        }
    }

    fn from_native(af: i32) -> Option<Self> {
        match af {
            libc::AF_UNIX => Some(Family::Unix),
            libc::AF_INET => Some(Family::Inet),
            libc::AF_INET6 => Some(Family::Inet6),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketType {
    Packet = 0,
    Stream = 1,
    Dgram = 2,
    Raw = 3,
    Rdm = 4,
    SeqPacket = 5,
}

impl SocketType {
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(SocketType::Packet),
            1 => Ok(SocketType::Stream),
            2 => Ok(SocketType::Dgram),
            3 => Ok(SocketType::Raw),
            4 => Ok(SocketType::Rdm),
            5 => Ok(SocketType::SeqPacket),
            other => Err(HandleError::invalid(format!("unknown socket type {other}"))),
        }
    }

    /// Native value. Packet and rdm sockets have no mapping.
    pub fn native(self) -> Result<i32> {
        match self {
            SocketType::Stream => Ok(libc::SOCK_STREAM),
            SocketType::Dgram => Ok(libc::SOCK_DGRAM),
            SocketType::Raw => Ok(libc::SOCK_RAW),
            SocketType::SeqPacket => Ok(libc::SOCK_SEQPACKET),
            SocketType::Packet | SocketType::Rdm => Err(HandleError::invalid(format!(
                "socket type {self:?} is not supported"
            ))),
        }
    }

    #[must_use]
    pub const fn is_stream(self) -> bool {
        matches!(self, SocketType::Stream)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Default = 0,
    Tcp = 6,
    Udp = 17,
}

impl Protocol {
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Protocol::Default),
            6 => Ok(Protocol::Tcp),
            17 => Ok(Protocol::Udp),
            other => Err(HandleError::invalid(format!("unknown protocol {other}"))),
        }
    }

    #[must_use]
    pub const fn native(self) -> i32 {
        match self {
            Protocol::Default => 0,
            Protocol::Tcp => libc::IPPROTO_TCP,
            Protocol::Udp => libc::IPPROTO_UDP,
        }
    }
}

/// Socket metadata carried by [`HandleKind::Socket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketInfo {
    pub family: Family,
    pub ty: SocketType,
    pub protocol: Protocol,
    pub listening: bool,
}

impl SocketInfo {
    #[must_use]
    pub fn new(family: Family, ty: SocketType, protocol: Protocol) -> Self {
        Self {
            family,
            ty,
            protocol,
            listening: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// Transport address independent of the native `sockaddr` layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAddress {
    Inet(SocketAddrV4),
    Inet6(SocketAddrV6),
    Unix(PathBuf),
}

impl SocketAddress {
    /// Numeric host literal plus port. An empty host binds the wildcard.
    pub fn inet(host: &str, port: u16) -> Result<Self> {
        if host.is_empty() {
            return Ok(SocketAddress::Inet(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)));
        }
        let ip: IpAddr = host
            .parse()
            .map_err(|_| HandleError::invalid(format!("{host:?} is not a numeric address")))?;
        Ok(SocketAddr::new(ip, port).into())
    }

    /// Resolve a host name; the first address returned wins.
    pub fn resolve(host: &str, port: u16) -> Result<Self> {
        if let Ok(addr) = Self::inet(host, port) {
            return Ok(addr);
        }
        let mut addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| HandleError::Transport {
                op: "resolve",
                errno: e.raw_os_error().unwrap_or(libc::EINVAL),
                message: format!("{host}: {e}"),
            })?;
        addrs
            .next()
            .map(SocketAddress::from)
            .ok_or_else(|| HandleError::invalid(format!("{host} has no addresses")))
    }

    #[must_use]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        SocketAddress::Unix(path.into())
    }

    #[must_use]
    pub fn family(&self) -> Family {
        match self {
            SocketAddress::Inet(_) => Family::Inet,
            SocketAddress::Inet6(_) => Family::Inet6,
            SocketAddress::Unix(_) => Family::Unix,
        }
    }

    fn to_native(&self) -> Result<SockAddr> {
        match self {
            SocketAddress::Inet(v4) => Ok(SockAddr::from_v4(*v4)),
            SocketAddress::Inet6(v6) => Ok(SockAddr::from_v6(*v6)),
            SocketAddress::Unix(path) => SockAddr::from_unix(path).map_err(|_| {
                HandleError::invalid(format!("unix socket path too long: {}", path.display()))
            }),
        }
    }

    fn from_native(sa: &SockAddr) -> Option<Self> {
        match Family::from_native(sa.family())? {
            Family::Inet => sa.as_v4().map(SocketAddress::Inet),
            Family::Inet6 => sa.as_v6().map(SocketAddress::Inet6),
            Family::Unix | Family::Local => sa.as_unix().map(SocketAddress::Unix),
        }
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => SocketAddress::Inet(v4),
            SocketAddr::V6(v6) => SocketAddress::Inet6(v6),
        }
    }
}

impl std::fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketAddress::Inet(a) => write!(f, "{a}"),
            SocketAddress::Inet6(a) => write!(f, "{a}"),
            SocketAddress::Unix(p) => write!(f, "unix:{}", p.display()),
        }
    }
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

/// Poll interest and result bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Readiness(u32);

impl Readiness {
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const ERROR: Self = Self(4);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Unknown bits are dropped.
    #[must_use]
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0b111)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn poll_events(self) -> i16 {
        let mut events = 0;
        if self.contains(Self::READ) {
            events |= libc::POLLIN;
        }
        if self.contains(Self::WRITE) {
            events |= libc::POLLOUT;
        }
        if self.contains(Self::ERROR) {
            events |= libc::POLLPRI;
        }
        events
    }

    /// Hang-up counts as readable: the next read reports end of stream.
    fn from_revents(revents: i16) -> Self {
        let mut bits = 0;
        if revents & (libc::POLLIN | libc::POLLHUP) != 0 {
            bits |= Self::READ.0;
        }
        if revents & libc::POLLOUT != 0 {
            bits |= Self::WRITE.0;
        }
        if revents & (libc::POLLERR | libc::POLLNVAL | libc::POLLPRI) != 0 {
            bits |= Self::ERROR.0;
        }
        Self(bits)
    }
}

impl std::ops::BitOr for Readiness {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Which half of a connection to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Read,
    Write,
    Both,
}

// ---------------------------------------------------------------------------
// Verbs
// ---------------------------------------------------------------------------

fn socket_info(h: &Handle) -> Result<SocketInfo> {
    h.ensure_open()?;
    match h.kind {
        HandleKind::Socket(info) => Ok(info),
        HandleKind::File => Err(HandleError::invalid(format!("{} is not a socket", h.id))),
    }
}

fn creation_error(op: &'static str, errno: i32, info: SocketInfo) -> HandleError {
    match HandleError::from_errno(op, errno) {
        HandleError::Transport { op, errno, message } => HandleError::Transport {
            op,
            errno,
            message: format!(
                "{message} (family {:?}, type {:?}, protocol {:?})",
                info.family, info.ty, info.protocol
            ),
        },
        other => other,
    }
}

/// Create the OS socket for `info`.
pub(crate) fn open_socket(info: SocketInfo) -> Result<RawHandle> {
    let ty = info.ty.native()?;
    os::socket(info.family.native(), ty, info.protocol.native())
        .map_err(|e| creation_error("socket", e, info))
}

/// Create a connected pair of descriptors.
pub(crate) fn open_socketpair(info: SocketInfo) -> Result<(RawHandle, RawHandle)> {
    let ty = info.ty.native()?;
    os::socketpair(info.family.native(), ty, info.protocol.native())
        .map_err(|e| creation_error("socketpair", e, info))
}

/// Connect. A non-blocking connect in progress is `WouldBlock`.
pub fn connect_handle(h: &mut Handle, addr: &SocketAddress) -> Result<()> {
    socket_info(h)?;
    let native = addr.to_native()?;
    os::connect(h.fd, &native).map_err(|e| HandleError::from_errno("connect", e))
}

pub fn bind_handle(h: &mut Handle, addr: &SocketAddress) -> Result<()> {
    socket_info(h)?;
    let native = addr.to_native()?;
    os::bind(h.fd, &native).map_err(|e| HandleError::from_errno("bind", e))
}

/// Mark passive. The backlog is clamped to `[0, SOMAXCONN]`.
pub fn listen_handle(h: &mut Handle, backlog: i32) -> Result<()> {
    socket_info(h)?;
    let backlog = backlog.clamp(0, libc::SOMAXCONN);
    os::listen(h.fd, backlog).map_err(|e| HandleError::from_errno("listen", e))?;
    if let HandleKind::Socket(info) = &mut h.kind {
        info.listening = true;
    }
    Ok(())
}

/// Accept one connection. Returns the new descriptor, the metadata it
/// inherits, and the peer address when the family reports one.
pub(crate) fn accept_handle(
    h: &mut Handle,
) -> Result<(RawHandle, SocketInfo, Option<SocketAddress>)> {
    let info = socket_info(h)?;
    if !info.listening {
        return Err(HandleError::invalid(format!("{} is not listening", h.id)));
    }
    let (fd, peer) = os::accept(h.fd).map_err(|e| HandleError::from_errno("accept", e))?;
    let child = SocketInfo {
        listening: false,
        ..info
    };
    Ok((fd, child, SocketAddress::from_native(&peer)))
}

/// One `send` call. Returns the count the OS accepted.
pub fn send_handle(h: &mut Handle, bytes: &[u8]) -> Result<usize> {
    socket_info(h)?;
    if bytes.is_empty() {
        return Ok(0);
    }
    os::send(h.fd, bytes).map_err(|e| HandleError::from_errno("send", e))
}

/// Send all of `bytes` on a blocking stream socket; one call otherwise.
pub fn send_all(h: &mut Handle, bytes: &[u8]) -> Result<usize> {
    let info = socket_info(h)?;
    if !info.ty.is_stream() {
        return send_handle(h, bytes);
    }
    let mut done = 0;
    while done < bytes.len() {
        match send_handle(h, &bytes[done..]) {
            Ok(n) => done += n,
            Err(e) if e.is_would_block() && done > 0 => break,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

/// Receive into `out` with one OS call, after draining read-ahead. Zero
/// means the peer shut down.
pub fn recv_into(h: &mut Handle, out: &mut [u8]) -> Result<usize> {
    socket_info(h)?;
    if out.is_empty() {
        return Ok(0);
    }
    if let Some(buf) = h.buffer.as_mut()
        && buf.readable() > 0
    {
        let n = buf.take(out);
        h.position += n as i64;
        return Ok(n);
    }
    let n = os::recv(h.fd, out).map_err(|e| HandleError::from_errno("recv", e))?;
    if n == 0 {
        h.eof = true;
    }
    h.position += n as i64;
    Ok(n)
}

/// Receive up to `max_len` bytes (`recv_chunk_size` when `None`).
pub fn recv_handle(h: &mut Handle, max_len: Option<usize>) -> Result<Vec<u8>> {
    let len = max_len.unwrap_or(h.config.recv_chunk_size);
    let mut out = vec![0u8; len];
    let n = recv_into(h, &mut out)?;
    out.truncate(n);
    Ok(out)
}

/// Wait up to the timeout for any readiness in `which`. A zero timeout
/// polls once; a negative one waits indefinitely.
///
/// Works on any open descriptor. `ERROR` is reported whenever the OS
/// flags it, requested or not.
pub fn poll_handle(
    h: &mut Handle,
    which: Readiness,
    timeout_sec: i64,
    timeout_usec: i64,
) -> Result<Readiness> {
    h.ensure_open()?;
    if which.contains(Readiness::READ) && h.buffered_unread() > 0 {
        return Ok(Readiness::READ);
    }
    let timeout_ms = if timeout_sec < 0 || timeout_usec < 0 {
        -1
    } else {
        let ms = timeout_sec
            .saturating_mul(1000)
            .saturating_add(timeout_usec.saturating_add(999) / 1000);
        i32::try_from(ms).unwrap_or(i32::MAX)
    };
    let revents = os::poll(h.fd, which.poll_events(), timeout_ms)
        .map_err(|e| HandleError::from_errno("poll", e))?;
    let seen = Readiness::from_revents(revents);
    Ok(Readiness::from_bits_truncate(
        seen.bits() & (which.bits() | Readiness::ERROR.bits()),
    ))
}

pub fn shutdown_handle(h: &mut Handle, how: Shutdown) -> Result<()> {
    socket_info(h)?;
    let how = match how {
        Shutdown::Read => libc::SHUT_RD,
        Shutdown::Write => libc::SHUT_WR,
        Shutdown::Both => libc::SHUT_RDWR,
    };
    os::shutdown(h.fd, how).map_err(|e| HandleError::from_errno("shutdown", e))
}

/// Address the socket is bound to.
pub fn local_address(h: &Handle) -> Result<SocketAddress> {
    socket_info(h)?;
    let sa = os::getsockname(h.fd).map_err(|e| HandleError::from_errno("getsockname", e))?;
    SocketAddress::from_native(&sa)
        .ok_or_else(|| HandleError::invalid("socket has an unsupported address family"))
}
