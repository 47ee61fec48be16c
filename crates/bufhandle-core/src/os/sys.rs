//! Raw `libc` calls behind the adapter.
//!
//! Every function issues exactly one syscall and converts the C return
//! convention into `Result<_, errno>`. Retry policy lives one level up.

use std::ffi::CString;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use super::RawHandle;

#[inline]
fn last_errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}

#[inline]
fn cvt(rc: libc::c_int) -> Result<libc::c_int, i32> {
    if rc < 0 { Err(last_errno()) } else { Ok(rc) }
}

#[inline]
fn cvt_size(rc: libc::ssize_t) -> Result<usize, i32> {
    if rc < 0 {
        Err(last_errno())
    } else {
        Ok(rc as usize)
    }
}

fn path_to_cstring(path: &Path) -> Result<CString, i32> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| libc::EINVAL)
}

pub(super) fn open(path: &Path, oflags: libc::c_int, mode: libc::mode_t) -> Result<RawHandle, i32> {
    let c_path = path_to_cstring(path)?;
    // SAFETY: c_path is a valid NUL-terminated string that outlives the call.
    cvt(unsafe { libc::open(c_path.as_ptr(), oflags | libc::O_CLOEXEC, mode as libc::c_uint) })
}

pub(super) fn close(fd: RawHandle) -> Result<(), i32> {
    // SAFETY: closing an integer descriptor has no memory-safety preconditions.
    cvt(unsafe { libc::close(fd) }).map(|_| ())
}

pub(super) fn read(fd: RawHandle, buf: &mut [u8]) -> Result<usize, i32> {
    // SAFETY: buf is a valid writable region of buf.len() bytes.
    cvt_size(unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) })
}

pub(super) fn write(fd: RawHandle, buf: &[u8]) -> Result<usize, i32> {
    // SAFETY: buf is a valid readable region of buf.len() bytes.
    cvt_size(unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) })
}

pub(super) fn lseek(fd: RawHandle, offset: i64, whence: libc::c_int) -> Result<i64, i32> {
    // SAFETY: lseek takes only integer arguments.
    let rc = unsafe { libc::lseek(fd, offset as libc::off_t, whence) };
    if rc < 0 { Err(last_errno()) } else { Ok(rc as i64) }
}

pub(super) fn dup(fd: RawHandle) -> Result<RawHandle, i32> {
    // SAFETY: integer-only syscall.
    cvt(unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) })
}

pub(super) fn pipe() -> Result<(RawHandle, RawHandle), i32> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: fds is a valid two-element array for the kernel to fill.
    cvt(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    for fd in fds {
        set_cloexec(fd);
    }
    Ok((fds[0], fds[1]))
}

fn set_cloexec(fd: RawHandle) {
    // SAFETY: integer-only fcntl calls; failure leaves the flag unset.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
}

pub(super) fn isatty(fd: RawHandle) -> bool {
    // SAFETY: integer-only call.
    unsafe { libc::isatty(fd) == 1 }
}

pub(super) fn blksize(fd: RawHandle) -> Result<usize, i32> {
    // SAFETY: zeroed stat is a valid out-parameter; the kernel fills it.
    let mut st: libc::stat = unsafe { mem::zeroed() };
    // SAFETY: st is a valid, writable stat struct.
    cvt(unsafe { libc::fstat(fd, &mut st) })?;
    Ok(st.st_blksize as usize)
}

pub(super) fn get_status_flags(fd: RawHandle) -> Result<libc::c_int, i32> {
    // SAFETY: integer-only call.
    cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })
}

pub(super) fn set_status_flags(fd: RawHandle, flags: libc::c_int) -> Result<(), i32> {
    // SAFETY: integer-only call.
    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags) }).map(|_| ())
}

pub(super) fn socket(domain: i32, ty: i32, proto: i32) -> Result<RawHandle, i32> {
    // SAFETY: integer-only call.
    let fd = cvt(unsafe { libc::socket(domain, ty, proto) })?;
    set_cloexec(fd);
    Ok(fd)
}

pub(super) fn socketpair(domain: i32, ty: i32, proto: i32) -> Result<(RawHandle, RawHandle), i32> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: fds is a valid two-element array for the kernel to fill.
    cvt(unsafe { libc::socketpair(domain, ty, proto, fds.as_mut_ptr()) })?;
    for fd in fds {
        set_cloexec(fd);
    }
    Ok((fds[0], fds[1]))
}

pub(super) fn connect(fd: RawHandle, addr: &SockAddr) -> Result<(), i32> {
    // SAFETY: addr.storage holds `addr.len` initialized bytes of a sockaddr.
    cvt(unsafe { libc::connect(fd, addr.as_ptr(), addr.len) }).map(|_| ())
}

pub(super) fn bind(fd: RawHandle, addr: &SockAddr) -> Result<(), i32> {
    // SAFETY: addr.storage holds `addr.len` initialized bytes of a sockaddr.
    cvt(unsafe { libc::bind(fd, addr.as_ptr(), addr.len) }).map(|_| ())
}

pub(super) fn listen(fd: RawHandle, backlog: i32) -> Result<(), i32> {
    // SAFETY: integer-only call.
    cvt(unsafe { libc::listen(fd, backlog) }).map(|_| ())
}

pub(super) fn accept(fd: RawHandle) -> Result<(RawHandle, SockAddr), i32> {
    let mut addr = SockAddr::empty();
    // SAFETY: addr.storage is large enough for any address family and len
    // tells the kernel its size.
    let client = cvt(unsafe { libc::accept(fd, addr.as_mut_ptr(), &mut addr.len) })?;
    set_cloexec(client);
    Ok((client, addr))
}

pub(super) fn getsockname(fd: RawHandle) -> Result<SockAddr, i32> {
    let mut addr = SockAddr::empty();
    // SAFETY: see accept.
    cvt(unsafe { libc::getsockname(fd, addr.as_mut_ptr(), &mut addr.len) })?;
    Ok(addr)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

pub(super) fn send(fd: RawHandle, buf: &[u8]) -> Result<usize, i32> {
    // SAFETY: buf is a valid readable region of buf.len() bytes.
    cvt_size(unsafe { libc::send(fd, buf.as_ptr().cast(), buf.len(), SEND_FLAGS) })
}

pub(super) fn recv(fd: RawHandle, buf: &mut [u8]) -> Result<usize, i32> {
    // SAFETY: buf is a valid writable region of buf.len() bytes.
    cvt_size(unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), 0) })
}

pub(super) fn shutdown(fd: RawHandle, how: libc::c_int) -> Result<(), i32> {
    // SAFETY: integer-only call.
    cvt(unsafe { libc::shutdown(fd, how) }).map(|_| ())
}

pub(super) fn poll(fd: RawHandle, events: i16, timeout_ms: i32) -> Result<i16, i32> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    // SAFETY: pfd is one valid pollfd.
    let n = cvt(unsafe { libc::poll(&mut pfd, 1, timeout_ms) })?;
    Ok(if n == 0 { 0 } else { pfd.revents })
}

// ---------------------------------------------------------------------------
// Native socket addresses
// ---------------------------------------------------------------------------

/// A native `sockaddr` plus its length.
#[derive(Clone)]
pub struct SockAddr {
    storage: libc::sockaddr_storage,
    len: libc::socklen_t,
}

impl std::fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SockAddr")
            .field("family", &self.storage.ss_family)
            .field("len", &self.len)
            .finish()
    }
}

impl SockAddr {
    fn empty() -> Self {
        Self {
            // SAFETY: all-zero sockaddr_storage is a valid (AF_UNSPEC) value.
            storage: unsafe { mem::zeroed() },
            len: mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
        }
    }

    fn as_ptr(&self) -> *const libc::sockaddr {
        (&self.storage as *const libc::sockaddr_storage).cast()
    }

    fn as_mut_ptr(&mut self) -> *mut libc::sockaddr {
        (&mut self.storage as *mut libc::sockaddr_storage).cast()
    }

    pub fn family(&self) -> i32 {
        i32::from(self.storage.ss_family)
    }

    pub fn from_v4(addr: SocketAddrV4) -> Self {
        let mut out = Self::empty();
        // SAFETY: sockaddr_storage is large enough and suitably aligned for
        // sockaddr_in.
        let sin = unsafe { &mut *(out.as_mut_ptr() as *mut libc::sockaddr_in) };
        sin.sin_family = libc::AF_INET as libc::sa_family_t;
        sin.sin_port = addr.port().to_be();
        sin.sin_addr = libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        };
        out.len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        out
    }

    pub fn from_v6(addr: SocketAddrV6) -> Self {
        let mut out = Self::empty();
        // SAFETY: sockaddr_storage is large enough and suitably aligned for
        // sockaddr_in6.
        let sin6 = unsafe { &mut *(out.as_mut_ptr() as *mut libc::sockaddr_in6) };
        sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
        sin6.sin6_port = addr.port().to_be();
        sin6.sin6_flowinfo = addr.flowinfo();
        sin6.sin6_scope_id = addr.scope_id();
        sin6.sin6_addr = libc::in6_addr {
            s6_addr: addr.ip().octets(),
        };
        out.len = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
        out
    }

    pub fn from_unix(path: &Path) -> Result<Self, i32> {
        let bytes = path.as_os_str().as_bytes();
        let mut out = Self::empty();
        // SAFETY: sockaddr_storage is large enough and suitably aligned for
        // sockaddr_un.
        let sun = unsafe { &mut *(out.as_mut_ptr() as *mut libc::sockaddr_un) };
        if bytes.len() >= sun.sun_path.len() || bytes.contains(&0) {
            return Err(libc::ENAMETOOLONG);
        }
        sun.sun_family = libc::AF_UNIX as libc::sa_family_t;
        for (dst, src) in sun.sun_path.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }
        let base = mem::size_of::<libc::sa_family_t>();
        out.len = (base + bytes.len() + 1) as libc::socklen_t;
        Ok(out)
    }

    pub fn as_v4(&self) -> Option<SocketAddrV4> {
        if self.family() != libc::AF_INET {
            return None;
        }
        // SAFETY: family tag says the storage holds a sockaddr_in.
        let sin = unsafe { &*(self.as_ptr() as *const libc::sockaddr_in) };
        let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
        Some(SocketAddrV4::new(ip, u16::from_be(sin.sin_port)))
    }

    pub fn as_v6(&self) -> Option<SocketAddrV6> {
        if self.family() != libc::AF_INET6 {
            return None;
        }
        // SAFETY: family tag says the storage holds a sockaddr_in6.
        let sin6 = unsafe { &*(self.as_ptr() as *const libc::sockaddr_in6) };
        Some(SocketAddrV6::new(
            Ipv6Addr::from(sin6.sin6_addr.s6_addr),
            u16::from_be(sin6.sin6_port),
            sin6.sin6_flowinfo,
            sin6.sin6_scope_id,
        ))
    }

    pub fn as_unix(&self) -> Option<PathBuf> {
        if self.family() != libc::AF_UNIX {
            return None;
        }
        // SAFETY: family tag says the storage holds a sockaddr_un.
        let sun = unsafe { &*(self.as_ptr() as *const libc::sockaddr_un) };
        let base = mem::size_of::<libc::sa_family_t>();
        let max = (self.len as usize).saturating_sub(base).min(sun.sun_path.len());
        let bytes: Vec<u8> = sun.sun_path[..max]
            .iter()
            .map(|&c| c as u8)
            .take_while(|&b| b != 0)
            .collect();
        Some(PathBuf::from(std::ffi::OsStr::from_bytes(&bytes)))
    }
}
