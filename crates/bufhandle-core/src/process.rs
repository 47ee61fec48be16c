//! Command pipes: a child process whose stdout or stdin backs a handle.
//!
//! The command runs under `/bin/sh -c`. A read-mode pipe carries the
//! child's stdout, a write-mode pipe feeds its stdin; the child's other
//! streams are inherited. Closing the handle closes our end first and then
//! waits for the child, so a writer sees end of input before it is reaped.

use std::os::fd::{IntoRawFd, OwnedFd};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};

use crate::error::{HandleError, Result};
use crate::mode::ModeFlags;
use crate::os::RawHandle;

pub const SHELL: &str = "/bin/sh";

fn io_error(op: &'static str, err: &std::io::Error) -> HandleError {
    match err.raw_os_error() {
        Some(errno) => HandleError::from_errno(op, errno),
        None => HandleError::Transport {
            op,
            errno: libc::EIO,
            message: err.to_string(),
        },
    }
}

/// Start `command` and return our end of its pipe plus the child.
pub(crate) fn spawn_pipe(command: &str, flags: ModeFlags) -> Result<(RawHandle, Child)> {
    if command.trim().is_empty() {
        return Err(HandleError::invalid("empty pipe command"));
    }
    if flags.is_readable() == flags.is_writable() || flags.contains(ModeFlags::APPEND) {
        return Err(HandleError::invalid(
            "a command pipe is either read-only (<) or write-only (>)",
        ));
    }

    let mut cmd = Command::new(SHELL);
    cmd.arg("-c").arg(command);
    if flags.is_readable() {
        cmd.stdout(Stdio::piped());
    } else {
        cmd.stdin(Stdio::piped());
    }
    let mut child = cmd.spawn().map_err(|e| io_error("spawn", &e))?;

    let end: Option<OwnedFd> = if flags.is_readable() {
        child.stdout.take().map(OwnedFd::from)
    } else {
        child.stdin.take().map(OwnedFd::from)
    };
    match end {
        Some(fd) => Ok((fd.into_raw_fd(), child)),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Err(HandleError::Transport {
                op: "spawn",
                errno: libc::EPIPE,
                message: format!("no pipe to {command:?}"),
            })
        }
    }
}

/// Exit code, or the negated signal number when the child was killed.
#[must_use]
pub fn status_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => -signal,
        (None, None) => -1,
    }
}

/// Block until `child` exits.
pub(crate) fn wait_child(child: &mut Child) -> Result<i32> {
    child
        .wait()
        .map(status_code)
        .map_err(|e| io_error("waitpid", &e))
}
