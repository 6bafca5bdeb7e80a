//! Shared double-fork-with-socket primitive: a `socketpair` is created, the
//! immediate child detaches via a second fork and `setsid`, so its parent
//! is reaped by the launcher long before it does any real work and it is
//! never the launcher's direct child.

use std::os::fd::RawFd;

/// Fork twice and wire up a `SOCK_STREAM` socketpair between the caller
/// and the resulting grandchild.
///
/// Returns `Ok(sock)` in the launcher (caller) process, with `sock` the
/// launcher's end of the pair. Returns `Err(sock)` in the detached
/// grandchild, with `sock` its end; the grandchild's immediate parent has
/// already exited, so by the time this returns the grandchild has been
/// reparented and is running under a fresh session (`setsid`).
pub fn double_fork_with_socket() -> Result<RawFd, RawFd> {
    let mut sockets = [0 as RawFd; 2];
    let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0, sockets.as_mut_ptr()) };
    if rc != 0 {
        tracing::error!("groot: socketpair failed");
        unsafe { libc::_exit(1) };
    }

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        tracing::error!("groot: fork failed");
        unsafe { libc::_exit(1) };
    }

    if pid != 0 {
        unsafe { libc::close(sockets[1]) };
        let mut status: libc::c_int = 0;
        unsafe { libc::waitpid(pid, &mut status, 0) };
        return Ok(sockets[0]);
    }

    let pid2 = unsafe { libc::fork() };
    if pid2 < 0 {
        tracing::error!("groot: fork failed");
        unsafe { libc::_exit(1) };
    }
    if pid2 != 0 {
        unsafe { libc::_exit(0) };
    }

    if unsafe { libc::setsid() } < 0 {
        tracing::error!("groot: setsid failed");
        unsafe { libc::_exit(1) };
    }

    unsafe { libc::close(sockets[0]) };
    Err(sockets[1])
}
