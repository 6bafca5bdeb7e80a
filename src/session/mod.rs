//! Session driver (`spec.md §4.6`): owns the userspace-filesystem channel
//! for one mounted target — receive-buffer sizing, read/write framing
//! against the kernel device, session-exit handling, and signal-triggered
//! shutdown.
//!
//! Grounded in `original_source/grootfs.c`'s `dev_fuse_chan_receive` /
//! `dev_fuse_chan_send` / `dev_fuse_chan_destroy` and `MIN_BUFSIZE`. The
//! single process-wide session handle the signal handler reaches
//! (`spec.md §4.6`, §9) is modeled as an `AtomicBool` rather than a raw
//! pointer, since the handler only ever needs to flip an exit flag, not
//! reach back into session state.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

pub mod dispatch;
mod wire;

/// The larger of 132 KiB and one page plus 4 KiB, per `spec.md §4.6`.
pub const MIN_BUFSIZE: usize = 0x21000;

fn min_recv_bufsize() -> usize {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    std::cmp::max(page + 0x1000, MIN_BUFSIZE)
}

/// Process-wide flag the signal handler sets; the only legal reader is the
/// session loop checking between requests (`spec.md §9`).
static EXITED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_sig: libc::c_int) {
    EXITED.store(true, Ordering::SeqCst);
}

extern "C" fn ignore_signal(_sig: libc::c_int) {}

/// Install `SIGHUP`/`SIGINT`/`SIGTERM` handlers that mark the session
/// exited, and ignore `SIGPIPE` (`spec.md §4.6`). Process-wide: call once
/// per process, not once per session.
pub fn install_signal_handlers() {
    unsafe {
        for sig in [libc::SIGHUP, libc::SIGINT, libc::SIGTERM] {
            libc::signal(sig, on_shutdown_signal as usize);
        }
        libc::signal(libc::SIGPIPE, ignore_signal as usize);
    }
}

/// Has a shutdown signal fired, or has the channel already observed
/// `ENODEV`?
pub fn has_exited() -> bool {
    EXITED.load(Ordering::SeqCst)
}

/// The userspace-filesystem channel: the device descriptor plus a
/// correctly-sized receive buffer (`spec.md §4.6`).
pub struct Channel {
    device: OwnedFd,
    recv_buf: Vec<u8>,
}

impl Channel {
    pub fn new(device: OwnedFd) -> Self {
        let recv_buf = vec![0u8; min_recv_bufsize()];
        Self { device, recv_buf }
    }

    pub fn fd(&self) -> RawFd {
        self.device.as_raw_fd()
    }

    pub fn recv_buf_len(&self) -> usize {
        self.recv_buf.len()
    }

    /// Read one request from the device into the channel's own buffer,
    /// returning the slice actually filled. Empty slice means the session
    /// has exited (`spec.md §4.6`: unmount or signal).
    pub fn receive(&mut self) -> Result<&[u8]> {
        if has_exited() {
            return Ok(&[]);
        }
        loop {
            let n = unsafe {
                libc::read(self.fd(), self.recv_buf.as_mut_ptr() as *mut libc::c_void, self.recv_buf.len())
            };
            if n >= 0 {
                return Ok(&self.recv_buf[..n as usize]);
            }
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
            match errno {
                // Request was interrupted by the kernel; safe to retry.
                libc::ENOENT => continue,
                // Unmounted.
                libc::ENODEV => {
                    EXITED.store(true, Ordering::SeqCst);
                    return Ok(&[]);
                }
                libc::EINTR | libc::EAGAIN => return Err(Error::syscall(errno)),
                _ => {
                    tracing::warn!(errno, "error reading fuse device");
                    return Err(Error::syscall(errno));
                }
            }
        }
    }

    /// Write a reply, assembled by the caller as a single contiguous buffer
    /// (the kernel device accepts a `writev`-style scatter, but every reply
    /// this engine produces is built in one buffer, so a plain `write`
    /// suffices).
    pub fn send(&self, reply: &[u8]) -> Result<()> {
        if reply.is_empty() {
            return Ok(());
        }
        let n = unsafe { libc::write(self.fd(), reply.as_ptr() as *const libc::c_void, reply.len()) };
        if n < 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
            if errno != libc::ENOENT && !has_exited() {
                tracing::warn!(errno, "error writing fuse device");
            }
            return Err(Error::syscall(errno));
        }
        Ok(())
    }
}

impl Drop for Channel {
    /// Destroy: close the channel descriptor (`spec.md §4.6`). `OwnedFd`'s
    /// own `Drop` does the close; this impl exists so the intent is visible
    /// at the call site the spec describes as a hook.
    fn drop(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_buf_is_at_least_132kib() {
        assert!(min_recv_bufsize() >= MIN_BUFSIZE);
    }

    #[test]
    fn channel_reports_exited_state() {
        assert!(!has_exited());
        EXITED.store(true, Ordering::SeqCst);
        // Restore so other tests in this binary are unaffected by ordering.
        let was = has_exited();
        EXITED.store(false, Ordering::SeqCst);
        assert!(was);
    }
}
