//! The worker actor: pre-opens every target before forking so failures
//! carry context, then detaches and receives one `/dev/fuse` descriptor per
//! opened target, then forks one child per target. Each child owns its own
//! session loop and acks over a pipe before the parent worker moves on to
//! the next target.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use crate::bringup::fd_passing::recv_fd;
use crate::bringup::process::double_fork_with_socket;
use crate::config::EngineConfig;
use crate::ops::Engine;
use crate::session::{install_signal_handlers, Channel};

/// One requested mount target together with the outcome of its pre-open.
pub struct Target {
    pub path: PathBuf,
    fd: Option<RawFd>,
}

impl Target {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let fd = open_dir(&path);
        Self { path, fd }
    }

    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }
}

fn open_dir(path: &Path) -> Option<RawFd> {
    let c = std::ffi::CString::new(path.as_os_str().as_encoded_bytes()).ok()?;
    let fd = unsafe {
        libc::openat(
            libc::AT_FDCWD,
            c.as_ptr(),
            libc::O_RDONLY | libc::O_NONBLOCK | libc::O_DIRECTORY | libc::O_CLOEXEC | libc::O_NOCTTY,
        )
    };
    if fd == -1 {
        tracing::warn!(path = %path.display(), "groot: failed to open target, skipping");
        None
    } else {
        Some(fd)
    }
}

/// Fork the worker. Returns the launcher-side status socket and which
/// targets were actually opened (the launcher must skip mounting the
/// others). Never returns in the worker process itself.
pub fn start_fuse_process(targets: &[Target], config: EngineConfig) -> RawFd {
    match double_fork_with_socket() {
        Ok(launcher_sock) => {
            for t in targets {
                if let Some(fd) = t.fd {
                    unsafe { libc::close(fd) };
                }
            }
            launcher_sock
        }
        Err(worker_sock) => {
            for t in targets {
                let Some(dirfd) = t.fd else { continue };
                let dev_fuse = match recv_fd(worker_sock) {
                    Ok(fd) => fd,
                    Err(e) => {
                        tracing::error!(error = %e, "groot: no /dev/fuse fd received");
                        unsafe { libc::_exit(1) };
                    }
                };
                if run_one_session(dirfd, dev_fuse, &t.path, config) != 0 {
                    tracing::error!(target = %t.path.display(), "groot: failed to start session");
                    unsafe { libc::_exit(1) };
                }
            }
            let buf = [b'x'];
            unsafe {
                let _ = libc::write(worker_sock, buf.as_ptr() as *const libc::c_void, 1);
                libc::_exit(0);
            }
        }
    }
}

/// Fork one child that runs the session loop for `target`, bound to
/// `dirfd`/`dev_fuse`. The worker parent blocks on a status pipe and
/// returns 0 once the child has set up its session, -1 on failure.
fn run_one_session(dirfd: RawFd, dev_fuse: RawFd, target: &Path, config: EngineConfig) -> i32 {
    let mut pipes = [0 as RawFd; 2];
    if unsafe { libc::pipe(pipes.as_mut_ptr()) } != 0 {
        tracing::error!("groot: failed to create status pipe");
        return -1;
    }

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        tracing::error!("groot: failed to fork session process");
        return -1;
    }

    if pid != 0 {
        unsafe {
            libc::close(pipes[1]);
            libc::close(dirfd);
            libc::close(dev_fuse);
        }
        let mut buf = [0u8; 1];
        let n = loop {
            let n = unsafe { libc::read(pipes[0], buf.as_mut_ptr() as *mut libc::c_void, 1) };
            if n >= 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                break n;
            }
        };
        unsafe { libc::close(pipes[0]) };
        return if n == 1 { 0 } else { -1 };
    }

    unsafe { libc::close(pipes[0]) };

    let root = unsafe { OwnedFd::from_raw_fd(dirfd) };
    let device = unsafe { OwnedFd::from_raw_fd(dev_fuse) };
    let engine = Engine::new(root, config);
    let mut channel = Channel::new(device);
    install_signal_handlers();

    let buf = [b'x'];
    unsafe { libc::write(pipes[1], buf.as_ptr() as *const libc::c_void, 1) };

    crate::session::dispatch::run_loop(&engine, &mut channel);

    unsafe { libc::umount2(path_cstring(target).as_ptr(), libc::MNT_DETACH) };
    unsafe { libc::_exit(0) };
}

fn path_cstring(path: &Path) -> std::ffi::CString {
    std::ffi::CString::new(path.as_os_str().as_encoded_bytes()).expect("mountpoint path has no interior NUL")
}
