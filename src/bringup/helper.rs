//! The ID-map helper actor: a detached grandchild blocks on a wake-up byte,
//! then execs `newuidmap`/`newgidmap` against the launcher's pid, then
//! writes an acknowledgement byte back.

use std::ffi::CString;
use std::os::fd::RawFd;
use std::path::Path;

use crate::bringup::idmap::{self, IdMapEntry};
use crate::bringup::process::double_fork_with_socket;

/// Fork the helper and return the launcher-side end of its status socket.
/// The helper process itself never returns from this call.
pub fn start_uidmap_process(main_pid: libc::pid_t, uid_mapping: &[IdMapEntry], gid_mapping: &[IdMapEntry]) -> RawFd {
    let status_socket = match double_fork_with_socket() {
        Ok(sock) => return sock,
        Err(child_sock) => child_sock,
    };

    let mut buf = [0u8; 1];
    loop {
        let n = unsafe { libc::read(status_socket, buf.as_mut_ptr() as *mut libc::c_void, 1) };
        if n >= 0 {
            break;
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        if errno != libc::EINTR {
            unsafe { libc::_exit(0) };
        }
    }

    launch_newidmap("newuidmap", main_pid, &idmap::to_args(uid_mapping));
    launch_newidmap("newgidmap", main_pid, &idmap::to_args(gid_mapping));

    unsafe {
        let _ = libc::write(status_socket, buf.as_ptr() as *const libc::c_void, 1);
        libc::_exit(0);
    }
}

fn launch_newidmap(bin: &str, main_pid: libc::pid_t, args: &[String]) {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        tracing::error!(bin, "groot: fork failed launching id-map helper");
        unsafe { libc::_exit(1) };
    }
    if pid == 0 {
        let bin_c = CString::new(bin).unwrap();
        let pid_c = CString::new(main_pid.to_string()).unwrap();
        let arg_cstrings: Vec<CString> = args.iter().map(|a| CString::new(a.as_str()).unwrap()).collect();
        let mut argv: Vec<*const libc::c_char> = Vec::with_capacity(args.len() + 3);
        argv.push(bin_c.as_ptr());
        argv.push(pid_c.as_ptr());
        for a in &arg_cstrings {
            argv.push(a.as_ptr());
        }
        argv.push(std::ptr::null());
        unsafe {
            libc::execvp(bin_c.as_ptr(), argv.as_ptr());
            libc::_exit(1);
        }
    }

    let mut status: libc::c_int = 0;
    let waited = unsafe { libc::waitpid(pid, &mut status, 0) };
    if waited < 0 {
        tracing::error!(bin, "groot: waitpid failed for id-map helper");
        unsafe { libc::_exit(1) };
    }
    let exited_ok = libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0;
    if !exited_ok {
        tracing::error!(bin, status, "groot: {} did not exit cleanly", bin);
        unsafe { libc::_exit(1) };
    }
}

/// The `/etc/subuid`/`/etc/subgid` paths consulted for the current user.
pub fn default_subid_paths() -> (&'static Path, &'static Path) {
    (Path::new("/etc/subuid"), Path::new("/etc/subgid"))
}
