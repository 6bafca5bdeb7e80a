//! The launcher actor: the original process. Unshares the user and mount
//! namespaces, coordinates the ID-map helper and the worker, performs the
//! mount of each target and hands its device descriptor to the worker, then
//! raises capabilities into the ambient set.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use caps::{CapSet, Capability};

use crate::bringup::fd_passing::send_fd;
use crate::bringup::helper::{default_subid_paths, start_uidmap_process};
use crate::bringup::idmap::build_idmap;
use crate::bringup::worker::{start_fuse_process, Target};
use crate::config::EngineConfig;

/// Everything that can make bring-up fail before a session is ever accepted.
#[derive(Debug)]
pub struct BringUpError(pub String);

impl std::fmt::Display for BringUpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "groot: {}", self.0)
    }
}

impl std::error::Error for BringUpError {}

fn fatal(msg: impl Into<String>) -> BringUpError {
    BringUpError(msg.into())
}

/// Resolve the effective username for sub-ID lookups: `GROOT_USER`
/// overrides `getpwuid` on the real UID.
fn resolve_username(real_uid: libc::uid_t) -> Option<String> {
    if let Ok(name) = std::env::var("GROOT_USER") {
        return Some(name);
    }
    unsafe {
        let pw = libc::getpwuid(real_uid);
        if pw.is_null() {
            return None;
        }
        let name = std::ffi::CStr::from_ptr((*pw).pw_name).to_string_lossy().into_owned();
        Some(name)
    }
}

fn mount_fuse_fd_at(mountpoint: &Path) -> Result<i32, BringUpError> {
    let dev_fuse_path = CString::new("/dev/fuse").unwrap();
    let dev_fuse = unsafe { libc::open(dev_fuse_path.as_ptr(), libc::O_RDWR) };
    if dev_fuse == -1 {
        return Err(fatal("failed to open /dev/fuse"));
    }

    let mountopts = format!("fd={},rootmode=40000,user_id=0,group_id=0,allow_other", dev_fuse);
    let mountopts_c = CString::new(mountopts).unwrap();
    let source = CString::new("fuse-grootfs").unwrap();
    let fstype = CString::new("fuse.fuse-grootfs").unwrap();
    let mountpoint_c = CString::new(mountpoint.as_os_str().as_encoded_bytes()).map_err(|_| fatal("mountpoint path has a NUL byte"))?;

    let res = unsafe {
        libc::mount(
            source.as_ptr(),
            mountpoint_c.as_ptr(),
            fstype.as_ptr(),
            libc::MS_NOSUID | libc::MS_NODEV,
            mountopts_c.as_ptr() as *const libc::c_void,
        )
    };
    if res != 0 {
        unsafe { libc::close(dev_fuse) };
        return Err(fatal(format!("mount fuse at {} failed: {}", mountpoint.display(), std::io::Error::last_os_error())));
    }
    Ok(dev_fuse)
}

/// Raise every currently-effective capability into the ambient set so it
/// survives a subsequent `exec` inside the new user namespace.
fn keep_caps() -> Result<(), BringUpError> {
    let effective = caps::read(None, CapSet::Effective).map_err(|e| fatal(format!("capget failed: {e}")))?;
    let permitted = caps::read(None, CapSet::Permitted).map_err(|e| fatal(format!("capget failed: {e}")))?;
    for cap in &permitted {
        caps::raise(None, CapSet::Inheritable, *cap).map_err(|e| fatal(format!("capset failed: {e}")))?;
    }
    for cap in &effective {
        if let Err(e) = raise_ambient(*cap) {
            tracing::warn!(?cap, error = %e, "groot: failed to add ambient capability");
        }
    }
    Ok(())
}

fn raise_ambient(cap: Capability) -> Result<(), std::io::Error> {
    let res = unsafe { libc::prctl(libc::PR_CAP_AMBIENT, libc::PR_CAP_AMBIENT_RAISE, cap as libc::c_ulong, 0, 0) };
    if res != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINVAL) {
            return Err(err);
        }
    }
    Ok(())
}

/// Outcome of a bring-up: which targets actually ended up mounted and
/// serving requests.
pub struct BringUpReport {
    pub mounted: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Run the full bring-up sequence for `targets`, each a directory to
/// present a virtualized view of. Blocks until every
/// worker session has been set up (or failed). The caller continues
/// running as the "root" process inside the new user namespace; the
/// worker sessions run detached in the background.
pub fn bring_up(targets: &[PathBuf], config: EngineConfig) -> Result<BringUpReport, BringUpError> {
    let real_uid = unsafe { libc::getuid() };
    let real_gid = unsafe { libc::getgid() };
    let main_pid = unsafe { libc::getpid() };

    let username = resolve_username(real_uid).ok_or_else(|| fatal("could not resolve calling user's name"))?;

    let (subuid_path, subgid_path) = default_subid_paths();
    let uid_mapping = build_idmap(&username, subuid_path, real_uid);
    let gid_mapping = build_idmap(&username, subgid_path, real_gid);

    let worker_targets: Vec<Target> = targets.iter().map(Target::new).collect();
    let skipped: Vec<PathBuf> = worker_targets.iter().filter(|t| !t.is_open()).map(|t| t.path.clone()).collect();
    let mounted: Vec<PathBuf> = worker_targets.iter().filter(|t| t.is_open()).map(|t| t.path.clone()).collect();

    let fuse_status_socket = if !worker_targets.is_empty() { Some(start_fuse_process(&worker_targets, config)) } else { None };

    let uidmap_status_socket = start_uidmap_process(main_pid, &uid_mapping, &gid_mapping);

    if unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } < 0 {
        return Err(fatal("prctl(PR_SET_NO_NEW_PRIVS) failed"));
    }

    if unsafe { libc::unshare(libc::CLONE_NEWNS | libc::CLONE_NEWUSER) } != 0 {
        return Err(fatal(format!("unshare failed: {}", std::io::Error::last_os_error())));
    }

    let wake = [b'x'];
    if unsafe { libc::write(uidmap_status_socket, wake.as_ptr() as *const libc::c_void, 1) } < 0 {
        return Err(fatal("write to id-map status socket failed"));
    }

    let mut ack = [0u8; 1];
    let n = loop {
        let n = unsafe { libc::read(uidmap_status_socket, ack.as_mut_ptr() as *mut libc::c_void, 1) };
        if n >= 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            break n;
        }
    };
    unsafe { libc::close(uidmap_status_socket) };
    if n != 1 {
        return Err(fatal("Failed to setup uid/gid mappings"));
    }

    if let Some(fuse_socket) = fuse_status_socket {
        for t in &mounted {
            let dev_fuse = mount_fuse_fd_at(t)?;
            let res = send_fd(fuse_socket, dev_fuse);
            unsafe { libc::close(dev_fuse) };
            res.map_err(|e| fatal(format!("send fd failed: {e}")))?;
        }

        let mut buf = [0u8; 1];
        let n = unsafe { libc::read(fuse_socket, buf.as_mut_ptr() as *mut libc::c_void, 1) };
        unsafe { libc::close(fuse_socket) };
        if n <= 0 {
            return Err(fatal("Fuse setup failed, exiting"));
        }
    }

    keep_caps()?;

    Ok(BringUpReport { mounted, skipped })
}
