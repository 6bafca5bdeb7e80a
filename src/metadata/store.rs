//! Read/write/default the fake-metadata record for a path or descriptor,
//! including the symlink placeholder indirection.
//!
//! Supports both path-addressed access (via `/proc/self/fd/<n>/<name>`) and
//! descriptor-addressed access. Symlinks are routed through a placeholder
//! file rather than attempting (and failing) to set an xattr on the
//! symlink itself.

use std::ffi::{CString, OsStr};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;

use crate::error::{Error, Result};
use crate::metadata::record::Record;
use crate::metadata::symlink;
use crate::path;

/// The engine's own bookkeeping key; never exposed to clients.
pub const RECORD_KEY: &str = "user.grootfs";

fn to_cstring(s: &OsStr) -> CString {
    CString::new(s.as_bytes()).expect("path must not contain an embedded NUL")
}

/// Raw `l*xattr`/`f*xattr` wrappers shared with the client attribute
/// namespace filter (`crate::xattr`), which addresses the same backing
/// objects under a different key.
pub(crate) mod raw {
    use super::*;

    pub fn lgetxattr(path: &OsStr, name: &str, buf: &mut [u8]) -> std::io::Result<usize> {
        let cpath = to_cstring(path);
        let cname = CString::new(name).unwrap();
        let res = unsafe {
            libc::lgetxattr(
                cpath.as_ptr(),
                cname.as_ptr(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if res < 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res as usize)
        }
    }

    pub fn lsetxattr(path: &OsStr, name: &str, value: &[u8]) -> std::io::Result<()> {
        let cpath = to_cstring(path);
        let cname = CString::new(name).unwrap();
        let res = unsafe {
            libc::lsetxattr(
                cpath.as_ptr(),
                cname.as_ptr(),
                value.as_ptr() as *const libc::c_void,
                value.len(),
                0,
            )
        };
        if res < 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn lremovexattr(path: &OsStr, name: &str) -> std::io::Result<()> {
        let cpath = to_cstring(path);
        let cname = CString::new(name).unwrap();
        let res = unsafe { libc::lremovexattr(cpath.as_ptr(), cname.as_ptr()) };
        if res < 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn llistxattr(path: &OsStr, buf: &mut [u8]) -> std::io::Result<usize> {
        let cpath = to_cstring(path);
        let res = unsafe {
            libc::llistxattr(cpath.as_ptr(), buf.as_mut_ptr() as *mut libc::c_char, buf.len())
        };
        if res < 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res as usize)
        }
    }

    pub fn fgetxattr(fd: RawFd, name: &str, buf: &mut [u8]) -> std::io::Result<usize> {
        let cname = CString::new(name).unwrap();
        let res = unsafe {
            libc::fgetxattr(fd, cname.as_ptr(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
        };
        if res < 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res as usize)
        }
    }

    pub fn fsetxattr(fd: RawFd, name: &str, value: &[u8]) -> std::io::Result<()> {
        let cname = CString::new(name).unwrap();
        let res = unsafe {
            libc::fsetxattr(fd, cname.as_ptr(), value.as_ptr() as *const libc::c_void, value.len(), 0)
        };
        if res < 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Is this `std::io::Error` one that the codec treats as "no record"?
fn is_noent_like(err: &std::io::Error, allow_enoent: bool) -> bool {
    match err.raw_os_error() {
        Some(libc::ENODATA) | Some(libc::ENOTSUP) => true,
        Some(libc::ENOENT) if allow_enoent => true,
        _ => false,
    }
}

/// Read the record stored at `path` (a real filesystem path, typically a
/// `/proc/self/fd/<n>/<name>` composite), tolerating "no record".
fn read_at_path(p: &OsStr, allow_enoent: bool) -> Result<Record> {
    let mut buf = [0u8; crate::metadata::codec::RECORD_LEN + 1];
    match raw::lgetxattr(p, RECORD_KEY, &mut buf) {
        Ok(n) if n == crate::metadata::codec::RECORD_LEN => Ok(Record::decode(&buf[..n])),
        Ok(_) => {
            tracing::warn!(path = ?p, "internal error: wrong xattr size for grootfs record");
            Err(Error::metadata())
        }
        Err(e) if is_noent_like(&e, allow_enoent) => Ok(Record::ZERO),
        Err(e) => {
            tracing::warn!(path = ?p, error = %e, "internal error reading grootfs record");
            Err(Error::syscall(e.raw_os_error().unwrap_or(libc::EIO)))
        }
    }
}

fn write_at_path(p: &OsStr, record: &Record) -> Result<()> {
    raw::lsetxattr(p, RECORD_KEY, &record.encode()).map_err(|e| {
        tracing::warn!(path = ?p, error = %e, "internal error writing grootfs record");
        Error::syscall(e.raw_os_error().unwrap_or(libc::EIO))
    })
}

fn read_at_fd(fd: RawFd) -> Result<Record> {
    let mut buf = [0u8; crate::metadata::codec::RECORD_LEN + 1];
    match raw::fgetxattr(fd, RECORD_KEY, &mut buf) {
        Ok(n) if n == crate::metadata::codec::RECORD_LEN => Ok(Record::decode(&buf[..n])),
        Ok(_) => {
            tracing::warn!(fd, "internal error: wrong xattr size for grootfs record");
            Err(Error::metadata())
        }
        Err(e) if is_noent_like(&e, false) => Ok(Record::ZERO),
        Err(e) => {
            tracing::warn!(fd, error = %e, "internal error reading grootfs record");
            Err(Error::syscall(e.raw_os_error().unwrap_or(libc::EIO)))
        }
    }
}

fn write_at_fd(fd: RawFd, record: &Record) -> Result<()> {
    raw::fsetxattr(fd, RECORD_KEY, &record.encode()).map_err(|e| {
        tracing::warn!(fd, error = %e, "internal error writing grootfs record");
        Error::syscall(e.raw_os_error().unwrap_or(libc::EIO))
    })
}

/// The metadata virtualization layer's three retrieval/storage paths: by
/// parent+basename, by open descriptor, and by symlink placeholder.
pub struct MetadataStore;

impl MetadataStore {
    /// By parent descriptor + basename, for non-symlink path-addressed ops.
    pub fn get_by_parent(parent: RawFd, name: &OsStr, allow_enoent: bool) -> Result<Record> {
        let p = path::proc_fd_path(parent, Some(name));
        read_at_path(&p, allow_enoent)
    }

    pub fn set_by_parent(parent: RawFd, name: &OsStr, record: &Record) -> Result<()> {
        let p = path::proc_fd_path(parent, Some(name));
        write_at_path(&p, record)
    }

    /// By open descriptor, for descriptor-addressed ops.
    pub fn get_by_fd(fd: RawFd) -> Result<Record> {
        read_at_fd(fd)
    }

    pub fn set_by_fd(fd: RawFd, record: &Record) -> Result<()> {
        write_at_fd(fd, record)
    }

    /// By symlink-placeholder name relative to the root descriptor, for any
    /// symlink. Always tolerates "no placeholder" as the zero record.
    pub fn get_symlink(root: RawFd, dev: u64, ino: u64) -> Result<Record> {
        let name = symlink::placeholder_name(dev, ino);
        let p = path::proc_fd_path(root, Some(OsStr::new(&name)));
        read_at_path(&p, true)
    }

    /// Create the placeholder if absent (exclusive-create, `0666`), then
    /// write the record onto it.
    pub fn set_symlink(root: RawFd, dev: u64, ino: u64, record: &Record) -> Result<()> {
        let name = symlink::placeholder_name(dev, ino);
        let cname = to_cstring(OsStr::new(&name));
        let fd = unsafe {
            libc::openat(
                root,
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_WRONLY | libc::O_CLOEXEC,
                0o666,
            )
        };
        if fd >= 0 {
            unsafe { libc::close(fd) };
        } else {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(Error::syscall(err.raw_os_error().unwrap_or(libc::EIO)));
            }
        }
        let p = path::proc_fd_path(root, Some(OsStr::new(&name)));
        write_at_path(&p, record)
    }

    /// Unlink the placeholder for a symlink being removed. Missing
    /// placeholder is not an error.
    pub fn remove_symlink_placeholder(root: RawFd, dev: u64, ino: u64) -> Result<()> {
        let name = symlink::placeholder_name(dev, ino);
        let cname = to_cstring(OsStr::new(&name));
        let res = unsafe { libc::unlinkat(root, cname.as_ptr(), 0) };
        if res == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            Ok(())
        } else {
            Err(Error::syscall(err.raw_os_error().unwrap_or(libc::EIO)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    fn open_root(dir: &std::path::Path) -> std::fs::File {
        std::fs::File::open(dir).unwrap()
    }

    #[test]
    fn missing_record_reads_as_zero() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f"), b"x").unwrap();
        let root = open_root(tmp.path());
        let rec = MetadataStore::get_by_parent(root.as_raw_fd(), OsStr::new("f"), true).unwrap();
        assert_eq!(rec, Record::ZERO);
    }

    #[test]
    fn write_then_read_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f"), b"x").unwrap();
        let root = open_root(tmp.path());
        let rec = Record::fresh(1000, 2000, 0o640);
        MetadataStore::set_by_parent(root.as_raw_fd(), OsStr::new("f"), &rec).unwrap();
        let read = MetadataStore::get_by_parent(root.as_raw_fd(), OsStr::new("f"), false).unwrap();
        assert_eq!(read, rec);
    }

    #[test]
    fn symlink_placeholder_created_lazily_and_removed_on_unlink() {
        let tmp = tempfile::tempdir().unwrap();
        let root = open_root(tmp.path());
        let rec = Record::owner_only(42, 43);
        MetadataStore::set_symlink(root.as_raw_fd(), 1, 2, &rec).unwrap();
        let name = symlink::placeholder_name(1, 2);
        assert!(tmp.path().join(&name).exists());
        let read = MetadataStore::get_symlink(root.as_raw_fd(), 1, 2).unwrap();
        assert_eq!(read, rec);
        MetadataStore::remove_symlink_placeholder(root.as_raw_fd(), 1, 2).unwrap();
        assert!(!tmp.path().join(&name).exists());
    }

    #[test]
    fn remove_nonexistent_placeholder_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let root = open_root(tmp.path());
        MetadataStore::remove_symlink_placeholder(root.as_raw_fd(), 9, 9).unwrap();
    }
}
