//! Attribute namespace filter (`spec.md §4.4`): projects a client-visible
//! xattr namespace onto the backing `user.grootfs.<name>` keys, hiding the
//! engine's own `user.grootfs` record.
//!
//! Grounded in `original_source/grootfs.c`'s `grootfs_setxattr` /
//! `grootfs_getxattr` / `grootfs_listxattr` / `grootfs_removexattr`, which
//! mangle the client name with the same `user.grootfs.` prefix and walk a
//! resizing scratch buffer for `listxattr`.

use std::ffi::OsStr;

use crate::error::{Error, Result};
use crate::metadata::store::{raw, RECORD_KEY};

const CLIENT_PREFIX: &str = "user.grootfs.";

fn mangle(name: &str) -> String {
    format!("{CLIENT_PREFIX}{name}")
}

/// `setxattr(name, value, flags)`: store under `user.grootfs.<name>`.
pub fn setxattr(proc_path: &OsStr, name: &str, value: &[u8]) -> Result<()> {
    raw::lsetxattr(proc_path, &mangle(name), value)
        .map_err(|e| Error::syscall(e.raw_os_error().unwrap_or(libc::EIO)))
}

/// `getxattr(name, buf)`: fetch `user.grootfs.<name>`, returning its length.
pub fn getxattr(proc_path: &OsStr, name: &str, buf: &mut [u8]) -> Result<usize> {
    raw::lgetxattr(proc_path, &mangle(name), buf)
        .map_err(|e| Error::syscall(e.raw_os_error().unwrap_or(libc::EIO)))
}

/// `removexattr(name)`.
pub fn removexattr(proc_path: &OsStr, name: &str) -> Result<()> {
    raw::lremovexattr(proc_path, &mangle(name))
        .map_err(|e| Error::syscall(e.raw_os_error().unwrap_or(libc::EIO)))
}

/// `listxattr(buf)`: list the backing object's attributes, resizing the
/// scratch buffer on `ERANGE`, then keep only client-prefixed names with the
/// prefix stripped. Size semantics match the host `listxattr` convention:
/// `buf.is_empty()` returns only the byte count that would be needed; a
/// non-empty buffer too small to hold the result is `ERANGE`.
pub fn listxattr(proc_path: &OsStr, buf: &mut [u8]) -> Result<usize> {
    let names = list_backing_names(proc_path)?;
    let client_names: Vec<&str> =
        names.iter().filter_map(|n| n.strip_prefix(CLIENT_PREFIX)).filter(|n| *n != RECORD_KEY).collect();
    let needed: usize = client_names.iter().map(|n| n.len() + 1).sum();

    if buf.is_empty() {
        return Ok(needed);
    }
    if buf.len() < needed {
        return Err(Error::syscall(libc::ERANGE));
    }

    let mut off = 0;
    for n in &client_names {
        buf[off..off + n.len()].copy_from_slice(n.as_bytes());
        buf[off + n.len()] = 0;
        off += n.len() + 1;
    }
    Ok(needed)
}

/// Fetch and null-split the backing object's full (unmangled) xattr name
/// list, growing the scratch buffer on `ERANGE` (`spec.md §4.4`).
fn list_backing_names(proc_path: &OsStr) -> Result<Vec<String>> {
    let mut size = 4096usize;
    loop {
        let mut buf = vec![0u8; size];
        match raw::llistxattr(proc_path, &mut buf) {
            Ok(n) => {
                let names = buf[..n]
                    .split(|&b| b == 0)
                    .filter(|s| !s.is_empty())
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .collect();
                return Ok(names);
            }
            Err(e) if e.raw_os_error() == Some(libc::ERANGE) => {
                size *= 2;
                continue;
            }
            Err(e) => return Err(Error::syscall(e.raw_os_error().unwrap_or(libc::EIO))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Record, RECORD_LEN};
    use std::os::fd::AsRawFd;

    fn proc_path_for(dir: &std::path::Path, name: &str) -> std::ffi::OsString {
        let f = std::fs::File::open(dir.join(name)).unwrap();
        crate::path::proc_fd_path(f.as_raw_fd(), None)
    }

    #[test]
    fn set_get_list_round_trip_hides_record_key() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f"), b"x").unwrap();
        let p = proc_path_for(tmp.path(), "f");

        setxattr(&p, "myattr", b"v").unwrap();
        // also plant the engine's own record so we can assert it stays hidden.
        raw::lsetxattr(&p, super::RECORD_KEY, &Record::ZERO.encode()).unwrap();
        assert_eq!(RECORD_LEN, 16);

        let mut buf = [0u8; 64];
        let n = getxattr(&p, "myattr", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"v");

        let needed = listxattr(&p, &mut []).unwrap();
        let mut list_buf = vec![0u8; needed];
        let got = listxattr(&p, &mut list_buf).unwrap();
        assert_eq!(got, needed);
        let listed: Vec<&str> =
            list_buf[..got].split(|&b| b == 0).filter(|s| !s.is_empty()).map(|s| std::str::from_utf8(s).unwrap()).collect();
        assert_eq!(listed, vec!["myattr"]);
    }

    #[test]
    fn listxattr_too_small_buffer_is_erange() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f"), b"x").unwrap();
        let p = proc_path_for(tmp.path(), "f");
        setxattr(&p, "myattr", b"v").unwrap();

        let err = listxattr(&p, &mut [0u8; 1]).unwrap_err();
        assert_eq!(err.errno(), libc::ERANGE);
    }

    #[test]
    fn removexattr_removes_client_key() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f"), b"x").unwrap();
        let p = proc_path_for(tmp.path(), "f");
        setxattr(&p, "myattr", b"v").unwrap();
        removexattr(&p, "myattr").unwrap();
        let needed = listxattr(&p, &mut []).unwrap();
        assert_eq!(needed, 0);
    }
}
