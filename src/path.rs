//! Backing-path resolver.
//!
//! Every mutating operation works from a parent directory descriptor plus a
//! basename rather than a full path, both so a racing rename of a path
//! component can't be exploited and so xattr operations — which often only
//! accept a path, not a descriptor — can be expressed against
//! `/proc/self/fd/<n>/<name>`.

use std::ffi::{OsStr, OsString};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;

use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;

use crate::error::{Error, Result};

/// Strip leading slashes; the empty string maps to `"."` (the root).
pub fn ensure_relative(path: &OsStr) -> &OsStr {
    let bytes = path.as_bytes();
    let trimmed = bytes.iter().position(|&b| b != b'/').map(|i| &bytes[i..]).unwrap_or(b"");
    if trimmed.is_empty() {
        OsStr::new(".")
    } else {
        OsStr::from_bytes(trimmed)
    }
}

/// Split a trailing-slash-stripped relative path into `(parent, basename)`.
/// The root's parent is itself with basename `"."`.
fn split_parent(path: &OsStr) -> (OsString, OsString) {
    let mut bytes = path.as_bytes();
    while bytes.len() > 1 && bytes.last() == Some(&b'/') {
        bytes = &bytes[..bytes.len() - 1];
    }
    match bytes.iter().rposition(|&b| b == b'/') {
        None => (OsString::from("."), OsString::from(OsStr::from_bytes(bytes))),
        Some(pos) => {
            let dir = if pos == 0 { OsStr::new("/") } else { OsStr::from_bytes(&bytes[..pos]) };
            (dir.to_owned(), OsString::from(OsStr::from_bytes(&bytes[pos + 1..])))
        }
    }
}

/// Open a directory relative to `root` by a (possibly multi-component)
/// relative path.
fn open_dir_relative(root: RawFd, rel: &OsStr) -> Result<OwnedFd> {
    fcntl::openat(root, rel, OFlag::O_DIRECTORY | OFlag::O_RDONLY, Mode::empty())
        .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
        .map_err(|e| Error::syscall(e as i32))
}

// `nix` returns `RawFd` from `openat`; wrap it into an owning handle so every
// exit path closes it.
use std::os::fd::FromRawFd;

/// Split `path` into a parent directory descriptor (opened relative to
/// `root`) and a basename.
pub fn open_parent(root: RawFd, path: &OsStr) -> Result<(OwnedFd, OsString)> {
    let rel = ensure_relative(path);
    let (dir, base) = split_parent(rel);
    let dirfd = open_dir_relative(root, &dir)?;
    Ok((dirfd, base))
}

/// Compose `/proc/self/fd/<n>[/name]`, used whenever an xattr call needs a
/// path rather than a descriptor.
pub fn proc_fd_path(dfd: RawFd, name: Option<&OsStr>) -> OsString {
    let mut s = OsString::from(format!("/proc/self/fd/{}", dfd));
    if let Some(name) = name {
        s.push("/");
        s.push(name);
    }
    s
}

/// Per-request bundle assembled at handler entry and released at return:
/// the parent descriptor and basename.
pub struct PathInfo {
    pub parent: OwnedFd,
    pub basename: OsString,
}

impl PathInfo {
    pub fn resolve(root: RawFd, path: &OsStr) -> Result<Self> {
        let (parent, basename) = open_parent(root, path)?;
        Ok(Self { parent, basename })
    }

    pub fn parent_fd(&self) -> RawFd {
        self.parent.as_raw_fd()
    }

    /// `/proc/self/fd/<parent>/<basename>`, the path form most xattr syscalls need.
    pub fn proc_path(&self) -> OsString {
        proc_fd_path(self.parent_fd(), Some(&self.basename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_relative_strips_leading_slashes() {
        assert_eq!(ensure_relative(OsStr::new("/a/b")), OsStr::new("a/b"));
        assert_eq!(ensure_relative(OsStr::new("///")), OsStr::new("."));
        assert_eq!(ensure_relative(OsStr::new("")), OsStr::new("."));
    }

    #[test]
    fn split_parent_handles_root_level_names() {
        let (dir, base) = split_parent(OsStr::new("a"));
        assert_eq!(dir, OsString::from("."));
        assert_eq!(base, OsString::from("a"));
    }

    #[test]
    fn split_parent_handles_nested_paths_and_trailing_slash() {
        let (dir, base) = split_parent(OsStr::new("a/b/c/"));
        assert_eq!(dir, OsString::from("a/b"));
        assert_eq!(base, OsString::from("c"));
    }

    #[test]
    fn open_parent_resolves_against_a_real_root() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/file"), b"x").unwrap();
        let root = std::fs::File::open(tmp.path()).unwrap();
        let (dirfd, base) = open_parent(root.as_raw_fd(), OsStr::new("sub/file")).unwrap();
        assert_eq!(base, OsString::from("file"));
        drop(dirfd);
    }
}
