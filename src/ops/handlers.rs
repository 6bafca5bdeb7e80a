//! [`Engine`]: the backing-directory-descriptor-scoped implementation of
//! every filesystem operation handler.

use std::ffi::{CString, OsStr, OsString};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::metadata::record::MODE_PERM_MASK;
use crate::metadata::symlink;
use crate::metadata::{MetadataStore, Record};
use crate::path::{self, PathInfo};

use super::real_mode::get_real_mode;
use super::{FileHandle, RequestContext};

fn cstr(s: &OsStr) -> CString {
    CString::new(s.as_bytes()).expect("path must not contain an embedded NUL")
}

fn is_dir(st: &libc::stat) -> bool {
    st.st_mode & libc::S_IFMT == libc::S_IFDIR
}

fn is_symlink(st: &libc::stat) -> bool {
    st.st_mode & libc::S_IFMT == libc::S_IFLNK
}

/// One directory entry as produced by [`Engine::readdir`], with the kernel's
/// `d_type` preserved: the real type is forwarded as-is, with fake-devnode
/// emulation left out of scope.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: OsString,
    pub d_type: u8,
    pub ino: u64,
}

/// Owns the backing directory descriptor and the UID/GID clamp ceilings for
/// one session.
pub struct Engine {
    root: OwnedFd,
    config: EngineConfig,
}

impl Engine {
    pub fn new(root: OwnedFd, config: EngineConfig) -> Self {
        Self { root, config }
    }

    pub fn root_fd(&self) -> RawFd {
        self.root.as_raw_fd()
    }

    fn fstatat(dirfd: RawFd, name: &OsStr, flags: libc::c_int) -> Result<libc::stat> {
        let cname = cstr(name);
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        let res = unsafe { libc::fstatat(dirfd, cname.as_ptr(), &mut st, flags) };
        if res == 0 {
            Ok(st)
        } else {
            Err(Error::last_os_error())
        }
    }

    /// Fetch the real `stat` plus the fake record for a parent+basename
    /// addressed object, routing through the symlink placeholder when the
    /// object is itself a symlink.
    fn record_for(&self, parent: RawFd, name: &OsStr, allow_enoent: bool) -> Result<(libc::stat, Record)> {
        let st = Self::fstatat(parent, name, libc::AT_SYMLINK_NOFOLLOW)?;
        let rec = if is_symlink(&st) {
            MetadataStore::get_symlink(self.root_fd(), st.st_dev, st.st_ino)?
        } else {
            MetadataStore::get_by_parent(parent, name, allow_enoent)?
        };
        Ok((st, rec))
    }

    /// `getattr`/`lstat`: returns the real stat with the fake record applied.
    pub fn getattr(&self, path: &OsStr) -> Result<libc::stat> {
        let info = PathInfo::resolve(self.root_fd(), path)?;
        let (mut st, rec) = self.record_for(info.parent_fd(), &info.basename, true)?;
        rec.apply(&mut st, self.config.max_uid, self.config.max_gid);
        Ok(st)
    }

    /// `fgetattr`: descriptor-addressed stat. Open file descriptors are
    /// never symlinks, so no placeholder indirection is needed.
    pub fn fgetattr(&self, fd: RawFd) -> Result<libc::stat> {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut st) } != 0 {
            return Err(Error::last_os_error());
        }
        let rec = MetadataStore::get_by_fd(fd)?;
        rec.apply(&mut st, self.config.max_uid, self.config.max_gid);
        Ok(st)
    }

    /// `chmod(path, mode)`. The kernel pre-resolves symlinks for this
    /// operation, so the basename here already names the real target — no
    /// placeholder branch needed.
    pub fn chmod(&self, path: &OsStr, mode: u32) -> Result<()> {
        let info = PathInfo::resolve(self.root_fd(), path)?;
        let st = Self::fstatat(info.parent_fd(), &info.basename, libc::AT_SYMLINK_NOFOLLOW)?;
        let real_mode = get_real_mode(is_dir(&st), mode & (libc::S_IXUSR as u32) != 0);

        let cname = cstr(&info.basename);
        if unsafe { libc::fchmodat(info.parent_fd(), cname.as_ptr(), real_mode, 0) } != 0 {
            return Err(Error::last_os_error());
        }

        let existing = MetadataStore::get_by_parent(info.parent_fd(), &info.basename, false)?;
        let rec = existing.with_mode(mode);
        MetadataStore::set_by_parent(info.parent_fd(), &info.basename, &rec)
    }

    /// `chown(path, uid, gid)`; `None` leaves the corresponding field
    /// untouched (the `-1` sentinel a caller uses to mean "don't change this").
    pub fn chown(&self, path: &OsStr, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let info = PathInfo::resolve(self.root_fd(), path)?;
        let st = Self::fstatat(info.parent_fd(), &info.basename, libc::AT_SYMLINK_NOFOLLOW)?;

        if is_symlink(&st) {
            let existing = MetadataStore::get_symlink(self.root_fd(), st.st_dev, st.st_ino)?;
            let rec = existing.with_chown(uid, gid);
            MetadataStore::set_symlink(self.root_fd(), st.st_dev, st.st_ino, &rec)
        } else {
            let existing = MetadataStore::get_by_parent(info.parent_fd(), &info.basename, false)?;
            let rec = existing.with_chown(uid, gid);
            MetadataStore::set_by_parent(info.parent_fd(), &info.basename, &rec)
        }
    }

    /// `mkdir(path, mode)`: real backing directory plus a fresh record
    /// carrying the requested mode and the caller's uid/gid.
    pub fn mkdir(&self, path: &OsStr, mode: u32, ctx: RequestContext) -> Result<()> {
        let info = PathInfo::resolve(self.root_fd(), path)?;
        let real_mode = get_real_mode(true, false);
        let cname = cstr(&info.basename);
        if unsafe { libc::mkdirat(info.parent_fd(), cname.as_ptr(), real_mode) } != 0 {
            return Err(Error::last_os_error());
        }
        let rec = Record::fresh(ctx.uid, ctx.gid, mode);
        MetadataStore::set_by_parent(info.parent_fd(), &info.basename, &rec)
    }

    /// `open`/`create`: forces `O_EXCL` on a first attempt when `O_CREAT` was
    /// requested without it, purely to learn whether this call created the
    /// file; retries without `O_EXCL` on `EEXIST`.
    pub fn open(&self, path: &OsStr, flags: i32, mode: u32, ctx: RequestContext) -> Result<FileHandle> {
        let info = PathInfo::resolve(self.root_fd(), path)?;
        let o_creat = flags & libc::O_CREAT != 0;
        let o_excl = flags & libc::O_EXCL != 0;
        let real_mode = get_real_mode(false, mode & (libc::S_IXUSR as u32) != 0);
        let cname = cstr(&info.basename);

        let mut created_file = o_creat;
        let mut try_flags = flags;
        if o_creat && !o_excl {
            try_flags |= libc::O_EXCL;
        }

        let mut fd = unsafe { libc::openat(info.parent_fd(), cname.as_ptr(), try_flags, real_mode) };
        if fd == -1 && o_creat && !o_excl && std::io::Error::last_os_error().raw_os_error() == Some(libc::EEXIST) {
            created_file = false;
            fd = unsafe { libc::openat(info.parent_fd(), cname.as_ptr(), flags, real_mode) };
        }
        if fd == -1 {
            return Err(Error::last_os_error());
        }

        if created_file {
            let rec = Record::fresh(ctx.uid, ctx.gid, mode);
            if let Err(e) = MetadataStore::set_by_fd(fd, &rec) {
                unsafe { libc::close(fd) };
                return Err(e);
            }
        }

        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    pub fn read(&self, fd: RawFd, buf: &mut [u8], offset: i64) -> Result<usize> {
        let n = unsafe { libc::pread(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), offset) };
        if n < 0 {
            Err(Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    pub fn write(&self, fd: RawFd, buf: &[u8], offset: i64) -> Result<usize> {
        let n = unsafe { libc::pwrite(fd, buf.as_ptr() as *const libc::c_void, buf.len(), offset) };
        if n < 0 {
            Err(Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    pub fn fsync(&self, fd: RawFd) -> Result<()> {
        if unsafe { libc::fsync(fd) } != 0 {
            Err(Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// `unlink(path)`: unlink the backing object, plus its symlink
    /// placeholder if it carried one.
    pub fn unlink(&self, path: &OsStr) -> Result<()> {
        let rel = path::ensure_relative(path);
        let st = Self::fstatat(self.root_fd(), rel, libc::AT_SYMLINK_NOFOLLOW)?;
        let cname = cstr(rel);
        if unsafe { libc::unlinkat(self.root_fd(), cname.as_ptr(), 0) } != 0 {
            return Err(Error::last_os_error());
        }
        if is_symlink(&st) {
            MetadataStore::remove_symlink_placeholder(self.root_fd(), st.st_dev, st.st_ino)?;
        }
        Ok(())
    }

    pub fn rmdir(&self, path: &OsStr) -> Result<()> {
        let rel = path::ensure_relative(path);
        let cname = cstr(rel);
        if unsafe { libc::unlinkat(self.root_fd(), cname.as_ptr(), libc::AT_REMOVEDIR) } != 0 {
            Err(Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn rename(&self, from: &OsStr, to: &OsStr) -> Result<()> {
        let from_rel = cstr(path::ensure_relative(from));
        let to_rel = cstr(path::ensure_relative(to));
        let root = self.root_fd();
        if unsafe { libc::renameat(root, from_rel.as_ptr(), root, to_rel.as_ptr()) } != 0 {
            Err(Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn link(&self, from: &OsStr, to: &OsStr) -> Result<()> {
        let from_rel = cstr(path::ensure_relative(from));
        let to_rel = cstr(path::ensure_relative(to));
        let root = self.root_fd();
        if unsafe { libc::linkat(root, from_rel.as_ptr(), root, to_rel.as_ptr(), 0) } != 0 {
            Err(Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// `symlink(target, link_path)`: also writes an owner-only record onto
    /// the new symlink's placeholder so a subsequent `stat` reports the
    /// caller as owner.
    pub fn symlink(&self, target: &OsStr, link_path: &OsStr, ctx: RequestContext) -> Result<()> {
        let link_rel = path::ensure_relative(link_path);
        let target_c = cstr(target);
        let link_c = cstr(link_rel);
        if unsafe { libc::symlinkat(target_c.as_ptr(), self.root_fd(), link_c.as_ptr()) } != 0 {
            return Err(Error::last_os_error());
        }
        let st = Self::fstatat(self.root_fd(), link_rel, libc::AT_SYMLINK_NOFOLLOW)?;
        let rec = Record::owner_only(ctx.uid, ctx.gid);
        MetadataStore::set_symlink(self.root_fd(), st.st_dev, st.st_ino, &rec)
    }

    /// `readlink(path)`: the kernel wants the result NUL-terminated even if
    /// truncated to `buf.len() - 1` bytes.
    pub fn readlink(&self, path: &OsStr, buf: &mut [u8]) -> Result<usize> {
        let rel = path::ensure_relative(path);
        let cname = cstr(rel);
        let cap = buf.len().saturating_sub(1);
        let n = unsafe {
            libc::readlinkat(self.root_fd(), cname.as_ptr(), buf.as_mut_ptr() as *mut libc::c_char, cap)
        };
        if n < 0 {
            return Err(Error::last_os_error());
        }
        let n = n as usize;
        buf[n] = 0;
        Ok(n)
    }

    /// `truncate(path, size)`: opens `O_NOFOLLOW|O_WRONLY` rather than
    /// truncating via a path-based syscall.
    pub fn truncate(&self, path: &OsStr, size: i64) -> Result<()> {
        let rel = path::ensure_relative(path);
        let cname = cstr(rel);
        let fd = unsafe { libc::openat(self.root_fd(), cname.as_ptr(), libc::O_NOFOLLOW | libc::O_WRONLY) };
        if fd == -1 {
            return Err(Error::last_os_error());
        }
        let res = unsafe { libc::ftruncate(fd, size) };
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        if res != 0 {
            Err(Error::syscall(err.raw_os_error().unwrap_or(libc::EIO)))
        } else {
            Ok(())
        }
    }

    pub fn ftruncate(&self, fd: RawFd, size: i64) -> Result<()> {
        if unsafe { libc::ftruncate(fd, size) } != 0 {
            Err(Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn utimens(&self, path: &OsStr, atime: libc::timespec, mtime: libc::timespec) -> Result<()> {
        let rel = path::ensure_relative(path);
        let cname = cstr(rel);
        let times = [atime, mtime];
        if unsafe {
            libc::utimensat(self.root_fd(), cname.as_ptr(), times.as_ptr(), libc::AT_SYMLINK_NOFOLLOW)
        } != 0
        {
            Err(Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// `access(path, mode)`: real permissions always grant access under the
    /// fixed real-mode convention; the engine does not gate on emulated
    /// ownership.
    pub fn access(&self, path: &OsStr, mode: i32) -> Result<()> {
        let rel = path::ensure_relative(path);
        let cname = cstr(rel);
        if unsafe { libc::faccessat(self.root_fd(), cname.as_ptr(), mode, libc::AT_SYMLINK_NOFOLLOW) } != 0 {
            Err(Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn statfs(&self) -> Result<libc::statvfs> {
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstatvfs(self.root_fd(), &mut st) } != 0 {
            Err(Error::last_os_error())
        } else {
            Ok(st)
        }
    }

    /// `mknod`: unsupported, always a read-only-filesystem error.
    pub fn mknod(&self) -> Result<()> {
        Err(Error::unsupported())
    }

    /// `readdir(path)`, filtering out any name beginning with the engine's
    /// reserved prefix.
    pub fn readdir(&self, path: &OsStr) -> Result<Vec<DirEntry>> {
        let rel = path::ensure_relative(path);
        let dfd = if rel == OsStr::new(".") {
            let dup = unsafe { libc::fcntl(self.root_fd(), libc::F_DUPFD_CLOEXEC, 3) };
            if dup < 0 {
                return Err(Error::last_os_error());
            }
            unsafe { libc::lseek(dup, 0, libc::SEEK_SET) };
            dup
        } else {
            let cname = cstr(rel);
            let fd = unsafe {
                libc::openat(
                    self.root_fd(),
                    cname.as_ptr(),
                    libc::O_RDONLY | libc::O_NONBLOCK | libc::O_DIRECTORY | libc::O_CLOEXEC,
                )
            };
            if fd < 0 {
                return Err(Error::last_os_error());
            }
            fd
        };

        let dirp = unsafe { libc::fdopendir(dfd) };
        if dirp.is_null() {
            unsafe { libc::close(dfd) };
            return Err(Error::last_os_error());
        }

        let mut entries = Vec::new();
        loop {
            unsafe { *libc::__errno_location() = 0 };
            let de = unsafe { libc::readdir(dirp) };
            if de.is_null() {
                break;
            }
            let name_ptr = unsafe { (*de).d_name.as_ptr() };
            let name_bytes = unsafe { std::ffi::CStr::from_ptr(name_ptr) }.to_bytes();
            let name = OsString::from_vec(name_bytes.to_vec());
            if symlink::is_reserved(&name) {
                continue;
            }
            entries.push(DirEntry { name, d_type: unsafe { (*de).d_type }, ino: unsafe { (*de).d_ino } });
        }
        unsafe { libc::closedir(dirp) };
        Ok(entries)
    }

    /// `setxattr(path, name, value, flags)`.
    pub fn setxattr(&self, path: &OsStr, name: &str, value: &[u8]) -> Result<()> {
        let info = PathInfo::resolve(self.root_fd(), path)?;
        crate::xattr::setxattr(&info.proc_path(), name, value)
    }

    pub fn getxattr(&self, path: &OsStr, name: &str, buf: &mut [u8]) -> Result<usize> {
        let info = PathInfo::resolve(self.root_fd(), path)?;
        crate::xattr::getxattr(&info.proc_path(), name, buf)
    }

    pub fn listxattr(&self, path: &OsStr, buf: &mut [u8]) -> Result<usize> {
        let info = PathInfo::resolve(self.root_fd(), path)?;
        crate::xattr::listxattr(&info.proc_path(), buf)
    }

    pub fn removexattr(&self, path: &OsStr, name: &str) -> Result<()> {
        let info = PathInfo::resolve(self.root_fd(), path)?;
        crate::xattr::removexattr(&info.proc_path(), name)
    }
}

/// The record's permission mask, re-exported for callers that construct
/// modes outside the codec (e.g. the session dispatch layer).
pub const MODE_MASK: u32 = MODE_PERM_MASK;

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_in(dir: &std::path::Path) -> Engine {
        let root = std::fs::File::open(dir).unwrap();
        Engine::new(OwnedFd::from(root), EngineConfig::default())
    }

    fn ctx(uid: u32, gid: u32) -> RequestContext {
        RequestContext { uid, gid }
    }

    #[test]
    fn create_then_stat_reports_caller_as_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_in(tmp.path());
        let fh = engine
            .open(OsStr::new("a"), libc::O_CREAT | libc::O_WRONLY, 0o640, ctx(1000, 1000))
            .unwrap();
        drop(fh);
        let st = engine.getattr(OsStr::new("a")).unwrap();
        assert_eq!(st.st_uid, 1000);
        assert_eq!(st.st_gid, 1000);
        assert_eq!(st.st_mode & MODE_MASK, 0o640);
    }

    #[test]
    fn mkdir_chown_chmod_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_in(tmp.path());
        engine.mkdir(OsStr::new("d"), 0o700, ctx(1000, 1000)).unwrap();
        engine.chown(OsStr::new("d"), Some(0), Some(0)).unwrap();
        engine.chmod(OsStr::new("d"), 0o555).unwrap();
        let st = engine.getattr(OsStr::new("d")).unwrap();
        assert_eq!(st.st_uid, 0);
        assert_eq!(st.st_gid, 0);
        assert_eq!(st.st_mode & MODE_MASK, 0o555);
    }

    #[test]
    fn symlink_chown_round_trips_and_unlink_removes_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_in(tmp.path());
        engine.symlink(OsStr::new("target"), OsStr::new("s"), ctx(7, 8)).unwrap();
        engine.chown(OsStr::new("s"), Some(42), Some(43)).unwrap();
        let st = engine.getattr(OsStr::new("s")).unwrap();
        assert_eq!(st.st_uid, 42);
        assert_eq!(st.st_gid, 43);

        let placeholder_count = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".groot.symlink."))
            .count();
        assert_eq!(placeholder_count, 1);

        engine.unlink(OsStr::new("s")).unwrap();
        let placeholder_count = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with(".groot.symlink."))
            .count();
        assert_eq!(placeholder_count, 0);
    }

    #[test]
    fn clamp_hides_uid_above_ceiling() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("f"), b"x").unwrap();
        let root = std::fs::File::open(tmp.path()).unwrap();
        let engine = Engine::new(OwnedFd::from(root), EngineConfig::new(65535, 65535));
        // no fake record set; stat reflects the real (test-process) owner,
        // which is below any ceiling in CI, so instead assert the clamp
        // logic directly via a forged record through chown.
        engine.chown(OsStr::new("f"), Some(100_000), None).unwrap();
        let st = engine.getattr(OsStr::new("f")).unwrap();
        assert_eq!(st.st_uid, 0);
    }

    #[test]
    fn readdir_filters_reserved_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("visible"), b"x").unwrap();
        std::fs::write(tmp.path().join(".groot.symlink.1_1"), b"x").unwrap();
        let engine = engine_in(tmp.path());
        let names: Vec<String> =
            engine.readdir(OsStr::new("")).unwrap().into_iter().map(|e| e.name.to_string_lossy().into_owned()).collect();
        assert!(names.contains(&"visible".to_string()));
        assert!(!names.iter().any(|n| n.starts_with(".groot.")));
    }

    #[test]
    fn unsupported_mknod_is_rofs() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_in(tmp.path());
        let err = engine.mknod().unwrap_err();
        assert_eq!(err.errno(), libc::EROFS);
    }
}
