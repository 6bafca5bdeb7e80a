//! Translate raw kernel requests read off the [`Channel`](super::Channel)
//! into [`Engine`] calls and marshal the replies back (`spec.md §4.5`,
//! §5 "Ordering").
//!
//! The engine's handlers are path-addressed, mirroring libfuse's high-level
//! `fuse_operations` table that `original_source/grootfs.c`'s
//! `grootfs_oper` populates; the raw kernel protocol is node-id addressed,
//! so this module keeps the small path table libfuse's high-level layer
//! keeps internally (nodeid → relative path), built up by `LOOKUP` and
//! trimmed by `FORGET`.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;

use crate::error::Error;
use crate::ops::{DirEntry, Engine, RequestContext};

use super::wire::*;
use super::Channel;

struct NodeTable {
    paths: HashMap<u64, PathBuf>,
    next_id: u64,
}

impl NodeTable {
    fn new() -> Self {
        let mut paths = HashMap::new();
        paths.insert(FUSE_ROOT_ID, PathBuf::from("."));
        Self { paths, next_id: FUSE_ROOT_ID + 1 }
    }

    fn path_of(&self, nodeid: u64) -> PathBuf {
        self.paths.get(&nodeid).cloned().unwrap_or_else(|| PathBuf::from("."))
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> PathBuf {
        self.path_of(parent).join(name)
    }

    fn intern(&mut self, path: PathBuf) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.paths.insert(id, path);
        id
    }

    fn forget(&mut self, nodeid: u64) {
        if nodeid != FUSE_ROOT_ID {
            self.paths.remove(&nodeid);
        }
    }
}

struct HandleTable {
    files: HashMap<u64, OwnedFd>,
    next_fh: u64,
}

impl HandleTable {
    fn new() -> Self {
        Self { files: HashMap::new(), next_fh: 1 }
    }

    fn insert(&mut self, fd: OwnedFd) -> u64 {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.files.insert(fh, fd);
        fh
    }

    fn get(&self, fh: u64) -> Option<std::os::fd::RawFd> {
        self.files.get(&fh).map(|f| f.as_raw_fd())
    }

    fn remove(&mut self, fh: u64) {
        self.files.remove(&fh);
    }
}

struct Reply {
    buf: Vec<u8>,
}

impl Reply {
    fn ok(unique: u64, body: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(16 + body.len());
        let header = OutHeader { len: (16 + body.len()) as u32, error: 0, unique };
        buf.extend_from_slice(as_bytes(&header));
        buf.extend_from_slice(body);
        Self { buf }
    }

    fn empty(unique: u64) -> Self {
        Self::ok(unique, &[])
    }

    fn err(unique: u64, errno: i32) -> Self {
        let header = OutHeader { len: 16, error: -errno, unique };
        Self { buf: as_bytes(&header).to_vec() }
    }
}

fn errno_of(e: &Error) -> i32 {
    e.errno()
}

/// Drive the request loop for one session until the channel reports exit
/// (`spec.md §4.6`, §5 "Cancellation").
pub fn run_loop(engine: &Engine, channel: &mut Channel) {
    let mut nodes = NodeTable::new();
    let mut handles = HandleTable::new();

    loop {
        let request = match channel.receive() {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        if request.is_empty() {
            return;
        }

        let Some(header) = read_struct::<InHeader>(request) else { continue };
        let body = &request[IN_HEADER_LEN..];

        let reply = dispatch_one(engine, &mut nodes, &mut handles, &header, body);
        let _ = channel.send(&reply.buf);

        if header.opcode == FUSE_DESTROY {
            return;
        }
    }
}

fn dispatch_one(
    engine: &Engine,
    nodes: &mut NodeTable,
    handles: &mut HandleTable,
    header: &InHeader,
    body: &[u8],
) -> Reply {
    let unique = header.unique;
    let ctx = RequestContext { uid: header.uid, gid: header.gid };

    macro_rules! run {
        ($result:expr) => {
            match $result {
                Ok(v) => v,
                Err(e) => return Reply::err(unique, errno_of(&e)),
            }
        };
    }

    match header.opcode {
        FUSE_INIT => {
            let Some(init_in) = read_struct::<InitIn>(body) else { return Reply::err(unique, libc::EINVAL) };
            let out = InitOut {
                major: KERNEL_VERSION,
                minor: init_in.minor.min(KERNEL_MINOR_VERSION),
                max_readahead: init_in.max_readahead,
                flags: 0,
                max_background: 16,
                congestion_threshold: 12,
                max_write: 128 * 1024,
                time_gran: 1,
                max_pages: 0,
                padding: 0,
                unused: [0; 8],
            };
            Reply::ok(unique, as_bytes(&out))
        }
        FUSE_DESTROY => Reply::empty(unique),
        FUSE_FORGET => {
            if let Some(_forget) = read_struct::<ForgetIn>(body) {
                nodes.forget(header.nodeid);
            }
            // FORGET has no reply.
            Reply { buf: Vec::new() }
        }
        FUSE_LOOKUP => {
            let Some((name, _)) = split_cstr(body) else { return Reply::err(unique, libc::EINVAL) };
            let path = nodes.child_path(header.nodeid, name);
            let st = run!(engine.getattr(path.as_os_str()));
            let nodeid = nodes.intern(path);
            Reply::ok(unique, as_bytes(&entry_out(nodeid, &st)))
        }
        FUSE_GETATTR => {
            let path = nodes.path_of(header.nodeid);
            let st = if let Some(get) = read_struct::<GetattrIn>(body) {
                if get.getattr_flags & 1 != 0 {
                    run!(engine.fgetattr(fh_or(handles, get.fh)))
                } else {
                    run!(engine.getattr(path.as_os_str()))
                }
            } else {
                run!(engine.getattr(path.as_os_str()))
            };
            Reply::ok(unique, as_bytes(&attr_out(&st)))
        }
        FUSE_SETATTR => {
            let Some(set) = read_struct::<SetattrIn>(body) else { return Reply::err(unique, libc::EINVAL) };
            let path = nodes.path_of(header.nodeid);
            if set.valid & FATTR_MODE != 0 {
                run!(engine.chmod(path.as_os_str(), set.mode));
            }
            if set.valid & (FATTR_UID | FATTR_GID) != 0 {
                let uid = if set.valid & FATTR_UID != 0 { Some(set.uid) } else { None };
                let gid = if set.valid & FATTR_GID != 0 { Some(set.gid) } else { None };
                run!(engine.chown(path.as_os_str(), uid, gid));
            }
            if set.valid & FATTR_SIZE != 0 {
                if set.valid & FATTR_FH != 0 {
                    if let Some(fd) = handles.get(set.fh) {
                        run!(engine.ftruncate(fd, set.size as i64));
                    }
                } else {
                    run!(engine.truncate(path.as_os_str(), set.size as i64));
                }
            }
            if set.valid & (FATTR_ATIME | FATTR_MTIME) != 0 {
                let spec = |secs: u64, nsec: u32| libc::timespec { tv_sec: secs as i64, tv_nsec: nsec as i64 };
                run!(engine.utimens(path.as_os_str(), spec(set.atime, set.atimensec), spec(set.mtime, set.mtimensec)));
            }
            let st = run!(engine.getattr(path.as_os_str()));
            Reply::ok(unique, as_bytes(&attr_out(&st)))
        }
        FUSE_READLINK => {
            let path = nodes.path_of(header.nodeid);
            let mut buf = vec![0u8; libc::PATH_MAX as usize];
            let n = run!(engine.readlink(path.as_os_str(), &mut buf));
            Reply::ok(unique, &buf[..n])
        }
        FUSE_SYMLINK => {
            let Some((name, rest)) = split_cstr(body) else { return Reply::err(unique, libc::EINVAL) };
            let Some((target, _)) = split_cstr(rest) else { return Reply::err(unique, libc::EINVAL) };
            let path = nodes.child_path(header.nodeid, name);
            run!(engine.symlink(target, path.as_os_str(), ctx));
            let st = run!(engine.getattr(path.as_os_str()));
            let nodeid = nodes.intern(path);
            Reply::ok(unique, as_bytes(&entry_out(nodeid, &st)))
        }
        FUSE_MKNOD => Reply::err(unique, libc::EROFS),
        FUSE_MKDIR => {
            let Some((mk, rest)) = split_struct::<MkdirIn>(body) else { return Reply::err(unique, libc::EINVAL) };
            let Some((name, _)) = split_cstr(rest) else { return Reply::err(unique, libc::EINVAL) };
            let path = nodes.child_path(header.nodeid, name);
            run!(engine.mkdir(path.as_os_str(), mk.mode, ctx));
            let st = run!(engine.getattr(path.as_os_str()));
            let nodeid = nodes.intern(path);
            Reply::ok(unique, as_bytes(&entry_out(nodeid, &st)))
        }
        FUSE_UNLINK => {
            let Some((name, _)) = split_cstr(body) else { return Reply::err(unique, libc::EINVAL) };
            let path = nodes.child_path(header.nodeid, name);
            run!(engine.unlink(path.as_os_str()));
            Reply::empty(unique)
        }
        FUSE_RMDIR => {
            let Some((name, _)) = split_cstr(body) else { return Reply::err(unique, libc::EINVAL) };
            let path = nodes.child_path(header.nodeid, name);
            run!(engine.rmdir(path.as_os_str()));
            Reply::empty(unique)
        }
        FUSE_RENAME => {
            let Some((ren, rest)) = split_struct::<RenameIn>(body) else { return Reply::err(unique, libc::EINVAL) };
            let Some((oldname, rest)) = split_cstr(rest) else { return Reply::err(unique, libc::EINVAL) };
            let Some((newname, _)) = split_cstr(rest) else { return Reply::err(unique, libc::EINVAL) };
            let from = nodes.child_path(header.nodeid, oldname);
            let to = nodes.child_path(ren.newdir, newname);
            run!(engine.rename(from.as_os_str(), to.as_os_str()));
            Reply::empty(unique)
        }
        FUSE_LINK => {
            let Some((oldnodeid, rest)) = split_struct::<u64>(body) else { return Reply::err(unique, libc::EINVAL) };
            let Some((newparent_name, _)) = split_cstr(rest) else { return Reply::err(unique, libc::EINVAL) };
            let from = nodes.path_of(oldnodeid);
            let to = nodes.child_path(header.nodeid, newparent_name);
            run!(engine.link(from.as_os_str(), to.as_os_str()));
            let st = run!(engine.getattr(to.as_os_str()));
            let nodeid = nodes.intern(to);
            Reply::ok(unique, as_bytes(&entry_out(nodeid, &st)))
        }
        FUSE_OPEN | FUSE_CREATE => {
            let path_for_create;
            let (flags, mode, path) = if header.opcode == FUSE_CREATE {
                let Some((cr, rest)) = split_struct::<CreateIn>(body) else { return Reply::err(unique, libc::EINVAL) };
                let Some((name, _)) = split_cstr(rest) else { return Reply::err(unique, libc::EINVAL) };
                path_for_create = nodes.child_path(header.nodeid, name);
                (cr.flags as i32, cr.mode, &path_for_create)
            } else {
                let Some(op) = read_struct::<OpenIn>(body) else { return Reply::err(unique, libc::EINVAL) };
                path_for_create = nodes.path_of(header.nodeid);
                (op.flags as i32, 0o644u32, &path_for_create)
            };
            let fd = run!(engine.open(path.as_os_str(), flags, mode, ctx));
            let fh = handles.insert(fd);
            if header.opcode == FUSE_CREATE {
                let st = run!(engine.getattr(path.as_os_str()));
                let nodeid = nodes.intern(path.clone());
                let entry = entry_out(nodeid, &st);
                let open_out = OpenOut { fh, open_flags: 0, padding: 0 };
                let mut buf = as_bytes(&entry).to_vec();
                buf.extend_from_slice(as_bytes(&open_out));
                Reply::ok(unique, &buf)
            } else {
                Reply::ok(unique, as_bytes(&OpenOut { fh, open_flags: 0, padding: 0 }))
            }
        }
        FUSE_READ => {
            let Some(rd) = read_struct::<ReadIn>(body) else { return Reply::err(unique, libc::EINVAL) };
            let Some(fd) = handles.get(rd.fh) else { return Reply::err(unique, libc::EBADF) };
            let mut buf = vec![0u8; rd.size as usize];
            let n = run!(engine.read(fd, &mut buf, rd.offset as i64));
            Reply::ok(unique, &buf[..n])
        }
        FUSE_WRITE => {
            let Some((wr, data)) = split_struct::<WriteIn>(body) else { return Reply::err(unique, libc::EINVAL) };
            let Some(fd) = handles.get(wr.fh) else { return Reply::err(unique, libc::EBADF) };
            let n = run!(engine.write(fd, &data[..wr.size as usize], wr.offset as i64));
            Reply::ok(unique, as_bytes(&WriteOut { size: n as u32, padding: 0 }))
        }
        FUSE_FLUSH => Reply::empty(unique),
        FUSE_RELEASE | FUSE_RELEASEDIR => {
            if let Some(rel) = read_struct::<ReleaseIn>(body) {
                handles.remove(rel.fh);
            }
            Reply::empty(unique)
        }
        FUSE_FSYNC | FUSE_FSYNCDIR => {
            let Some(fs) = read_struct::<FsyncIn>(body) else { return Reply::err(unique, libc::EINVAL) };
            if let Some(fd) = handles.get(fs.fh) {
                run!(engine.fsync(fd));
            }
            Reply::empty(unique)
        }
        FUSE_OPENDIR => {
            let fh = handles.next_fh;
            handles.next_fh += 1;
            Reply::ok(unique, as_bytes(&OpenOut { fh, open_flags: 0, padding: 0 }))
        }
        FUSE_READDIR => {
            let Some(rd) = read_struct::<ReadIn>(body) else { return Reply::err(unique, libc::EINVAL) };
            let path = nodes.path_of(header.nodeid);
            let entries = run!(engine.readdir(path.as_os_str()));
            Reply::ok(unique, &encode_dirents(&entries, rd.offset, rd.size as usize))
        }
        FUSE_STATFS => {
            let st = run!(engine.statfs());
            Reply::ok(unique, as_bytes(&statfs_out(&st)))
        }
        FUSE_SETXATTR => {
            let Some((sx, rest)) = split_struct::<SetxattrIn>(body) else { return Reply::err(unique, libc::EINVAL) };
            let Some((name, value)) = split_cstr(rest) else { return Reply::err(unique, libc::EINVAL) };
            let path = nodes.path_of(header.nodeid);
            let name = name.to_string_lossy().into_owned();
            run!(engine.setxattr(path.as_os_str(), &name, &value[..sx.size as usize]));
            Reply::empty(unique)
        }
        FUSE_GETXATTR => {
            let Some((gx, rest)) = split_struct::<GetxattrIn>(body) else { return Reply::err(unique, libc::EINVAL) };
            let Some((name, _)) = split_cstr(rest) else { return Reply::err(unique, libc::EINVAL) };
            let path = nodes.path_of(header.nodeid);
            let name = name.to_string_lossy().into_owned();
            if gx.size == 0 {
                let n = run!(engine.getxattr(path.as_os_str(), &name, &mut []));
                Reply::ok(unique, as_bytes(&GetxattrOut { size: n as u32, padding: 0 }))
            } else {
                let mut buf = vec![0u8; gx.size as usize];
                let n = run!(engine.getxattr(path.as_os_str(), &name, &mut buf));
                Reply::ok(unique, &buf[..n])
            }
        }
        FUSE_LISTXATTR => {
            let Some(gx) = read_struct::<GetxattrIn>(body) else { return Reply::err(unique, libc::EINVAL) };
            let path = nodes.path_of(header.nodeid);
            if gx.size == 0 {
                let n = run!(engine.listxattr(path.as_os_str(), &mut []));
                Reply::ok(unique, as_bytes(&GetxattrOut { size: n as u32, padding: 0 }))
            } else {
                let mut buf = vec![0u8; gx.size as usize];
                let n = run!(engine.listxattr(path.as_os_str(), &mut buf));
                Reply::ok(unique, &buf[..n])
            }
        }
        FUSE_REMOVEXATTR => {
            let Some((name, _)) = split_cstr(body) else { return Reply::err(unique, libc::EINVAL) };
            let path = nodes.path_of(header.nodeid);
            let name = name.to_string_lossy().into_owned();
            run!(engine.removexattr(path.as_os_str(), &name));
            Reply::empty(unique)
        }
        FUSE_ACCESS => {
            let Some(ac) = read_struct::<AccessIn>(body) else { return Reply::err(unique, libc::EINVAL) };
            let path = nodes.path_of(header.nodeid);
            run!(engine.access(path.as_os_str(), ac.mask as i32));
            Reply::empty(unique)
        }
        _ => Reply::err(unique, libc::ENOSYS),
    }
}

fn fh_or(handles: &HandleTable, fh: u64) -> std::os::fd::RawFd {
    handles.get(fh).unwrap_or(-1)
}

fn entry_out(nodeid: u64, st: &libc::stat) -> EntryOut {
    EntryOut {
        nodeid,
        generation: 0,
        entry_valid: 1,
        attr_valid: 1,
        entry_valid_nsec: 0,
        attr_valid_nsec: 0,
        attr: Attr::from_stat(nodeid, st),
    }
}

fn attr_out(st: &libc::stat) -> AttrOut {
    AttrOut { attr_valid: 1, attr_valid_nsec: 0, dummy: 0, attr: Attr::from_stat(st.st_ino, st) }
}

fn statfs_out(st: &libc::statvfs) -> StatfsOut {
    StatfsOut {
        st: KStatfs {
            blocks: st.f_blocks as u64,
            bfree: st.f_bfree as u64,
            bavail: st.f_bavail as u64,
            files: st.f_files as u64,
            ffree: st.f_ffree as u64,
            bsize: st.f_bsize as u32,
            namelen: st.f_namemax as u32,
            frsize: st.f_frsize as u32,
            padding: 0,
            spare: [0; 6],
        },
    }
}

/// Each entry's synthetic `off` is its 1-based position in `entries`, which
/// is stable across calls for a given directory snapshot; the kernel resumes
/// a `READDIR` at the last `off` it saw, so entries at or before `start_off`
/// are skipped and the reply stops growing once it would exceed `max_size`.
/// A past-the-end request yields an empty body, the kernel's signal to stop.
fn encode_dirents(entries: &[DirEntry], start_off: u64, max_size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, e) in entries.iter().enumerate() {
        let off = (i + 1) as u64;
        if off <= start_off {
            continue;
        }
        if dirent_len(&e.name) > max_size.saturating_sub(out.len()) {
            break;
        }
        encode_one_dirent(&mut out, e.ino, off, e.d_type, &e.name);
    }
    out
}

fn dirent_len(name: &OsStr) -> usize {
    use std::os::unix::ffi::OsStrExt;
    let unpadded = 24 + name.as_bytes().len();
    unpadded + (8 - (unpadded % 8)) % 8
}

fn encode_one_dirent(out: &mut Vec<u8>, ino: u64, off: u64, d_type: u8, name: &OsStr) {
    use std::os::unix::ffi::OsStrExt;
    #[repr(C)]
    struct DirentHeader {
        ino: u64,
        off: u64,
        namelen: u32,
        dtype: u32,
    }
    let header = DirentHeader { ino, off, namelen: name.len() as u32, dtype: d_type as u32 };
    out.extend_from_slice(as_bytes(&header));
    out.extend_from_slice(name.as_bytes());
    let pad = (8 - (out.len() % 8)) % 8;
    out.extend(std::iter::repeat(0u8).take(pad));
}
