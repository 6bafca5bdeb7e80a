//! Passing a single open file descriptor across an `AF_UNIX` socket via
//! ancillary data: a one-byte payload carried alongside a `SCM_RIGHTS`
//! control message holding exactly one descriptor.

use std::io;
use std::mem::size_of;
use std::os::fd::RawFd;

#[repr(C)]
struct CmsgSpace {
    hdr: libc::cmsghdr,
    fd: libc::c_int,
}

/// Send `fd` to the peer on `socket`, carried as `SCM_RIGHTS` ancillary
/// data alongside a one-byte payload.
pub fn send_fd(socket: RawFd, fd: RawFd) -> io::Result<()> {
    let mut iobuf = [0u8; 1];
    let mut iov = libc::iovec { iov_base: iobuf.as_mut_ptr() as *mut libc::c_void, iov_len: iobuf.len() };
    let mut cmsg_space = CmsgSpace { hdr: unsafe { std::mem::zeroed() }, fd: 0 };

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = &mut cmsg_space as *mut CmsgSpace as *mut libc::c_void;
    msg.msg_controllen = size_of::<CmsgSpace>();

    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if cmsg.is_null() {
            return Err(io::Error::new(io::ErrorKind::Other, "no room for cmsg"));
        }
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(size_of::<libc::c_int>() as u32) as usize;
        std::ptr::copy_nonoverlapping(&fd as *const RawFd as *const u8, libc::CMSG_DATA(cmsg), size_of::<libc::c_int>());
    }

    let res = unsafe { libc::sendmsg(socket, &msg, 0) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Receive one descriptor sent by [`send_fd`] on `socket`.
pub fn recv_fd(socket: RawFd) -> io::Result<RawFd> {
    let mut iobuf = [0u8; 1];
    let mut iov = libc::iovec { iov_base: iobuf.as_mut_ptr() as *mut libc::c_void, iov_len: iobuf.len() };
    let mut cmsg_space = CmsgSpace { hdr: unsafe { std::mem::zeroed() }, fd: 0 };

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = &mut cmsg_space as *mut CmsgSpace as *mut libc::c_void;
    msg.msg_controllen = size_of::<CmsgSpace>();

    let res = unsafe { libc::recvmsg(socket, &mut msg, 0) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let mut received: RawFd = -1;
                std::ptr::copy_nonoverlapping(libc::CMSG_DATA(cmsg), &mut received as *mut RawFd as *mut u8, size_of::<libc::c_int>());
                return Ok(received);
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }
    Err(io::Error::new(io::ErrorKind::Other, "no fd received"))
}
