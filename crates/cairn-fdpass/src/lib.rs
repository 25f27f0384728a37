//! File-descriptor passing over unix domain sockets.
//!
//! A cairn reply that grants access to a shared buffer must deliver the
//! buffer's file descriptor and the reply bytes as one unit, so both
//! directions here move exactly one fd glued to an inline payload in a single
//! `sendmsg`/`recvmsg` with `SCM_RIGHTS` ancillary data.
//!
//! The sync functions work on raw fds; the async wrappers drive a tokio
//! [`UnixStream`] through readiness and retry on `WouldBlock`.

use std::io::{self, ErrorKind};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tokio::io::Interest;
use tokio::net::UnixStream;

/// Send `payload` plus one fd in a single `sendmsg`.
///
/// The fd stays valid in the sender; the receiver gets an independent
/// reference to the same kernel file.
pub fn send_fd_with_payload(sock: RawFd, fd: RawFd, payload: &[u8]) -> io::Result<()> {
    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };

    let fds = [fd];
    let data_len = std::mem::size_of_val(&fds);
    let cmsg_space = unsafe { libc::CMSG_SPACE(data_len as u32) as usize };
    let mut control = vec![0u8; cmsg_space];

    let mut msghdr: libc::msghdr = unsafe { std::mem::zeroed() };
    msghdr.msg_iov = &mut iov;
    msghdr.msg_iovlen = 1;
    msghdr.msg_control = control.as_mut_ptr().cast();
    msghdr.msg_controllen = control.len() as _;

    let cmsg = unsafe { libc::CMSG_FIRSTHDR(&msghdr) };
    if cmsg.is_null() {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            "failed to build cmsg header",
        ));
    }
    unsafe {
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(data_len as u32) as _;
        let data_ptr = libc::CMSG_DATA(cmsg).cast::<RawFd>();
        std::ptr::copy_nonoverlapping(fds.as_ptr(), data_ptr, 1);
    }

    let n = unsafe { libc::sendmsg(sock, &msghdr, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if (n as usize) < payload.len() {
        // The payloads sent here are far below the socket buffer size; a
        // partial send means the fd and part of the payload parted ways.
        return Err(io::Error::new(
            ErrorKind::WriteZero,
            format!("short sendmsg: {n} of {} bytes", payload.len()),
        ));
    }
    Ok(())
}

/// Receive one fd and up to `payload.len()` payload bytes in a single
/// `recvmsg`. Returns the fd and how many payload bytes arrived with it.
pub fn recv_fd_with_payload(sock: RawFd, payload: &mut [u8]) -> io::Result<(OwnedFd, usize)> {
    let mut iov = libc::iovec {
        iov_base: payload.as_mut_ptr().cast(),
        iov_len: payload.len(),
    };

    let data_len = std::mem::size_of::<RawFd>();
    let cmsg_space = unsafe { libc::CMSG_SPACE(data_len as u32) as usize };
    let mut control = vec![0u8; cmsg_space];

    let mut msghdr: libc::msghdr = unsafe { std::mem::zeroed() };
    msghdr.msg_iov = &mut iov;
    msghdr.msg_iovlen = 1;
    msghdr.msg_control = control.as_mut_ptr().cast();
    msghdr.msg_controllen = control.len() as _;

    let n = unsafe { libc::recvmsg(sock, &mut msghdr, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if n == 0 {
        return Err(io::Error::new(ErrorKind::UnexpectedEof, "peer closed"));
    }
    if (msghdr.msg_flags & libc::MSG_CTRUNC) != 0 {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            "control message truncated",
        ));
    }

    let mut received: Option<RawFd> = None;
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msghdr);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let cmsg_len = (*cmsg).cmsg_len as usize;
                let base_len = libc::CMSG_LEN(0) as usize;
                if cmsg_len >= base_len + std::mem::size_of::<RawFd>() {
                    let data_ptr = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                    received = Some(*data_ptr);
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msghdr, cmsg);
        }
    }

    let raw = received.ok_or_else(|| {
        io::Error::new(ErrorKind::InvalidData, "no fd in control message")
    })?;
    // SAFETY: the kernel installed this fd for us; nothing else owns it.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    Ok((fd, n as usize))
}

/// Async [`send_fd_with_payload`] on a tokio stream.
pub async fn send_with_fd(stream: &UnixStream, fd: RawFd, payload: &[u8]) -> io::Result<()> {
    loop {
        stream.writable().await?;
        match stream.try_io(Interest::WRITABLE, || {
            send_fd_with_payload(stream.as_raw_fd(), fd, payload)
        }) {
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
            other => return other,
        }
    }
}

/// Async [`recv_fd_with_payload`] on a tokio stream.
pub async fn recv_with_fd(
    stream: &UnixStream,
    payload: &mut [u8],
) -> io::Result<(OwnedFd, usize)> {
    loop {
        stream.readable().await?;
        match stream.try_io(Interest::READABLE, || {
            recv_fd_with_payload(stream.as_raw_fd(), payload)
        }) {
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => continue,
            other => return other,
        }
    }
}
