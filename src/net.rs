use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};

#[cfg(any(target_os = "linux", target_os = "android"))]
const IP_PKTINFO: libc::c_int = libc::IP_PKTINFO;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const IP_PKTINFO: libc::c_int = libc::IP_RECVPKTINFO;

pub fn if_nametoindex(name: &str) -> io::Result<u32> {
    let name = CString::new(name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name contains NUL"))?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(index)
}

/// Requests packet-info ancillary data on received datagrams, so the
/// receiving interface index travels with each packet.
pub fn set_pktinfo<S: AsRawFd>(socket: &S, v6: bool) -> io::Result<()> {
    let on: libc::c_int = 1;
    let (level, option) = if v6 {
        (libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO)
    } else {
        (libc::IPPROTO_IP, IP_PKTINFO)
    };
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            option,
            &on as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[repr(C, align(8))]
struct CmsgBuffer([u8; 128]);

/// `recvmsg` wrapper that pulls the receiving interface index out of the
/// IP_PKTINFO / IPV6_PKTINFO control message. Returns the datagram
/// length and the interface index (0 if the kernel sent no packet info).
pub fn recv_with_ifindex(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, u32)> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let mut control = CmsgBuffer([0u8; 128]);
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.0.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = control.0.len() as _;

    let len = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut ifindex = 0u32;
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::IPPROTO_IP && (*cmsg).cmsg_type == IP_PKTINFO {
                let info = libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo;
                ifindex = (*info).ipi_ifindex as u32;
            } else if (*cmsg).cmsg_level == libc::IPPROTO_IPV6
                && (*cmsg).cmsg_type == libc::IPV6_PKTINFO
            {
                let info = libc::CMSG_DATA(cmsg) as *const libc::in6_pktinfo;
                ifindex = (*info).ipi6_ifindex as u32;
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }
    Ok((len as usize, ifindex))
}
