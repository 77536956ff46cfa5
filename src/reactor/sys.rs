//! Thin wrappers over the syscalls the loop issues.
//!
//! Every function returns the raw result convention of the engine: a negative
//! value is `-errno`, anything else is success or a byte count.

use crate::error::last_code;

use libc::{
    AF_INET, AF_INET6, AF_UNIX, F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_ACCMODE,
    O_NONBLOCK, O_RDONLY, O_RDWR, O_WRONLY, SCM_RIGHTS, SHUT_WR, SO_ERROR, SO_REUSEADDR,
    SOCK_STREAM, SOL_SOCKET, c_int, c_void, iovec, msghdr, sockaddr, sockaddr_in, sockaddr_in6,
    sockaddr_storage, socklen_t,
};
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::RawFd;
use std::ptr;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: c_int = 0;

/// Upper bound on descriptors collected from a single `recvmsg`.
const MAX_RECEIVED_FDS: usize = 8;

fn check(result: c_int) -> i32 {
    if result < 0 { last_code() } else { result }
}

fn check_size(result: isize) -> isize {
    if result < 0 {
        last_code() as isize
    } else {
        result
    }
}

pub(crate) fn set_nonblocking(fd: RawFd, enable: bool) -> i32 {
    let flags = unsafe { libc::fcntl(fd, F_GETFL) };
    if flags < 0 {
        return last_code();
    }

    let wanted = if enable {
        flags | O_NONBLOCK
    } else {
        flags & !O_NONBLOCK
    };

    if wanted == flags {
        return 0;
    }

    check(unsafe { libc::fcntl(fd, F_SETFL, wanted) }).min(0)
}

pub(crate) fn set_cloexec(fd: RawFd) -> i32 {
    let flags = unsafe { libc::fcntl(fd, F_GETFD) };
    if flags < 0 {
        return last_code();
    }

    check(unsafe { libc::fcntl(fd, F_SETFD, flags | FD_CLOEXEC) }).min(0)
}

/// Keeps writes to a reset socket from raising `SIGPIPE` where the platform
/// has no per-call flag for it.
pub(crate) fn set_nosigpipe(fd: RawFd) {
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    {
        let enable: c_int = 1;
        unsafe {
            libc::setsockopt(
                fd,
                SOL_SOCKET,
                libc::SO_NOSIGPIPE,
                &enable as *const c_int as *const c_void,
                mem::size_of::<c_int>() as socklen_t,
            );
        }
    }

    #[cfg(not(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    )))]
    let _ = fd;
}

/// Returns `(readable, writable)` from the descriptor's access mode.
pub(crate) fn access_mode(fd: RawFd) -> Result<(bool, bool), i32> {
    let flags = unsafe { libc::fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(last_code());
    }

    Ok(match flags & O_ACCMODE {
        O_RDONLY => (true, false),
        O_WRONLY => (false, true),
        O_RDWR => (true, true),
        _ => (false, false),
    })
}

pub(crate) fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

pub(crate) fn read(fd: RawFd, buffer: &mut [u8]) -> isize {
    check_size(unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut c_void, buffer.len()) })
}

/// Reads into `buffer`, collecting any descriptors passed alongside the bytes.
pub(crate) fn read_with_fds(fd: RawFd, buffer: &mut [u8], received: &mut Vec<RawFd>) -> isize {
    let mut iov = iovec {
        iov_base: buffer.as_mut_ptr() as *mut c_void,
        iov_len: buffer.len(),
    };

    let space = unsafe { libc::CMSG_SPACE((mem::size_of::<RawFd>() * MAX_RECEIVED_FDS) as u32) };
    let mut control = vec![0u64; (space as usize).div_ceil(mem::size_of::<u64>())];

    let mut message: msghdr = unsafe { mem::zeroed() };
    message.msg_iov = &mut iov;
    message.msg_iovlen = 1;
    message.msg_control = control.as_mut_ptr() as *mut c_void;
    message.msg_controllen = space as _;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let flags = libc::MSG_CMSG_CLOEXEC;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let flags = 0;

    let result = check_size(unsafe { libc::recvmsg(fd, &mut message, flags) });
    if result < 0 {
        return result;
    }

    unsafe {
        let mut header = libc::CMSG_FIRSTHDR(&message);
        while !header.is_null() {
            if (*header).cmsg_level == SOL_SOCKET && (*header).cmsg_type == SCM_RIGHTS {
                let data = libc::CMSG_DATA(header) as *const RawFd;
                let payload = (*header).cmsg_len as usize - libc::CMSG_LEN(0) as usize;

                for index in 0..payload / mem::size_of::<RawFd>() {
                    received.push(ptr::read_unaligned(data.add(index)));
                }
            }

            header = libc::CMSG_NXTHDR(&message, header);
        }
    }

    result
}

/// Writes the given slices, sending on sockets so that a reset peer is
/// reported as `EPIPE` instead of a signal.
pub(crate) fn write_vectored(fd: RawFd, buffers: &[iovec]) -> isize {
    let mut message: msghdr = unsafe { mem::zeroed() };
    message.msg_iov = buffers.as_ptr() as *mut iovec;
    message.msg_iovlen = buffers.len() as _;

    let result = check_size(unsafe { libc::sendmsg(fd, &message, SEND_FLAGS) });
    if result == -(libc::ENOTSOCK as isize) {
        return check_size(unsafe {
            libc::writev(fd, buffers.as_ptr(), buffers.len() as c_int)
        });
    }

    result
}

/// Writes the given slices and passes `send` to the peer as ancillary data.
pub(crate) fn write_with_fd(fd: RawFd, buffers: &[iovec], send: RawFd) -> isize {
    let space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) };
    let mut control = vec![0u64; (space as usize).div_ceil(mem::size_of::<u64>())];

    let mut message: msghdr = unsafe { mem::zeroed() };
    message.msg_iov = buffers.as_ptr() as *mut iovec;
    message.msg_iovlen = buffers.len() as _;
    message.msg_control = control.as_mut_ptr() as *mut c_void;
    message.msg_controllen = space as _;

    unsafe {
        let header = libc::CMSG_FIRSTHDR(&message);
        (*header).cmsg_level = SOL_SOCKET;
        (*header).cmsg_type = SCM_RIGHTS;
        (*header).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as _;
        ptr::write_unaligned(libc::CMSG_DATA(header) as *mut RawFd, send);
    }

    check_size(unsafe { libc::sendmsg(fd, &message, SEND_FLAGS) })
}

pub(crate) fn socket(address: &SocketAddr) -> i32 {
    let domain = match address {
        SocketAddr::V4(_) => AF_INET,
        SocketAddr::V6(_) => AF_INET6,
    };

    check(unsafe { libc::socket(domain, SOCK_STREAM, 0) })
}

pub(crate) fn socketpair() -> Result<(RawFd, RawFd), i32> {
    let mut fds = [0 as RawFd; 2];

    let result = unsafe { libc::socketpair(AF_UNIX, SOCK_STREAM, 0, fds.as_mut_ptr()) };
    if result < 0 {
        return Err(last_code());
    }

    Ok((fds[0], fds[1]))
}

pub(crate) fn bind(fd: RawFd, address: &SocketAddr) -> i32 {
    let reuse: c_int = 1;
    unsafe {
        libc::setsockopt(
            fd,
            SOL_SOCKET,
            SO_REUSEADDR,
            &reuse as *const c_int as *const c_void,
            mem::size_of::<c_int>() as socklen_t,
        );
    }

    let (storage, length) = to_raw(address);
    check(unsafe { libc::bind(fd, &storage as *const _ as *const sockaddr, length) }).min(0)
}

pub(crate) fn connect(fd: RawFd, address: &SocketAddr) -> i32 {
    let (storage, length) = to_raw(address);
    check(unsafe { libc::connect(fd, &storage as *const _ as *const sockaddr, length) }).min(0)
}

pub(crate) fn listen(fd: RawFd, backlog: i32) -> i32 {
    check(unsafe { libc::listen(fd, backlog) }).min(0)
}

/// Accepts one connection as a non-blocking, close-on-exec descriptor.
pub(crate) fn accept(fd: RawFd) -> i32 {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        check(unsafe {
            libc::accept4(
                fd,
                ptr::null_mut(),
                ptr::null_mut(),
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        let accepted = check(unsafe { libc::accept(fd, ptr::null_mut(), ptr::null_mut()) });
        if accepted >= 0 {
            set_nonblocking(accepted, true);
            set_cloexec(accepted);
        }
        accepted
    }
}

pub(crate) fn shutdown_write(fd: RawFd) -> i32 {
    check(unsafe { libc::shutdown(fd, SHUT_WR) }).min(0)
}

/// Pending error on a socket, as left by an asynchronous `connect`.
pub(crate) fn socket_error(fd: RawFd) -> i32 {
    let mut error: c_int = 0;
    let mut length = mem::size_of::<c_int>() as socklen_t;

    let result = unsafe {
        libc::getsockopt(
            fd,
            SOL_SOCKET,
            SO_ERROR,
            &mut error as *mut c_int as *mut c_void,
            &mut length,
        )
    };

    if result < 0 { last_code() } else { -error }
}

pub(crate) fn local_address(fd: RawFd) -> Option<SocketAddr> {
    address_with(fd, libc::getsockname)
}

pub(crate) fn peer_address(fd: RawFd) -> Option<SocketAddr> {
    address_with(fd, libc::getpeername)
}

fn address_with(
    fd: RawFd,
    query: unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t) -> c_int,
) -> Option<SocketAddr> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;

    let result = unsafe { query(fd, &mut storage as *mut _ as *mut sockaddr, &mut length) };
    if result < 0 {
        return None;
    }

    from_raw(&storage)
}

fn to_raw(address: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    let length = match address {
        SocketAddr::V4(address) => {
            let raw = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            raw.sin_family = AF_INET as _;
            raw.sin_port = address.port().to_be();
            raw.sin_addr.s_addr = u32::from_ne_bytes(address.ip().octets());
            set_sin_len(raw);

            mem::size_of::<sockaddr_in>()
        }
        SocketAddr::V6(address) => {
            let raw = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            raw.sin6_family = AF_INET6 as _;
            raw.sin6_port = address.port().to_be();
            raw.sin6_flowinfo = address.flowinfo();
            raw.sin6_addr.s6_addr = address.ip().octets();
            raw.sin6_scope_id = address.scope_id();
            set_sin6_len(raw);

            mem::size_of::<sockaddr_in6>()
        }
    };

    (storage, length as socklen_t)
}

fn from_raw(storage: &sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let raw = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(raw.sin_addr.s_addr.to_ne_bytes());

            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(raw.sin_port))))
        }
        AF_INET6 => {
            let raw = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(raw.sin6_addr.s6_addr);

            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(raw.sin6_port),
                raw.sin6_flowinfo,
                raw.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
fn set_sin_len(raw: &mut sockaddr_in) {
    raw.sin_len = mem::size_of::<sockaddr_in>() as u8;
}

#[cfg(not(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
fn set_sin_len(_raw: &mut sockaddr_in) {}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
))]
fn set_sin6_len(raw: &mut sockaddr_in6) {
    raw.sin6_len = mem::size_of::<sockaddr_in6>() as u8;
}

#[cfg(not(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly"
)))]
fn set_sin6_len(_raw: &mut sockaddr_in6) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_addresses_survive_raw_conversion() {
        let addresses: [SocketAddr; 2] = [
            "127.0.0.1:8080".parse().unwrap(),
            "[::1]:9090".parse().unwrap(),
        ];

        for address in addresses {
            let (storage, _) = to_raw(&address);
            assert_eq!(from_raw(&storage), Some(address));
        }
    }

    #[test]
    fn access_mode_of_pipe_ends() {
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

        assert_eq!(access_mode(fds[0]), Ok((true, false)));
        assert_eq!(access_mode(fds[1]), Ok((false, true)));

        close(fds[0]);
        close(fds[1]);
    }
}
