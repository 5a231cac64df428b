//! Linux raw ICMP socket driven by tokio.

use geotrace_core::TraceError;
use std::io;
use std::mem::size_of;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

fn sockaddr_v4(ip: Ipv4Addr) -> libc::sockaddr_in {
    // SAFETY: sockaddr_in is plain old data and all zeroes is a valid value.
    let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = 0;
    sa.sin_addr.s_addr = u32::from_ne_bytes(ip.octets());
    sa
}

/// Non-blocking `SOCK_RAW`/`IPPROTO_ICMP` socket. Reads include the IPv4 header.
pub struct IcmpSocket {
    fd: AsyncFd<OwnedFd>,
}

impl IcmpSocket {
    /// Opens the socket, bound to `source` unless it is unspecified.
    pub fn open(source: Ipv4Addr) -> Result<Self, TraceError> {
        let fd = unsafe {
            libc::socket(
                libc::AF_INET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                libc::IPPROTO_ICMP,
            )
        };
        if fd < 0 {
            return Err(TraceError::SocketCreation(io::Error::last_os_error()));
        }
        // SAFETY: fd was just returned by socket(2) and nothing else owns it.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        if !source.is_unspecified() {
            let sa = sockaddr_v4(source);
            let result = unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sa as *const libc::sockaddr_in as *const libc::sockaddr,
                    size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            };
            if result < 0 {
                return Err(TraceError::SocketCreation(io::Error::last_os_error()));
            }
        }

        let fd = AsyncFd::with_interest(fd, Interest::READABLE | Interest::WRITABLE)
            .map_err(TraceError::SocketCreation)?;
        Ok(Self { fd })
    }

    /// Sets the TTL for subsequent sends.
    pub fn set_ttl(&self, ttl: u8) -> Result<(), TraceError> {
        let value = libc::c_int::from(ttl);
        let result = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::IPPROTO_IP,
                libc::IP_TTL,
                &value as *const libc::c_int as *const libc::c_void,
                size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if result < 0 {
            return Err(TraceError::Internal(format!(
                "Failed to set TTL {}: {}",
                ttl,
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    /// Sends one ICMP message to `dst`.
    pub async fn send_to(&self, buf: &[u8], dst: Ipv4Addr) -> Result<(), TraceError> {
        let sa = sockaddr_v4(dst);
        loop {
            let mut guard = self.fd.writable().await.map_err(TraceError::WriteFailed)?;
            let sent = guard.try_io(|inner| {
                let n = unsafe {
                    libc::sendto(
                        inner.as_raw_fd(),
                        buf.as_ptr() as *const libc::c_void,
                        buf.len(),
                        0,
                        &sa as *const libc::sockaddr_in as *const libc::sockaddr,
                        size_of::<libc::sockaddr_in>() as libc::socklen_t,
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(())
                }
            });
            match sent {
                Ok(result) => return result.map_err(TraceError::WriteFailed),
                Err(_would_block) => continue,
            }
        }
    }

    /// Reads the next ICMP packet, IPv4 header included.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, TraceError> {
        loop {
            let mut guard = self.fd.readable().await.map_err(TraceError::ReadFailed)?;
            let read = guard.try_io(|inner| {
                let n = unsafe {
                    libc::recv(
                        inner.as_raw_fd(),
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                        0,
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match read {
                Ok(result) => return result.map_err(TraceError::ReadFailed),
                Err(_would_block) => continue,
            }
        }
    }
}
