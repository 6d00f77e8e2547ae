use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};

use log::debug;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::SocketError;
use crate::packet::{AddressFamily, CHECKSUM_OFFSET};

/// Largest datagram read per readiness notification
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Connectionless datagram transport the pinger sends through and reads from.
pub trait Transport {
    /// Non-blocking send of one datagram. Never retried.
    fn send_to(&mut self, address: IpAddr, packet: &[u8]) -> io::Result<usize>;

    /// Read one datagram and its sender. `Ok(None)` when nothing is queued.
    fn recv_from(&mut self) -> io::Result<Option<(Vec<u8>, IpAddr)>>;

    /// Descriptor to register for read readiness.
    fn source(&self) -> RawFd;

    /// Release the transport. Safe to call more than once.
    fn close(&mut self);
}

/// Raw ICMP (or ICMPv6) socket for one address family.
///
/// Every ICMP message delivered to the host for this protocol shows up here,
/// not just replies to our own requests.
pub struct IcmpSocket {
    socket: Option<Socket>,
    family: AddressFamily,
    fd: RawFd,
    buffer: Box<[MaybeUninit<u8>]>,
}

impl IcmpSocket {
    /// Open a raw socket matching the family of `address`. Nothing is bound.
    pub fn open(address: IpAddr) -> Result<IcmpSocket, SocketError> {
        let family = AddressFamily::of(&address);
        let (domain, protocol) = match family {
            AddressFamily::Ipv4 => (Domain::IPV4, Protocol::ICMPV4),
            AddressFamily::Ipv6 => (Domain::IPV6, Protocol::ICMPV6),
        };

        let socket = Socket::new(domain, Type::RAW, Some(protocol))?;
        if family == AddressFamily::Ipv6 {
            enable_checksum_offload(&socket)?;
        }
        socket.set_nonblocking(true)?;

        let fd = socket.as_raw_fd();
        debug!("opened raw {family:?} ICMP socket (fd {fd})");
        Ok(IcmpSocket {
            socket: Some(socket),
            family,
            fd,
            buffer: vec![MaybeUninit::uninit(); MAX_DATAGRAM_SIZE].into_boxed_slice(),
        })
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn socket(&self) -> io::Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is closed"))
    }
}

impl Transport for IcmpSocket {
    fn send_to(&mut self, address: IpAddr, packet: &[u8]) -> io::Result<usize> {
        let sock_addr = SockAddr::from(SocketAddr::new(address, 0));
        self.socket()?.send_to(packet, &sock_addr)
    }

    fn recv_from(&mut self) -> io::Result<Option<(Vec<u8>, IpAddr)>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is closed"))?;

        let (len, from) = match socket.recv_from(&mut self.buffer) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        // SAFETY: recv_from initialised the first `len` bytes of the buffer.
        let datagram =
            unsafe { std::slice::from_raw_parts(self.buffer.as_ptr() as *const u8, len) }.to_vec();
        let source = from
            .as_socket()
            .map(|addr| addr.ip())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "sender is not an IP address"))?;

        Ok(Some((datagram, source)))
    }

    fn source(&self) -> RawFd {
        self.fd
    }

    fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            debug!("closing {:?} ICMP socket (fd {})", self.family, self.fd);
            drop(socket);
        }
    }
}

/// Ask the stack to fill in the ICMPv6 checksum, which covers a pseudo-header
/// we cannot build before the source address is chosen.
///
/// Linux always computes ICMPv6 checksums on raw sockets and rejects the
/// option with EINVAL, which is accepted here.
fn enable_checksum_offload(socket: &Socket) -> Result<(), SocketError> {
    let offset: libc::c_int = CHECKSUM_OFFSET as libc::c_int;
    // SAFETY: passes a pointer to a live c_int together with its exact size.
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IPV6,
            libc::IPV6_CHECKSUM,
            &offset as *const _ as *const libc::c_void,
            std::mem::size_of_val(&offset) as libc::socklen_t,
        )
    };
    if ret == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if cfg!(target_os = "linux") && err.raw_os_error() == Some(libc::EINVAL) {
        debug!("kernel computes ICMPv6 checksums itself");
        return Ok(());
    }
    Err(SocketError::Io(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_close_ipv4() {
        // Raw sockets need privilege; only exercise the socket when we got one.
        match IcmpSocket::open("127.0.0.1".parse().unwrap()) {
            Ok(mut socket) => {
                assert_eq!(socket.family(), AddressFamily::Ipv4);
                assert!(socket.source() >= 0);
                socket.close();
                assert!(!socket.is_open());
                socket.close();
                assert!(socket.send_to("127.0.0.1".parse().unwrap(), &[0; 8]).is_err());
            }
            Err(e) => eprintln!("raw ICMP sockets unavailable: {e}"),
        }
    }

    #[test]
    fn test_open_ipv6_configures_checksum() {
        match IcmpSocket::open("::1".parse().unwrap()) {
            Ok(socket) => assert_eq!(socket.family(), AddressFamily::Ipv6),
            Err(SocketError::PermissionDenied(e)) => eprintln!("raw ICMPv6 sockets unavailable: {e}"),
            Err(SocketError::Io(e)) => {
                // no IPv6 stack at all is fine; a rejected checksum option is not
                assert_ne!(e.raw_os_error(), Some(libc::EINVAL), "{e}");
                eprintln!("raw ICMPv6 sockets unavailable: {e}");
            }
        }
    }

    #[test]
    fn test_permission_errors_are_classified() {
        let err = SocketError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, SocketError::PermissionDenied(_)));
        let err = SocketError::from(io::Error::from(io::ErrorKind::OutOfMemory));
        assert!(matches!(err, SocketError::Io(_)));
    }
}
