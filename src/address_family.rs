use super::MDNS_PORT;
use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6, UdpSocket};

use crate::net;

/// Value-level address family, used to scope cache keys and to tag
/// messages handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Inet,
    Inet6,
}

impl Family {
    pub fn of(addr: &IpAddr) -> Family {
        match addr {
            IpAddr::V4(_) => Family::Inet,
            IpAddr::V6(_) => Family::Inet6,
        }
    }
}

pub enum Inet {}

pub enum Inet6 {}

pub trait AddressFamily {
    type Addr: Into<IpAddr>;

    const ANY_ADDR: Self::Addr;
    const MDNS_GROUP: Self::Addr;

    const DOMAIN: Domain;
    const FAMILY: Family;

    /// The multicast destination queries are sent to. IPv6 needs the
    /// scope pinned to the egress interface.
    fn mdns_group(ifindex: u32) -> SocketAddr;

    fn join_multicast(socket: SockRef, addr: &IpAddr, ifindex: u32) -> io::Result<()>;

    fn leave_multicast(socket: SockRef, addr: &IpAddr, ifindex: u32) -> io::Result<()>;

    /// Pins outgoing multicast to one interface: by address for IPv4,
    /// by index for IPv6.
    fn set_egress(socket: &Socket, addr: &IpAddr, ifindex: u32) -> io::Result<()>;

    fn set_multicast_sending(socket: &Socket) -> io::Result<()>;

    fn udp_socket() -> io::Result<Socket> {
        Socket::new(Self::DOMAIN, Type::DGRAM, Some(Protocol::UDP))
    }

    /// The passive listener socket: the mDNS port on the wildcard
    /// address, group joined, packet info enabled so the receiving
    /// interface is known.
    fn bind_listener() -> io::Result<UdpSocket> {
        let addr: SockAddr = SocketAddr::new(Self::ANY_ADDR.into(), MDNS_PORT).into();
        let socket = Self::udp_socket()?;
        socket.set_reuse_address(true)?;

        #[cfg(not(any(target_os = "illumos", target_os = "solaris")))]
        socket.set_reuse_port(true)?;

        socket.set_nonblocking(true)?;
        net::set_pktinfo(&socket, Self::FAMILY == Family::Inet6)?;
        socket.bind(&addr)?;
        Self::join_multicast(SockRef::from(&socket), &Self::ANY_ADDR.into(), 0)?;
        Ok(socket.into())
    }

    /// A query socket: an ephemeral port on the interface address, with
    /// the RFC 6762 sending options (loopback off, TTL/hops 255) and
    /// egress pinned to that interface.
    fn bind_worker(addr: &IpAddr, ifindex: u32) -> io::Result<UdpSocket> {
        let socket = Self::udp_socket()?;
        socket.set_reuse_address(true)?;

        #[cfg(not(any(target_os = "illumos", target_os = "solaris")))]
        socket.set_reuse_port(true)?;

        socket.set_nonblocking(true)?;
        Self::set_multicast_sending(&socket)?;
        net::set_pktinfo(&socket, Self::FAMILY == Family::Inet6)?;
        Self::set_egress(&socket, addr, ifindex)?;
        socket.bind(&SocketAddr::new(*addr, 0).into())?;
        Ok(socket.into())
    }
}

impl AddressFamily for Inet {
    type Addr = Ipv4Addr;

    const ANY_ADDR: Self::Addr = Ipv4Addr::UNSPECIFIED;
    const MDNS_GROUP: Self::Addr = Ipv4Addr::new(224, 0, 0, 251);

    const DOMAIN: Domain = Domain::IPV4;
    const FAMILY: Family = Family::Inet;

    fn mdns_group(_ifindex: u32) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Self::MDNS_GROUP), MDNS_PORT)
    }

    fn join_multicast(socket: SockRef, addr: &IpAddr, _ifindex: u32) -> io::Result<()> {
        match addr {
            IpAddr::V4(v4) => socket.join_multicast_v4(&Self::MDNS_GROUP, v4),
            IpAddr::V6(_) => Ok(()),
        }
    }

    fn leave_multicast(socket: SockRef, addr: &IpAddr, _ifindex: u32) -> io::Result<()> {
        match addr {
            IpAddr::V4(v4) => socket.leave_multicast_v4(&Self::MDNS_GROUP, v4),
            IpAddr::V6(_) => Ok(()),
        }
    }

    fn set_egress(socket: &Socket, addr: &IpAddr, _ifindex: u32) -> io::Result<()> {
        match addr {
            IpAddr::V4(v4) => socket.set_multicast_if_v4(v4),
            IpAddr::V6(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "IPv6 address on an IPv4 worker",
            )),
        }
    }

    fn set_multicast_sending(socket: &Socket) -> io::Result<()> {
        socket.set_multicast_loop_v4(false)?;
        socket.set_multicast_ttl_v4(255)
    }
}

impl AddressFamily for Inet6 {
    type Addr = Ipv6Addr;

    const ANY_ADDR: Self::Addr = Ipv6Addr::UNSPECIFIED;
    const MDNS_GROUP: Self::Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

    const DOMAIN: Domain = Domain::IPV6;
    const FAMILY: Family = Family::Inet6;

    fn mdns_group(ifindex: u32) -> SocketAddr {
        SocketAddrV6::new(Self::MDNS_GROUP, MDNS_PORT, 0, ifindex).into()
    }

    fn join_multicast(socket: SockRef, addr: &IpAddr, ifindex: u32) -> io::Result<()> {
        match addr {
            IpAddr::V6(_) => socket.join_multicast_v6(&Self::MDNS_GROUP, ifindex),
            IpAddr::V4(_) => Ok(()),
        }
    }

    fn leave_multicast(socket: SockRef, addr: &IpAddr, ifindex: u32) -> io::Result<()> {
        match addr {
            IpAddr::V6(_) => socket.leave_multicast_v6(&Self::MDNS_GROUP, ifindex),
            IpAddr::V4(_) => Ok(()),
        }
    }

    fn set_egress(socket: &Socket, _addr: &IpAddr, ifindex: u32) -> io::Result<()> {
        socket.set_multicast_if_v6(ifindex)
    }

    fn set_multicast_sending(socket: &Socket) -> io::Result<()> {
        socket.set_multicast_loop_v6(false)?;
        socket.set_multicast_hops_v6(255)
    }
}
