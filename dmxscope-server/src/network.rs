//! UDP socket plumbing shared by both transports.
//!
//! Art-Net listens on a plain (broadcast-capable) socket on port 6454; sACN
//! joins one multicast group per universe on port 5568. Everything here
//! builds `socket2` sockets with the right options and hands them to tokio.

use socket2::{Domain, Protocol, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

use crate::error::DmxError;

// this will be common for all our sockets
pub fn new_socket() -> io::Result<socket2::Socket> {
    let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;

    Ok(socket)
}

/// On Windows, unlike all Unix variants, it is improper to bind to the multicast address
///
/// see https://msdn.microsoft.com/en-us/library/windows/desktop/ms737550(v=vs.85).aspx
#[cfg(windows)]
fn bind_to_multicast(
    socket: &socket2::Socket,
    addr: &SocketAddrV4,
    nic_addr: &Ipv4Addr,
) -> io::Result<()> {
    socket.join_multicast_v4(addr.ip(), nic_addr)?;

    let socketaddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), addr.port());
    socket.bind(&socket2::SockAddr::from(socketaddr))?;
    log::trace!("Binding multicast socket to {}", socketaddr);

    Ok(())
}

/// On unixes we bind to the multicast address, which causes multicast packets to be filtered
#[cfg(unix)]
fn bind_to_multicast(
    socket: &socket2::Socket,
    addr: &SocketAddrV4,
    nic_addr: &Ipv4Addr,
) -> io::Result<()> {
    // Linux is special, if we don't disable IP_MULTICAST_ALL the kernel forgets on
    // which device the multicast packet arrived and sends it to all sockets.
    #[cfg(target_os = "linux")]
    {
        use std::{mem, os::unix::io::AsRawFd};

        unsafe {
            let optval: libc::c_int = 0;
            let ret = libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_IP,
                libc::IP_MULTICAST_ALL,
                &optval as *const _ as *const libc::c_void,
                mem::size_of_val(&optval) as libc::socklen_t,
            );
            if ret != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }

    let socketaddr = SocketAddr::new(IpAddr::V4(*addr.ip()), addr.port());
    socket.bind(&socket2::SockAddr::from(socketaddr))?;

    socket.join_multicast_v4(addr.ip(), nic_addr)?;

    log::trace!(
        "Binding multicast socket to {} for multicast group {} nic {}",
        socketaddr,
        addr.ip(),
        nic_addr
    );

    Ok(())
}

/// Listener joined to the multicast group `addr` on the interface that owns
/// `nic_addr` (or the default interface when unspecified). Join failures are
/// reported as their own error kind; they are not bind failures.
pub fn create_udp_multicast_listen(
    addr: &SocketAddrV4,
    nic_addr: &Ipv4Addr,
) -> Result<UdpSocket, DmxError> {
    let socket = new_socket().map_err(DmxError::Io)?;

    bind_to_multicast(&socket, addr, nic_addr).map_err(|e| {
        if e.kind() == io::ErrorKind::AddrInUse
            || e.kind() == io::ErrorKind::AddrNotAvailable
            || e.kind() == io::ErrorKind::PermissionDenied
        {
            DmxError::from_bind(*addr, e)
        } else {
            DmxError::MulticastJoin {
                group: *addr.ip(),
                nic: *nic_addr,
                source: e,
            }
        }
    })?;

    let socket = UdpSocket::from_std(socket.into()).map_err(DmxError::Io)?;
    Ok(socket)
}

/// Plain listener on `addr` with broadcast enabled, so the same socket can
/// receive node traffic and send discovery polls to the subnet broadcast.
pub fn create_udp_broadcast_listen(addr: &SocketAddrV4) -> Result<UdpSocket, DmxError> {
    let socket = new_socket().map_err(DmxError::Io)?;
    socket.set_broadcast(true).map_err(DmxError::Io)?;

    let socketaddr = SocketAddr::new(IpAddr::V4(*addr.ip()), addr.port());
    socket
        .bind(&socket2::SockAddr::from(socketaddr))
        .map_err(|e| DmxError::from_bind(*addr, e))?;
    log::trace!("Binding broadcast socket to {}", socketaddr);

    let socket = UdpSocket::from_std(socket.into()).map_err(DmxError::Io)?;
    Ok(socket)
}

/// Broadcast address of a subnet: `ip | !netmask` per octet
pub fn subnet_broadcast(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    let ip = ip.octets();
    let mask = netmask.octets();
    Ipv4Addr::new(
        ip[0] | !mask[0],
        ip[1] | !mask[1],
        ip[2] | !mask[2],
        ip[3] | !mask[3],
    )
}

/// Netmask of the interface that carries `ip`, if any
pub fn find_netmask(ip: &Ipv4Addr) -> Option<Ipv4Addr> {
    use network_interface::{NetworkInterface, NetworkInterfaceConfig};

    let interfaces = NetworkInterface::show().ok()?;
    for itf in &interfaces {
        for addr in &itf.addr {
            if let (IpAddr::V4(nic_ip), Some(IpAddr::V4(netmask))) = (addr.ip(), addr.netmask()) {
                if nic_ip == *ip {
                    log::debug!("Interface {} carries {} netmask {}", itf.name, ip, netmask);
                    return Some(netmask);
                }
            }
        }
    }
    None
}

/// True when some interface carries `ip` (0.0.0.0 always qualifies)
pub fn interface_exists(ip: &Ipv4Addr) -> bool {
    use network_interface::{NetworkInterface, NetworkInterfaceConfig};

    if ip.is_unspecified() {
        return true;
    }
    let Ok(interfaces) = NetworkInterface::show() else {
        return false;
    };
    interfaces
        .iter()
        .flat_map(|itf| itf.addr.iter())
        .any(|addr| addr.ip() == IpAddr::V4(*ip))
}

/// Where discovery polls go: the bound interface's subnet broadcast when the
/// netmask is known, else the global broadcast address.
pub fn broadcast_for(ip: &Ipv4Addr) -> Ipv4Addr {
    if !ip.is_unspecified() {
        if let Some(netmask) = find_netmask(ip) {
            return subnet_broadcast(*ip, netmask);
        }
    }
    Ipv4Addr::BROADCAST
}
