//! Multicast group sockets shared by both connectionless engines.
//!
//! Sockets are created with socket2 so options (address reuse, TTL,
//! loopback, outgoing interface) can be set before binding, then handed out
//! as plain `std::net::UdpSocket`s for the engine to adopt.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::engine::EngineConfig;
use crate::error::{Error, Result};

/// Parse `address` and require an IPv4 multicast group.
pub fn parse_group(address: &str, port: u16) -> Result<SocketAddrV4> {
    let ip: IpAddr = address
        .trim()
        .parse()
        .map_err(|_| Error::InvalidAddress(format!("'{}' is not an IP address", address)))?;

    match ip {
        IpAddr::V4(v4) if v4.is_multicast() => Ok(SocketAddrV4::new(v4, port)),
        IpAddr::V4(_) => Err(Error::InvalidAddress(format!(
            "{} is not a multicast address",
            address
        ))),
        IpAddr::V6(_) => Err(Error::InvalidAddress(format!(
            "{} is IPv6; only IPv4 multicast groups are supported",
            address
        ))),
    }
}

fn new_udp_socket() -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    Ok(socket)
}

/// Socket bound to the group's port that has joined the group.
pub fn receiver_socket(group: SocketAddrV4, config: &EngineConfig) -> Result<UdpSocket> {
    let socket = new_udp_socket()?;
    let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.port()));
    socket.bind(&bind.into())?;
    socket.join_multicast_v4(group.ip(), &config.multicast_interface)?;
    debug!("Joined multicast group {} on port {}", group.ip(), group.port());
    Ok(socket.into())
}

/// Socket that sends to the group; it also joins the group so membership
/// is symmetric with the receivers.
pub fn sender_socket(group: SocketAddrV4, config: &EngineConfig) -> Result<UdpSocket> {
    let socket = new_udp_socket()?;
    socket.set_multicast_ttl_v4(config.multicast_ttl)?;
    socket.set_multicast_loop_v4(config.multicast_loop)?;
    if !config.multicast_interface.is_unspecified() {
        socket.set_multicast_if_v4(&config.multicast_interface)?;
    }
    let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&bind.into())?;
    socket.join_multicast_v4(group.ip(), &config.multicast_interface)?;
    debug!("Sender socket joined multicast group {}", group.ip());
    Ok(socket.into())
}

/// Leave the group, logging instead of failing: teardown must go on.
pub fn leave_group(socket: &UdpSocket, group: SocketAddrV4, interface: Ipv4Addr) {
    match socket.leave_multicast_v4(group.ip(), &interface) {
        Ok(()) => debug!("Left multicast group {}", group.ip()),
        Err(e) => warn!("Failed to leave multicast group {}: {}", group.ip(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_group_accepts_multicast() {
        let group = parse_group("239.255.0.1", 9090).unwrap();
        assert_eq!(group.ip(), &Ipv4Addr::new(239, 255, 0, 1));
        assert_eq!(group.port(), 9090);
    }

    #[test]
    fn test_parse_group_rejects_unicast() {
        assert!(matches!(
            parse_group("127.0.0.1", 9090),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_parse_group_rejects_garbage() {
        assert!(matches!(
            parse_group("not-an-address", 9090),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(parse_group("ff02::1", 9090), Err(Error::InvalidAddress(_))));
    }
}
