//! UDP socket construction.
//!
//! Sockets are built with socket2 so buffer sizes and multicast membership
//! can be set before binding, then handed to tokio by the caller.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};

use shardcast_core::wire::MULTICAST_ADDR;

fn new_udp(domain: Domain, buffer_size: usize) -> Result<Socket> {
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    if buffer_size > 0 {
        // The kernel may clamp these; a smaller buffer only costs drops.
        if let Err(e) = socket.set_recv_buffer_size(buffer_size) {
            tracing::warn!(error = %e, buffer_size, "SO_RCVBUF not applied");
        }
        if let Err(e) = socket.set_send_buffer_size(buffer_size) {
            tracing::warn!(error = %e, buffer_size, "SO_SNDBUF not applied");
        }
    }
    socket.set_nonblocking(true).context("set_nonblocking")?;
    Ok(socket)
}

/// Receive socket for point-to-point mode, bound to `listen_addr`.
pub fn bind_unicast(listen_addr: SocketAddr, buffer_size: usize) -> Result<std::net::UdpSocket> {
    let socket = new_udp(Domain::for_address(listen_addr), buffer_size)?;
    socket
        .bind(&listen_addr.into())
        .with_context(|| format!("bind({listen_addr})"))?;
    Ok(socket.into())
}

/// Send socket on an ephemeral port, in the same address family as `peer`.
pub fn bind_sender(peer: SocketAddr, buffer_size: usize) -> Result<std::net::UdpSocket> {
    let local: SocketAddr = match peer {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = new_udp(Domain::for_address(peer), buffer_size)?;
    socket
        .bind(&local.into())
        .with_context(|| format!("bind({local})"))?;
    Ok(socket.into())
}

/// The multicast group every broadcast-mode channel sends to.
pub fn multicast_group() -> Result<Ipv4Addr> {
    MULTICAST_ADDR
        .parse()
        .with_context(|| format!("bad multicast address {MULTICAST_ADDR}"))
}

/// Receive socket for broadcast mode: bound to `port` on every address and
/// joined to the all-hosts group on `interface`.
pub fn bind_multicast(
    port: u16,
    interface: Ipv4Addr,
    buffer_size: usize,
) -> Result<std::net::UdpSocket> {
    let socket = new_udp(Domain::IPV4, buffer_size)?;
    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket
        .bind(&bind_addr.into())
        .with_context(|| format!("bind({bind_addr})"))?;

    let group = multicast_group()?;
    // Hosts are members of the all-hosts group already; an explicit join
    // failing is not fatal.
    if let Err(e) = socket.join_multicast_v4(&group, &interface) {
        tracing::warn!(error = %e, group = %group, "IP_ADD_MEMBERSHIP failed");
    }
    socket
        .set_multicast_loop_v4(true)
        .context("IP_MULTICAST_LOOP")?;
    Ok(socket.into())
}

/// Send socket for broadcast mode, routed out of `interface`.
pub fn bind_multicast_sender(interface: Ipv4Addr, buffer_size: usize) -> Result<std::net::UdpSocket> {
    let socket = new_udp(Domain::IPV4, buffer_size)?;
    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    socket
        .bind(&bind_addr.into())
        .with_context(|| format!("bind({bind_addr})"))?;
    if !interface.is_unspecified() {
        socket
            .set_multicast_if_v4(&interface)
            .context("IP_MULTICAST_IF")?;
    }
    socket
        .set_multicast_loop_v4(true)
        .context("IP_MULTICAST_LOOP")?;
    Ok(socket.into())
}
