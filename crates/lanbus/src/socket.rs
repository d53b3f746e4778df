//! # Multicast Socket Construction
//!
//! Raw sockets are built with `socket2` so that reuse-address and the
//! outgoing multicast interface can be set before bind, then handed to
//! Tokio for async I/O. Reuse-address is required for the receive side:
//! every process listening on an event binds the same derived port.

use std::net::{Ipv4Addr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Largest datagram the receive loop accepts.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Per-socket multicast parameters taken from the emitter configuration.
#[derive(Debug, Clone, Copy)]
pub struct MulticastOptions {
    /// IP_MULTICAST_TTL for outbound datagrams.
    pub ttl: u32,
    /// IP_MULTICAST_LOOP: deliver our own datagrams back to this host.
    pub loopback: bool,
    /// Interface to send/join on; `None` lets the kernel choose.
    pub interface: Option<Ipv4Addr>,
}

impl MulticastOptions {
    fn interface_or_any(&self) -> Ipv4Addr {
        self.interface.unwrap_or(Ipv4Addr::UNSPECIFIED)
    }
}

fn new_udp_socket() -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn apply_options(socket: &Socket, opts: &MulticastOptions) -> std::io::Result<()> {
    socket.set_multicast_ttl_v4(opts.ttl)?;
    socket.set_multicast_loop_v4(opts.loopback)?;
    if let Some(interface) = opts.interface {
        socket.set_multicast_if_v4(&interface)?;
    }
    Ok(())
}

/// Open the shared send socket: bound to an ephemeral port on the
/// configured interface (or wildcard), with TTL/loopback applied.
///
/// Must be called from within a Tokio runtime.
pub fn open_send_socket(opts: &MulticastOptions) -> std::io::Result<UdpSocket> {
    let socket = new_udp_socket()?;
    socket.bind(&SocketAddrV4::new(opts.interface_or_any(), 0).into())?;
    apply_options(&socket, opts)?;
    UdpSocket::from_std(socket.into())
}

/// Open a receive socket for one channel: bind the derived port, join the
/// multicast group on the configured interface.
///
/// Must be called from within a Tokio runtime.
pub fn open_receive_socket(
    group: Ipv4Addr,
    port: u16,
    opts: &MulticastOptions,
) -> std::io::Result<UdpSocket> {
    let socket = new_udp_socket()?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    apply_options(&socket, opts)?;

    let socket = UdpSocket::from_std(socket.into())?;
    socket.join_multicast_v4(group, opts.interface_or_any())?;
    Ok(socket)
}

/// Leave the group ahead of closing a channel's socket.
///
/// Errors are reported to the caller for logging only; the socket is closed
/// either way.
pub fn leave_group(
    socket: &UdpSocket,
    group: Ipv4Addr,
    opts: &MulticastOptions,
) -> std::io::Result<()> {
    socket.leave_multicast_v4(group, opts.interface_or_any())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_opts() -> MulticastOptions {
        MulticastOptions {
            ttl: 1,
            loopback: true,
            interface: None,
        }
    }

    #[tokio::test]
    async fn send_socket_binds_ephemeral_port() {
        let socket = open_send_socket(&local_opts()).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn two_receive_sockets_share_a_port() {
        let group = Ipv4Addr::new(239, 200, 1, 1);
        let a = open_receive_socket(group, 41999, &local_opts()).unwrap();
        let b = open_receive_socket(group, 41999, &local_opts()).unwrap();
        assert_eq!(
            a.local_addr().unwrap().port(),
            b.local_addr().unwrap().port()
        );
    }

    #[tokio::test]
    async fn leave_group_succeeds_after_join() {
        let group = Ipv4Addr::new(239, 200, 1, 2);
        let opts = local_opts();
        let socket = open_receive_socket(group, 42001, &opts).unwrap();
        leave_group(&socket, group, &opts).unwrap();
    }
}
