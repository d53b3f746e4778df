//! # Local Interface Predicate
//!
//! Configuration may pin the emitter to one local interface address. The
//! only question this module answers is whether a user-supplied address is
//! actually configured on this host; full interface enumeration stays out
//! of scope. The check is a bind probe: the kernel accepts a UDP bind on an
//! ephemeral port only for addresses assigned to a local interface.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

/// Whether `addr` is a locally configured, multicast-capable unicast address.
#[must_use]
pub fn is_configured_local_address(addr: Ipv4Addr) -> bool {
    if addr.is_multicast() || addr.is_broadcast() {
        return false;
    }
    UdpSocket::bind(SocketAddrV4::new(addr, 0)).is_ok()
}
