//! # Channel Derivation
//!
//! Pure, deterministic mapping from logical names to multicast channels:
//! the group identifier selects the multicast address, the (application,
//! group, event) triple selects the UDP port. Two independently constructed
//! emitters with the same configuration always land on the same channel.

use std::net::Ipv4Addr;

use sha2::{Digest, Sha256};

/// Size of the port window derived on top of the base port.
pub const PORT_WINDOW: u16 = 32767;

/// Derive the multicast address for a group.
///
/// If `group` is already a syntactically valid IPv4 multicast address it is
/// used verbatim. Otherwise octets 2..=4 come from the first three bytes of
/// `SHA-256(group)`, with the final octet fixed up to 1 when the digest
/// yields 0 or 255 (avoids reserved/broadcast-like suffixes). The first
/// octet is the configured one, constant across all events of an emitter.
pub fn derive_address(group: &str, first_octet: u8) -> Ipv4Addr {
    if let Some(addr) = parse_multicast(group) {
        return addr;
    }

    let digest = Sha256::digest(group.as_bytes());
    let mut last = digest[2];
    if last == 0 || last == 255 {
        last = 1;
    }
    Ipv4Addr::new(first_octet, digest[0], digest[1], last)
}

/// Derive the UDP port for an event.
///
/// Hashes `"{app_id}::{group}::{event}"` and folds two digest bytes into an
/// offset in 0..=32767: byte 0 is the low-order part, byte 1 (masked to 7
/// bits) the high-order part. The result is `base_port + offset`; with the
/// base port capped at 16384 this never leaves u16 space.
pub fn derive_port(app_id: &str, group: &str, event: &str, base_port: u16) -> u16 {
    let digest = Sha256::digest(format!("{app_id}::{group}::{event}").as_bytes());
    let low = u16::from(digest[0]);
    let high = u16::from(digest[1] & 0x7F);
    base_port + (high << 8 | low)
}

/// Parse `group` as an IPv4 multicast address, if it is one.
fn parse_multicast(group: &str) -> Option<Ipv4Addr> {
    group
        .parse::<Ipv4Addr>()
        .ok()
        .filter(Ipv4Addr::is_multicast)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_deterministic() {
        let a = derive_address("events", 239);
        let b = derive_address("events", 239);
        assert_eq!(a, b);
        assert_eq!(a.octets()[0], 239);
    }

    #[test]
    fn address_last_octet_never_degenerate() {
        // Exhaustive over a large name sample; the fix-up maps 0/255 to 1.
        for i in 0..10_000 {
            let addr = derive_address(&format!("group-{i}"), 224);
            let last = addr.octets()[3];
            assert_ne!(last, 0, "group-{i} produced .0");
            assert_ne!(last, 255, "group-{i} produced .255");
        }
    }

    #[test]
    fn address_first_octet_is_configured_one() {
        for octet in 224..=239 {
            assert_eq!(derive_address("anything", octet).octets()[0], octet);
        }
    }

    #[test]
    fn literal_multicast_group_used_verbatim() {
        let addr = derive_address("239.1.2.3", 224);
        assert_eq!(addr, Ipv4Addr::new(239, 1, 2, 3));
    }

    #[test]
    fn literal_unicast_group_is_hashed() {
        // Valid IPv4 but not multicast: falls through to hashing.
        let addr = derive_address("192.168.1.1", 239);
        assert_eq!(addr.octets()[0], 239);
    }

    #[test]
    fn port_is_deterministic_and_in_window() {
        let p1 = derive_port("app", "events", "tick", 1024);
        let p2 = derive_port("app", "events", "tick", 1024);
        assert_eq!(p1, p2);
        assert!(p1 >= 1024);
        assert!(u32::from(p1) <= 1024 + u32::from(PORT_WINDOW));
    }

    #[test]
    fn port_depends_on_all_three_names() {
        let base = derive_port("app", "events", "tick", 1024);
        assert_ne!(base, derive_port("other", "events", "tick", 1024));
        assert_ne!(base, derive_port("app", "other", "tick", 1024));
        assert_ne!(base, derive_port("app", "events", "tock", 1024));
    }

    #[test]
    fn port_never_overflows_u16() {
        // Max base port plus max offset must still fit.
        for i in 0..1_000 {
            let p = derive_port("app", "group", &format!("ev-{i}"), 16384);
            assert!(p >= 16384);
        }
        assert_eq!(16384u32 + u32::from(PORT_WINDOW), 49151);
    }
}
