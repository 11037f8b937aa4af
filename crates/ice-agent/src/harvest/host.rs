use crate::candidate::{Candidate, CandidateKind, FoundationAllocator, TransportProtocol};
use std::net::SocketAddr;

/// Turns a list of local socket addresses (one per interface, supplied by the transport layer —
/// this crate never enumerates interfaces itself) into host candidates (RFC 8445 §5.1.1.1).
///
/// CGNAT (100.64.0.0/10) and other non-globally-routable ranges are dropped when
/// `filter_private` is set, since a remote peer outside the NAT could never reach them; when
/// unset every address is kept, which is correct for same-LAN peers.
pub fn harvest_host_candidates(
    component_id: u16,
    local_addrs: &[SocketAddr],
    local_pref: u16,
    filter_private: bool,
    foundations: &mut FoundationAllocator,
) -> Vec<Candidate> {
    local_addrs
        .iter()
        .filter(|addr| !filter_private || !is_filtered(addr.ip()))
        .map(|&addr| {
            let key = (CandidateKind::Host, addr, TransportProtocol::Udp, None);
            Candidate {
                component_id,
                foundation: foundations.foundation_for(key),
                priority: Candidate::compute_priority(CandidateKind::Host.type_preference(), local_pref, component_id),
                addr,
                base: addr,
                kind: CandidateKind::Host,
                protocol: TransportProtocol::Udp,
                related_addr: None,
            }
        })
        .collect()
}

pub(crate) fn is_filtered(ip: std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_link_local() || is_cgnat(v4)
        }
        std::net::IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// 100.64.0.0/10, reserved for carrier-grade NAT (RFC 6598) — routable on the operator's
/// network but never reachable from outside it.
fn is_cgnat(v4: std::net::Ipv4Addr) -> bool {
    let octets = v4.octets();
    octets[0] == 100 && (octets[1] & 0xC0) == 64
}

pub(crate) fn is_cgnat_addr(ip: std::net::IpAddr) -> bool {
    matches!(ip, std::net::IpAddr::V4(v4) if is_cgnat(v4))
}

/// RFC 1918 private ranges (10/8, 172.16/12, 192.168/16) plus the IPv6 unique-local block
/// (fc00::/7) — reachable within a private network but never from outside it.
pub(crate) fn is_private(ip: std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 10 || (o[0] == 172 && (16..=31).contains(&o[1])) || (o[0] == 192 && o[1] == 168)
        }
        std::net::IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// Every non-globally-routable case this crate knows about: loopback, link-local, CGNAT, and
/// RFC 1918/unique-local private space.
pub(crate) fn is_non_public(ip: std::net::IpAddr) -> bool {
    is_filtered(ip) || is_private(ip)
}

#[cfg(test)]
mod remote_filter_tests {
    use super::*;

    #[test]
    fn cgnat_is_not_plain_private() {
        let cgnat: std::net::IpAddr = "100.64.0.5".parse().unwrap();
        assert!(is_cgnat_addr(cgnat));
        assert!(!is_private(cgnat));
        assert!(is_non_public(cgnat));
    }

    #[test]
    fn rfc1918_ranges_are_private() {
        for addr in ["10.0.0.1", "172.16.5.5", "192.168.1.1"] {
            let ip: std::net::IpAddr = addr.parse().unwrap();
            assert!(is_private(ip), "{addr} should be private");
            assert!(is_non_public(ip));
        }
    }

    #[test]
    fn public_address_passes_every_filter() {
        let ip: std::net::IpAddr = "203.0.113.4".parse().unwrap();
        assert!(!is_cgnat_addr(ip));
        assert!(!is_private(ip));
        assert!(!is_non_public(ip));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_cgnat_when_requested() {
        let addrs = ["100.64.0.5:1000".parse().unwrap(), "203.0.113.4:1000".parse().unwrap()];
        let mut foundations = FoundationAllocator::new();
        let kept = harvest_host_candidates(1, &addrs, 65535, true, &mut foundations);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].addr.to_string(), "203.0.113.4:1000");
    }

    #[test]
    fn keeps_everything_when_filter_disabled() {
        let addrs: [SocketAddr; 2] = ["100.64.0.5:1000".parse().unwrap(), "203.0.113.4:1000".parse().unwrap()];
        let mut foundations = FoundationAllocator::new();
        let kept = harvest_host_candidates(1, &addrs, 65535, false, &mut foundations);
        assert_eq!(kept.len(), 2);
    }
}
