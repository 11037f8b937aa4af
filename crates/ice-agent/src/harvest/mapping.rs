use crate::candidate::{Candidate, CandidateKind, FoundationAllocator, TransportProtocol};
use std::net::SocketAddr;

/// Harvests a server-reflexive candidate from a statically configured 1:1 NAT mapping (a known
/// public IP forwarded straight to this host), without any STUN round trip. Common on cloud
/// instances and containers where the mapping is handed to the process out of band rather than
/// discoverable by asking a STUN server.
pub fn harvest_static_mapping(
    component_id: u16,
    base: SocketAddr,
    public_addr: SocketAddr,
    local_pref: u16,
    foundations: &mut FoundationAllocator,
) -> Candidate {
    let key = (CandidateKind::ServerReflexive, base, TransportProtocol::Udp, None);
    Candidate {
        component_id,
        foundation: foundations.foundation_for(key),
        priority: Candidate::compute_priority(CandidateKind::ServerReflexive.type_preference(), local_pref, component_id),
        addr: public_addr,
        base,
        kind: CandidateKind::ServerReflexive,
        protocol: TransportProtocol::Udp,
        related_addr: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_candidate_keeps_configured_public_address() {
        let mut foundations = FoundationAllocator::new();
        let candidate = harvest_static_mapping(
            1,
            "10.0.0.5:4000".parse().unwrap(),
            "203.0.113.7:4000".parse().unwrap(),
            65535,
            &mut foundations,
        );
        assert_eq!(candidate.addr.to_string(), "203.0.113.7:4000");
        assert_eq!(candidate.kind, CandidateKind::ServerReflexive);
    }
}
