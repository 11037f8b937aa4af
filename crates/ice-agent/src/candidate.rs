use std::net::SocketAddr;

slotmap::new_key_type! {
    /// Handle to a candidate this agent harvested locally.
    pub struct LocalCandidateId;
    /// Handle to a candidate learned from the remote peer (signaled or peer-reflexive).
    pub struct RemoteCandidateId;
    /// Handle to a candidate pair in a checklist.
    pub struct PairId;
    /// Handle to a media stream (one checklist, one or more components).
    pub struct StreamId;
}

/// A candidate's type, per RFC 8445 §5.1.1. Ordering here is irrelevant; see
/// [`CandidateKind::type_preference`] for the priority contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relayed,
}

impl CandidateKind {
    /// The `type preference` term of RFC 8445 §5.1.2.1's priority formula.
    ///
    /// These are the values the RFC recommends (host highest, relayed lowest) — not the
    /// inverted ordering some legacy NAT-traversal stacks shipped with.
    pub fn type_preference(self) -> u32 {
        match self {
            CandidateKind::Host => 126,
            CandidateKind::PeerReflexive => 110,
            CandidateKind::ServerReflexive => 100,
            CandidateKind::Relayed => 0,
        }
    }
}

/// The underlying transport a candidate is reachable over (RFC 8445 base; RFC 6544 adds TCP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Udp,
    Tcp(TcpType),
}

/// A TCP candidate's role, per RFC 6544 §4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpType {
    Active,
    Passive,
    /// Simultaneous-open: can act as either active or passive.
    SimultaneousOpen,
}

/// A single ICE candidate: a transport address an agent is willing to receive connectivity
/// checks on, plus everything needed to pair and prioritize it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub component_id: u16,
    pub foundation: String,
    pub priority: u32,
    /// The address this candidate is reachable at.
    pub addr: SocketAddr,
    /// The local address candidates of this type are derived from (RFC 8445 §5.1.1.2); equal to
    /// `addr` for host candidates.
    pub base: SocketAddr,
    pub kind: CandidateKind,
    pub protocol: TransportProtocol,
    /// For reflexive/relayed candidates, the address of the STUN/TURN server that produced it.
    pub related_addr: Option<SocketAddr>,
}

impl Candidate {
    /// RFC 8445 §5.1.2.1: `priority = 2^24 * type_pref + 2^8 * local_pref + (256 - component_id)`.
    pub fn compute_priority(type_pref: u32, local_pref: u16, component_id: u16) -> u32 {
        (type_pref << 24) + ((local_pref as u32) << 8) + (256 - component_id as u32)
    }

    /// Two candidates belong to the same foundation (RFC 8445 §5.1.3) when they have the same
    /// type, base address, protocol, and (for reflexive candidates) were learned from the same
    /// STUN/TURN server.
    pub fn foundation_key(&self) -> (CandidateKind, SocketAddr, TransportProtocol, Option<SocketAddr>) {
        (self.kind, self.base, self.protocol, self.related_addr)
    }
}

/// Assigns foundations to a growing set of local candidates, reusing the same foundation string
/// for candidates that share a [`Candidate::foundation_key`].
#[derive(Default)]
pub struct FoundationAllocator {
    seen: Vec<((CandidateKind, SocketAddr, TransportProtocol, Option<SocketAddr>), String)>,
    next: u32,
}

impl FoundationAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn foundation_for(&mut self, key: (CandidateKind, SocketAddr, TransportProtocol, Option<SocketAddr>)) -> String {
        if let Some((_, f)) = self.seen.iter().find(|(k, _)| *k == key) {
            return f.clone();
        }
        let f = self.next.to_string();
        self.next += 1;
        self.seen.push((key, f.clone()));
        f
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_host_above_srflx_above_relay() {
        let host = Candidate::compute_priority(CandidateKind::Host.type_preference(), 65535, 1);
        let srflx = Candidate::compute_priority(CandidateKind::ServerReflexive.type_preference(), 65535, 1);
        let relay = Candidate::compute_priority(CandidateKind::Relayed.type_preference(), 65535, 1);
        assert!(host > srflx);
        assert!(srflx > relay);
    }

    #[test]
    fn same_base_and_type_share_a_foundation() {
        let mut alloc = FoundationAllocator::new();
        let base: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let key_a = (CandidateKind::Host, base, TransportProtocol::Udp, None);
        let key_b = (CandidateKind::Host, base, TransportProtocol::Udp, None);
        assert_eq!(alloc.foundation_for(key_a), alloc.foundation_for(key_b));
    }

    #[test]
    fn different_component_same_base_still_shares_foundation() {
        // Foundation is independent of component id per RFC 8445 §5.1.3.
        let mut alloc = FoundationAllocator::new();
        let base: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let key = (CandidateKind::Host, base, TransportProtocol::Udp, None);
        let f1 = alloc.foundation_for(key);
        let f2 = alloc.foundation_for(key);
        assert_eq!(f1, f2);
    }
}
