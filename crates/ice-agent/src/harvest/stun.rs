use crate::candidate::{Candidate, CandidateKind, FoundationAllocator, TransportProtocol};
use crate::config::RtoConfig;
use crate::transaction::Transaction;
use ice_stun::attributes::XorMappedAddress;
use ice_stun::{Class, Message, MessageBuilder, Method, TransactionId};
use std::net::SocketAddr;
use std::time::Instant;

/// Harvests a server-reflexive candidate with a single STUN Binding request (RFC 8489 §6,
/// RFC 8445 §5.1.1.2) — no ICE credentials involved, since the STUN server isn't a peer.
pub struct StunHarvest {
    server: SocketAddr,
    base: SocketAddr,
    component_id: u16,
    local_pref: u16,
    txn: Transaction,
}

impl StunHarvest {
    /// Starts a harvest, returning it alongside the first request's wire bytes to send to
    /// `server` from `base`.
    pub fn new(
        server: SocketAddr,
        base: SocketAddr,
        component_id: u16,
        local_pref: u16,
        rto: RtoConfig,
        now: Instant,
    ) -> (Self, Vec<u8>) {
        let tid = TransactionId::random();
        let bytes = build_request(tid);
        (
            Self { server, base, component_id, local_pref, txn: Transaction::new(tid, rto, now) },
            bytes,
        )
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn base(&self) -> SocketAddr {
        self.base
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.txn.id
    }

    pub fn deadline(&self) -> Instant {
        self.txn.deadline()
    }

    /// The caller's clock reached this harvest's deadline. `Some(bytes)` means retransmit;
    /// `None` means the server never answered and harvesting this candidate has failed.
    pub fn on_timeout(&mut self, now: Instant) -> Option<Vec<u8>> {
        self.txn.on_timeout(now).map(|()| build_request(self.txn.id))
    }

    /// Feeds a response received from `self.server()`. Returns the harvested candidate if `msg`
    /// is this harvest's Success response.
    pub fn on_response(&self, msg: &Message, foundations: &mut FoundationAllocator) -> Option<Candidate> {
        if msg.transaction_id() != self.txn.id || msg.class() != Class::Success {
            return None;
        }
        let mapped = msg.attribute_xor::<XorMappedAddress>()?.ok()?;
        let key = (CandidateKind::ServerReflexive, self.base, TransportProtocol::Udp, Some(self.server));
        Some(Candidate {
            component_id: self.component_id,
            foundation: foundations.foundation_for(key),
            priority: Candidate::compute_priority(
                CandidateKind::ServerReflexive.type_preference(),
                self.local_pref,
                self.component_id,
            ),
            addr: mapped.0,
            base: self.base,
            kind: CandidateKind::ServerReflexive,
            protocol: TransportProtocol::Udp,
            related_addr: Some(self.server),
        })
    }
}

fn build_request(tid: TransactionId) -> Vec<u8> {
    let mut builder = MessageBuilder::new(Class::Request, Method::Binding, tid);
    let _ = builder.add_fingerprint();
    builder.finish()
}
