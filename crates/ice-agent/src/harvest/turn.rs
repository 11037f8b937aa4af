use crate::candidate::{Candidate, CandidateKind, FoundationAllocator, TransportProtocol};
use crate::config::RtoConfig;
use crate::transaction::Transaction;
use ice_stun::attributes::{
    ChannelNumber, ErrorCode, Lifetime, MessageIntegrity, MessageIntegrityKey, Nonce, Realm,
    RequestedTransport, Username, XorMappedAddress, XorPeerAddress, XorRelayedAddress,
};
use ice_stun::{Class, Message, MessageBuilder, Method, TransactionId};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// RFC 5766 default/minimum allocation lifetime is 10 minutes; refresh comfortably before that.
const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingChallenge,
    AwaitingAllocate,
    Allocated,
    Failed,
}

/// Harvests a relayed candidate by driving the TURN long-term-credential Allocate handshake
/// (RFC 5766 §6, RFC 8489 §9.2): an unauthenticated Allocate draws a 401 with REALM/NONCE, then
/// a second Allocate carries USERNAME/REALM/NONCE/MESSAGE-INTEGRITY computed from them.
pub struct TurnHarvest {
    server: SocketAddr,
    base: SocketAddr,
    component_id: u16,
    local_pref: u16,
    username: String,
    password: String,
    realm: Option<String>,
    nonce: Option<String>,
    txn: Transaction,
    state: State,
    rto: RtoConfig,
    relayed_addr: Option<SocketAddr>,
}

pub enum TurnEvent {
    /// Retry the handshake with a fresh request (after a 401/438 challenge).
    Send(Vec<u8>),
    /// The allocation succeeded: the relayed candidate, how long until it must be refreshed, and
    /// (if the server's response carried one) the server-reflexive candidate observed at the
    /// same time (RFC 8489 §9.2, RFC 8445 §4.5 step 3).
    Allocated(Candidate, Duration, Option<Candidate>),
    Failed,
}

impl TurnHarvest {
    pub fn new(
        server: SocketAddr,
        base: SocketAddr,
        component_id: u16,
        local_pref: u16,
        username: String,
        password: String,
        rto: RtoConfig,
        now: Instant,
    ) -> (Self, Vec<u8>) {
        let tid = TransactionId::random();
        let bytes = build_allocate(tid, None);
        (
            Self {
                server,
                base,
                component_id,
                local_pref,
                username,
                password,
                realm: None,
                nonce: None,
                txn: Transaction::new(tid, rto, now),
                state: State::AwaitingChallenge,
                rto,
                relayed_addr: None,
            },
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

    pub fn on_timeout(&mut self, now: Instant) -> Option<Vec<u8>> {
        if self.state == State::Failed || self.state == State::Allocated {
            return None;
        }
        self.txn.on_timeout(now).map(|()| build_allocate(self.txn.id, self.credentials()))
    }

    fn credentials(&self) -> Option<(String, String, String, MessageIntegrityKey)> {
        let realm = self.realm.clone()?;
        let nonce = self.nonce.clone()?;
        let key = MessageIntegrityKey::new_long_term(&self.username, &realm, &self.password);
        Some((self.username.clone(), realm, nonce, key))
    }

    pub fn on_response(
        &mut self,
        msg: &Message,
        foundations: &mut FoundationAllocator,
        now: Instant,
    ) -> Option<TurnEvent> {
        if msg.transaction_id() != self.txn.id {
            return None;
        }

        match msg.class() {
            Class::Error => {
                let err = msg.attribute::<ErrorCode>()?.ok()?;
                if err.code != 401 && err.code != 438 {
                    self.state = State::Failed;
                    return Some(TurnEvent::Failed);
                }
                self.realm = msg.attribute::<Realm>().and_then(Result::ok).map(|r| r.0);
                self.nonce = msg.attribute::<Nonce>().and_then(Result::ok).map(|n| n.0);
                self.state = State::AwaitingAllocate;

                let tid = TransactionId::random();
                self.txn = Transaction::new(tid, self.rto, now);
                let bytes = build_allocate(tid, self.credentials());
                Some(TurnEvent::Send(bytes))
            }
            Class::Success => {
                let relayed = msg.attribute_xor::<XorRelayedAddress>()?.ok()?;
                let lifetime = msg
                    .attribute::<Lifetime>()
                    .and_then(Result::ok)
                    .map(|l| Duration::from_secs(l.0 as u64))
                    .unwrap_or(Duration::from_secs(600));

                self.relayed_addr = Some(relayed.0);
                self.state = State::Allocated;

                let key = (CandidateKind::Relayed, self.base, TransportProtocol::Udp, Some(self.server));
                let candidate = Candidate {
                    component_id: self.component_id,
                    foundation: foundations.foundation_for(key),
                    priority: Candidate::compute_priority(
                        CandidateKind::Relayed.type_preference(),
                        self.local_pref,
                        self.component_id,
                    ),
                    addr: relayed.0,
                    base: self.base,
                    kind: CandidateKind::Relayed,
                    protocol: TransportProtocol::Udp,
                    related_addr: Some(self.server),
                };

                // The Allocate response's own XOR-MAPPED-ADDRESS names the server-reflexive
                // address the server observed, same as a plain STUN Binding response would.
                let reflexive = msg.attribute_xor::<XorMappedAddress>().and_then(Result::ok).map(|mapped| {
                    let key = (CandidateKind::ServerReflexive, self.base, TransportProtocol::Udp, Some(self.server));
                    Candidate {
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
                    }
                });

                let refresh_in = lifetime.saturating_sub(DEFAULT_REFRESH_MARGIN);
                Some(TurnEvent::Allocated(candidate, refresh_in, reflexive))
            }
            _ => None,
        }
    }

    /// Builds a CreatePermission request for `peer`, required before relaying any data to/from
    /// it (RFC 5766 §9). Only valid once allocated.
    pub fn create_permission(&self, peer: SocketAddr) -> Option<Vec<u8>> {
        let (username, realm, nonce, key) = self.credentials()?;
        let tid = TransactionId::random();
        let mut builder = MessageBuilder::new(Class::Request, Method::CreatePermission, tid);
        builder.add_xor_attr(&XorPeerAddress(peer)).ok()?;
        builder.add_attr(&Username::new(username)).ok()?;
        builder.add_attr(&Realm::new(realm)).ok()?;
        builder.add_attr(&Nonce::new(nonce)).ok()?;
        builder.add_message_integrity::<MessageIntegrity>(&key).ok()?;
        Some(builder.finish())
    }

    /// Builds a Refresh request to extend (or, with `lifetime = Some(0)`, tear down) the
    /// allocation (RFC 5766 §7).
    pub fn refresh_request(&self, lifetime: Option<u32>) -> Option<Vec<u8>> {
        let (username, realm, nonce, key) = self.credentials()?;
        let tid = TransactionId::random();
        let mut builder = MessageBuilder::new(Class::Request, Method::Refresh, tid);
        if let Some(lifetime) = lifetime {
            builder.add_attr(&Lifetime(lifetime)).ok()?;
        }
        builder.add_attr(&Username::new(username)).ok()?;
        builder.add_attr(&Realm::new(realm)).ok()?;
        builder.add_attr(&Nonce::new(nonce)).ok()?;
        builder.add_message_integrity::<MessageIntegrity>(&key).ok()?;
        Some(builder.finish())
    }

    pub fn relayed_addr(&self) -> Option<SocketAddr> {
        self.relayed_addr
    }

    /// Builds a ChannelBind request binding `channel` (0x4000-0x7FFE, RFC 5766 §14.1) to `peer`.
    /// A bound channel lets data flow as 4-byte-header ChannelData instead of full Send/Data
    /// indications, and implicitly refreshes the peer's permission.
    pub fn channel_bind_request(&self, channel: u16, peer: SocketAddr) -> Option<Vec<u8>> {
        let (username, realm, nonce, key) = self.credentials()?;
        let tid = TransactionId::random();
        let mut builder = MessageBuilder::new(Class::Request, Method::ChannelBind, tid);
        builder.add_attr(&ChannelNumber(channel)).ok()?;
        builder.add_xor_attr(&XorPeerAddress(peer)).ok()?;
        builder.add_attr(&Username::new(username)).ok()?;
        builder.add_attr(&Realm::new(realm)).ok()?;
        builder.add_attr(&Nonce::new(nonce)).ok()?;
        builder.add_message_integrity::<MessageIntegrity>(&key).ok()?;
        Some(builder.finish())
    }
}

/// Frames `payload` as ChannelData (RFC 5766 §11.4): a 4-byte header (channel number, then the
/// payload length) rather than a full STUN Send indication, for use once a channel is bound.
pub fn encode_channel_data(channel: u16, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&channel.to_be_bytes());
    framed.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Parses a ChannelData frame, returning `(channel, payload)`. `data` may carry trailing padding
/// bytes beyond the declared length when framed over UDP; TCP transports must not add any.
pub fn decode_channel_data(data: &[u8]) -> Option<(u16, &[u8])> {
    if data.len() < 4 {
        return None;
    }
    let channel = u16::from_be_bytes([data[0], data[1]]);
    let len = u16::from_be_bytes([data[2], data[3]]) as usize;
    if data.len() < 4 + len {
        return None;
    }
    Some((channel, &data[4..4 + len]))
}

fn build_allocate(tid: TransactionId, credentials: Option<(String, String, String, MessageIntegrityKey)>) -> Vec<u8> {
    let mut builder = MessageBuilder::new(Class::Request, Method::Allocate, tid);
    let _ = builder.add_attr(&RequestedTransport::UDP);
    if let Some((username, realm, nonce, key)) = credentials {
        let _ = builder.add_attr(&Username::new(username));
        let _ = builder.add_attr(&Realm::new(realm));
        let _ = builder.add_attr(&Nonce::new(nonce));
        let _ = builder.add_message_integrity::<MessageIntegrity>(&key);
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_data_round_trips() {
        let framed = encode_channel_data(0x4000, b"relayed payload");
        let (channel, payload) = decode_channel_data(&framed).unwrap();
        assert_eq!(channel, 0x4000);
        assert_eq!(payload, b"relayed payload");
    }

    #[test]
    fn channel_data_rejects_truncated_frame() {
        let framed = encode_channel_data(0x4000, b"payload");
        assert!(decode_channel_data(&framed[..5]).is_none());
    }

    #[test]
    fn unauthenticated_challenge_triggers_authenticated_retry() {
        let now = Instant::now();
        let server: SocketAddr = "203.0.113.9:3478".parse().unwrap();
        let base: SocketAddr = "10.0.0.2:4000".parse().unwrap();
        let (mut harvest, _req) = TurnHarvest::new(
            server, base, 1, 65535, "user".into(), "pass".into(), RtoConfig::default(), now,
        );

        let mut builder = MessageBuilder::new(Class::Error, Method::Allocate, harvest.transaction_id());
        builder.add_attr(&ErrorCode::new(401, "Unauthorized")).unwrap();
        builder.add_attr(&Realm::new("example.org")).unwrap();
        builder.add_attr(&Nonce::new("abc123")).unwrap();
        let msg = Message::parse(builder.finish()).unwrap();

        let mut foundations = FoundationAllocator::new();
        let event = harvest.on_response(&msg, &mut foundations, now).unwrap();
        assert!(matches!(event, TurnEvent::Send(_)));
        assert_eq!(harvest.realm.as_deref(), Some("example.org"));
    }

    #[test]
    fn success_response_yields_relayed_candidate() {
        let now = Instant::now();
        let server: SocketAddr = "203.0.113.9:3478".parse().unwrap();
        let base: SocketAddr = "10.0.0.2:4000".parse().unwrap();
        let (mut harvest, _req) = TurnHarvest::new(
            server, base, 1, 65535, "user".into(), "pass".into(), RtoConfig::default(), now,
        );

        let mut builder = MessageBuilder::new(Class::Success, Method::Allocate, harvest.transaction_id());
        let relayed: SocketAddr = "198.51.100.9:50000".parse().unwrap();
        builder.add_xor_attr(&XorRelayedAddress(relayed)).unwrap();
        builder.add_attr(&Lifetime(600)).unwrap();
        let msg = Message::parse(builder.finish()).unwrap();

        let mut foundations = FoundationAllocator::new();
        match harvest.on_response(&msg, &mut foundations, now).unwrap() {
            TurnEvent::Allocated(candidate, refresh_in, reflexive) => {
                assert_eq!(candidate.addr, relayed);
                assert_eq!(candidate.kind, CandidateKind::Relayed);
                assert!(refresh_in < Duration::from_secs(600));
                assert!(reflexive.is_none(), "no XOR-MAPPED-ADDRESS was in the response");
            }
            _ => panic!("expected Allocated"),
        }
    }

    #[test]
    fn success_response_with_mapped_address_also_yields_server_reflexive_candidate() {
        let now = Instant::now();
        let server: SocketAddr = "203.0.113.9:3478".parse().unwrap();
        let base: SocketAddr = "10.0.0.2:4000".parse().unwrap();
        let (mut harvest, _req) = TurnHarvest::new(
            server, base, 1, 65535, "user".into(), "pass".into(), RtoConfig::default(), now,
        );

        let mut builder = MessageBuilder::new(Class::Success, Method::Allocate, harvest.transaction_id());
        let relayed: SocketAddr = "198.51.100.9:50000".parse().unwrap();
        let mapped: SocketAddr = "198.51.100.1:4000".parse().unwrap();
        builder.add_xor_attr(&XorRelayedAddress(relayed)).unwrap();
        builder.add_xor_attr(&XorMappedAddress(mapped)).unwrap();
        builder.add_attr(&Lifetime(600)).unwrap();
        let msg = Message::parse(builder.finish()).unwrap();

        let mut foundations = FoundationAllocator::new();
        match harvest.on_response(&msg, &mut foundations, now).unwrap() {
            TurnEvent::Allocated(_, _, reflexive) => {
                let reflexive = reflexive.expect("mapped address should yield a server-reflexive candidate");
                assert_eq!(reflexive.addr, mapped);
                assert_eq!(reflexive.kind, CandidateKind::ServerReflexive);
                assert_eq!(reflexive.base, base);
            }
            _ => panic!("expected Allocated"),
        }
    }
}
