use ice_agent::{
    AgentConfig, Candidate, CandidateKind, IceAgent, IceEvent, IceRole, StreamId, TransportProtocol,
};
use ice_stun::attributes::{ErrorCode, XorMappedAddress};
use ice_stun::{Class, Message, MessageBuilder, Method};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

fn host_candidate(addr: SocketAddr) -> Candidate {
    Candidate {
        component_id: 1,
        foundation: "0".into(),
        priority: Candidate::compute_priority(CandidateKind::Host.type_preference(), 65535, 1),
        addr,
        base: addr,
        kind: CandidateKind::Host,
        protocol: TransportProtocol::Udp,
        related_addr: None,
    }
}

struct Peer {
    agent: IceAgent,
    stream: StreamId,
    addr: SocketAddr,
}

fn make_pair(a_addr: SocketAddr, b_addr: SocketAddr) -> (Peer, Peer) {
    let mut a = IceAgent::new(AgentConfig { role: IceRole::Controlling, ..Default::default() });
    let mut b = IceAgent::new(AgentConfig { role: IceRole::Controlled, ..Default::default() });

    let stream_a = a.add_stream();
    let stream_b = b.add_stream();

    a.add_local_candidate(stream_a, host_candidate(a_addr)).unwrap();
    b.add_local_candidate(stream_b, host_candidate(b_addr)).unwrap();

    let a_creds = a.local_credentials(stream_a).unwrap().clone();
    let b_creds = b.local_credentials(stream_b).unwrap().clone();
    a.set_remote_credentials(stream_a, b_creds.ufrag, b_creds.pwd).unwrap();
    b.set_remote_credentials(stream_b, a_creds.ufrag, a_creds.pwd).unwrap();

    a.add_remote_candidate(stream_a, host_candidate(b_addr)).unwrap();
    b.add_remote_candidate(stream_b, host_candidate(a_addr)).unwrap();

    (Peer { agent: a, stream: stream_a, addr: a_addr }, Peer { agent: b, stream: stream_b, addr: b_addr })
}

#[test]
fn single_pair_checklist_validates_and_nominates() {
    let a_addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();
    let b_addr: SocketAddr = "10.0.0.2:5000".parse().unwrap();
    let (mut a, mut b) = make_pair(a_addr, b_addr);
    let now = Instant::now();

    let request = a.agent.next_check(a.stream, now).unwrap().expect("a has a pair to check");
    assert_eq!(request.from, a_addr);
    assert_eq!(request.to, b_addr);

    let (response, b_events) = b.agent.receive(b.stream, b_addr, a_addr, &request.data, now).unwrap();
    // Receiving a's request alone never validates b's side of the pair (RFC 8445 §4.7 step 2):
    // that only happens once b's own check on the pair gets a successful, symmetric response.
    assert!(!b_events.iter().any(|e| matches!(e, IceEvent::PairValidated(..))));
    let response = response.expect("b answers a's check with a Success response");

    let (none, a_events) = a.agent.receive(a.stream, a_addr, b_addr, &response.data, now).unwrap();
    assert!(none.is_none());
    assert!(a_events.iter().any(|e| matches!(e, IceEvent::PairValidated(..))));
    assert!(a_events.iter().any(|e| matches!(e, IceEvent::Nominated { .. })));

    // a's request fast-tracked b's own check on the pair onto its triggered-check queue; pulling
    // it and completing the round trip is what actually validates b's side.
    let b_request = b.agent.next_check(b.stream, now).unwrap().expect("b's triggered check is queued");
    assert_eq!(b_request.from, b_addr);
    assert_eq!(b_request.to, a_addr);

    let (b_response, a_events_2) = a.agent.receive(a.stream, a_addr, b_addr, &b_request.data, now).unwrap();
    assert!(a_events_2.is_empty(), "answering b's check carries no new events for a");
    let b_response = b_response.expect("a answers b's check with a Success response");

    let (none, b_events_2) = b.agent.receive(b.stream, b_addr, a_addr, &b_response.data, now).unwrap();
    assert!(none.is_none());
    assert!(b_events_2.iter().any(|e| matches!(e, IceEvent::PairValidated(..))));
}

#[test]
fn mismatched_response_source_does_not_validate_the_pair() {
    let a_addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();
    let b_addr: SocketAddr = "10.0.0.2:5000".parse().unwrap();
    let spoofed_addr: SocketAddr = "10.0.0.99:5000".parse().unwrap();
    let (mut a, mut b) = make_pair(a_addr, b_addr);
    let now = Instant::now();

    let request = a.agent.next_check(a.stream, now).unwrap().unwrap();
    let (response, _) = b.agent.receive(b.stream, b_addr, a_addr, &request.data, now).unwrap();
    let response = response.expect("b answers a's check");

    // Same bytes, but arriving from an address other than the one the request went to: the
    // symmetric-check requirement (RFC 8445 §7.2.5.2.1) means this must not validate anything.
    let (none, events) = a.agent.receive(a.stream, a_addr, spoofed_addr, &response.data, now).unwrap();
    assert!(none.is_none());
    assert!(events.is_empty());
}

#[test]
fn response_with_unfamiliar_mapped_address_yields_peer_reflexive_local_candidate() {
    let a_addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();
    let b_addr: SocketAddr = "10.0.0.2:5000".parse().unwrap();
    let reflexive_addr: SocketAddr = "203.0.113.7:60000".parse().unwrap();
    let (mut a, _b) = make_pair(a_addr, b_addr);
    let now = Instant::now();

    let request = a.agent.next_check(a.stream, now).unwrap().unwrap();
    let tid = Message::parse(request.data.clone()).unwrap().transaction_id();

    // A NAT along the path rewrote a's source address: the response's XOR-MAPPED-ADDRESS names
    // something a never harvested (RFC 8445 §7.2.5.3.1).
    let mut builder = MessageBuilder::new(Class::Success, Method::Binding, tid);
    builder.add_xor_attr(&XorMappedAddress(reflexive_addr)).unwrap();
    let response = builder.finish();

    let (none, events) = a.agent.receive(a.stream, a_addr, b_addr, &response, now).unwrap();
    assert!(none.is_none());
    assert!(events.iter().any(|e| matches!(
        e,
        IceEvent::LocalCandidate(_, c) if c.addr == reflexive_addr && c.kind == CandidateKind::PeerReflexive
    )));
}

#[test]
fn role_conflict_flips_the_losing_role() {
    // Two controlling agents talking to each other is a role conflict (RFC 8445 §7.3.1.1):
    // whichever tie-breaker is smaller switches to Controlled.
    let a_addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();
    let b_addr: SocketAddr = "10.0.0.2:5000".parse().unwrap();

    let mut a = IceAgent::new(AgentConfig { role: IceRole::Controlling, ..Default::default() });
    let mut b = IceAgent::new(AgentConfig { role: IceRole::Controlling, ..Default::default() });
    let stream_a = a.add_stream();
    let stream_b = b.add_stream();
    a.add_local_candidate(stream_a, host_candidate(a_addr)).unwrap();
    b.add_local_candidate(stream_b, host_candidate(b_addr)).unwrap();
    let a_creds = a.local_credentials(stream_a).unwrap().clone();
    let b_creds = b.local_credentials(stream_b).unwrap().clone();
    a.set_remote_credentials(stream_a, b_creds.ufrag, b_creds.pwd).unwrap();
    b.set_remote_credentials(stream_b, a_creds.ufrag, a_creds.pwd).unwrap();
    a.add_remote_candidate(stream_a, host_candidate(b_addr)).unwrap();
    b.add_remote_candidate(stream_b, host_candidate(a_addr)).unwrap();

    let now = Instant::now();
    let request = a.next_check(stream_a, now).unwrap().unwrap();
    let (response, b_events) = b.receive(stream_b, b_addr, a_addr, &request.data, now).unwrap();
    let response = response.expect("a request always gets some response, success or 487");

    // Whichever tie-breaker is smaller loses: either b rejects with a 487 (staying Controlling,
    // a will flip once it sees the error), or b accepts and flips to Controlled itself.
    let b_rejected = Message::parse(response.data.clone()).unwrap().class() == Class::Error;
    if b_rejected {
        assert!(b_events.is_empty());
        let (_, a_events) = a.receive(stream_a, a_addr, b_addr, &response.data, now).unwrap();
        assert!(a_events.iter().any(|e| matches!(e, IceEvent::RoleConflictResolved(IceRole::Controlled))));
    } else {
        assert!(b_events.iter().any(|e| matches!(e, IceEvent::RoleConflictResolved(IceRole::Controlled))));
    }
}

#[test]
fn consent_freshness_round_trip_keeps_the_pair_alive() {
    let a_addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();
    let b_addr: SocketAddr = "10.0.0.2:5000".parse().unwrap();
    let (mut a, mut b) = make_pair(a_addr, b_addr);
    let mut now = Instant::now();

    let request = a.agent.next_check(a.stream, now).unwrap().unwrap();
    let (response, _) = b.agent.receive(b.stream, b_addr, a_addr, &request.data, now).unwrap();
    let response = response.unwrap();
    let (_, a_events) = a.agent.receive(a.stream, a_addr, b_addr, &response.data, now).unwrap();
    assert!(a_events.iter().any(|e| matches!(e, IceEvent::Nominated { .. })));

    // No consent tick is due yet.
    assert!(a.agent.handle_timeout(now).is_empty());

    now += Duration::from_secs(5);
    let consent_transmits = a.agent.handle_timeout(now);
    assert_eq!(consent_transmits.len(), 1, "one consent-freshness Binding request should be due");
    let consent_request = &consent_transmits[0];

    let (consent_response, _) = b.agent.receive(b.stream, b_addr, a_addr, &consent_request.data, now).unwrap();
    let consent_response = consent_response.expect("b answers the consent check like any other Binding request");

    let (none, a_events) = a.agent.receive(a.stream, a_addr, b_addr, &consent_response.data, now).unwrap();
    assert!(none.is_none());
    assert!(a_events.is_empty(), "a successful consent response produces no events, just reschedules");
}

#[test]
fn consent_loss_fails_the_stream() {
    let a_addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();
    let b_addr: SocketAddr = "10.0.0.2:5000".parse().unwrap();
    let (mut a, mut b) = make_pair(a_addr, b_addr);
    let mut now = Instant::now();

    let request = a.agent.next_check(a.stream, now).unwrap().unwrap();
    let (response, _) = b.agent.receive(b.stream, b_addr, a_addr, &request.data, now).unwrap();
    let response = response.unwrap();
    a.agent.receive(a.stream, a_addr, b_addr, &response.data, now).unwrap();

    now += Duration::from_secs(5);
    let consent_transmits = a.agent.handle_timeout(now);
    let consent_request = &consent_transmits[0];
    let tid = Message::parse(consent_request.data.clone()).unwrap().transaction_id();

    let mut builder = MessageBuilder::new(Class::Error, Method::Binding, tid);
    builder.add_attr(&ErrorCode::new(400, "Bad Request")).unwrap();
    builder.add_fingerprint().unwrap();
    let error_response = builder.finish();

    let (none, a_events) = a.agent.receive(a.stream, a_addr, b_addr, &error_response, now).unwrap();
    assert!(none.is_none());
    assert!(a_events.iter().any(|e| matches!(e, IceEvent::StreamFailed(s) if *s == a.stream)));

    // The timer is gone: a second timeout tick produces nothing further for this pair.
    assert!(a.agent.handle_timeout(now + Duration::from_secs(10)).is_empty());
}
