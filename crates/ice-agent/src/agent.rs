//! The sans-IO ICE agent: owns every stream's checklist and candidate tables, decides what to
//! send and when, and is driven entirely by [`IceAgent::receive`], [`IceAgent::poll_transmit`]
//! and [`IceAgent::handle_timeout`] — it never opens a socket itself (see `ice-transport` for
//! that).

use crate::candidate::{
    Candidate, CandidateKind, FoundationAllocator, LocalCandidateId, PairId, RemoteCandidateId,
    StreamId, TransportProtocol,
};
use crate::checklist::{Checklist, ChecklistState};
use crate::config::{AgentConfig, IceMode, IceRole};
use crate::credentials::IceCredentials;
use crate::error::IceError;
use crate::harvest::host::{is_cgnat_addr, is_non_public, is_private};
use crate::harvest::{StunHarvest, TurnEvent, TurnHarvest};
use crate::nomination::pair_to_nominate;
use crate::pair::{pair_priority, CandidatePair, PairState};
use crate::stats::StreamStats;
use crate::transaction::Transaction;
use ice_stun::attributes::{
    ErrorCode, IceControlled, IceControlling, MessageIntegrity, MessageIntegrityKey, Priority,
    UseCandidate, Username, XorMappedAddress,
};
use ice_stun::{looks_like_stun_message, Class, Message, MessageBuilder, Method, TransactionId};
use rand::RngCore;
use slotmap::SlotMap;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;

/// A message this agent wants sent on the wire. `from` names which local candidate's socket to
/// send it from; the transport layer owns the actual sockets.
#[derive(Debug, Clone)]
pub struct Transmit {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub data: Vec<u8>,
}

/// Something the application embedding this agent might care about.
#[derive(Debug, Clone)]
pub enum IceEvent {
    LocalCandidate(StreamId, Candidate),
    PairValidated(StreamId, PairId),
    Nominated { stream: StreamId, component_id: u16, pair: PairId },
    StreamFailed(StreamId),
    RoleConflictResolved(IceRole),
}

/// This agent's place in the overall lifecycle (RFC 8445 §4.6), independent of any one stream's
/// checklist state: an agent with several streams is `Running` as long as any of them still has
/// checking to do, and only reaches `Completed`/`Failed` once every stream has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// No stream has started gathering yet.
    Waiting,
    /// At least one stream has an outstanding STUN/TURN harvest.
    Gathering,
    /// Every harvest has finished, but connectivity checks haven't started (or resumed) yet.
    CompletedGathering,
    /// Connectivity checks are in flight on at least one stream.
    Running,
    /// Every stream's checklist reached `Completed` with no failures.
    Completed,
    /// At least one stream's checklist failed.
    Failed,
    /// [`IceAgent::free`] has run; every transaction is cancelled and all bookkeeping is gone.
    Terminated,
}

struct Stream {
    local_creds: IceCredentials,
    remote_creds: Option<IceCredentials>,
    local_candidates: SlotMap<LocalCandidateId, Candidate>,
    remote_candidates: SlotMap<RemoteCandidateId, Candidate>,
    checklist: Checklist,
    foundations: FoundationAllocator,
}

impl Stream {
    fn new() -> Self {
        Self {
            local_creds: IceCredentials::generate(),
            remote_creds: None,
            local_candidates: SlotMap::with_key(),
            remote_candidates: SlotMap::with_key(),
            checklist: Checklist::new(),
            foundations: FoundationAllocator::new(),
        }
    }
}

enum PendingHarvest {
    Stun(StunHarvest),
    Turn(TurnHarvest),
}

/// RFC 7675 §5.1 consent-freshness timer for one nominated pair: periodic Binding requests,
/// re-sent with a short backoff, that keep the pair's NAT bindings alive and detect consent
/// loss. Simplified from the RFC's defaults (`Ti=5s, RC=7, RTO0=500ms`) down to whatever
/// `AgentConfig::consent_freshness_interval`/retry count this agent is configured with.
struct ConsentTimer {
    stream: StreamId,
    next_send: Instant,
    outstanding: Option<Transaction>,
}

/// RFC 7675 §5.1's RTO defaults, scaled by the configured freshness interval.
const CONSENT_INITIAL_RTO: std::time::Duration = std::time::Duration::from_millis(500);
const CONSENT_MAX_RETRANSMITS: u32 = 7;

/// What, if anything, a [`ConsentTimer`] needs done on this tick.
enum ConsentTick {
    Send(TransactionId),
    Lost,
    Idle,
}

pub struct IceAgent {
    config: AgentConfig,
    role: IceRole,
    tie_breaker: u64,
    streams: SlotMap<StreamId, Stream>,
    /// Maps an outstanding connectivity-check transaction id back to where it came from.
    outstanding_checks: HashMap<TransactionId, (StreamId, PairId)>,
    harvests: Vec<(StreamId, PendingHarvest)>,
    consent_timers: HashMap<PairId, ConsentTimer>,
    consent_outstanding: HashMap<TransactionId, PairId>,
    stats: HashMap<StreamId, StreamStats>,
    events: VecDeque<IceEvent>,
    state: AgentState,
    /// Set once the agent first reaches `Completed`/`Failed`; `handle_timeout` calls `free()`
    /// once `config.termination_delay` has elapsed since.
    terminating_since: Option<Instant>,
}

impl IceAgent {
    pub fn new(config: AgentConfig) -> Self {
        // RFC 8445 §2.7: a lite agent never initiates checks, so it can never win the
        // controlling role — it's always controlled.
        let role = if config.mode == IceMode::Lite { IceRole::Controlled } else { config.role };
        Self {
            config,
            role,
            tie_breaker: rand::thread_rng().next_u64(),
            streams: SlotMap::with_key(),
            outstanding_checks: HashMap::new(),
            harvests: Vec::new(),
            consent_timers: HashMap::new(),
            consent_outstanding: HashMap::new(),
            stats: HashMap::new(),
            events: VecDeque::new(),
            state: AgentState::Waiting,
            terminating_since: None,
        }
    }

    pub fn add_stream(&mut self) -> StreamId {
        let id = self.streams.insert(Stream::new());
        self.stats.insert(id, StreamStats::default());
        id
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Cancels every outstanding transaction and clears this agent's bookkeeping. Idempotent —
    /// calling it again once `state()` is already `Terminated` does nothing. Releasing the
    /// actual sockets is the transport layer's job once it observes this state.
    pub fn free(&mut self) {
        if self.state == AgentState::Terminated {
            return;
        }
        self.streams.clear();
        self.harvests.clear();
        self.consent_timers.clear();
        self.consent_outstanding.clear();
        self.outstanding_checks.clear();
        self.events.clear();
        self.terminating_since = None;
        self.state = AgentState::Terminated;
    }

    /// Recomputes [`AgentState`] from current stream/harvest/transaction bookkeeping, and arms
    /// the termination timer the first time it observes `Completed`/`Failed`.
    fn refresh_lifecycle(&mut self, now: Instant) {
        if self.state == AgentState::Terminated {
            return;
        }
        let new_state = self.lifecycle_state();
        if matches!(new_state, AgentState::Completed | AgentState::Failed) && self.terminating_since.is_none() {
            self.terminating_since = Some(now);
        }
        self.state = new_state;
    }

    fn lifecycle_state(&self) -> AgentState {
        if self.streams.is_empty() {
            return AgentState::Waiting;
        }
        if !self.harvests.is_empty() {
            return AgentState::Gathering;
        }
        let any_stream_running = self.streams.values().any(|s| s.checklist.state == ChecklistState::Running);
        if any_stream_running {
            let any_check_activity = !self.outstanding_checks.is_empty()
                || self
                    .streams
                    .values()
                    .any(|s| s.checklist.iter().any(|p| matches!(p.state, PairState::Waiting | PairState::InProgress)));
            return if any_check_activity { AgentState::Running } else { AgentState::CompletedGathering };
        }
        let any_failed = self.streams.values().any(|s| s.checklist.state == ChecklistState::Failed);
        if any_failed { AgentState::Failed } else { AgentState::Completed }
    }

    pub fn local_credentials(&self, stream: StreamId) -> Result<&IceCredentials, IceError> {
        Ok(&self.streams.get(stream).ok_or(IceError::UnknownStream)?.local_creds)
    }

    pub fn set_remote_credentials(&mut self, stream: StreamId, ufrag: String, pwd: String) -> Result<(), IceError> {
        let stream = self.streams.get_mut(stream).ok_or(IceError::UnknownStream)?;
        stream.remote_creds = Some(IceCredentials { ufrag, pwd });
        Ok(())
    }

    /// Begins harvesting server-reflexive/relayed candidates against every server in the
    /// config, from `base`. Returns the first wire message for each harvest started.
    pub fn start_server_harvesting(&mut self, stream: StreamId, component_id: u16, base: SocketAddr, now: Instant) -> Result<Vec<Transmit>, IceError> {
        if !self.streams.contains_key(stream) {
            return Err(IceError::UnknownStream);
        }
        if self.config.mode == IceMode::Lite {
            // RFC 8445 §2.7: a lite implementation only ever offers host candidates.
            return Ok(Vec::new());
        }
        let mut transmits = Vec::new();

        for server in self.config.stun_servers.clone() {
            let (harvest, bytes) = StunHarvest::new(server.addr, base, component_id, 65535, self.config.rto, now);
            transmits.push(Transmit { from: base, to: server.addr, data: bytes });
            self.harvests.push((stream, PendingHarvest::Stun(harvest)));
        }

        for server in self.config.turn_servers.clone() {
            let Some(creds) = server.credentials else { continue };
            let (harvest, bytes) = TurnHarvest::new(
                server.addr, base, component_id, 65535, creds.username, creds.password, self.config.rto, now,
            );
            transmits.push(Transmit { from: base, to: server.addr, data: bytes });
            self.harvests.push((stream, PendingHarvest::Turn(harvest)));
        }

        self.refresh_lifecycle(now);
        Ok(transmits)
    }

    /// Adds a host candidate harvested by the caller (the transport layer enumerates
    /// interfaces; this crate only decides what to do with the result).
    pub fn add_local_candidate(&mut self, stream: StreamId, candidate: Candidate) -> Result<LocalCandidateId, IceError> {
        let s = self.streams.get_mut(stream).ok_or(IceError::UnknownStream)?;
        let id = s.local_candidates.insert(candidate.clone());
        self.events.push_back(IceEvent::LocalCandidate(stream, candidate));
        if let Some(stats) = self.stats.get_mut(&stream) {
            stats.candidates_harvested += 1;
        }
        self.pair_new_local(stream, id)?;
        Ok(id)
    }

    /// Adds a candidate signaled by the remote peer, pairing it against every compatible local
    /// candidate (RFC 8445 §6.1.2.2). Rejected outright if it falls in a remote address range
    /// this agent is configured to distrust (§6 `SKIP_REMOTE_*` knobs).
    pub fn add_remote_candidate(&mut self, stream: StreamId, candidate: Candidate) -> Result<RemoteCandidateId, IceError> {
        if self.remote_candidate_filtered(candidate.addr.ip()) {
            return Err(IceError::RemoteCandidateFiltered(candidate.addr));
        }
        let s = self.streams.get_mut(stream).ok_or(IceError::UnknownStream)?;
        let id = s.remote_candidates.insert(candidate);
        self.pair_new_remote(stream, id)?;
        Ok(id)
    }

    fn remote_candidate_filtered(&self, ip: std::net::IpAddr) -> bool {
        (self.config.skip_remote_cgnat && is_cgnat_addr(ip))
            || (self.config.skip_remote_private_hosts && is_private(ip))
            || (self.config.skip_remote_non_public_hosts && is_non_public(ip))
    }

    fn pair_new_local(&mut self, stream: StreamId, local: LocalCandidateId) -> Result<(), IceError> {
        let remotes: Vec<RemoteCandidateId> = {
            let s = self.streams.get(stream).ok_or(IceError::UnknownStream)?;
            s.remote_candidates.keys().collect()
        };
        for remote in remotes {
            self.form_pair(stream, local, remote)?;
        }
        self.prune_checklist(stream)
    }

    fn pair_new_remote(&mut self, stream: StreamId, remote: RemoteCandidateId) -> Result<(), IceError> {
        let locals: Vec<LocalCandidateId> = {
            let s = self.streams.get(stream).ok_or(IceError::UnknownStream)?;
            s.local_candidates.keys().collect()
        };
        for local in locals {
            self.form_pair(stream, local, remote)?;
        }
        self.prune_checklist(stream)
    }

    /// RFC 8445 §6.1.2.4: drop pairs made redundant by a shared remote candidate and identical
    /// local base, keeping only the higher-priority local candidate's pair; then cap the
    /// checklist at `max_checklist_size`, dropping the lowest-priority pairs first.
    fn prune_checklist(&mut self, stream_id: StreamId) -> Result<(), IceError> {
        let cap = self.config.max_checklist_size;
        let s = self.streams.get_mut(stream_id).ok_or(IceError::UnknownStream)?;

        let mut by_group: HashMap<(RemoteCandidateId, SocketAddr), (PairId, u64)> = HashMap::new();
        let mut redundant = Vec::new();
        for pair in s.checklist.iter() {
            let Some(base) = s.local_candidates.get(pair.local).map(|c| c.base) else { continue };
            let key = (pair.remote, base);
            match by_group.get(&key).copied() {
                Some((_, existing_priority)) if existing_priority >= pair.priority => redundant.push(pair.id),
                Some((existing_id, _)) => {
                    redundant.push(existing_id);
                    by_group.insert(key, (pair.id, pair.priority));
                }
                None => {
                    by_group.insert(key, (pair.id, pair.priority));
                }
            }
        }
        s.checklist.remove_all(&redundant);

        if s.checklist.len() > cap {
            let mut by_priority: Vec<(PairId, u64)> = s.checklist.iter().map(|p| (p.id, p.priority)).collect();
            by_priority.sort_by_key(|&(_, priority)| std::cmp::Reverse(priority));
            let overflow: Vec<PairId> = by_priority.into_iter().skip(cap).map(|(id, _)| id).collect();
            s.checklist.remove_all(&overflow);
        }

        Ok(())
    }

    fn form_pair(&mut self, stream_id: StreamId, local: LocalCandidateId, remote: RemoteCandidateId) -> Result<(), IceError> {
        let s = self.streams.get_mut(stream_id).ok_or(IceError::UnknownStream)?;
        let (local_priority, remote_priority, component_id) = {
            let l = &s.local_candidates[local];
            let r = &s.remote_candidates[remote];
            if l.component_id != r.component_id {
                return Ok(());
            }
            (l.priority, r.priority, l.component_id)
        };

        let (controlling_priority, controlled_priority) = match self.role {
            IceRole::Controlling => (local_priority, remote_priority),
            IceRole::Controlled => (remote_priority, local_priority),
        };
        let priority = pair_priority(controlling_priority, controlled_priority);

        let local_foundation = s.local_candidates[local].foundation.clone();
        let remote_foundation = s.remote_candidates[remote].foundation.clone();

        let pair = CandidatePair {
            id: PairId::default(),
            local,
            remote,
            component_id,
            priority,
            state: PairState::Frozen,
            nominated: false,
            valid: false,
            peer_nomination_requested: false,
            foundation: (local_foundation, remote_foundation),
        };
        s.checklist.insert(pair);
        s.checklist.unfreeze_first_of_each_foundation();
        Ok(())
    }

    /// Builds the next connectivity-check request to send for `stream`, if the pacing timer
    /// allows one (RFC 8445 §14, `Ta`). Call this on the pacing tick.
    pub fn next_check(&mut self, stream_id: StreamId, now: Instant) -> Result<Option<Transmit>, IceError> {
        if self.config.mode == IceMode::Lite {
            // RFC 8445 §2.7: a lite agent never originates connectivity checks.
            return Ok(None);
        }
        let s = self.streams.get_mut(stream_id).ok_or(IceError::UnknownStream)?;
        let Some(remote_creds) = s.remote_creds.clone() else { return Err(IceError::MissingRemoteCredentials) };
        let Some(pair_id) = s.checklist.next_to_check() else { return Ok(None) };

        let Some(pair) = s.checklist.get(pair_id) else { return Ok(None) };
        let component_id = pair.component_id;
        let local = &s.local_candidates[pair.local];
        let remote = &s.remote_candidates[pair.remote];
        let (local_addr, remote_addr, local_priority) = (local.base, remote.addr, local.priority);

        if let Some(pair) = s.checklist.get_mut(pair_id) {
            pair.state = PairState::InProgress;
        }

        let should_nominate = matches!(self.role, IceRole::Controlling)
            && pair_to_nominate(&s.checklist, component_id, self.config.nomination, None) == Some(pair_id);

        let tid = TransactionId::random();
        let mut builder = MessageBuilder::new(Class::Request, Method::Binding, tid);
        let username = remote_creds.username_for_request(&s.local_creds.ufrag);
        builder.add_attr(&Username::new(username)).ok();
        builder.add_attr(&Priority(local_priority)).ok();
        match self.role {
            IceRole::Controlling => {
                builder.add_attr(&IceControlling(self.tie_breaker)).ok();
                if should_nominate {
                    builder.add_attr(&UseCandidate).ok();
                }
            }
            IceRole::Controlled => {
                builder.add_attr(&IceControlled(self.tie_breaker)).ok();
            }
        }
        let key = MessageIntegrityKey::new_short_term(&remote_creds.pwd);
        builder.add_message_integrity::<MessageIntegrity>(&key).ok();
        builder.add_fingerprint().ok();
        let data = builder.finish();

        self.outstanding_checks.insert(tid, (stream_id, pair_id));
        if let Some(stats) = self.stats.get_mut(&stream_id) {
            stats.record_check_sent();
        }

        self.refresh_lifecycle(now);
        Ok(Some(Transmit { from: local_addr, to: remote_addr, data }))
    }

    /// Feeds a datagram received on `local`, from `from`. `now` is used for RTT/timer
    /// bookkeeping. Returns any resulting transmit (a check response, harvest retry, etc).
    pub fn receive(&mut self, stream_id: StreamId, local: SocketAddr, from: SocketAddr, data: &[u8], now: Instant) -> Result<(Option<Transmit>, Vec<IceEvent>), IceError> {
        if !looks_like_stun_message(data) {
            return Ok((None, Vec::new()));
        }
        let msg = match Message::parse(data.to_vec()) {
            Ok(msg) => msg,
            Err(_) => return Ok((None, Vec::new())),
        };

        match (msg.class(), msg.method()) {
            (Class::Request, Method::Binding) => self.handle_incoming_check(stream_id, local, from, &msg),
            (Class::Success, Method::Binding) | (Class::Error, Method::Binding) => {
                self.handle_check_response(stream_id, local, from, &msg, now)
            }
            _ => self.handle_harvest_message(&msg, now),
        }
    }

    fn handle_incoming_check(&mut self, stream_id: StreamId, local: SocketAddr, from: SocketAddr, msg: &Message) -> Result<(Option<Transmit>, Vec<IceEvent>), IceError> {
        let s = self.streams.get_mut(stream_id).ok_or(IceError::UnknownStream)?;
        let key = MessageIntegrityKey::new_short_term(&s.local_creds.pwd);
        let verified = msg.attribute_with::<MessageIntegrity>(&key).is_some_and(|r| r.is_ok());
        if !verified {
            return Ok((None, Vec::new()));
        }

        // USERNAME must address us (RFC 8445 §7.1.1: "our-ufrag:their-ufrag" from our side).
        let expected_prefix = format!("{}:", s.local_creds.ufrag);
        let username_ok = msg
            .attribute::<Username>()
            .and_then(Result::ok)
            .is_some_and(|u| u.0.starts_with(&expected_prefix));
        if !username_ok {
            return Ok((None, Vec::new()));
        }

        let mut events = Vec::new();

        // Role conflict resolution (RFC 8445 §7.3.1.1).
        let peer_controlling = msg.attribute::<IceControlling>().and_then(Result::ok).map(|a| a.0);
        let peer_controlled = msg.attribute::<IceControlled>().and_then(Result::ok).map(|a| a.0);

        if let Some(peer_tb) = peer_controlling {
            if self.role == IceRole::Controlling {
                if self.tie_breaker >= peer_tb {
                    return Ok((Some(self.role_conflict_response(msg, local, from)), events));
                } else {
                    self.role = IceRole::Controlled;
                    events.push(IceEvent::RoleConflictResolved(self.role));
                }
            }
        }
        if let Some(peer_tb) = peer_controlled {
            if self.role == IceRole::Controlled {
                if self.tie_breaker >= peer_tb {
                    self.role = IceRole::Controlling;
                    events.push(IceEvent::RoleConflictResolved(self.role));
                } else {
                    return Ok((Some(self.role_conflict_response(msg, local, from)), events));
                }
            }
        }

        let use_candidate = msg.attribute::<UseCandidate>().is_some();

        // Find (or create, if peer-reflexive) the pair this check landed on. Receiving a
        // request never validates a pair by itself (RFC 8445 §4.7 step 2) — it only creates the
        // pair if needed, unfreezes it, and fast-tracks this agent's own check on it; validation
        // comes once that check gets a successful, symmetric response (`handle_check_response`).
        let pair_id = self.find_or_create_pair_for_check(stream_id, local, from)?;

        let s = self.streams.get_mut(stream_id).ok_or(IceError::UnknownStream)?;
        let mut nominate_now = false;
        if let Some(pair) = s.checklist.get_mut(pair_id) {
            if matches!(pair.state, PairState::Frozen | PairState::Failed) {
                pair.state = PairState::Waiting;
            }
            if use_candidate {
                pair.peer_nomination_requested = true;
                // RFC 8445 §7.3.1.5: if this pair already validated from an earlier check of
                // ours, honor the nomination immediately instead of waiting for a check that
                // already happened.
                if pair.valid && !pair.nominated {
                    pair.nominated = true;
                    nominate_now = true;
                }
            }
        }
        s.checklist.enqueue_triggered(pair_id);

        if nominate_now {
            let component_id = s.checklist.get(pair_id).map(|p| p.component_id).unwrap_or(1);
            events.push(IceEvent::Nominated { stream: stream_id, component_id, pair: pair_id });
            self.start_consent(stream_id, pair_id, std::time::Instant::now());
        }

        let s = self.streams.get(stream_id).ok_or(IceError::UnknownStream)?;
        let local_key = MessageIntegrityKey::new_short_term(&s.local_creds.pwd);
        let mut builder = MessageBuilder::new(Class::Success, Method::Binding, msg.transaction_id());
        builder.add_xor_attr(&XorMappedAddress(from)).ok();
        builder.add_message_integrity::<MessageIntegrity>(&local_key).ok();
        builder.add_fingerprint().ok();
        let response = Transmit { from: local, to: from, data: builder.finish() };

        Ok((Some(response), events))
    }

    fn role_conflict_response(&self, msg: &Message, local: SocketAddr, from: SocketAddr) -> Transmit {
        let mut builder = MessageBuilder::new(Class::Error, Method::Binding, msg.transaction_id());
        let _ = builder.add_attr(&ErrorCode::new(487, "Role Conflict"));
        let _ = builder.add_fingerprint();
        Transmit { from: local, to: from, data: builder.finish() }
    }

    fn find_or_create_pair_for_check(&mut self, stream_id: StreamId, local: SocketAddr, from: SocketAddr) -> Result<PairId, IceError> {
        let s = self.streams.get_mut(stream_id).ok_or(IceError::UnknownStream)?;

        let local_id = s.local_candidates.iter().find(|(_, c)| c.base == local).map(|(id, _)| id);
        let remote_id = s.remote_candidates.iter().find(|(_, c)| c.addr == from).map(|(id, _)| id);

        if let (Some(local_id), Some(remote_id)) = (local_id, remote_id) {
            if let Some(pair) = s.checklist.iter().find(|p| p.local == local_id && p.remote == remote_id) {
                return Ok(pair.id);
            }
        }

        // Peer-reflexive: the remote address wasn't signaled (RFC 8445 §7.3.1.3/.4). Learn it
        // now, pairing it against every local candidate at that base.
        let remote_id = match remote_id {
            Some(id) => id,
            None => {
                let component_id = local_id.map(|id| s.local_candidates[id].component_id).unwrap_or(1);
                let key = (CandidateKind::PeerReflexive, from, TransportProtocol::Udp, None);
                let foundation = s.foundations.foundation_for(key);
                s.remote_candidates.insert(Candidate {
                    component_id,
                    foundation,
                    priority: 0,
                    addr: from,
                    base: from,
                    kind: CandidateKind::PeerReflexive,
                    protocol: TransportProtocol::Udp,
                    related_addr: None,
                })
            }
        };

        let local_id = match local_id {
            Some(id) => id,
            None => return Err(IceError::NoLocalCandidates),
        };

        self.form_pair(stream_id, local_id, remote_id)?;
        let s = self.streams.get(stream_id).ok_or(IceError::UnknownStream)?;
        s.checklist
            .iter()
            .find(|p| p.local == local_id && p.remote == remote_id)
            .map(|p| p.id)
            .ok_or(IceError::NoLocalCandidates)
    }

    fn handle_check_response(&mut self, stream_id: StreamId, local: SocketAddr, from: SocketAddr, msg: &Message, now: Instant) -> Result<(Option<Transmit>, Vec<IceEvent>), IceError> {
        if let Some(pair_id) = self.consent_outstanding.remove(&msg.transaction_id()) {
            return Ok((None, self.handle_consent_response(pair_id, msg, now)));
        }

        let Some((expected_stream, pair_id)) = self.outstanding_checks.remove(&msg.transaction_id()) else {
            return Ok((None, Vec::new()));
        };
        if expected_stream != stream_id {
            return Ok((None, Vec::new()));
        }

        let mut events = Vec::new();
        let s = self.streams.get_mut(stream_id).ok_or(IceError::UnknownStream)?;

        // Symmetric check (RFC 8445 §7.2.5.2.1): a response only validates the check that sent
        // it if it arrived on the exact socket pair the request went out on. Anything else is
        // discarded, not just ignored as an error — it isn't an answer to this check at all.
        let Some(pair) = s.checklist.get(pair_id) else { return Ok((None, events)) };
        let expected_local = s.local_candidates.get(pair.local).map(|c| c.base);
        let expected_remote = s.remote_candidates.get(pair.remote).map(|c| c.addr);
        if expected_local != Some(local) || expected_remote != Some(from) {
            log::warn!("discarding check response for pair {pair_id:?}: expected {expected_local:?}<-{expected_remote:?}, got {local}<-{from}");
            return Ok((None, events));
        }

        if msg.class() == Class::Error {
            let is_role_conflict = msg
                .attribute::<ErrorCode>()
                .and_then(Result::ok)
                .is_some_and(|e| e.code == 487);
            if is_role_conflict {
                self.role = match self.role {
                    IceRole::Controlling => IceRole::Controlled,
                    IceRole::Controlled => IceRole::Controlling,
                };
                events.push(IceEvent::RoleConflictResolved(self.role));
            }
            if let Some(pair) = s.checklist.get_mut(pair_id) {
                pair.state = PairState::Failed;
            }
            if let Some(stats) = self.stats.get_mut(&stream_id) {
                stats.record_check_failure();
            }
            self.finalize_checklist(stream_id);
            self.refresh_lifecycle(now);
            return Ok((None, events));
        }

        // Peer-reflexive local candidate discovery (RFC 8445 §7.2.5.3.1): if XOR-MAPPED-ADDRESS
        // names an address we haven't harvested, the path rewrote our source address and this
        // pair's real local candidate is a new peer-reflexive one sharing the old base.
        if let Some(Ok(mapped)) = msg.attribute_xor::<XorMappedAddress>() {
            let already_known = s.local_candidates.iter().any(|(_, c)| c.addr == mapped.0);
            if !already_known {
                let component_id = pair.component_id;
                let base = s.local_candidates.get(pair.local).map(|c| c.base).unwrap_or(mapped.0);
                let key = (CandidateKind::PeerReflexive, mapped.0, TransportProtocol::Udp, None);
                let foundation = s.foundations.foundation_for(key);
                let priority = Candidate::compute_priority(CandidateKind::PeerReflexive.type_preference(), 65535, component_id);
                let candidate = Candidate {
                    component_id,
                    foundation,
                    priority,
                    addr: mapped.0,
                    base,
                    kind: CandidateKind::PeerReflexive,
                    protocol: TransportProtocol::Udp,
                    related_addr: None,
                };
                let new_local = s.local_candidates.insert(candidate.clone());
                if let Some(pair) = s.checklist.get_mut(pair_id) {
                    pair.local = new_local;
                }
                events.push(IceEvent::LocalCandidate(stream_id, candidate));
            }
        }

        let mut peer_requested_nomination = false;
        if let Some(pair) = s.checklist.get_mut(pair_id) {
            pair.state = PairState::Succeeded;
            pair.valid = true;
            peer_requested_nomination = pair.peer_nomination_requested;
            let foundation = pair.foundation.clone();
            s.checklist.unfreeze_foundation(&foundation);
        }
        if let Some(stats) = self.stats.get_mut(&stream_id) {
            stats.record_check_success(std::time::Duration::from_millis(0));
        }
        events.push(IceEvent::PairValidated(stream_id, pair_id));

        let component_id = s.checklist.get(pair_id).map(|p| p.component_id).unwrap_or(1);

        let mut nominated = None;
        if peer_requested_nomination && !s.checklist.has_nominated(component_id) {
            if let Some(pair) = s.checklist.get_mut(pair_id) {
                pair.nominated = true;
            }
            nominated = Some(pair_id);
        } else {
            nominated = pair_to_nominate(&s.checklist, component_id, self.config.nomination, Some(pair_id));
            if let Some(nominate_id) = nominated {
                if let Some(pair) = s.checklist.get_mut(nominate_id) {
                    pair.nominated = true;
                }
            }
        }
        if let Some(nominate_id) = nominated {
            events.push(IceEvent::Nominated { stream: stream_id, component_id, pair: nominate_id });
        }

        self.finalize_checklist(stream_id);

        if let Some(nominate_id) = nominated {
            self.start_consent(stream_id, nominate_id, now);
        }

        self.refresh_lifecycle(now);
        Ok((None, events))
    }

    /// Marks a stream's checklist `Completed`/`Failed` once every pair has settled (RFC 8445
    /// §6.1.2.1's terminal states), `Failed` only if nothing validated.
    fn finalize_checklist(&mut self, stream_id: StreamId) {
        let Some(s) = self.streams.get_mut(stream_id) else { return };
        if s.checklist.all_terminal() {
            let any_valid = s.checklist.iter().any(|p| p.valid);
            s.checklist.state = if any_valid { ChecklistState::Completed } else { ChecklistState::Failed };
        }
    }

    /// Starts (or leaves untouched, if one is already running) the consent-freshness timer for
    /// a newly-nominated pair.
    fn start_consent(&mut self, stream_id: StreamId, pair_id: PairId, now: Instant) {
        self.consent_timers.entry(pair_id).or_insert_with(|| ConsentTimer {
            stream: stream_id,
            next_send: now + self.config.consent_freshness_interval,
            outstanding: None,
        });
    }

    /// Builds the Binding request used for one consent-freshness tick on `pair_id`, signed the
    /// same way as a regular connectivity check (RFC 7675 §4).
    fn build_consent_request(&self, stream_id: StreamId, pair_id: PairId, tid: TransactionId) -> Option<Transmit> {
        let s = self.streams.get(stream_id)?;
        let remote_creds = s.remote_creds.as_ref()?;
        let pair = s.checklist.get(pair_id)?;
        let local = &s.local_candidates[pair.local];
        let remote = &s.remote_candidates[pair.remote];

        let mut builder = MessageBuilder::new(Class::Request, Method::Binding, tid);
        let username = remote_creds.username_for_request(&s.local_creds.ufrag);
        builder.add_attr(&Username::new(username)).ok()?;
        match self.role {
            IceRole::Controlling => { builder.add_attr(&IceControlling(self.tie_breaker)).ok()?; }
            IceRole::Controlled => { builder.add_attr(&IceControlled(self.tie_breaker)).ok()?; }
        }
        let key = MessageIntegrityKey::new_short_term(&remote_creds.pwd);
        builder.add_message_integrity::<MessageIntegrity>(&key).ok()?;
        builder.add_fingerprint().ok()?;

        Some(Transmit { from: local.base, to: remote.addr, data: builder.finish() })
    }

    /// Applies the result of a consent-freshness response: a success reschedules the next tick,
    /// anything else is treated as consent lost (RFC 7675 §5.2).
    fn handle_consent_response(&mut self, pair_id: PairId, msg: &Message, now: Instant) -> Vec<IceEvent> {
        if msg.class() == Class::Success {
            if let Some(timer) = self.consent_timers.get_mut(&pair_id) {
                timer.outstanding = None;
                timer.next_send = now + self.config.consent_freshness_interval;
            }
            return Vec::new();
        }

        let Some(timer) = self.consent_timers.remove(&pair_id) else { return Vec::new() };
        if let Some(s) = self.streams.get_mut(timer.stream) {
            if let Some(pair) = s.checklist.get_mut(pair_id) {
                pair.valid = false;
            }
        }
        vec![IceEvent::StreamFailed(timer.stream)]
    }

    fn handle_harvest_message(&mut self, msg: &Message, now: Instant) -> Result<(Option<Transmit>, Vec<IceEvent>), IceError> {
        let Some(index) = self.harvests.iter().position(|(_, h)| harvest_transaction_id(h) == msg.transaction_id()) else {
            return Ok((None, Vec::new()));
        };

        let (stream_id, harvest) = &mut self.harvests[index];
        let stream_id = *stream_id;

        match harvest {
            PendingHarvest::Stun(h) => {
                let s = self.streams.get_mut(stream_id).ok_or(IceError::UnknownStream)?;
                let candidate = h.on_response(msg, &mut s.foundations);
                self.harvests.remove(index);
                if let Some(candidate) = candidate {
                    self.add_local_candidate(stream_id, candidate)?;
                }
                Ok((None, Vec::new()))
            }
            PendingHarvest::Turn(h) => {
                let server = h.server();
                let base = h.base();
                let s = self.streams.get_mut(stream_id).ok_or(IceError::UnknownStream)?;
                let event = h.on_response(msg, &mut s.foundations, now);
                match event {
                    Some(TurnEvent::Send(bytes)) => {
                        Ok((Some(Transmit { from: base, to: server, data: bytes }), Vec::new()))
                    }
                    Some(TurnEvent::Allocated(candidate, _refresh_in, reflexive)) => {
                        self.harvests.remove(index);
                        self.add_local_candidate(stream_id, candidate)?;
                        if let Some(reflexive) = reflexive {
                            self.add_local_candidate(stream_id, reflexive)?;
                        }
                        Ok((None, Vec::new()))
                    }
                    Some(TurnEvent::Failed) | None => {
                        self.harvests.remove(index);
                        Ok((None, Vec::new()))
                    }
                }
            }
        }
    }

    /// Services retransmission/pacing timers that have come due. Returns every transmit that
    /// needs sending as a result (harvest retries first, then one paced connectivity check per
    /// stream).
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<Transmit> {
        let mut transmits = Vec::new();

        let mut finished = Vec::new();
        for (index, (_, harvest)) in self.harvests.iter_mut().enumerate() {
            match harvest {
                PendingHarvest::Stun(h) => {
                    if now >= h.deadline() {
                        match h.on_timeout(now) {
                            Some(bytes) => transmits.push(Transmit { from: h.base(), to: h.server(), data: bytes }),
                            None => finished.push(index),
                        }
                    }
                }
                PendingHarvest::Turn(h) => {
                    if now >= h.deadline() {
                        match h.on_timeout(now) {
                            Some(bytes) => transmits.push(Transmit { from: h.base(), to: h.server(), data: bytes }),
                            None => finished.push(index),
                        }
                    }
                }
            }
        }
        for index in finished.into_iter().rev() {
            self.harvests.remove(index);
        }

        let pair_ids: Vec<PairId> = self.consent_timers.keys().copied().collect();
        for pair_id in pair_ids {
            let tick = {
                let Some(timer) = self.consent_timers.get_mut(&pair_id) else { continue };
                if let Some(txn) = &mut timer.outstanding {
                    if now >= txn.deadline() {
                        match txn.on_timeout(now) {
                            Some(()) => ConsentTick::Send(txn.id),
                            None => ConsentTick::Lost,
                        }
                    } else {
                        ConsentTick::Idle
                    }
                } else if now >= timer.next_send {
                    let tid = TransactionId::random();
                    let rto = crate::config::RtoConfig {
                        initial_rto: CONSENT_INITIAL_RTO,
                        max_rto: self.config.consent_freshness_interval,
                        max_retransmits: CONSENT_MAX_RETRANSMITS,
                    };
                    timer.outstanding = Some(Transaction::new(tid, rto, now));
                    ConsentTick::Send(tid)
                } else {
                    ConsentTick::Idle
                }
            };

            match tick {
                ConsentTick::Send(tid) => {
                    let stream_id = self.consent_timers[&pair_id].stream;
                    if let Some(transmit) = self.build_consent_request(stream_id, pair_id, tid) {
                        self.consent_outstanding.insert(tid, pair_id);
                        transmits.push(transmit);
                    }
                }
                ConsentTick::Lost => {
                    let stream_id = self.consent_timers[&pair_id].stream;
                    self.consent_timers.remove(&pair_id);
                    self.events.push_back(IceEvent::StreamFailed(stream_id));
                }
                ConsentTick::Idle => {}
            }
        }

        self.refresh_lifecycle(now);
        if let Some(since) = self.terminating_since {
            if now.saturating_duration_since(since) >= self.config.termination_delay {
                self.free();
            }
        }

        transmits
    }

    pub fn pop_event(&mut self) -> Option<IceEvent> {
        self.events.pop_front()
    }

    pub fn role(&self) -> IceRole {
        self.role
    }

    pub fn stats(&self, stream: StreamId) -> Option<&StreamStats> {
        self.stats.get(&stream)
    }
}

fn harvest_transaction_id(h: &PendingHarvest) -> TransactionId {
    match h {
        PendingHarvest::Stun(h) => h.transaction_id(),
        PendingHarvest::Turn(h) => h.transaction_id(),
    }
}
