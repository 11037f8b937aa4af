#![deny(unreachable_pub, unsafe_code)]

//! Sans-IO ICE agent (RFC 8445): candidate harvesting, checklist formation and pacing,
//! connectivity checks, nomination and role-conflict resolution.
//!
//! Nothing here touches a socket or a clock: callers drive the agent with bytes they read off
//! the wire ([`IceAgent::receive`]) and with their own notion of time ([`IceAgent::handle_timeout`],
//! [`IceAgent::next_check`]), and get back [`agent::Transmit`]s to send and [`agent::IceEvent`]s
//! to react to. See `ice-transport` for a concrete socket-driven harness.

mod agent;
mod candidate;
mod checklist;
mod config;
mod credentials;
mod error;
mod harvest;
mod nomination;
mod pair;
mod stats;
mod transaction;

pub use agent::{AgentState, IceAgent, IceEvent, Transmit};
pub use candidate::{
    Candidate, CandidateKind, LocalCandidateId, PairId, RemoteCandidateId, StreamId,
    TcpType, TransportProtocol,
};
pub use checklist::ChecklistState;
pub use config::{
    AgentConfig, IceMode, IceRole, NominationStrategy, RtoConfig, ServerConfig, TurnCredentials,
};
pub use credentials::IceCredentials;
pub use error::IceError;
pub use harvest::{decode_channel_data, encode_channel_data};
pub use pair::{CandidatePair, PairState};
pub use stats::StreamStats;
