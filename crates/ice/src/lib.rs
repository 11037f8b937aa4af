#![deny(unreachable_pub, unsafe_code)]

//! ICE (RFC 8445), STUN (RFC 5389/8489) and TURN (RFC 5766) in three layers, re-exported here as
//! one crate for applications that just want to depend on `ice`:
//!
//! - [`stun`] — the wire codec: message parsing/building, attributes, MESSAGE-INTEGRITY/
//!   FINGERPRINT.
//! - [`agent`] — the sans-IO agent: candidate harvesting, checklists, connectivity checks,
//!   nomination. Never touches a socket or a clock on its own.
//! - [`transport`] — a concrete tokio-based harness that owns the sockets and drives the agent.
//!
//! Most applications only need [`agent`] and [`transport`]; `stun` is exposed for callers
//! building their own transport (e.g. embedding ICE inside an existing SIP/WebRTC stack that
//! already owns its sockets).

pub use ice_stun as stun;

pub use ice_agent as agent;
pub use ice_agent::{
    AgentConfig, Candidate, CandidateKind, IceAgent, IceCredentials, IceError, IceEvent, IceMode,
    IceRole, NominationStrategy, RtoConfig, ServerConfig, StreamId, Transmit, TurnCredentials,
};

pub use ice_transport as transport;
pub use ice_transport::{
    AcceptorPool, AcceptorStrategy, StreamSession, TransportConfig, TransportError,
};
