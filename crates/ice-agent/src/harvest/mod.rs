//! Candidate harvesting (RFC 8445 §5.1): turning local interfaces and STUN/TURN servers into
//! candidates. Each sub-harvester is sans-IO — it hands back wire bytes to send and consumes
//! wire bytes the caller received, never touching a socket itself.

pub mod host;
pub mod mapping;
pub mod stun;
pub mod turn;

pub use host::harvest_host_candidates;
pub use mapping::harvest_static_mapping;
pub use stun::StunHarvest;
pub use turn::{decode_channel_data, encode_channel_data, TurnEvent, TurnHarvest};
