#![deny(unreachable_pub, unsafe_code)]

//! Session-oriented UDP/TCP transport for [`ice_agent`]: bound endpoints, RFC 4571 TCP framing,
//! a shared acceptor pool with pluggable sharing strategies, and a periodic sweeper for
//! abandoned endpoints.
//!
//! `ice-agent` is sans-IO by design; this crate is the concrete harness that owns sockets, reads
//! tokio's clock, and calls into it. I/O (this crate's tasks) and STUN/ICE processing
//! (`ice_agent::IceAgent`, driven from [`session::StreamSession::run`]) run on separate tasks,
//! matching the teacher's split between transport tasks and protocol state.

mod acceptor_pool;
mod config;
mod endpoint;
mod error;
mod frame;
mod session;
mod sweeper;
mod tcp;
mod udp;

pub use acceptor_pool::AcceptorPool;
pub use config::{AcceptorStrategy, TransportConfig};
pub use endpoint::{EndpointKey, Inbound, TransportKind};
pub use error::TransportError;
pub use frame::{encode_frame, FrameDecoder, MAX_FRAME_LEN};
pub use session::{tokio_now, StreamSession};
pub use sweeper::spawn_sweeper;
pub use tcp::TcpTransport;
pub use udp::UdpAcceptor;
