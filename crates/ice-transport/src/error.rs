use std::net::SocketAddr;

/// Errors this crate's transports and acceptor pool can surface.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("STUN/TURN codec error: {0}")]
    Codec(#[from] ice_stun::CodecError),
    #[error("ICE agent error: {0}")]
    Agent(#[from] ice_agent::IceError),
    #[error("no endpoint registered for {local} <-> {remote:?}")]
    UnknownEndpoint { local: SocketAddr, remote: Option<SocketAddr> },
    #[error("RFC 4571 frame payload of {0} bytes exceeds the 65535 byte maximum")]
    FrameTooLarge(usize),
    #[error("an acceptor for {0} under the SharedAcceptor strategy already exists")]
    DuplicateSharedAcceptor(SocketAddr),
}
