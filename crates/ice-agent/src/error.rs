/// Errors an [`crate::agent::IceAgent`] can return from its public API.
#[derive(Debug, thiserror::Error)]
pub enum IceError {
    #[error("unknown stream id")]
    UnknownStream,
    #[error("unknown component id {0}")]
    UnknownComponent(u16),
    #[error("no local candidates harvested yet for this stream")]
    NoLocalCandidates,
    #[error("STUN/TURN codec error: {0}")]
    Codec(#[from] ice_stun::CodecError),
    #[error("remote credentials not yet set for this stream")]
    MissingRemoteCredentials,
    #[error("remote candidate {0} dropped by configured CGNAT/private-host filter")]
    RemoteCandidateFiltered(std::net::SocketAddr),
}
