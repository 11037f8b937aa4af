use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Udp,
    Tcp,
}

/// Identifies one registered endpoint in an [`crate::acceptor_pool::AcceptorPool`]: the
/// transport kind, the local address a socket is bound to, and either a fixed remote address
/// (a TCP candidate's session, or a UDP candidate that has learned its one peer) or `None` to
/// match any remote address reaching that local address (a freshly-bound UDP host candidate
/// before any peer has been nominated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub transport: TransportKind,
    pub local: SocketAddr,
    pub remote: Option<SocketAddr>,
}

impl EndpointKey {
    pub fn new(transport: TransportKind, local: SocketAddr, remote: Option<SocketAddr>) -> Self {
        Self { transport, local, remote }
    }

    /// Whether a frame arriving from `from` on `local` matches this registration: an exact
    /// `(local, remote)` match wins over a local-only (`remote: None`) wildcard registration.
    pub fn matches(&self, transport: TransportKind, local: SocketAddr, from: SocketAddr) -> bool {
        self.transport == transport && self.local == local && matches!(self.remote, Some(r) if r == from)
    }

    pub fn matches_wildcard(&self, transport: TransportKind, local: SocketAddr) -> bool {
        self.transport == transport && self.local == local && self.remote.is_none()
    }
}

/// A received frame handed from the I/O layer to whichever endpoint owns it.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub data: Vec<u8>,
}
