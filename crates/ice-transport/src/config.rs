use std::time::Duration;

/// How inbound sockets are shared across endpoints registered with an [`crate::acceptor_pool::AcceptorPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorStrategy {
    /// One acceptor per socket: maximum isolation, one bound port per candidate.
    SocketPerInstance,
    /// One acceptor per transport kind (UDP/TCP) per user-session, shared across that
    /// session's streams and components.
    AcceptorPerTransportPerSession,
    /// One acceptor per transport kind for the entire process; every session and stream
    /// demultiplexes off the same bound port.
    SharedAcceptor,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Number of I/O threads reading/writing sockets, kept separate from the STUN/ICE worker
    /// threads that run `ice_agent::IceAgent`. Defaults to twice the logical CPU count.
    pub io_threads: usize,
    pub acceptor_strategy: AcceptorStrategy,
    /// How often the sweeper scans for endpoints nobody has touched in `sweeper_timeout`.
    pub sweeper_interval: Duration,
    pub sweeper_timeout: Duration,
    /// `SO_LINGER` for TCP candidate sockets. `None` leaves the OS default (RFC 4571 candidates
    /// otherwise linger indefinitely on close, same as the -1 sentinel this mirrors).
    pub so_linger: Option<Duration>,
    pub recv_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            io_threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) * 2,
            acceptor_strategy: AcceptorStrategy::AcceptorPerTransportPerSession,
            sweeper_interval: Duration::from_secs(60),
            sweeper_timeout: Duration::from_secs(60),
            so_linger: None,
            recv_buffer_size: 65535,
        }
    }
}
