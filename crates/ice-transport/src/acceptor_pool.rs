use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::AcceptorStrategy;
use crate::endpoint::{EndpointKey, Inbound, TransportKind};
use crate::error::TransportError;

struct Registration {
    sender: mpsc::Sender<Inbound>,
    last_active: Instant,
}

/// The process-wide (or session-wide, depending on [`AcceptorStrategy`]) registry of bound
/// sockets and the endpoints demultiplexing frames off them.
///
/// Bindings themselves (the actual `UdpSocket`/`TcpListener`) live in `udp`/`tcp`; this pool only
/// tracks *who* currently owns which `(transport, local, remote)` tuple and routes inbound frames
/// to the matching registration's queue. `SharedAcceptor` additionally enforces that at most one
/// acceptor binds a given `(transport, local)` pair process-wide.
pub struct AcceptorPool {
    strategy: AcceptorStrategy,
    registry: Mutex<HashMap<EndpointKey, Registration>>,
    bound_acceptors: Mutex<HashSet<(TransportKind, SocketAddr)>>,
}

impl AcceptorPool {
    pub fn new(strategy: AcceptorStrategy) -> Self {
        Self {
            strategy,
            registry: Mutex::new(HashMap::new()),
            bound_acceptors: Mutex::new(HashSet::new()),
        }
    }

    pub fn strategy(&self) -> AcceptorStrategy {
        self.strategy
    }

    /// Claims the right to bind `(transport, local)`. Under `SharedAcceptor` a second claim for
    /// the same pair is rejected — the caller should look up and reuse the existing socket
    /// instead of binding a new one.
    pub fn claim_acceptor(&self, transport: TransportKind, local: SocketAddr) -> Result<(), TransportError> {
        if self.strategy != AcceptorStrategy::SharedAcceptor {
            return Ok(());
        }
        let mut bound = self.bound_acceptors.lock();
        if !bound.insert((transport, local)) {
            return Err(TransportError::DuplicateSharedAcceptor(local));
        }
        Ok(())
    }

    pub fn release_acceptor(&self, transport: TransportKind, local: SocketAddr) {
        self.bound_acceptors.lock().remove(&(transport, local));
    }

    pub fn register(&self, key: EndpointKey, sender: mpsc::Sender<Inbound>) {
        self.registry.lock().insert(key, Registration { sender, last_active: Instant::now() });
    }

    pub fn unregister(&self, key: &EndpointKey) {
        self.registry.lock().remove(key);
    }

    /// Routes one inbound frame. Prefers an exact `(local, remote)` registration (a TCP session,
    /// or a UDP peer already bound) and falls back to a local-only wildcard registration (a UDP
    /// host candidate socket that hasn't learned its peer yet). Returns whether anything claimed
    /// the frame.
    pub fn dispatch(&self, transport: TransportKind, local: SocketAddr, remote: SocketAddr, data: Vec<u8>) -> bool {
        let mut registry = self.registry.lock();

        let exact = registry.keys().find(|k| k.matches(transport, local, remote)).copied();
        let key = exact.or_else(|| registry.keys().find(|k| k.matches_wildcard(transport, local)).copied());

        let Some(key) = key else { return false };
        let Some(reg) = registry.get_mut(&key) else { return false };

        reg.last_active = Instant::now();
        match reg.sender.try_send(Inbound { local, remote, data }) {
            Ok(()) => true,
            Err(_) => {
                log::warn!("dropping inbound frame for {local} <-> {remote}: endpoint queue full or closed");
                false
            }
        }
    }

    /// Returns every registration whose `last_active` is older than `timeout` as of `now`,
    /// without removing them — the sweeper decides what to do (it's also the owner of any
    /// sockets that should then be closed).
    pub fn stale(&self, now: Instant, timeout: std::time::Duration) -> Vec<EndpointKey> {
        self.registry
            .lock()
            .iter()
            .filter(|(_, reg)| now.duration_since(reg.last_active) >= timeout)
            .map(|(key, _)| *key)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn shared_acceptor_rejects_duplicate_bind() {
        let pool = AcceptorPool::new(AcceptorStrategy::SharedAcceptor);
        let local = addr("10.0.0.1:4000");
        pool.claim_acceptor(TransportKind::Udp, local).unwrap();
        assert!(pool.claim_acceptor(TransportKind::Udp, local).is_err());
    }

    #[test]
    fn socket_per_instance_never_conflicts() {
        let pool = AcceptorPool::new(AcceptorStrategy::SocketPerInstance);
        let local = addr("10.0.0.1:4000");
        pool.claim_acceptor(TransportKind::Udp, local).unwrap();
        assert!(pool.claim_acceptor(TransportKind::Udp, local).is_ok());
    }

    #[tokio::test]
    async fn dispatch_prefers_exact_match_over_wildcard() {
        let pool = AcceptorPool::new(AcceptorStrategy::AcceptorPerTransportPerSession);
        let local = addr("10.0.0.1:4000");
        let remote = addr("203.0.113.1:9");

        let (wildcard_tx, mut wildcard_rx) = mpsc::channel(4);
        let (exact_tx, mut exact_rx) = mpsc::channel(4);
        pool.register(EndpointKey::new(TransportKind::Udp, local, None), wildcard_tx);
        pool.register(EndpointKey::new(TransportKind::Udp, local, Some(remote)), exact_tx);

        assert!(pool.dispatch(TransportKind::Udp, local, remote, vec![1, 2, 3]));
        assert!(exact_rx.try_recv().is_ok());
        assert!(wildcard_rx.try_recv().is_err());
    }

    #[test]
    fn stale_lists_registrations_past_the_timeout() {
        let pool = AcceptorPool::new(AcceptorStrategy::SocketPerInstance);
        let local = addr("10.0.0.1:4000");
        let (tx, _rx) = mpsc::channel(4);
        pool.register(EndpointKey::new(TransportKind::Udp, local, None), tx);

        assert!(pool.stale(Instant::now(), std::time::Duration::from_secs(60)).is_empty());
        let future = Instant::now() + std::time::Duration::from_secs(61);
        assert_eq!(pool.stale(future, std::time::Duration::from_secs(60)).len(), 1);
    }
}
