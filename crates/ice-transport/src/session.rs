use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;

use ice_agent::{IceAgent, IceEvent, StreamId, Transmit};

use crate::acceptor_pool::AcceptorPool;
use crate::endpoint::{EndpointKey, Inbound, TransportKind};
use crate::error::TransportError;
use crate::tcp::TcpTransport;
use crate::udp::UdpAcceptor;

/// Drives one `ice_agent::IceAgent` stream against real sockets: owns the UDP/TCP candidate
/// sockets for this stream, pumps inbound frames into the agent, and pumps the agent's outbound
/// `Transmit`s and pacing/timeout ticks back onto the wire. One `StreamSession` per ICE media
/// stream, matching the teacher's one-`TransportTask`-per-media-transport layout.
pub struct StreamSession {
    agent: IceAgent,
    stream: StreamId,
    pool: Arc<AcceptorPool>,
    udp: HashMap<SocketAddr, UdpAcceptor>,
    tcp: TcpTransport,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,
    pacing: Duration,
    recv_buffer_size: usize,
}

impl StreamSession {
    pub fn new(agent: IceAgent, stream: StreamId, pool: Arc<AcceptorPool>, pacing: Duration, recv_buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        Self {
            agent,
            stream,
            tcp: TcpTransport::new(pool.clone()),
            pool,
            udp: HashMap::new(),
            inbound_tx,
            inbound_rx,
            pacing,
            recv_buffer_size,
        }
    }

    /// Binds a UDP host candidate socket at `local` and registers it as a wildcard endpoint (its
    /// peer isn't known yet, or — for a `SharedAcceptor` pool — is shared with other sessions).
    pub async fn bind_udp(&mut self, local: SocketAddr) -> Result<SocketAddr, TransportError> {
        let acceptor = UdpAcceptor::bind(local, self.pool.clone(), self.recv_buffer_size).await?;
        let bound = acceptor.local_addr();
        self.pool.register(EndpointKey::new(TransportKind::Udp, bound, None), self.inbound_tx.clone());
        self.udp.insert(bound, acceptor);
        Ok(bound)
    }

    /// Opens or accepts-on TCP candidates at `local` (RFC 6544). `passive` listens; otherwise
    /// the caller is expected to `connect` once a remote candidate is known.
    pub async fn bind_tcp_passive(&mut self, local: SocketAddr) -> Result<SocketAddr, TransportError> {
        let bound = self.tcp.listen(local, self.recv_buffer_size).await?;
        self.pool.register(EndpointKey::new(TransportKind::Tcp, bound, None), self.inbound_tx.clone());
        Ok(bound)
    }

    pub async fn connect_tcp_active(&mut self, local: SocketAddr, remote: SocketAddr) -> Result<(), TransportError> {
        self.tcp.connect(local, remote, self.recv_buffer_size).await?;
        self.pool.register(EndpointKey::new(TransportKind::Tcp, local, Some(remote)), self.inbound_tx.clone());
        Ok(())
    }

    async fn send(&self, t: &Transmit) -> Result<(), TransportError> {
        if let Some(udp) = self.udp.get(&t.from) {
            return udp.send_to(&t.data, t.to).await;
        }
        self.tcp.send(t.from, t.to, &t.data).await
    }

    /// Drains whatever `transmits` the agent returned and sends each one.
    async fn flush(&self, transmits: impl IntoIterator<Item = Transmit>) {
        for t in transmits {
            if let Err(e) = self.send(&t).await {
                log::warn!("failed to send ICE transmit {} -> {}: {e}", t.from, t.to);
            }
        }
    }

    /// Runs the session to completion: an inbound-frame/pacing-timer/timeout-timer select loop,
    /// matching the teacher's `TransportTask::run`. Returns the agent once every UDP/TCP
    /// acceptor for this stream has errored out, or the inbound channel has no more senders.
    pub async fn run(mut self, mut events_tx: mpsc::Sender<IceEvent>) -> IceAgent {
        let mut pacing_ticker = tokio::time::interval(self.pacing);
        let mut timeout_ticker = tokio::time::interval(Duration::from_millis(100));

        loop {
            tokio::select! {
                inbound = self.inbound_rx.recv() => {
                    let Some(inbound) = inbound else { break };
                    let now = std::time::Instant::now();
                    match self.agent.receive(self.stream, inbound.local, inbound.remote, &inbound.data, now) {
                        Ok((transmit, events)) => {
                            self.flush(transmit).await;
                            self.dispatch_events(events, &mut events_tx).await;
                        }
                        Err(e) => log::debug!("dropping unparseable ICE message on {}: {e}", inbound.local),
                    }
                }
                _ = pacing_ticker.tick() => {
                    self.tick_pacing().await;
                }
                _ = timeout_ticker.tick() => {
                    let now = std::time::Instant::now();
                    let transmits = self.agent.handle_timeout(now);
                    self.flush(transmits).await;
                }
            }
        }

        self.agent
    }

    async fn tick_pacing(&mut self) {
        let now = std::time::Instant::now();
        match self.agent.next_check(self.stream, now) {
            Ok(Some(transmit)) => self.flush(std::iter::once(transmit)).await,
            Ok(None) => {}
            Err(e) => log::debug!("pacing tick produced no check: {e}"),
        }
    }

    async fn dispatch_events(&self, events: Vec<IceEvent>, events_tx: &mut mpsc::Sender<IceEvent>) {
        for event in events {
            if events_tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

/// Helper for code that wants to drive `handle_timeout` on a fixed wall-clock cadence using
/// tokio's clock rather than `std::time::Instant` directly (kept separate from `IceAgent`'s own
/// sans-IO timing so the agent crate never depends on tokio).
pub fn tokio_now() -> std::time::Instant {
    TokioInstant::now().into_std()
}
