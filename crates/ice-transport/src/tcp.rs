use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;

use crate::acceptor_pool::AcceptorPool;
use crate::endpoint::TransportKind;
use crate::error::TransportError;
use crate::frame::{encode_frame, FrameDecoder};

/// RFC 6544 TCP candidates: a session is either accepted passively (`listen`) or opened
/// actively (`connect`); both ends frame every STUN message and application chunk per RFC 4571.
/// Every established session gets its own read/write pump task, matching the teacher's
/// `TransportTask` split between a socket-owning task and everything that talks to it through a
/// channel.
pub struct TcpTransport {
    pool: Arc<AcceptorPool>,
    senders: Arc<Mutex<HashMap<(SocketAddr, SocketAddr), mpsc::Sender<Vec<u8>>>>>,
}

impl TcpTransport {
    pub fn new(pool: Arc<AcceptorPool>) -> Self {
        Self { pool, senders: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Binds `local` and accepts incoming sessions (the passive/simultaneous-open side).
    /// Returns the bound address once listening.
    pub async fn listen(&self, local: SocketAddr, recv_buffer_size: usize) -> Result<SocketAddr, TransportError> {
        self.pool.claim_acceptor(TransportKind::Tcp, local)?;

        let listener = match TcpListener::bind(local).await {
            Ok(listener) => listener,
            Err(e) => {
                self.pool.release_acceptor(TransportKind::Tcp, local);
                return Err(e.into());
            }
        };
        let local_addr = listener.local_addr()?;

        let pool = self.pool.clone();
        let senders = self.senders.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        spawn_session(stream, local_addr, remote, pool.clone(), senders.clone(), recv_buffer_size);
                    }
                    Err(e) => {
                        log::warn!("tcp acceptor on {local_addr} stopped: {e}");
                        pool.release_acceptor(TransportKind::Tcp, local_addr);
                        return;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    /// Opens a session actively (RFC 6544 §4's "active" candidate type), binding `local` first
    /// so the resulting candidate matches the address the peer was signaled.
    pub async fn connect(&self, local: SocketAddr, remote: SocketAddr, recv_buffer_size: usize) -> Result<(), TransportError> {
        let socket = if local.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        socket.set_reuseaddr(true)?;
        socket.bind(local)?;
        let stream = socket.connect(remote).await?;

        spawn_session(stream, local, remote, self.pool.clone(), self.senders.clone(), recv_buffer_size);
        Ok(())
    }

    pub async fn send(&self, local: SocketAddr, remote: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
        let tx = self.senders.lock().get(&(local, remote)).cloned();
        let Some(tx) = tx else {
            return Err(TransportError::UnknownEndpoint { local, remote: Some(remote) });
        };
        tx.send(payload.to_vec())
            .await
            .map_err(|_| TransportError::UnknownEndpoint { local, remote: Some(remote) })
    }
}

fn spawn_session(
    stream: TcpStream,
    local: SocketAddr,
    remote: SocketAddr,
    pool: Arc<AcceptorPool>,
    senders: Arc<Mutex<HashMap<(SocketAddr, SocketAddr), mpsc::Sender<Vec<u8>>>>>,
    recv_buffer_size: usize,
) {
    let (write_tx, write_rx) = mpsc::channel(64);
    senders.lock().insert((local, remote), write_tx);

    tokio::spawn(async move {
        run_session(stream, local, remote, &pool, write_rx, recv_buffer_size).await;
        senders.lock().remove(&(local, remote));
    });
}

async fn run_session(
    stream: TcpStream,
    local: SocketAddr,
    remote: SocketAddr,
    pool: &AcceptorPool,
    mut write_rx: mpsc::Receiver<Vec<u8>>,
    recv_buffer_size: usize,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; recv_buffer_size];

    loop {
        tokio::select! {
            result = read_half.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        log::debug!("tcp session {local} <-> {remote} closed by peer");
                        return;
                    }
                    Ok(n) => {
                        for frame in decoder.push(&buf[..n]) {
                            pool.dispatch(TransportKind::Tcp, local, remote, frame);
                        }
                    }
                    Err(e) => {
                        log::warn!("tcp session {local} <-> {remote} read error: {e}");
                        return;
                    }
                }
            }
            payload = write_rx.recv() => {
                let Some(payload) = payload else { return };
                match encode_frame(&payload) {
                    Ok(framed) => {
                        if let Err(e) = write_half.write_all(&framed).await {
                            log::warn!("tcp session {local} <-> {remote} write error: {e}");
                            return;
                        }
                    }
                    Err(e) => log::warn!("dropping oversized tcp frame: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AcceptorStrategy;
    use crate::endpoint::EndpointKey;

    #[tokio::test]
    async fn connect_and_exchange_a_framed_message() {
        let pool = Arc::new(AcceptorPool::new(AcceptorStrategy::SocketPerInstance));
        let server = TcpTransport::new(pool.clone());
        let client = TcpTransport::new(pool.clone());

        let server_addr = server.listen("127.0.0.1:0".parse().unwrap(), 4096).await.unwrap();

        let (server_rx_tx, mut server_rx) = mpsc::channel(4);
        pool.register(EndpointKey::new(TransportKind::Tcp, server_addr, None), server_rx_tx);

        client.connect("127.0.0.1:0".parse().unwrap(), server_addr, 4096).await.unwrap();

        // Give the accept loop a moment to register the server-side session.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let client_local = client.senders.lock().keys().next().copied().unwrap().0;
        client.send(client_local, server_addr, b"hello over tcp").await.unwrap();

        let inbound = tokio::time::timeout(std::time::Duration::from_secs(1), server_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.data, b"hello over tcp");
    }
}
