use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::acceptor_pool::AcceptorPool;
use crate::endpoint::TransportKind;
use crate::error::TransportError;

/// One bound UDP socket, demultiplexing every datagram it receives through the shared
/// [`AcceptorPool`]. Mirrors the teacher's `TransportTask` shape (own the socket, spawn a task
/// that loops reading it) but pushes decoded frames into the pool's registry instead of a
/// per-session RTP/RTCP handler.
pub struct UdpAcceptor {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    pool: Arc<AcceptorPool>,
}

impl UdpAcceptor {
    pub async fn bind(local: SocketAddr, pool: Arc<AcceptorPool>, recv_buffer_size: usize) -> Result<Self, TransportError> {
        pool.claim_acceptor(TransportKind::Udp, local)?;

        let socket = match UdpSocket::bind(local).await {
            Ok(socket) => socket,
            Err(e) => {
                pool.release_acceptor(TransportKind::Udp, local);
                return Err(e.into());
            }
        };
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let task_socket = socket.clone();
        let task_pool = pool.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; recv_buffer_size];
            loop {
                match task_socket.recv_from(&mut buf).await {
                    Ok((len, remote)) => {
                        task_pool.dispatch(TransportKind::Udp, local_addr, remote, buf[..len].to_vec());
                    }
                    Err(e) => {
                        log::warn!("udp acceptor on {local_addr} stopped: {e}");
                        task_pool.release_acceptor(TransportKind::Udp, local_addr);
                        return;
                    }
                }
            }
        });

        Ok(Self { socket, local_addr, pool })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn send_to(&self, data: &[u8], remote: SocketAddr) -> Result<(), TransportError> {
        self.socket.send_to(data, remote).await?;
        Ok(())
    }
}

impl Drop for UdpAcceptor {
    fn drop(&mut self) {
        self.pool.release_acceptor(TransportKind::Udp, self.local_addr);
    }
}
