use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::acceptor_pool::AcceptorPool;
use crate::endpoint::EndpointKey;

/// Periodically reclaims endpoints nobody has sent or received on for `timeout`. The pool only
/// tracks registrations, not sockets, so reclaiming here means unregistering and notifying
/// `reclaimed` — whoever owns the actual socket (an acceptor task in `udp`/`tcp`) is responsible
/// for closing it and releasing any `SharedAcceptor` claim.
pub fn spawn_sweeper(
    pool: Arc<AcceptorPool>,
    interval: Duration,
    timeout: Duration,
    reclaimed: mpsc::Sender<EndpointKey>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let now = std::time::Instant::now();
            for key in pool.stale(now, timeout) {
                pool.unregister(&key);
                log::debug!("sweeper reclaiming idle endpoint {key:?}");
                if reclaimed.send(key).await.is_err() {
                    return;
                }
            }
        }
    })
}
