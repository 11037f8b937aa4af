use crate::config::RtoConfig;
use ice_stun::TransactionId;
use std::time::{Duration, Instant};

/// An outstanding STUN request, tracked purely by its retransmission timer — this crate never
/// touches a socket itself (see the module-level docs), so all of the retransmit/give-up logic
/// lives here and is driven by whatever clock the caller feeds it.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    rto: Duration,
    max_rto: Duration,
    retransmits_sent: u32,
    max_retransmits: u32,
    deadline: Instant,
}

impl Transaction {
    pub fn new(id: TransactionId, config: RtoConfig, now: Instant) -> Self {
        Self {
            id,
            rto: config.initial_rto,
            max_rto: config.max_rto,
            retransmits_sent: 0,
            max_retransmits: config.max_retransmits,
            deadline: now + config.initial_rto,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The caller's clock reached this transaction's deadline. `Some(())` means "retransmit
    /// now and keep waiting"; `None` means retries are exhausted and the transaction has timed
    /// out for good.
    pub fn on_timeout(&mut self, now: Instant) -> Option<()> {
        if self.retransmits_sent >= self.max_retransmits {
            return None;
        }
        self.retransmits_sent += 1;
        self.rto = (self.rto * 2).min(self.max_rto);
        self.deadline = now + self.rto;
        Some(())
    }

    pub fn retransmits_sent(&self) -> u32 {
        self.retransmits_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backs_off_exponentially_until_exhausted() {
        let config = RtoConfig { initial_rto: Duration::from_millis(100), max_rto: Duration::from_millis(1600), max_retransmits: 3 };
        let start = Instant::now();
        let mut txn = Transaction::new(TransactionId::random(), config, start);

        assert!(txn.on_timeout(txn.deadline()).is_some());
        assert!(txn.on_timeout(txn.deadline()).is_some());
        assert!(txn.on_timeout(txn.deadline()).is_some());
        assert!(txn.on_timeout(txn.deadline()).is_none());
        assert_eq!(txn.retransmits_sent(), 3);
    }

    #[test]
    fn rto_is_capped_at_max_rto() {
        let config = RtoConfig { initial_rto: Duration::from_millis(900), max_rto: Duration::from_millis(1600), max_retransmits: 5 };
        let start = Instant::now();
        let mut txn = Transaction::new(TransactionId::random(), config, start);
        txn.on_timeout(txn.deadline());
        let gap = txn.deadline().duration_since(start);
        assert!(gap <= Duration::from_millis(900 + 1600));
    }
}
