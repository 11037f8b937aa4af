use std::time::Duration;

/// Running counters for one stream, exposed for diagnostics/metrics — nothing here feeds back
/// into agent behavior.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub checks_sent: u64,
    pub checks_succeeded: u64,
    pub checks_failed: u64,
    pub candidates_harvested: u64,
    pub nominations: u64,
    pub role_conflicts: u64,
    /// Smoothed round-trip time over successful checks, updated with a simple exponential
    /// moving average (alpha = 1/8, matching the RTO estimator RFC 6298 describes for TCP and
    /// that RFC 8489 §6.2.1 references for STUN).
    pub smoothed_rtt: Option<Duration>,
}

impl StreamStats {
    pub fn record_check_sent(&mut self) {
        self.checks_sent += 1;
    }

    pub fn record_check_success(&mut self, rtt: Duration) {
        self.checks_succeeded += 1;
        self.smoothed_rtt = Some(match self.smoothed_rtt {
            Some(prev) => prev + (rtt.saturating_sub(prev)) / 8,
            None => rtt,
        });
    }

    pub fn record_check_failure(&mut self) {
        self.checks_failed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothed_rtt_converges_toward_samples() {
        let mut stats = StreamStats::default();
        stats.record_check_success(Duration::from_millis(100));
        for _ in 0..50 {
            stats.record_check_success(Duration::from_millis(20));
        }
        assert!(stats.smoothed_rtt.unwrap() < Duration::from_millis(30));
    }
}
