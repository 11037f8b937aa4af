use rand::RngCore;
use std::fmt;

/// A 96-bit STUN transaction id.
///
/// On the wire this follows the 32-bit magic cookie; together the two make up the 128 bits
/// the RFC calls the "transaction ID" field, but only these 96 bits are random per-transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; 12]);

impl TransactionId {
    /// Generate a new random transaction id.
    ///
    /// Collision probability over 96 bits of randomness is negligible even at the scale of a
    /// busy server's transaction table.
    pub fn random() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId(")?;
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn unique_transaction_ids() {
        let ids: HashSet<_> = (0..10_000).map(|_| TransactionId::random()).collect();
        assert_eq!(ids.len(), 10_000);
    }
}
