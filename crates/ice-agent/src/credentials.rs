use rand::Rng;

const ICE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// An ICE username fragment / password pair (RFC 8445 §5.3). Every stream-or-session uses one;
/// they authenticate Binding requests via short-term MESSAGE-INTEGRITY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCredentials {
    pub ufrag: String,
    pub pwd: String,
}

impl IceCredentials {
    /// Generates an 8-character ufrag and a 22-character password, each comfortably above RFC
    /// 8445 §15.4's minimum entropy (24 bits / 128 bits respectively).
    pub fn generate() -> Self {
        Self {
            ufrag: random_ice_string(8),
            pwd: random_ice_string(22),
        }
    }

    /// The STUN USERNAME attribute value for a check sent to the peer these credentials belong
    /// to: their ufrag first, then the sender's own, separated by `:` (RFC 8445 §7.1.1).
    pub fn username_for_request(&self, local_ufrag: &str) -> String {
        format!("{}:{}", self.ufrag, local_ufrag)
    }
}

fn random_ice_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ICE_CHARS[rng.gen_range(0..ICE_CHARS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_credentials_use_only_ice_chars() {
        let creds = IceCredentials::generate();
        assert!(creds.ufrag.bytes().all(|b| ICE_CHARS.contains(&b)));
        assert!(creds.pwd.bytes().all(|b| ICE_CHARS.contains(&b)));
        assert_eq!(creds.ufrag.len(), 8);
        assert_eq!(creds.pwd.len(), 22);
    }

    #[test]
    fn username_for_request_puts_remote_ufrag_first() {
        let remote = IceCredentials { ufrag: "rem1".into(), pwd: "x".into() };
        assert_eq!(remote.username_for_request("loc1"), "rem1:loc1");
    }
}
