use super::KeyedAttribute;
use crate::header::HEADER_LEN;
use crate::CodecError;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// MESSAGE-INTEGRITY (RFC 5389 §15.4): an HMAC-SHA1 over the message up to (but not including)
/// this attribute. Carries no payload of its own beyond the MAC; presence is the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageIntegrity;

/// The key used to compute/verify MESSAGE-INTEGRITY, already in its final byte form.
#[derive(Clone, PartialEq, Eq)]
pub struct MessageIntegrityKey(Vec<u8>);

impl std::fmt::Debug for MessageIntegrityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageIntegrityKey(..)")
    }
}

impl MessageIntegrityKey {
    /// Short-term credential key (ICE connectivity checks, RFC 8445 §16.1): the password bytes,
    /// unhashed.
    pub fn new_short_term(password: &str) -> Self {
        Self(password.as_bytes().to_vec())
    }

    /// Long-term credential key (TURN, RFC 5389 §15.4): `MD5(username ":" realm ":" password)`.
    pub fn new_long_term(username: &str, realm: &str, password: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(username.as_bytes());
        hasher.update(b":");
        hasher.update(realm.as_bytes());
        hasher.update(b":");
        hasher.update(password.as_bytes());
        Self(hasher.finalize().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl KeyedAttribute for MessageIntegrity {
    const TYPE: u16 = 0x0008;
    type Key = MessageIntegrityKey;

    fn compute(message_so_far: &[u8], key: &Self::Key) -> Vec<u8> {
        let mut mac =
            HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
        mac.update(message_so_far);
        mac.finalize().into_bytes().to_vec()
    }

    fn decode_with(
        value: &[u8],
        raw_message: &[u8],
        header_offset: usize,
        key: &Self::Key,
    ) -> Result<Self, CodecError> {
        if value.len() != 20 {
            return Err(CodecError::BadIntegrity);
        }

        let patched_length = (header_offset - HEADER_LEN + 24) as u16;
        let mut patched = raw_message[..header_offset].to_vec();
        patched[2..4].copy_from_slice(&patched_length.to_be_bytes());

        let expected = Self::compute(&patched, key);
        if expected == value {
            Ok(MessageIntegrity)
        } else {
            Err(CodecError::BadIntegrity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Class, Method, MessageBuilder, TransactionId};

    #[test]
    fn short_term_integrity_round_trips() {
        let key = MessageIntegrityKey::new_short_term("the-ice-password");
        let tid = TransactionId::random();
        let mut builder = MessageBuilder::new(Class::Request, Method::Binding, tid);
        builder
            .add_attr(&crate::attributes::Priority(1))
            .unwrap();
        builder.add_message_integrity::<MessageIntegrity>(&key).unwrap();
        let bytes = builder.finish();

        let msg = crate::Message::parse(bytes).unwrap();
        assert!(msg.attribute_with::<MessageIntegrity>(&key).unwrap().is_ok());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let key = MessageIntegrityKey::new_short_term("right");
        let wrong = MessageIntegrityKey::new_short_term("wrong");
        let tid = TransactionId::random();
        let mut builder = MessageBuilder::new(Class::Request, Method::Binding, tid);
        builder.add_message_integrity::<MessageIntegrity>(&key).unwrap();
        let bytes = builder.finish();

        let msg = crate::Message::parse(bytes).unwrap();
        assert_eq!(
            msg.attribute_with::<MessageIntegrity>(&wrong).unwrap().unwrap_err(),
            CodecError::BadIntegrity
        );
    }

    #[test]
    fn long_term_key_is_md5_of_username_realm_password() {
        let key = MessageIntegrityKey::new_long_term("user", "realm", "pass");
        assert_eq!(key.as_bytes().len(), 16);
    }
}
