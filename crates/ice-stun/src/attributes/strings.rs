use super::Attribute;
use crate::message::AttrEncoder;
use crate::CodecError;

fn encode_str(s: &str, out: &mut AttrEncoder) {
    out.push(s.as_bytes());
}

fn decode_str(data: &[u8]) -> Result<String, CodecError> {
    std::str::from_utf8(data)
        .map(str::to_owned)
        .map_err(|_| CodecError::Malformed)
}

macro_rules! string_attr {
    ($name:ident, $type:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
        }

        impl Attribute for $name {
            const TYPE: u16 = $type;

            fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
                encode_str(&self.0, out);
                Ok(())
            }

            fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
                decode_str(data).map(Self)
            }
        }
    };
}

string_attr!(Username, 0x0006);
string_attr!(Realm, 0x0014);
string_attr!(Nonce, 0x0015);
string_attr!(Software, 0x8022);

/// PASSWORD is never sent on the wire in STUN/TURN; it only ever exists locally as the secret
/// used to derive [`super::MessageIntegrityKey`]. It is not a real attribute, but lives here
/// alongside the other credential strings it's conceptually grouped with.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(pub String);

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(..)")
    }
}

impl Password {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// SASLprep-normalized (RFC 4013) bytes, as required before hashing a long-term credential
    /// (RFC 5389 §15.5) or using a short-term one.
    pub fn saslprep_bytes(&self) -> Result<Vec<u8>, CodecError> {
        stringprep::saslprep(&self.0)
            .map(|s| s.into_owned().into_bytes())
            .map_err(|_| CodecError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_round_trips() {
        let u = Username::new("alice:realm");
        let mut buf = Vec::new();
        u.encode_value(&mut AttrEncoder::new(&mut buf)).unwrap();
        assert_eq!(Username::decode_value(&buf).unwrap(), u);
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        let bad = [0xFF, 0xFE, 0xFD];
        assert_eq!(Username::decode_value(&bad).unwrap_err(), CodecError::Malformed);
    }
}
