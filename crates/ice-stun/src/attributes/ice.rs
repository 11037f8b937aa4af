use super::{u32_from_be, u64_from_be, Attribute};
use crate::message::AttrEncoder;
use crate::CodecError;

/// PRIORITY (RFC 8445 §16.1): the candidate's priority as a 32-bit unsigned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority(pub u32);

impl Attribute for Priority {
    const TYPE: u16 = 0x0024;

    fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
        out.push(&self.0.to_be_bytes());
        Ok(())
    }

    fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
        u32_from_be(data).map(Self)
    }
}

/// USE-CANDIDATE (RFC 8445 §16.1): zero-length flag attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseCandidate;

impl Attribute for UseCandidate {
    const TYPE: u16 = 0x0025;

    fn encode_value(&self, _out: &mut AttrEncoder) -> Result<(), CodecError> {
        Ok(())
    }

    fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
        if data.is_empty() {
            Ok(Self)
        } else {
            Err(CodecError::Malformed)
        }
    }
}

macro_rules! tiebreaker_attr {
    ($name:ident, $type:expr) => {
        /// 64-bit random tie-breaker used for role conflict resolution (RFC 8445 §16.1).
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(pub u64);

        impl Attribute for $name {
            const TYPE: u16 = $type;

            fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
                out.push(&self.0.to_be_bytes());
                Ok(())
            }

            fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
                u64_from_be(data).map(Self)
            }
        }
    };
}

tiebreaker_attr!(IceControlling, 0x802A);
tiebreaker_attr!(IceControlled, 0x8029);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_round_trips() {
        let p = Priority(0x7E00_0000);
        let mut buf = Vec::new();
        p.encode_value(&mut AttrEncoder::new(&mut buf)).unwrap();
        assert_eq!(Priority::decode_value(&buf).unwrap(), p);
    }

    #[test]
    fn use_candidate_rejects_nonempty_value() {
        assert!(UseCandidate::decode_value(&[]).is_ok());
        assert!(UseCandidate::decode_value(&[0]).is_err());
    }

    #[test]
    fn tie_breakers_round_trip() {
        let c = IceControlling(0x0123_4567_89AB_CDEF);
        let mut buf = Vec::new();
        c.encode_value(&mut AttrEncoder::new(&mut buf)).unwrap();
        assert_eq!(IceControlling::decode_value(&buf).unwrap(), c);
    }
}
