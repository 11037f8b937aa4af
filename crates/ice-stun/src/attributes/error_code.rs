use super::{u16_from_be, Attribute};
use crate::message::AttrEncoder;
use crate::CodecError;

/// ERROR-CODE (RFC 5389 §15.6): a three-digit status code split into a class (hundreds digit)
/// and a number (0-99), plus a human-readable reason phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode {
    pub code: u16,
    pub reason: String,
}

impl ErrorCode {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }
}

impl Attribute for ErrorCode {
    const TYPE: u16 = 0x0009;

    fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
        let class = (self.code / 100) as u8;
        let number = (self.code % 100) as u8;
        out.push(&[0, 0, class, number]);
        out.push(self.reason.as_bytes());
        Ok(())
    }

    fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < 4 {
            return Err(CodecError::Malformed);
        }
        let class = data[2] & 0x7;
        let number = data[3];
        let code = class as u16 * 100 + number as u16;
        let reason = std::str::from_utf8(&data[4..])
            .map_err(|_| CodecError::Malformed)?
            .to_owned();
        Ok(Self { code, reason })
    }
}

/// UNKNOWN-ATTRIBUTES (RFC 5389 §15.9): a list of attribute type codes, each 2 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAttributes(pub Vec<u16>);

impl Attribute for UnknownAttributes {
    const TYPE: u16 = 0x000A;

    fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
        for typ in &self.0 {
            out.push(&typ.to_be_bytes());
        }
        Ok(())
    }

    fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() % 2 != 0 {
            return Err(CodecError::Malformed);
        }
        let types = data
            .chunks_exact(2)
            .map(u16_from_be)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(types))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trips() {
        let e = ErrorCode::new(487, "Role Conflict");
        let mut buf = Vec::new();
        e.encode_value(&mut AttrEncoder::new(&mut buf)).unwrap();
        assert_eq!(ErrorCode::decode_value(&buf).unwrap(), e);
    }

    #[test]
    fn unknown_attributes_round_trips() {
        let u = UnknownAttributes(vec![0x0001, 0x8023]);
        let mut buf = Vec::new();
        u.encode_value(&mut AttrEncoder::new(&mut buf)).unwrap();
        assert_eq!(UnknownAttributes::decode_value(&buf).unwrap(), u);
    }
}
