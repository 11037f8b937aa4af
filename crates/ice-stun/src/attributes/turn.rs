use super::{u16_from_be, u32_from_be, Attribute};
use crate::message::AttrEncoder;
use crate::CodecError;

/// CHANNEL-NUMBER (RFC 5766 §14.1): a 16-bit channel number (0x4000-0x7FFE) plus 16 reserved
/// bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelNumber(pub u16);

impl Attribute for ChannelNumber {
    const TYPE: u16 = 0x000C;

    fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
        out.push(&self.0.to_be_bytes());
        out.push(&[0, 0]);
        Ok(())
    }

    fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < 2 {
            return Err(CodecError::Malformed);
        }
        u16_from_be(&data[..2]).map(Self)
    }
}

/// LIFETIME (RFC 5766 §14.2): allocation lifetime in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetime(pub u32);

impl Attribute for Lifetime {
    const TYPE: u16 = 0x000D;

    fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
        out.push(&self.0.to_be_bytes());
        Ok(())
    }

    fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
        u32_from_be(data).map(Self)
    }
}

/// DATA (RFC 5766 §14.4): the application payload relayed to/from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data(pub Vec<u8>);

impl Attribute for Data {
    const TYPE: u16 = 0x0013;

    fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
        out.push(&self.0);
        Ok(())
    }

    fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
        Ok(Self(data.to_vec()))
    }
}

/// EVEN-PORT (RFC 5766 §14.6): requests an even relayed port, optionally reserving the next
/// higher odd port for a subsequent allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvenPort {
    pub reserve_next: bool,
}

impl Attribute for EvenPort {
    const TYPE: u16 = 0x0018;

    fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
        let byte = if self.reserve_next { 0x80 } else { 0x00 };
        out.push(&[byte]);
        Ok(())
    }

    fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
        let byte = *data.first().ok_or(CodecError::Malformed)?;
        Ok(Self { reserve_next: byte & 0x80 != 0 })
    }
}

/// REQUESTED-TRANSPORT (RFC 5766 §14.7): the desired relayed transport protocol, identified by
/// its IANA protocol number (17 for UDP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedTransport(pub u8);

impl RequestedTransport {
    pub const UDP: Self = Self(17);
}

impl Attribute for RequestedTransport {
    const TYPE: u16 = 0x0019;

    fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
        out.push(&[self.0, 0, 0, 0]);
        Ok(())
    }

    fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
        let byte = *data.first().ok_or(CodecError::Malformed)?;
        Ok(Self(byte))
    }
}

/// DONT-FRAGMENT (RFC 5766 §14.8): zero-length flag attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DontFragment;

impl Attribute for DontFragment {
    const TYPE: u16 = 0x001A;

    fn encode_value(&self, _out: &mut AttrEncoder) -> Result<(), CodecError> {
        Ok(())
    }

    fn decode_value(_data: &[u8]) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// RESERVATION-TOKEN (RFC 5766 §14.9): an 8-byte opaque token referencing a reserved port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationToken(pub [u8; 8]);

impl Attribute for ReservationToken {
    const TYPE: u16 = 0x0022;

    fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
        out.push(&self.0);
        Ok(())
    }

    fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
        data.try_into().map(Self).map_err(|_| CodecError::Malformed)
    }
}

/// REQUESTED-ADDRESS-FAMILY (RFC 8656 §18.1): 0x01 for IPv4, 0x02 for IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedAddressFamily(pub u8);

impl Attribute for RequestedAddressFamily {
    const TYPE: u16 = 0x0017;

    fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
        out.push(&[self.0, 0, 0, 0]);
        Ok(())
    }

    fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
        let byte = *data.first().ok_or(CodecError::Malformed)?;
        Ok(Self(byte))
    }
}

/// CONNECTION-ID (RFC 6062 §6.2.1): identifies a TURN TCP relay connection for Connect /
/// ConnectionBind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId(pub u32);

impl Attribute for ConnectionId {
    const TYPE: u16 = 0x002A;

    fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
        out.push(&self.0.to_be_bytes());
        Ok(())
    }

    fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
        u32_from_be(data).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_number_round_trips() {
        let c = ChannelNumber(0x4000);
        let mut buf = Vec::new();
        c.encode_value(&mut AttrEncoder::new(&mut buf)).unwrap();
        assert_eq!(buf.len(), 4);
        assert_eq!(ChannelNumber::decode_value(&buf).unwrap(), c);
    }

    #[test]
    fn even_port_reserve_bit_round_trips() {
        let e = EvenPort { reserve_next: true };
        let mut buf = Vec::new();
        e.encode_value(&mut AttrEncoder::new(&mut buf)).unwrap();
        assert_eq!(EvenPort::decode_value(&buf).unwrap(), e);
    }

    #[test]
    fn reservation_token_rejects_wrong_length() {
        assert!(ReservationToken::decode_value(&[0; 7]).is_err());
        assert!(ReservationToken::decode_value(&[0; 8]).is_ok());
    }
}
