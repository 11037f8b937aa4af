use super::{u16_from_be, Attribute};
use crate::message::AttrEncoder;
use crate::{CodecError, TransactionId, MAGIC_COOKIE};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

const FAMILY_V4: u8 = 0x01;
const FAMILY_V6: u8 = 0x02;

fn encode_plain(addr: SocketAddr, out: &mut AttrEncoder) {
    out.push(&[0, family_byte(addr)]);
    out.push(&addr.port().to_be_bytes());
    match addr.ip() {
        IpAddr::V4(v4) => out.push(&v4.octets()),
        IpAddr::V6(v6) => out.push(&v6.octets()),
    }
}

fn family_byte(addr: SocketAddr) -> u8 {
    match addr {
        SocketAddr::V4(_) => FAMILY_V4,
        SocketAddr::V6(_) => FAMILY_V6,
    }
}

fn decode_plain(data: &[u8]) -> Result<SocketAddr, CodecError> {
    if data.len() < 4 {
        return Err(CodecError::Malformed);
    }
    let family = data[1];
    let port = u16_from_be(&data[2..4])?;
    match family {
        FAMILY_V4 => {
            let bytes: [u8; 4] = data[4..8].try_into().map_err(|_| CodecError::Malformed)?;
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(bytes)), port))
        }
        FAMILY_V6 => {
            let bytes: [u8; 16] = data[4..20].try_into().map_err(|_| CodecError::Malformed)?;
            Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(bytes)), port))
        }
        _ => Err(CodecError::Malformed),
    }
}

/// XOR transform key: magic cookie (4 bytes) followed by the transaction id (12 bytes), used
/// in full for IPv6 addresses and truncated to 4 bytes for IPv4.
fn xor_key(tid: TransactionId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    key[4..].copy_from_slice(tid.as_bytes());
    key
}

fn encode_xor(addr: SocketAddr, tid: TransactionId, out: &mut AttrEncoder) {
    let key = xor_key(tid);
    let xor_port = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;

    out.push(&[0, family_byte(addr)]);
    out.push(&xor_port.to_be_bytes());

    match addr.ip() {
        IpAddr::V4(v4) => {
            let mut octets = v4.octets();
            for (o, k) in octets.iter_mut().zip(&key[..4]) {
                *o ^= k;
            }
            out.push(&octets);
        }
        IpAddr::V6(v6) => {
            let mut octets = v6.octets();
            for (o, k) in octets.iter_mut().zip(&key) {
                *o ^= k;
            }
            out.push(&octets);
        }
    }
}

fn decode_xor(data: &[u8], tid: TransactionId) -> Result<SocketAddr, CodecError> {
    if data.len() < 4 {
        return Err(CodecError::Malformed);
    }
    let family = data[1];
    let key = xor_key(tid);
    let port = u16_from_be(&data[2..4])? ^ (MAGIC_COOKIE >> 16) as u16;

    match family {
        FAMILY_V4 => {
            if data.len() < 8 {
                return Err(CodecError::Malformed);
            }
            let mut octets: [u8; 4] = data[4..8].try_into().map_err(|_| CodecError::Malformed)?;
            for (o, k) in octets.iter_mut().zip(&key[..4]) {
                *o ^= k;
            }
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        FAMILY_V6 => {
            if data.len() < 20 {
                return Err(CodecError::Malformed);
            }
            let mut octets: [u8; 16] =
                data[4..20].try_into().map_err(|_| CodecError::Malformed)?;
            for (o, k) in octets.iter_mut().zip(&key) {
                *o ^= k;
            }
            Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => Err(CodecError::Malformed),
    }
}

macro_rules! plain_address_attr {
    ($name:ident, $type:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(pub SocketAddr);

        impl Attribute for $name {
            const TYPE: u16 = $type;

            fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError> {
                encode_plain(self.0, out);
                Ok(())
            }

            fn decode_value(data: &[u8]) -> Result<Self, CodecError> {
                decode_plain(data).map(Self)
            }
        }
    };
}

plain_address_attr!(MappedAddress, 0x0001);
plain_address_attr!(ResponseAddress, 0x0002);
plain_address_attr!(SourceAddress, 0x0004);
plain_address_attr!(ChangedAddress, 0x0005);
plain_address_attr!(ReflectedFrom, 0x000B);
plain_address_attr!(AlternateServer, 0x8023);
/// Non-standard: carried over from the legacy NAT-behavior-discovery lineage this
/// specification's source implementation descends from; there is no IANA-assigned codepoint,
/// so a comprehension-optional type in the vendor-extension range is used.
plain_address_attr!(DestinationAddress, 0xFF01);

/// An address attribute whose wire value is XORed with the magic cookie and transaction id
/// (RFC 5389 §15.2), so that legacy NAT implementations do not rewrite it.
pub trait XorAddress: Sized {
    const TYPE: u16;

    fn addr(&self) -> SocketAddr;
    fn from_addr(addr: SocketAddr) -> Self;
}

macro_rules! xor_address_attr {
    ($name:ident, $type:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(pub SocketAddr);

        impl XorAddress for $name {
            const TYPE: u16 = $type;

            fn addr(&self) -> SocketAddr {
                self.0
            }

            fn from_addr(addr: SocketAddr) -> Self {
                Self(addr)
            }
        }
    };
}

xor_address_attr!(XorMappedAddress, 0x0020);
xor_address_attr!(XorPeerAddress, 0x0012);
xor_address_attr!(XorRelayedAddress, 0x0016);

pub(crate) fn encode_xor_attr<T: XorAddress>(
    attr: &T,
    tid: TransactionId,
    out: &mut AttrEncoder,
) {
    encode_xor(attr.addr(), tid, out);
}

pub(crate) fn decode_xor_attr<T: XorAddress>(
    data: &[u8],
    tid: TransactionId,
) -> Result<T, CodecError> {
    decode_xor(data, tid).map(T::from_addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_mapped_address_round_trips_v4_and_v6() {
        let tid = TransactionId::random();

        let v4: SocketAddr = "192.0.2.1:32853".parse().unwrap();
        let mut buf = Vec::new();
        encode_xor(v4, tid, &mut AttrEncoder::new(&mut buf));
        assert_eq!(decode_xor(&buf, tid).unwrap(), v4);

        let v6: SocketAddr = "[2001:db8::1]:4242".parse().unwrap();
        let mut buf = Vec::new();
        encode_xor(v6, tid, &mut AttrEncoder::new(&mut buf));
        assert_eq!(decode_xor(&buf, tid).unwrap(), v6);
    }

    #[test]
    fn xor_port_uses_top_16_bits_of_magic_cookie() {
        let tid = TransactionId::from_bytes([0; 12]);
        let addr: SocketAddr = "192.0.2.1:1234".parse().unwrap();
        let mut buf = Vec::new();
        encode_xor(addr, tid, &mut AttrEncoder::new(&mut buf));
        let encoded_port = u16::from_be_bytes([buf[2], buf[3]]);
        assert_eq!(encoded_port, 1234u16 ^ 0x2112);
    }

    #[test]
    fn plain_mapped_address_round_trips() {
        let addr: SocketAddr = "198.51.100.7:49200".parse().unwrap();
        let mut buf = Vec::new();
        encode_plain(addr, &mut AttrEncoder::new(&mut buf));
        assert_eq!(decode_plain(&buf).unwrap(), addr);
    }
}
