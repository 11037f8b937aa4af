//! STUN/TURN attribute types.
//!
//! Each attribute implements [`Attribute`] (self-contained encode/decode of its value bytes)
//! or, for MESSAGE-INTEGRITY, [`KeyedAttribute`] (needs the rest of the message plus a key).
//! FINGERPRINT is handled specially by [`crate::Message::verify_fingerprint`] /
//! [`crate::MessageBuilder::add_fingerprint`] since, like MESSAGE-INTEGRITY, its value depends
//! on the bytes that precede it.

mod address;
mod error_code;
mod ice;
mod integrity;
mod strings;
mod turn;

pub use address::{
    AlternateServer, ChangedAddress, DestinationAddress, MappedAddress, ReflectedFrom,
    ResponseAddress, SourceAddress, XorAddress, XorMappedAddress, XorPeerAddress,
    XorRelayedAddress,
};
pub(crate) use address::{decode_xor_attr, encode_xor_attr};
pub use error_code::{ErrorCode, UnknownAttributes};
pub use ice::{IceControlled, IceControlling, Priority, UseCandidate};
pub use integrity::{MessageIntegrity, MessageIntegrityKey};
pub use strings::{Nonce, Password, Realm, Software, Username};
pub use turn::{
    ChannelNumber, ConnectionId, Data, DontFragment, EvenPort, Lifetime, RequestedAddressFamily,
    RequestedTransport, ReservationToken,
};

use crate::message::AttrEncoder;
use crate::CodecError;

/// A STUN/TURN attribute that can be encoded/decoded purely from its own value bytes.
pub trait Attribute: Sized {
    const TYPE: u16;

    fn encode_value(&self, out: &mut AttrEncoder) -> Result<(), CodecError>;
    fn decode_value(data: &[u8]) -> Result<Self, CodecError>;
}

/// An attribute whose encoding/verification additionally depends on the rest of the message
/// and an out-of-band key. Only [`MessageIntegrity`] implements this.
pub trait KeyedAttribute: Sized {
    const TYPE: u16;
    type Key;

    /// Compute the attribute's value bytes over `message_so_far` (header + every attribute
    /// added before this one, with the length field patched as if this attribute were last).
    fn compute(message_so_far: &[u8], key: &Self::Key) -> Vec<u8>;

    /// Decode (and verify) the attribute, given its value bytes, the full raw message, and the
    /// byte offset of its own TLV header within that message.
    fn decode_with(
        value: &[u8],
        raw_message: &[u8],
        header_offset: usize,
        key: &Self::Key,
    ) -> Result<Self, CodecError>;
}

pub(crate) fn u16_from_be(data: &[u8]) -> Result<u16, CodecError> {
    let bytes: [u8; 2] = data.try_into().map_err(|_| CodecError::Malformed)?;
    Ok(u16::from_be_bytes(bytes))
}

pub(crate) fn u32_from_be(data: &[u8]) -> Result<u32, CodecError> {
    let bytes: [u8; 4] = data.try_into().map_err(|_| CodecError::Malformed)?;
    Ok(u32::from_be_bytes(bytes))
}

pub(crate) fn u64_from_be(data: &[u8]) -> Result<u64, CodecError> {
    let bytes: [u8; 8] = data.try_into().map_err(|_| CodecError::Malformed)?;
    Ok(u64::from_be_bytes(bytes))
}
