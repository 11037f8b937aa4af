#![deny(unreachable_pub, unsafe_code)]

//! Bit-exact STUN ([RFC 5389]/[RFC 8489]) and TURN ([RFC 5766]) message codec.
//!
//! This crate only encodes and decodes messages. It knows nothing about
//! transactions, retransmission or ICE semantics — that lives in `ice-agent`.
//!
//! [RFC 5389]: https://www.rfc-editor.org/rfc/rfc5389
//! [RFC 8489]: https://www.rfc-editor.org/rfc/rfc8489
//! [RFC 5766]: https://www.rfc-editor.org/rfc/rfc5766

pub mod attributes;
mod header;
mod message;
mod transaction_id;

pub use header::{Class, Method};
pub use message::{AttrEncoder, Message, MessageBuilder};
pub use transaction_id::TransactionId;

/// Magic cookie fixed by RFC 5389, always the top 32 bits of the transaction id on the wire.
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// Errors produced while decoding a STUN/TURN message.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The message is too short, has an inconsistent length prefix, or an attribute isn't
    /// padded to a 4 byte boundary.
    #[error("malformed STUN message")]
    Malformed,
    /// `FINGERPRINT` was present but did not match the computed CRC-32.
    #[error("fingerprint mismatch")]
    BadFingerprint,
    /// `MESSAGE-INTEGRITY` was present but did not match the computed HMAC-SHA1.
    #[error("message-integrity mismatch")]
    BadIntegrity,
    /// A comprehension-required attribute (type < 0x8000) was present that this decoder
    /// doesn't know how to interpret structurally (its value couldn't be parsed).
    #[error("unknown mandatory attribute(s)")]
    UnknownAttrs(Vec<u16>),
}

/// Quick, cheap classification of a buffer as a STUN message without fully decoding it.
///
/// Used by code sharing a socket between STUN/TURN control traffic and other protocols
/// (e.g. RTP) to demultiplex before paying for a full parse.
pub fn looks_like_stun_message(data: &[u8]) -> bool {
    if data.len() < 20 {
        return false;
    }

    let msg_type = u16::from_be_bytes([data[0], data[1]]);
    // The two most significant bits of a STUN message are always zero.
    if msg_type & 0xC000 != 0 {
        return false;
    }

    u32::from_be_bytes([data[4], data[5], data[6], data[7]]) == MAGIC_COOKIE
}
