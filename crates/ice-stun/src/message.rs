use crate::attributes::{Attribute, KeyedAttribute};
use crate::header::{decode_message_type, encode_message_type, HEADER_LEN};
use crate::{Class, CodecError, Method, TransactionId, MAGIC_COOKIE};
use std::ops::Range;

const FINGERPRINT_TYPE: u16 = 0x8028;
const FINGERPRINT_XOR: u32 = 0x5354_554E;

struct RawAttr {
    typ: u16,
    /// Offset of this attribute's 4-byte TLV header within `raw`.
    header_offset: usize,
    /// Byte range of the (unpadded) attribute value within `raw`.
    value: Range<usize>,
}

/// A decoded STUN/TURN message.
///
/// Attributes are decoded lazily on request via [`Message::attribute`] /
/// [`Message::attribute_with`] — mirroring how the agent layer actually consumes them, one
/// attribute at a time, rather than paying to parse every attribute up front.
pub struct Message {
    class: Class,
    method: Method,
    transaction_id: TransactionId,
    raw: Vec<u8>,
    attrs: Vec<RawAttr>,
}

impl Message {
    /// Decode a message's header and TLV attribute structure.
    ///
    /// This only validates structure (length prefix, 4-byte attribute padding); it does not
    /// validate FINGERPRINT, MESSAGE-INTEGRITY, or comprehension-required attributes. Use
    /// [`Message::verify_fingerprint`], [`Message::attribute_with`], and
    /// [`Message::unknown_comprehension_required`] for those.
    pub fn parse(raw: Vec<u8>) -> Result<Self, CodecError> {
        if raw.len() < HEADER_LEN {
            return Err(CodecError::Malformed);
        }

        let msg_type = u16::from_be_bytes([raw[0], raw[1]]);
        if msg_type & 0xC000 != 0 {
            return Err(CodecError::Malformed);
        }

        let data_length = u16::from_be_bytes([raw[2], raw[3]]) as usize;
        let magic = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
        if magic != MAGIC_COOKIE {
            return Err(CodecError::Malformed);
        }

        if raw.len() != HEADER_LEN + data_length {
            return Err(CodecError::Malformed);
        }

        let mut tid = [0u8; 12];
        tid.copy_from_slice(&raw[8..20]);

        let mut attrs = Vec::new();
        let mut offset = HEADER_LEN;
        while offset < raw.len() {
            if offset + 4 > raw.len() {
                return Err(CodecError::Malformed);
            }
            let typ = u16::from_be_bytes([raw[offset], raw[offset + 1]]);
            let len = u16::from_be_bytes([raw[offset + 2], raw[offset + 3]]) as usize;
            let value_start = offset + 4;
            let value_end = value_start + len;
            if value_end > raw.len() {
                return Err(CodecError::Malformed);
            }
            let padded_len = len.div_ceil(4) * 4;
            let padded_end = value_start + padded_len;
            if padded_end > raw.len() {
                return Err(CodecError::Malformed);
            }

            attrs.push(RawAttr {
                typ,
                header_offset: offset,
                value: value_start..value_end,
            });

            offset = padded_end;
        }

        if offset != raw.len() {
            return Err(CodecError::Malformed);
        }

        let (method, class) = decode_message_type(msg_type);

        Ok(Message {
            class,
            method,
            transaction_id: TransactionId::from_bytes(tid),
            raw,
            attrs,
        })
    }

    pub fn class(&self) -> Class {
        self.class
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    fn find(&self, typ: u16) -> Option<&RawAttr> {
        self.attrs.iter().find(|a| a.typ == typ)
    }

    fn find_all(&self, typ: u16) -> impl Iterator<Item = &RawAttr> {
        self.attrs.iter().filter(move |a| a.typ == typ)
    }

    /// Decode the first attribute of type `T`, if present.
    ///
    /// `None` means the attribute is absent. `Some(Err(_))` means it was present but malformed.
    pub fn attribute<T: Attribute>(&self) -> Option<Result<T, CodecError>> {
        let attr = self.find(T::TYPE)?;
        Some(T::decode_value(&self.raw[attr.value.clone()]))
    }

    /// Decode every attribute of type `T` (used for XOR-PEER-ADDRESS, which TURN permits more
    /// than once in a single CreatePermission request).
    pub fn attributes<T: Attribute>(&self) -> Vec<Result<T, CodecError>> {
        self.find_all(T::TYPE)
            .map(|attr| T::decode_value(&self.raw[attr.value.clone()]))
            .collect()
    }

    /// Decode a keyed attribute (MESSAGE-INTEGRITY) whose validity depends on bytes elsewhere
    /// in the message plus an out-of-band key.
    pub fn attribute_with<T: KeyedAttribute>(&self, key: &T::Key) -> Option<Result<T, CodecError>> {
        let attr = self.find(T::TYPE)?;
        Some(T::decode_with(
            &self.raw[attr.value.clone()],
            &self.raw,
            attr.header_offset,
            key,
        ))
    }

    /// Decode an address attribute XORed with the magic cookie and this message's own
    /// transaction id (e.g. XOR-MAPPED-ADDRESS), per RFC 5389 §15.2.
    pub fn attribute_xor<T: crate::attributes::XorAddress>(&self) -> Option<Result<T, CodecError>> {
        let attr = self.find(T::TYPE)?;
        Some(crate::attributes::decode_xor_attr(
            &self.raw[attr.value.clone()],
            self.transaction_id,
        ))
    }

    /// Decode every occurrence of an XORed address attribute (used for XOR-PEER-ADDRESS, which
    /// TURN allows more than once per CreatePermission request).
    pub fn attributes_xor<T: crate::attributes::XorAddress>(&self) -> Vec<Result<T, CodecError>> {
        self.find_all(T::TYPE)
            .map(|attr| crate::attributes::decode_xor_attr(&self.raw[attr.value.clone()], self.transaction_id))
            .collect()
    }

    /// Verify FINGERPRINT, if present.
    ///
    /// `None` means no FINGERPRINT attribute was present. Per RFC 5389, FINGERPRINT must be the
    /// last attribute in the message if present at all; this is not itself re-validated here
    /// since malformed placement simply causes the CRC to mismatch.
    pub fn verify_fingerprint(&self) -> Option<Result<(), CodecError>> {
        let attr = self.find(FINGERPRINT_TYPE)?;
        let value = &self.raw[attr.value.clone()];
        if value.len() != 4 {
            return Some(Err(CodecError::BadFingerprint));
        }

        let declared = u32::from_be_bytes(value.try_into().unwrap());

        let mut patched = self.raw[..attr.header_offset].to_vec();
        let patched_length = (attr.header_offset - HEADER_LEN + 8) as u16;
        patched[2..4].copy_from_slice(&patched_length.to_be_bytes());

        let computed = crc32(&patched) ^ FINGERPRINT_XOR;

        if computed == declared {
            Some(Ok(()))
        } else {
            Some(Err(CodecError::BadFingerprint))
        }
    }

    /// Returns the type codes of every comprehension-required attribute (type < 0x8000) this
    /// message carries that isn't in `known`. An empty result means the message can be fully
    /// understood by a decoder that knows `known`.
    pub fn unknown_comprehension_required(&self, known: &[u16]) -> Vec<u16> {
        self.attrs
            .iter()
            .map(|a| a.typ)
            .filter(|typ| *typ < 0x8000 && !known.contains(typ))
            .collect()
    }
}

/// Parse a message and fail outright if it carries a comprehension-required attribute the
/// caller doesn't recognize. This is the literal `decode(bytes) -> Message` contract from the
/// specification; [`Message::parse`] is the more permissive building block most callers want.
pub fn decode_strict(raw: Vec<u8>, known_attrs: &[u16]) -> Result<Message, CodecError> {
    let msg = Message::parse(raw)?;
    let unknown = msg.unknown_comprehension_required(known_attrs);
    if unknown.is_empty() {
        Ok(msg)
    } else {
        Err(CodecError::UnknownAttrs(unknown))
    }
}

/// Helper used by [`MessageBuilder`] and by [`KeyedAttribute`] impls to compute HMAC-SHA1 /
/// CRC-32 over an encoder buffer.
pub struct AttrEncoder<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> AttrEncoder<'a> {
    pub(crate) fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

/// Incrementally builds a STUN/TURN message.
///
/// Attributes are appended in the order given; MESSAGE-INTEGRITY and FINGERPRINT (added via
/// [`MessageBuilder::add_message_integrity`] / [`MessageBuilder::add_fingerprint`]) must be
/// added last since their value covers everything before them — the data-length header field
/// is repatched on every append so this holds even mid-construction.
pub struct MessageBuilder {
    buf: Vec<u8>,
}

impl MessageBuilder {
    pub fn new(class: Class, method: Method, transaction_id: TransactionId) -> Self {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.extend_from_slice(&encode_message_type(method, class).to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes()); // data length, patched as attrs are added
        buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        buf.extend_from_slice(transaction_id.as_bytes());

        Self { buf }
    }

    fn patch_length(&mut self, data_length: u16) {
        self.buf[2..4].copy_from_slice(&data_length.to_be_bytes());
    }

    /// Reserves `additional` data-length bytes (TLV header + padded value) by patching the
    /// length field, without yet appending the bytes themselves — needed so MESSAGE-INTEGRITY
    /// and FINGERPRINT can be computed as if their own attribute were already present.
    fn reserve(&mut self, additional: usize) {
        let current = self.buf.len() - HEADER_LEN;
        self.patch_length((current + additional) as u16);
    }

    fn push_tlv(&mut self, typ: u16, value: &[u8]) {
        self.buf.extend_from_slice(&typ.to_be_bytes());
        self.buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(value);
        let pad = value.len().div_ceil(4) * 4 - value.len();
        self.buf.extend(std::iter::repeat(0u8).take(pad));
    }

    pub fn add_attr<T: Attribute>(&mut self, attr: &T) -> Result<(), CodecError> {
        let mut value = Vec::new();
        attr.encode_value(&mut AttrEncoder { buf: &mut value })?;

        let padded = value.len().div_ceil(4) * 4;
        self.reserve(4 + padded);
        self.push_tlv(T::TYPE, &value);
        Ok(())
    }

    /// Adds an address attribute XORed with the magic cookie and this message's transaction id
    /// (e.g. XOR-MAPPED-ADDRESS), per RFC 5389 §15.2.
    pub fn add_xor_attr<T: crate::attributes::XorAddress>(&mut self, attr: &T) -> Result<(), CodecError> {
        let mut tid = [0u8; 12];
        tid.copy_from_slice(&self.buf[8..20]);
        let tid = TransactionId::from_bytes(tid);

        let mut value = Vec::new();
        crate::attributes::encode_xor_attr(attr, tid, &mut AttrEncoder::new(&mut value));

        let padded = value.len().div_ceil(4) * 4;
        self.reserve(4 + padded);
        self.push_tlv(T::TYPE, &value);
        Ok(())
    }

    /// Adds MESSAGE-INTEGRITY, an HMAC-SHA1 over everything added so far (with the length
    /// field patched to include this attribute but nothing after it).
    pub fn add_message_integrity<T: KeyedAttribute>(
        &mut self,
        key: &T::Key,
    ) -> Result<(), CodecError> {
        self.reserve(4 + 20);
        let mac = T::compute(&self.buf, key);
        self.push_tlv(T::TYPE, &mac);
        Ok(())
    }

    /// Adds FINGERPRINT, a CRC-32 (XORed with `0x5354554E`) over everything added so far. Must
    /// be the last attribute.
    pub fn add_fingerprint(&mut self) -> Result<(), CodecError> {
        self.reserve(4 + 4);
        let crc = crc32(&self.buf) ^ FINGERPRINT_XOR;
        self.push_tlv(FINGERPRINT_TYPE, &crc.to_be_bytes());
        Ok(())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub(crate) fn crc32(data: &[u8]) -> u32 {
    const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
    CRC.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{Priority, Username};

    #[test]
    fn round_trips_binding_request_with_several_attributes() {
        let tid = TransactionId::random();
        let mut builder = MessageBuilder::new(Class::Request, Method::Binding, tid);
        builder.add_attr(&Username::new("alice:bob")).unwrap();
        builder.add_attr(&Priority(12345)).unwrap();
        builder.add_fingerprint().unwrap();
        let bytes = builder.finish();

        let msg = Message::parse(bytes).unwrap();
        assert_eq!(msg.class(), Class::Request);
        assert_eq!(msg.method(), Method::Binding);
        assert_eq!(msg.transaction_id(), tid);
        assert_eq!(msg.attribute::<Username>().unwrap().unwrap().0, "alice:bob");
        assert_eq!(msg.attribute::<Priority>().unwrap().unwrap().0, 12345);
        assert!(matches!(msg.verify_fingerprint(), Some(Ok(()))));
    }

    #[test]
    fn flipping_a_bit_breaks_fingerprint() {
        let tid = TransactionId::random();
        let mut builder = MessageBuilder::new(Class::Request, Method::Binding, tid);
        builder.add_attr(&Priority(1)).unwrap();
        builder.add_fingerprint().unwrap();
        let mut bytes = builder.finish();

        bytes[8] ^= 0x01; // flip a bit inside the transaction id, covered by FINGERPRINT
        let msg = Message::parse(bytes).unwrap();
        assert!(matches!(msg.verify_fingerprint(), Some(Err(CodecError::BadFingerprint))));
    }

    #[test]
    fn padding_boundary_every_length_0_to_7() {
        for len in 0..8 {
            let tid = TransactionId::random();
            let mut builder = MessageBuilder::new(Class::Indication, Method::Binding, tid);
            let value = vec![0x42u8; len];
            builder
                .add_attr(&crate::attributes::Software(
                    String::from_utf8(value).unwrap_or_default(),
                ))
                .unwrap();
            builder.add_fingerprint().unwrap();
            let bytes = builder.finish();
            assert_eq!(bytes.len() % 4, 0);
            let msg = Message::parse(bytes).unwrap();
            assert!(matches!(msg.verify_fingerprint(), Some(Ok(()))));
        }
    }

    #[test]
    fn unknown_mandatory_attribute_is_reported() {
        let tid = TransactionId::random();
        let mut builder = MessageBuilder::new(Class::Request, Method::Binding, tid);
        builder.add_attr(&Priority(1)).unwrap();
        let mut bytes = builder.finish();
        // Splice in a bogus comprehension-required attribute (type 0x7FFE, unused).
        bytes[2..4].copy_from_slice(&12u16.to_be_bytes());
        bytes.extend_from_slice(&0x7FFEu16.to_be_bytes());
        bytes.extend_from_slice(&0u16.to_be_bytes());

        let known = [Priority::TYPE];
        let err = decode_strict(bytes, &known).unwrap_err();
        assert_eq!(err, CodecError::UnknownAttrs(vec![0x7FFE]));
    }
}
