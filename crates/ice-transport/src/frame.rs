//! RFC 4571 framing: a two-byte big-endian length prefix in front of each STUN message or
//! application chunk sent over a TCP (or TLS-over-TCP) ICE candidate. The prefix counts only the
//! payload, never itself.

use crate::error::TransportError;

pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Prefixes `payload` with its RFC 4571 length header.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(payload.len()));
    }
    let mut framed = Vec::with_capacity(payload.len() + 2);
    framed.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Accumulates bytes read off a TCP stream and yields complete RFC 4571 frames as they arrive.
/// A stream read rarely lines up with a frame boundary, so this buffers partial frames across
/// calls to [`FrameDecoder::push`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly-read bytes and drains every complete frame now available, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            if self.buf.len() < 2 {
                break;
            }
            let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
            if self.buf.len() < 2 + len {
                break;
            }
            let frame = self.buf[2..2 + len].to_vec();
            self.buf.drain(..2 + len);
            frames.push(frame);
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_single_frame() {
        let payload = b"hello stun";
        let framed = encode_frame(payload).unwrap();
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&framed);
        assert_eq!(frames, vec![payload.to_vec()]);
    }

    #[test]
    fn reassembles_a_frame_split_across_reads() {
        let framed = encode_frame(b"split-me").unwrap();
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&framed[..3]).is_empty());
        let frames = decoder.push(&framed[3..]);
        assert_eq!(frames, vec![b"split-me".to_vec()]);
    }

    #[test]
    fn yields_multiple_frames_delivered_in_one_read() {
        let mut bytes = encode_frame(b"one").unwrap();
        bytes.extend(encode_frame(b"two").unwrap());
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&bytes);
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn rejects_oversized_payload() {
        let huge = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(encode_frame(&huge), Err(TransportError::FrameTooLarge(_))));
    }
}
