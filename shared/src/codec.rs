//! Length-prefixed framing for the radio link
//!
//! Every packet travels as:
//! ```text
//! [ 4 bytes: body length (u32, big-endian) ][ N bytes: prost Envelope ]
//! ```
//!
//! Serial radios and TCP both deliver an unstructured byte stream, so the
//! prefix is what restores packet boundaries.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::Envelope;

/// Largest accepted frame body. Telemetry radios carry small packets, anything
/// bigger is treated as a corrupted prefix.
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

const PREFIX_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_LEN})")]
    TooLarge(usize),

    #[error("Invalid frame length prefix: {0}")]
    InvalidLength(u32),

    #[error("Packet decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Packet encode error: {0}")]
    Encode(#[from] prost::EncodeError),
}

/// Encode an envelope into a single frame
pub fn encode(envelope: &Envelope) -> Result<Bytes, FrameError> {
    let body_len = envelope.encoded_len();
    if body_len > MAX_FRAME_LEN as usize {
        return Err(FrameError::TooLarge(body_len));
    }

    let mut buf = BytesMut::with_capacity(PREFIX_LEN + body_len);
    buf.put_u32(body_len as u32);
    envelope.encode(&mut buf)?;

    Ok(buf.freeze())
}

/// Try to split one frame off the front of `buf`
///
/// Returns `Ok(None)` and leaves `buf` untouched while the frame is incomplete.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Envelope>, FrameError> {
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }

    let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if body_len > MAX_FRAME_LEN {
        return Err(FrameError::InvalidLength(body_len));
    }

    if buf.len() < PREFIX_LEN + body_len as usize {
        return Ok(None);
    }

    buf.advance(PREFIX_LEN);
    let body = buf.split_to(body_len as usize);

    Ok(Some(Envelope::decode(body)?))
}

/// Accumulates stream reads and yields complete envelopes
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Append bytes read from the link
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next complete envelope, if any
    ///
    /// Call repeatedly until it returns `Ok(None)` to drain the buffer. After an
    /// error the stream is out of sync and the decoder should be discarded.
    pub fn decode_next(&mut self) -> Result<Option<Envelope>, FrameError> {
        decode(&mut self.buffer)
    }

    /// Bytes buffered but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Gps, Payload, SyncRequest};

    fn sync_envelope() -> Envelope {
        Envelope::new(
            1,
            Payload::SyncRequest(SyncRequest {
                ack_timeout_ms: 2000,
                max_retries: 5,
            }),
        )
    }

    #[test]
    fn test_length_prefix_matches_body() {
        let encoded = encode(&sync_envelope()).expect("encode failed");
        let prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(prefix as usize, encoded.len() - PREFIX_LEN);

        let mut buf = BytesMut::from(&encoded[..]);
        let decoded = decode(&mut buf).expect("decode failed").expect("no frame");
        assert_eq!(decoded.packet_id(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_is_not_consumed() {
        let encoded = encode(&sync_envelope()).expect("encode failed");

        let mut buf = BytesMut::from(&encoded[..3]);
        assert!(decode(&mut buf).expect("partial decode").is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decoder_handles_split_and_coalesced_reads() {
        let first = encode(&sync_envelope()).expect("encode failed");
        let second = encode(&Envelope::new(2, Payload::Gps(Gps::default()))).expect("encode failed");

        let mut decoder = FrameDecoder::new();
        decoder.extend(&first[..5]);
        assert!(decoder.decode_next().expect("decode error").is_none());

        // Rest of the first frame and all of the second in one read
        let mut rest = first[5..].to_vec();
        rest.extend_from_slice(&second);
        decoder.extend(&rest);

        assert_eq!(decoder.decode_next().expect("decode error").map(|e| e.packet_id()), Some(1));
        assert_eq!(decoder.decode_next().expect("decode error").map(|e| e.packet_id()), Some(2));
        assert!(decoder.decode_next().expect("decode error").is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_LEN + 1);
        buf.put_bytes(0, 16);

        assert!(matches!(decode(&mut buf), Err(FrameError::InvalidLength(_))));
    }
}
