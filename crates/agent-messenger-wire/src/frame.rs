//! Frame codec — length-prefixed frames with an incremental decoder.
//!
//! Header layout (13 bytes, big-endian): `length: u32` (body bytes),
//! `sequence: u64`, `kind: u8`. The body is a JSON [`FrameBody`] envelope
//! with the payload base64-encoded.

use crate::WireError;
use agent_messenger_types::{Destination, Message, MessageKind, PeerId};
use base64::Engine;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Fixed header length: u32 length + u64 sequence + u8 kind.
pub const HEADER_LEN: usize = 4 + 8 + 1;

/// JSON envelope carried in the frame body.
#[derive(Debug, Serialize, Deserialize)]
struct FrameBody {
    sender: PeerId,
    #[serde(flatten)]
    destination: Destination,
    /// Base64-encoded payload bytes.
    payload: String,
}

/// Encode a message into a single wire frame.
pub fn encode(msg: &Message) -> Result<Vec<u8>, WireError> {
    let body = FrameBody {
        sender: msg.sender.clone(),
        destination: msg.destination.clone(),
        payload: base64::engine::general_purpose::STANDARD.encode(&msg.payload),
    };
    let json = serde_json::to_vec(&body)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + json.len());
    bytes.put_u32(json.len() as u32);
    bytes.put_u64(msg.sequence);
    bytes.put_u8(msg.kind.as_byte());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Incremental frame decoder.
///
/// Feed raw chunks with [`FrameDecoder::feed`], then drain complete frames
/// with [`FrameDecoder::next`]. The decoder buffers partial frames across
/// calls; a chunk may end mid-header or mid-body and decoding resumes when
/// more bytes arrive. Errors are malformed frames and are fatal for the
/// session that owns this decoder, never for the process.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_bytes: u32,
}

impl FrameDecoder {
    /// Create a decoder with a hard per-frame body size ceiling.
    pub fn new(max_frame_bytes: u32) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_frame_bytes,
        }
    }

    /// Append raw bytes from the transport.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Try to decode the next complete frame.
    ///
    /// Returns `Ok(None)` when the buffered bytes do not yet form a whole
    /// frame (incomplete, not an error).
    pub fn next(&mut self) -> Result<Option<Message>, WireError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        // Peek the header without consuming it
        let length = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if length > self.max_frame_bytes {
            return Err(WireError::FrameTooLarge {
                size: length,
                max: self.max_frame_bytes,
            });
        }

        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&self.buf[4..12]);
        let sequence = u64::from_be_bytes(seq_bytes);
        let kind_byte = self.buf[12];
        let kind = MessageKind::from_byte(kind_byte).ok_or(WireError::UnknownFrameKind(kind_byte))?;

        let total = HEADER_LEN + length as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let body = self.buf.split_to(length as usize);
        let envelope: FrameBody = serde_json::from_slice(&body)?;
        let payload = base64::engine::general_purpose::STANDARD
            .decode(envelope.payload.as_bytes())
            .map_err(|e| WireError::InvalidPayload(format!("bad base64: {e}")))?;

        Ok(Some(Message {
            sequence,
            sender: envelope.sender,
            destination: envelope.destination,
            kind,
            payload,
        }))
    }

    /// Bytes currently buffered (useful for diagnostics).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seq: u64) -> Message {
        Message {
            sequence: seq,
            sender: PeerId::from("alice"),
            destination: Destination::Local,
            kind: MessageKind::Data,
            payload: format!("payload-{seq}").into_bytes(),
        }
    }

    #[test]
    fn test_roundtrip_single_frame() {
        let msg = sample(1);
        let bytes = encode(&msg).unwrap();
        let mut decoder = FrameDecoder::new(1024 * 1024);
        decoder.feed(&bytes);
        let decoded = decoder.next().unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(decoder.next().unwrap().is_none());
    }

    #[test]
    fn test_roundtrip_byte_at_a_time() {
        // Arbitrary chunk splits must reconstruct the exact frame sequence
        let messages: Vec<Message> = (1..=5).map(sample).collect();
        let mut stream = Vec::new();
        for msg in &messages {
            stream.extend_from_slice(&encode(msg).unwrap());
        }

        let mut decoder = FrameDecoder::new(1024 * 1024);
        let mut decoded = Vec::new();
        for byte in stream {
            decoder.feed(&[byte]);
            while let Some(msg) = decoder.next().unwrap() {
                decoded.push(msg);
            }
        }
        assert_eq!(decoded, messages);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_frames_one_chunk() {
        let a = sample(1);
        let b = sample(2);
        let mut stream = encode(&a).unwrap();
        stream.extend_from_slice(&encode(&b).unwrap());

        let mut decoder = FrameDecoder::new(1024 * 1024);
        decoder.feed(&stream);
        assert_eq!(decoder.next().unwrap().unwrap(), a);
        assert_eq!(decoder.next().unwrap().unwrap(), b);
        assert!(decoder.next().unwrap().is_none());
    }

    #[test]
    fn test_incomplete_header_is_not_an_error() {
        let mut decoder = FrameDecoder::new(1024);
        decoder.feed(&[0, 0, 0]);
        assert!(decoder.next().unwrap().is_none());
    }

    #[test]
    fn test_oversize_frame_is_malformed() {
        let mut decoder = FrameDecoder::new(16);
        let msg = sample(1);
        let bytes = encode(&msg).unwrap();
        decoder.feed(&bytes);
        match decoder.next() {
            Err(WireError::FrameTooLarge { max: 16, .. }) => {}
            other => panic!("Expected FrameTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let msg = sample(1);
        let mut bytes = encode(&msg).unwrap();
        bytes[12] = 0xFF;
        let mut decoder = FrameDecoder::new(1024 * 1024);
        decoder.feed(&bytes);
        match decoder.next() {
            Err(WireError::UnknownFrameKind(0xFF)) => {}
            other => panic!("Expected UnknownFrameKind, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_body_is_malformed() {
        let mut bytes = Vec::new();
        bytes.put_u32(4);
        bytes.put_u64(1);
        bytes.put_u8(0);
        bytes.extend_from_slice(b"!!!!");
        let mut decoder = FrameDecoder::new(1024);
        decoder.feed(&bytes);
        assert!(matches!(decoder.next(), Err(WireError::Json(_))));
    }

    #[test]
    fn test_control_kind_roundtrip() {
        let msg = Message {
            sequence: 3,
            sender: PeerId::from("bob"),
            destination: Destination::Local,
            kind: MessageKind::Control,
            payload: b"{\"op\":\"heartbeat\"}".to_vec(),
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(bytes[12], 1);
        let mut decoder = FrameDecoder::new(1024);
        decoder.feed(&bytes);
        assert_eq!(decoder.next().unwrap().unwrap(), msg);
    }

    #[test]
    fn test_empty_payload() {
        let msg = Message {
            sequence: 1,
            sender: PeerId::from("alice"),
            destination: Destination::Broadcast,
            kind: MessageKind::Data,
            payload: vec![],
        };
        let bytes = encode(&msg).unwrap();
        let mut decoder = FrameDecoder::new(1024);
        decoder.feed(&bytes);
        assert_eq!(decoder.next().unwrap().unwrap(), msg);
    }
}
