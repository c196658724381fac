//! Length-prefixed CBOR framing.
//!
//! Wire format: `[4-byte big-endian length][CBOR payload]`

use crate::error::{ChatError, ChatResult};
use std::io::Cursor;

/// Largest payload accepted in a single frame (1 MiB).
pub const MAX_FRAME_LEN: usize = 1_048_576;

/// Encode a serializable value into a length-prefixed CBOR frame.
pub fn frame_encode<T: serde::Serialize>(value: &T) -> ChatResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;

    if payload.len() > MAX_FRAME_LEN {
        return Err(ChatError::Codec(format!(
            "frame too large: {} bytes (max {MAX_FRAME_LEN})",
            payload.len()
        )));
    }

    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend(payload);
    Ok(frame)
}

/// Decode a CBOR payload (without length prefix) into a typed value.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> ChatResult<T> {
    let cursor = Cursor::new(data);
    let value: T = ciborium::from_reader(cursor)?;
    Ok(value)
}

/// Streaming frame decoder: accumulates bytes and yields complete payloads.
///
/// Payloads are returned undecoded so that a corrupt message can be dropped
/// without losing the stream position.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Length of an oversize prefix seen in the stream. Once set, the stream
    /// is unusable and every later call fails.
    oversize: Option<usize>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every complete frame payload.
    ///
    /// A length prefix over [`MAX_FRAME_LEN`] cannot be resynchronised past.
    /// Frames completed before it in the same call are still returned; the
    /// transport error is reported by the next call to `feed` or
    /// [`check`](Self::check).
    pub fn feed(&mut self, data: &[u8]) -> ChatResult<Vec<Vec<u8>>> {
        self.check()?;
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            if self.buffer.len() < 4 {
                break;
            }
            let len =
                u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                    as usize;

            if len > MAX_FRAME_LEN {
                self.oversize = Some(len);
                self.buffer.clear();
                if frames.is_empty() {
                    self.check()?;
                }
                break;
            }

            if self.buffer.len() < 4 + len {
                break;
            }

            let payload = self.buffer[4..4 + len].to_vec();
            frames.push(payload);
            self.buffer.drain(..4 + len);
        }

        Ok(frames)
    }

    /// Fails if the stream has hit an oversize frame.
    pub fn check(&self) -> ChatResult<()> {
        match self.oversize {
            Some(len) => Err(ChatError::Transport(format!(
                "frame too large: {len} bytes (max {MAX_FRAME_LEN})"
            ))),
            None => Ok(()),
        }
    }

    /// Number of bytes buffered towards an incomplete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Envelope, MsgType};

    #[test]
    fn multiple_frames_in_one_read() {
        let msgs = vec![
            Envelope::chat("alice", "one"),
            Envelope::chat("alice", "two"),
            Envelope::whisper("bob", "alice", "three"),
        ];

        let mut combined = Vec::new();
        for m in &msgs {
            combined.extend(frame_encode(m).unwrap());
        }

        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&combined).unwrap();
        let decoded: Vec<Envelope> = frames.iter().map(|f| cbor_decode(f).unwrap()).collect();
        assert_eq!(decoded, msgs);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn incremental_feed() {
        let msg = Envelope::connect_request("alice");
        let frame = frame_encode(&msg).unwrap();
        let mut decoder = FrameDecoder::new();

        // Feed one byte at a time
        for i in 0..frame.len() - 1 {
            assert!(decoder.feed(&frame[i..i + 1]).unwrap().is_empty());
        }
        assert_eq!(decoder.pending(), frame.len() - 1);

        let frames = decoder.feed(&frame[frame.len() - 1..]).unwrap();
        assert_eq!(frames.len(), 1);
        let decoded: Envelope = cbor_decode(&frames[0]).unwrap();
        assert_eq!(decoded.msg_type(), MsgType::Connection);
        assert_eq!(decoded.body(), "alice");
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut decoder = FrameDecoder::new();
        let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let err = decoder.feed(&len).unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));
        assert!(decoder.feed(&[0, 0, 0, 1, 0]).is_err());
    }

    #[test]
    fn frames_before_an_oversized_prefix_are_kept() {
        let mut bytes = frame_encode(&Envelope::connect_request("alice")).unwrap();
        bytes.extend(frame_encode(&Envelope::chat("alice", "before")).unwrap());
        bytes.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());

        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&bytes).unwrap();
        assert_eq!(frames.len(), 2);
        let second: Envelope = cbor_decode(&frames[1]).unwrap();
        assert_eq!(second.body(), "before");

        assert!(matches!(decoder.check(), Err(ChatError::Transport(_))));
        assert!(decoder.feed(&[]).is_err());
    }

    #[test]
    fn garbage_payload_is_a_codec_error() {
        let err = cbor_decode::<Envelope>(&[0xff, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, ChatError::Codec(_)));
        assert!(!err.is_fatal_to_connection());
    }
}
