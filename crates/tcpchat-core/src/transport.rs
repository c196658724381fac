//! Async envelope transport over any byte stream.
//!
//! [`FrameReader`] and [`FrameWriter`] wrap the two halves of a connection
//! (a split `TcpStream` in production, `tokio::io::duplex` in tests).

use crate::codec::{cbor_decode, frame_encode, FrameDecoder};
use crate::error::{ChatError, ChatResult};
use crate::messages::Envelope;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_CHUNK: usize = 8 * 1024;

/// Reads whole frames from a byte stream.
pub struct FrameReader<R> {
    inner: R,
    decoder: FrameDecoder,
    ready: VecDeque<Vec<u8>>,
    buf: Box<[u8]>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Read the next complete frame payload.
    ///
    /// Returns `Ok(None)` when the peer closes cleanly between frames. A
    /// close in the middle of a frame is a transport error.
    pub async fn read_frame(&mut self) -> ChatResult<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }
            self.decoder.check()?;

            let n = self.inner.read(&mut self.buf).await?;
            if n == 0 {
                if self.decoder.pending() > 0 {
                    return Err(ChatError::Transport(format!(
                        "connection closed mid-frame ({} bytes buffered)",
                        self.decoder.pending()
                    )));
                }
                return Ok(None);
            }

            self.ready.extend(self.decoder.feed(&self.buf[..n])?);
        }
    }

    /// Read and decode the next envelope.
    ///
    /// A payload that is not a valid envelope yields `Err(ChatError::Codec)`;
    /// the reader stays usable and the next call continues with the
    /// following frame.
    pub async fn read_envelope(&mut self) -> ChatResult<Option<Envelope>> {
        match self.read_frame().await? {
            Some(frame) => cbor_decode(&frame).map(Some),
            None => Ok(None),
        }
    }
}

/// Writes envelopes as frames to a byte stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode, write and flush one envelope.
    pub async fn write_envelope(&mut self, envelope: &Envelope) -> ChatResult<()> {
        let frame = frame_encode(envelope)?;
        self.inner
            .write_all(&frame)
            .await
            .map_err(|e| ChatError::Transport(format!("write failed: {e}")))?;
        self.inner
            .flush()
            .await
            .map_err(|e| ChatError::Transport(format!("flush failed: {e}")))
    }

    /// Shut down the write side of the stream.
    pub async fn shutdown(&mut self) -> ChatResult<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| ChatError::Transport(format!("shutdown failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MsgType;

    #[tokio::test]
    async fn envelope_crosses_a_duplex_pipe() {
        let (a, b) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b);

        writer
            .write_envelope(&Envelope::chat("alice", "hello"))
            .await
            .unwrap();
        writer
            .write_envelope(&Envelope::users(["alice", "bob"]))
            .await
            .unwrap();
        drop(writer);

        let first = reader.read_envelope().await.unwrap().unwrap();
        assert_eq!(first.msg_type(), MsgType::Chat);
        assert_eq!(first.body(), "hello");
        let second = reader.read_envelope().await.unwrap().unwrap();
        assert_eq!(second.user_list(), vec!["alice", "bob"]);
        assert!(reader.read_envelope().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_payload_does_not_poison_the_stream() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(b);

        let garbage = [0xffu8, 0xff, 0xff];
        a.write_all(&(garbage.len() as u32).to_be_bytes()).await.unwrap();
        a.write_all(&garbage).await.unwrap();
        a.write_all(&frame_encode(&Envelope::chat("bob", "still here")).unwrap())
            .await
            .unwrap();
        drop(a);

        let err = reader.read_envelope().await.unwrap_err();
        assert!(!err.is_fatal_to_connection());
        let next = reader.read_envelope().await.unwrap().unwrap();
        assert_eq!(next.body(), "still here");
    }

    #[tokio::test]
    async fn oversized_frame_fails_after_earlier_frames() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(b);
        let mut bytes = frame_encode(&Envelope::chat("alice", "first")).unwrap();
        bytes.extend_from_slice(&(crate::codec::MAX_FRAME_LEN as u32 + 1).to_be_bytes());
        a.write_all(&bytes).await.unwrap();

        let first = reader.read_envelope().await.unwrap().unwrap();
        assert_eq!(first.body(), "first");
        // Fails without waiting for more bytes; the writer is still open.
        let err = reader.read_envelope().await.unwrap_err();
        assert!(err.is_fatal_to_connection());
    }

    #[tokio::test]
    async fn close_mid_frame_is_an_error() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut reader = FrameReader::new(b);
        let frame = frame_encode(&Envelope::chat("alice", "cut off")).unwrap();
        a.write_all(&frame[..frame.len() - 2]).await.unwrap();
        drop(a);

        let err = reader.read_frame().await.unwrap_err();
        assert!(err.is_fatal_to_connection());
    }
}
