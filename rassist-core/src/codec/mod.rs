//! `tokio_util` codecs for the two channels sharing one session socket.
//!
//! | Codec          | Direction       | Layout                               |
//! |----------------|-----------------|--------------------------------------|
//! | [`FrameCodec`]   | agent → viewer  | `i32` BE length + encoded image bytes |
//! | [`CommandCodec`] | viewer → agent  | `u16` BE length + UTF-8 command text  |
//!
//! Both decoders only yield complete messages. Malformed messages are
//! discarded and counted; after `max_violations` consecutive ones the
//! decoder fails with [`RassistError::ProtocolViolation`] so a hostile
//! peer cannot keep a session busy (or make it allocate) forever.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::RassistError;
use crate::protocol::{Command, DEFAULT_OUTPUT_HEIGHT, DEFAULT_OUTPUT_WIDTH};

// ── Constants ────────────────────────────────────────────────────

/// Size of the frame length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Size of the command length prefix.
pub const COMMAND_HEADER_LEN: usize = 2;

/// Largest accepted frame: the raw RGBA size of the default output
/// resolution. An encoded image is always far below this.
pub const DEFAULT_MAX_FRAME_LEN: usize =
    DEFAULT_OUTPUT_WIDTH as usize * DEFAULT_OUTPUT_HEIGHT as usize * 4;

/// Consecutive malformed messages tolerated before the channel fails.
pub const DEFAULT_MAX_VIOLATIONS: u32 = 8;

// ── Violation tracking ───────────────────────────────────────────

#[derive(Debug, Clone)]
struct Violations {
    limit: u32,
    consecutive: u32,
    total: u64,
}

impl Violations {
    fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            consecutive: 0,
            total: 0,
        }
    }

    fn record(&mut self, what: &'static str) -> Result<(), RassistError> {
        self.consecutive += 1;
        self.total += 1;
        if self.consecutive >= self.limit {
            return Err(RassistError::ProtocolViolation(what));
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.consecutive = 0;
    }
}

// ── FrameCodec ───────────────────────────────────────────────────

/// Length-prefixed frame codec.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_len: usize,
    violations: Violations,
    /// Bytes of an oversized frame still to be skipped.
    discarding: usize,
}

impl FrameCodec {
    pub fn new(max_frame_len: usize, max_violations: u32) -> Self {
        Self {
            max_frame_len,
            violations: Violations::new(max_violations),
            discarding: 0,
        }
    }

    /// Malformed frames discarded since construction.
    pub fn discarded(&self) -> u64 {
        self.violations.total
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_VIOLATIONS)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = RassistError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.discarding > 0 {
                let n = self.discarding.min(src.len());
                src.advance(n);
                self.discarding -= n;
                if self.discarding > 0 {
                    return Ok(None);
                }
            }

            if src.len() < FRAME_HEADER_LEN {
                return Ok(None);
            }

            let mut header = [0u8; FRAME_HEADER_LEN];
            header.copy_from_slice(&src[..FRAME_HEADER_LEN]);
            let declared = i32::from_be_bytes(header);

            if declared <= 0 {
                // Nothing follows a non-positive length; drop the header only.
                src.advance(FRAME_HEADER_LEN);
                warn!("discarding frame with invalid length {declared}");
                self.violations.record("repeated invalid frame lengths")?;
                continue;
            }

            let len = declared as usize;
            if len > self.max_frame_len {
                src.advance(FRAME_HEADER_LEN);
                self.discarding = len;
                warn!(
                    "discarding oversized frame: {len} bytes (max {})",
                    self.max_frame_len
                );
                self.violations.record("repeated oversized frames")?;
                continue;
            }

            if src.len() < FRAME_HEADER_LEN + len {
                src.reserve(FRAME_HEADER_LEN + len - src.len());
                return Ok(None);
            }

            src.advance(FRAME_HEADER_LEN);
            self.violations.reset();
            return Ok(Some(src.split_to(len).freeze()));
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = RassistError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.is_empty() {
            return Err(RassistError::InvalidFrameLength(0));
        }
        if item.len() > i32::MAX as usize {
            return Err(RassistError::PayloadTooLarge {
                size: item.len(),
                max: i32::MAX as usize,
            });
        }
        dst.reserve(FRAME_HEADER_LEN + item.len());
        dst.put_i32(item.len() as i32);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

// ── CommandCodec ─────────────────────────────────────────────────

/// Length-prefixed command text codec.
///
/// The decoder yields raw command text; parsing into [`Command`] is left
/// to the session so unknown names can be ignored instead of failing.
#[derive(Debug, Clone)]
pub struct CommandCodec {
    violations: Violations,
}

impl CommandCodec {
    pub fn new(max_violations: u32) -> Self {
        Self {
            violations: Violations::new(max_violations),
        }
    }

    /// Malformed command messages discarded since construction.
    pub fn discarded(&self) -> u64 {
        self.violations.total
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VIOLATIONS)
    }
}

impl Decoder for CommandCodec {
    type Item = String;
    type Error = RassistError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < COMMAND_HEADER_LEN {
                return Ok(None);
            }

            let len = u16::from_be_bytes([src[0], src[1]]) as usize;
            if src.len() < COMMAND_HEADER_LEN + len {
                src.reserve(COMMAND_HEADER_LEN + len - src.len());
                return Ok(None);
            }

            src.advance(COMMAND_HEADER_LEN);
            let body = src.split_to(len);

            if body.is_empty() {
                warn!("discarding empty command message");
                self.violations.record("repeated empty commands")?;
                continue;
            }

            match String::from_utf8(body.to_vec()) {
                Ok(text) => {
                    self.violations.reset();
                    return Ok(Some(text));
                }
                Err(e) => {
                    warn!("discarding command message: {e}");
                    self.violations.record("repeated non-utf8 commands")?;
                }
            }
        }
    }
}

impl Encoder<Command> for CommandCodec {
    type Error = RassistError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let text = item.to_string();
        if text.len() > u16::MAX as usize {
            return Err(RassistError::PayloadTooLarge {
                size: text.len(),
                max: u16::MAX as usize,
            });
        }
        dst.reserve(COMMAND_HEADER_LEN + text.len());
        dst.put_u16(text.len() as u16);
        dst.extend_from_slice(text.as_bytes());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    fn frame_bytes(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as i32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn frame_round_trip() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let payload = Bytes::from_static(b"\xff\xd8jpeg-ish\xff\xd9");
        codec.encode(payload.clone(), &mut buf).unwrap();
        assert_eq!(&buf[..4], &(payload.len() as i32).to_be_bytes());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_rest() {
        let mut codec = FrameCodec::default();
        let bytes = frame_bytes(&[7u8; 100]);
        let mut buf = BytesMut::from(&bytes[..50]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[50..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().len(), 100);
    }

    #[test]
    fn negative_length_is_skipped() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(-1i32).to_be_bytes());
        buf.extend_from_slice(&frame_bytes(b"ok"));

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], b"ok");
        assert_eq!(codec.discarded(), 1);
    }

    #[test]
    fn oversized_frame_is_skipped_without_buffering() {
        let mut codec = FrameCodec::new(16, 4);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame_bytes(&[0u8; 32]));
        buf.extend_from_slice(&frame_bytes(b"small"));

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], b"small");
        assert_eq!(codec.discarded(), 1);
    }

    #[test]
    fn repeated_violations_fail_the_channel() {
        let mut codec = FrameCodec::new(DEFAULT_MAX_FRAME_LEN, 3);
        let mut buf = BytesMut::new();
        for _ in 0..3 {
            buf.extend_from_slice(&0i32.to_be_bytes());
        }
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, RassistError::ProtocolViolation(_)));
    }

    #[test]
    fn valid_frame_resets_violation_run() {
        let mut codec = FrameCodec::new(DEFAULT_MAX_FRAME_LEN, 2);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&0i32.to_be_bytes());
        buf.extend_from_slice(&frame_bytes(b"a"));
        buf.extend_from_slice(&0i32.to_be_bytes());
        buf.extend_from_slice(&frame_bytes(b"b"));

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"a");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"b");
    }

    #[test]
    fn empty_payload_is_not_encoded() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        assert!(codec.encode(Bytes::new(), &mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn frame_stream_survives_minus_one_length() {
        let mock = tokio_test::io::Builder::new()
            .read(&(-1i32).to_be_bytes())
            .read(&frame_bytes(&[1, 2, 3]))
            .build();
        let mut frames = FramedRead::new(mock, FrameCodec::default());

        let first = frames.next().await.unwrap().unwrap();
        assert_eq!(&first[..], &[1, 2, 3]);
        assert!(frames.next().await.is_none());
    }

    #[test]
    fn command_round_trip() {
        let mut codec = CommandCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(Command::MouseMove { x: 100, y: 250 }, &mut buf)
            .unwrap();
        assert_eq!(&buf[..2], &[0, 18]);

        let text = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(text, "MOUSE_MOVE:100,250");
    }

    #[test]
    fn command_bad_utf8_is_discarded() {
        let mut codec = CommandCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 2, 0xc3, 0x28]);
        buf.extend_from_slice(&[0, 4]);
        buf.extend_from_slice(b"PING");

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "PING");
        assert_eq!(codec.discarded(), 1);
    }

    #[tokio::test]
    async fn command_split_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0, 10])
            .read(b"DISCO")
            .read(b"NNECT")
            .build();
        let mut commands = FramedRead::new(mock, CommandCodec::default());
        assert_eq!(commands.next().await.unwrap().unwrap(), "DISCONNECT");
        assert!(commands.next().await.is_none());
    }
}
