//! Line framing for the AMI text protocol.
//!
//! A message is a block of `Key: Value\r\n` lines terminated by an empty
//! line. TCP delivers arbitrary chunks, so the decoder keeps unconsumed
//! bytes buffered until a full `\r\n\r\n` delimiter is available.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::message::Message;

/// Block terminator.
pub const DELIMITER: &[u8] = b"\r\n\r\n";
/// Line terminator.
pub const LINE_END: &str = "\r\n";
/// Default cap on a single buffered block.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Framing errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// More than `max` bytes buffered without a terminating blank line.
    #[error("frame exceeds {max} bytes without a terminating blank line")]
    FrameTooLong {
        /// Configured limit.
        max: usize,
    },
    /// Underlying transport error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// `tokio_util` codec for AMI messages.
#[derive(Clone, Debug)]
pub struct AmiCodec {
    max_frame_len: usize,
    /// Offset already scanned for a delimiter in the current buffer.
    scanned: usize,
}

impl AmiCodec {
    /// Codec with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Codec with a custom frame limit.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            scanned: 0,
        }
    }
}

impl Default for AmiCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AmiCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        // A delimiter may straddle the previous scan boundary.
        let start = self.scanned.saturating_sub(DELIMITER.len() - 1);
        let found = src[start.min(src.len())..]
            .windows(DELIMITER.len())
            .position(|w| w == DELIMITER)
            .map(|pos| start + pos);

        let Some(end) = found else {
            if src.len() > self.max_frame_len {
                return Err(CodecError::FrameTooLong {
                    max: self.max_frame_len,
                });
            }
            self.scanned = src.len();
            return Ok(None);
        };

        let block = src.split_to(end);
        src.advance(DELIMITER.len());
        self.scanned = 0;
        Ok(Some(parse_block(&block)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, CodecError> {
        if let Some(msg) = self.decode(src)? {
            return Ok(Some(msg));
        }
        if !src.is_empty() {
            debug!(bytes = src.len(), "discarding partial block at end of stream");
            src.clear();
            self.scanned = 0;
        }
        Ok(None)
    }
}

impl Encoder<Message> for AmiCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        encode_into(&item, dst);
        Ok(())
    }
}

impl Encoder<&Message> for AmiCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        encode_into(item, dst);
        Ok(())
    }
}

/// Serialize fields as `Key: Value\r\n` lines plus the blank terminator.
///
/// Values are written verbatim; embedded CRLFs are the caller's problem.
pub fn encode(msg: &Message) -> BytesMut {
    let mut buf = BytesMut::new();
    encode_into(msg, &mut buf);
    buf
}

fn encode_into(msg: &Message, dst: &mut BytesMut) {
    let len: usize = msg.fields().map(|(k, v)| k.len() + v.len() + 4).sum();
    dst.reserve(len + LINE_END.len());
    for (key, value) in msg.fields() {
        dst.put_slice(key.as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(LINE_END.as_bytes());
    }
    dst.put_slice(LINE_END.as_bytes());
}

/// Parse one block (without its terminator) into a message.
///
/// Lines split on the first `:`; key and value are trimmed. Lines with no
/// `:` are skipped.
pub fn parse_block(block: &[u8]) -> Message {
    let text = String::from_utf8_lossy(block);
    let mut msg = Message::new();
    for line in text.split(LINE_END) {
        match line.split_once(':') {
            Some((key, value)) => msg.insert(key.trim(), value.trim()),
            None if line.trim().is_empty() => {}
            None => trace!(line, "ignoring line without separator"),
        }
    }
    msg
}

/// Incremental decoder for callers holding raw byte chunks.
#[derive(Debug, Default)]
pub struct Framer {
    codec: AmiCodec,
    buffer: BytesMut,
}

impl Framer {
    /// Framer with the default frame limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Framer over a specific codec configuration.
    pub fn with_codec(codec: AmiCodec) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
        }
    }

    /// Append bytes and return every message that is now complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Message>, CodecError> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(msg) = self.codec.decode(&mut self.buffer)? {
            out.push(msg);
        }
        Ok(out)
    }

    /// Bytes waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    #[test]
    fn encode_writes_fields_then_blank_line() {
        let msg = Message::new().with("Action", "Ping").with("ActionID", "1");
        assert_eq!(&encode(&msg)[..], b"Action: Ping\r\nActionID: 1\r\n\r\n");
    }

    #[test]
    fn encode_empty_message_is_just_terminator() {
        assert_eq!(&encode(&Message::new())[..], b"\r\n");
    }

    #[test]
    fn single_complete_message() {
        let mut framer = Framer::new();
        let msgs = framer
            .feed(b"Response: Success\r\nActionID: 1\r\nMessage: Authentication accepted\r\n\r\n")
            .unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].response(), Some("Success"));
        assert_eq!(msgs[0].text(), "Authentication accepted");
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn partial_block_stays_buffered() {
        let mut framer = Framer::new();
        assert!(framer.feed(b"Event: Hangup\r\nChan").unwrap().is_empty());
        assert!(framer.buffered() > 0);
        let msgs = framer.feed(b"nel: PJSIP/1000\r\n\r\n").unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].get("Channel"), Some("PJSIP/1000"));
    }

    #[test]
    fn delimiter_split_across_feeds() {
        let mut framer = Framer::new();
        assert!(framer.feed(b"Event: A\r\n\r").unwrap().is_empty());
        let msgs = framer.feed(b"\nEvent: B\r\n\r\n").unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].event_name(), Some("A"));
        assert_eq!(msgs[1].event_name(), Some("B"));
    }

    #[test]
    fn many_messages_in_one_feed() {
        let mut framer = Framer::new();
        let msgs = framer
            .feed(b"Event: A\r\n\r\nEvent: B\r\n\r\nEvent: C\r\n\r\nEvent: D")
            .unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(framer.buffered(), b"Event: D".len());
    }

    #[test]
    fn splits_on_first_colon_and_trims() {
        let msg = parse_block(b"  Contacts :  1000/sip:1000@10.0.0.5:5060  ");
        assert_eq!(msg.get("Contacts"), Some("1000/sip:1000@10.0.0.5:5060"));
    }

    #[test]
    fn line_without_colon_is_skipped() {
        let msg = parse_block(b"Asterisk Call Manager/5.0.1\r\nResponse: Success\r\nActionID: 1");
        assert_eq!(msg.len(), 2);
        assert_eq!(msg.kind(), MessageKind::Response);
    }

    #[test]
    fn greeting_line_is_absorbed_into_first_block() {
        let mut framer = Framer::new();
        let msgs = framer
            .feed(b"Asterisk Call Manager/5.0.1\r\nResponse: Success\r\nActionID: 1\r\n\r\n")
            .unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].action_id(), Some("1"));
    }

    #[test]
    fn empty_block_yields_empty_message() {
        let mut framer = Framer::new();
        let msgs = framer.feed(b"Event: A\r\n\r\n\r\n\r\n").unwrap();
        assert_eq!(msgs.len(), 2);
        assert!(msgs[1].is_empty());
        assert_eq!(msgs[1].kind(), MessageKind::Unclassified);
    }

    #[test]
    fn block_with_only_garbage_yields_empty_message() {
        let mut framer = Framer::new();
        let msgs = framer.feed(b"garbage line\r\n\r\n").unwrap();
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].is_empty());
    }

    #[test]
    fn empty_value_is_kept() {
        let msg = parse_block(b"CallerIDName:\r\nEvent: Newchannel");
        assert_eq!(msg.get("CallerIDName"), Some(""));
    }

    #[test]
    fn oversized_frame_errors() {
        let mut framer = Framer::with_codec(AmiCodec::with_max_frame_len(16));
        let err = framer.feed(b"Event: ThisIsWayTooLongForTheLimit").unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLong { max: 16 }));
    }

    #[test]
    fn decode_eof_discards_partial() {
        let mut codec = AmiCodec::new();
        let mut buf = BytesMut::from(&b"Event: A\r\n\r\nEvent: B"[..]);
        let first = codec.decode_eof(&mut buf).unwrap();
        assert_eq!(first.unwrap().event_name(), Some("A"));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn non_utf8_bytes_are_replaced() {
        let msg = parse_block(b"Event: Caller\r\nName: \xff\xfe");
        assert_eq!(msg.event_name(), Some("Caller"));
        assert!(msg.get("Name").is_some());
    }

    #[test]
    fn encoder_impl_matches_encode() {
        let msg = Message::new().with("Action", "Logoff").with("ActionID", "9");
        let mut codec = AmiCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(&msg, &mut dst).unwrap();
        assert_eq!(dst, encode(&msg));
    }
}
