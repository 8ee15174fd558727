//! Newline-delimited JSON framing.
//!
//! Each frame is one UTF-8 JSON object terminated by `\n` (a preceding `\r`
//! is tolerated). The decoder keeps incomplete suffixes in the read buffer
//! until the terminator arrives, so a frame split across several socket reads
//! decodes exactly once, and several frames delivered in one read decode
//! one by one.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::constants::MAX_FRAME_SIZE;
use crate::error::ProtocolError;

#[derive(Debug, Clone)]
pub struct JsonLinesCodec {
    /// Offset up to which the buffer is known to contain no newline.
    next_index: usize,
    max_length: usize,
}

impl JsonLinesCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_SIZE)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for JsonLinesCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

impl Decoder for JsonLinesCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        loop {
            let newline = buf[self.next_index..].iter().position(|b| *b == b'\n');

            let Some(offset) = newline else {
                if buf.len() > self.max_length {
                    return Err(ProtocolError::FrameTooLarge {
                        size: buf.len(),
                        max: self.max_length,
                    });
                }
                self.next_index = buf.len();
                return Ok(None);
            };

            let end = self.next_index + offset;
            self.next_index = 0;

            let mut line = buf.split_to(end + 1);
            line.truncate(end);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            if line.len() > self.max_length {
                return Err(ProtocolError::FrameTooLarge {
                    size: line.len(),
                    max: self.max_length,
                });
            }

            if is_blank(&line) {
                continue;
            }

            return Ok(Some(line.freeze()));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        // An unterminated trailing frame is still honoured once the peer
        // half-closes the stream.
        self.next_index = 0;
        if is_blank(buf) {
            buf.clear();
            return Ok(None);
        }
        let line = buf.split_to(buf.len());
        Ok(Some(line.freeze()))
    }
}

impl<T: Serialize> Encoder<T> for JsonLinesCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let body =
            serde_json::to_vec(&item).map_err(|e| ProtocolError::Serialization(e.to_string()))?;

        if body.len() > self.max_length {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                max: self.max_length,
            });
        }

        dst.reserve(body.len() + 1);
        dst.put_slice(&body);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(codec: &mut JsonLinesCodec, buf: &mut BytesMut) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn frame_split_across_two_reads_decodes_once() {
        let mut codec = JsonLinesCodec::new();
        let encoded = b"{\"type\":\"login\",\"username\":\"alice\",\"password\":\"pw1\"}\n";
        let (first, second) = encoded.split_at(17);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(first);
        assert!(drain(&mut codec, &mut buf).is_empty());

        buf.extend_from_slice(second);
        let frames = drain(&mut codec, &mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &encoded[..encoded.len() - 1]);
        assert!(buf.is_empty());
    }

    #[test]
    fn backlog_of_frames_in_one_read() {
        let mut codec = JsonLinesCodec::new();
        let mut buf = BytesMut::from(&b"{\"a\":1}\n{\"b\":2}\r\n{\"c\":"[..]);

        let frames = drain(&mut codec, &mut buf);
        assert_eq!(frames, vec![Bytes::from("{\"a\":1}"), Bytes::from("{\"b\":2}")]);

        // The incomplete suffix is withheld until its terminator arrives.
        assert_eq!(&buf[..], b"{\"c\":");
        buf.extend_from_slice(b"3}\n");
        assert_eq!(drain(&mut codec, &mut buf), vec![Bytes::from("{\"c\":3}")]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut codec = JsonLinesCodec::new();
        let mut buf = BytesMut::from(&b"\n  \r\n{\"a\":1}\n"[..]);
        assert_eq!(drain(&mut codec, &mut buf), vec![Bytes::from("{\"a\":1}")]);
    }

    #[test]
    fn oversized_partial_frame_is_rejected() {
        let mut codec = JsonLinesCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"{\"abcdefgh\""[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn unterminated_frame_is_flushed_at_eof() {
        let mut codec = JsonLinesCodec::new();
        let mut buf = BytesMut::from(&b"{\"a\":1}"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        let frame = codec.decode_eof(&mut buf).unwrap();
        assert_eq!(frame, Some(Bytes::from("{\"a\":1}")));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn encoder_appends_newline() {
        let mut codec = JsonLinesCodec::new();
        let mut dst = BytesMut::new();
        codec
            .encode(serde_json::json!({ "status": "ok" }), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], b"{\"status\":\"ok\"}\n");
    }
}
