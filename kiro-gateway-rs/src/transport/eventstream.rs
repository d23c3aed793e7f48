//! Decoder for the AWS `application/vnd.amazon.eventstream` binary framing
//! Kiro uses to transport `generateAssistantResponse` chunks.
//!
//! Wire format per message:
//!
//! ```text
//! total_length:u32be | headers_length:u32be | prelude_crc:u32be
//! | headers(headers_length bytes) | payload | message_crc:u32be
//! ```
//!
//! Each header is `name_len:u8 | name | type:u8 | value` with the value
//! shape depending on `type` (7 = UTF-8 string, the only type Kiro uses
//! operationally for `:message-type` / `:event-type` / `:content-type`).

use std::sync::Mutex;

use bytes::{Buf, Bytes, BytesMut};

use crate::config::EVENTSTREAM_MAX_ITERATIONS_PER_FEED as MAX_ITERATIONS_PER_FEED;
use crate::error::{Error, Result};

const PRELUDE_LEN: usize = 8; // total_length + headers_length
const MIN_FRAME_LEN: usize = PRELUDE_LEN + 4 + 4; // prelude_crc + message_crc

/// A single decoded event-stream message.
#[derive(Debug, Clone)]
pub struct Frame {
    pub message_type: Option<String>,
    pub event_type: Option<String>,
    pub content_type: Option<String>,
    pub exception_type: Option<String>,
    pub payload: Bytes,
}

impl Frame {
    /// True if `:message-type` is `exception`.
    pub fn is_exception(&self) -> bool {
        self.message_type.as_deref() == Some("exception")
    }

    /// True if `:message-type` is `error`.
    pub fn is_error(&self) -> bool {
        self.message_type.as_deref() == Some("error")
    }
}

/// Incremental decoder over a byte stream of event-stream frames.
///
/// Designed to be pooled: `reset` clears buffered partial-frame state so
/// an instance can be handed to a new request without reallocating.
pub struct EventStreamDecoder {
    buffer: BytesMut,
}

impl Default for EventStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Clear buffered state so this instance can be reused for a new stream.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feed newly received bytes and drain as many complete frames as the
    /// buffer currently contains.
    ///
    /// Bounded to `MAX_ITERATIONS_PER_FEED` inner iterations so a malformed
    /// stream that never yields a coherent frame cannot spin forever.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        for _ in 0..MAX_ITERATIONS_PER_FEED {
            match self.try_decode_one()? {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        Ok(frames)
    }

    fn try_decode_one(&mut self) -> Result<Option<Frame>> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let total_length = u32::from_be_bytes(self.buffer[0..4].try_into().unwrap()) as usize;
        let headers_length = u32::from_be_bytes(self.buffer[4..8].try_into().unwrap()) as usize;

        if total_length < MIN_FRAME_LEN {
            return Err(Error::EventStreamDecode(format!(
                "total_length {total_length} smaller than minimum frame size"
            )));
        }
        if headers_length > total_length {
            return Err(Error::EventStreamDecode(format!(
                "headers_length {headers_length} exceeds total_length {total_length}"
            )));
        }
        if self.buffer.len() < total_length {
            // Not enough bytes yet for a complete frame.
            return Ok(None);
        }

        let prelude_crc_expected =
            u32::from_be_bytes(self.buffer[8..12].try_into().unwrap());
        let prelude_crc_actual = crc32fast::hash(&self.buffer[0..PRELUDE_LEN]);
        if prelude_crc_actual != prelude_crc_expected {
            return Err(Error::EventStreamDecode(
                "prelude CRC mismatch".to_string(),
            ));
        }

        let message_crc_expected = u32::from_be_bytes(
            self.buffer[total_length - 4..total_length]
                .try_into()
                .unwrap(),
        );
        let message_crc_actual = crc32fast::hash(&self.buffer[0..total_length - 4]);
        if message_crc_actual != message_crc_expected {
            return Err(Error::EventStreamDecode(
                "message CRC mismatch".to_string(),
            ));
        }

        let headers_start = PRELUDE_LEN + 4; // after prelude_crc
        let headers_end = headers_start + headers_length;
        let payload_end = total_length - 4; // before message_crc

        let headers = parse_headers(&self.buffer[headers_start..headers_end])?;
        let payload = Bytes::copy_from_slice(&self.buffer[headers_end..payload_end]);

        let frame = Frame {
            message_type: headers.get(":message-type").cloned(),
            event_type: headers.get(":event-type").cloned(),
            content_type: headers.get(":content-type").cloned(),
            exception_type: headers.get(":exception-type").cloned(),
            payload,
        };

        self.buffer.advance(total_length);
        Ok(Some(frame))
    }
}

fn parse_headers(mut buf: &[u8]) -> Result<std::collections::HashMap<String, String>> {
    let mut headers = std::collections::HashMap::new();

    while !buf.is_empty() {
        if buf.len() < 1 {
            return Err(Error::EventStreamDecode("truncated header name length".into()));
        }
        let name_len = buf[0] as usize;
        buf = &buf[1..];

        if buf.len() < name_len + 1 {
            return Err(Error::EventStreamDecode("truncated header name/type".into()));
        }
        let name = String::from_utf8(buf[..name_len].to_vec())
            .map_err(|e| Error::EventStreamDecode(format!("non-utf8 header name: {e}")))?;
        buf = &buf[name_len..];

        let value_type = buf[0];
        buf = &buf[1..];

        let value = match value_type {
            0 => {
                // bool true, no payload bytes
                "true".to_string()
            }
            1 => "false".to_string(),
            2 => {
                // byte
                if buf.is_empty() {
                    return Err(Error::EventStreamDecode("truncated byte header".into()));
                }
                let v = buf[0] as i8;
                buf = &buf[1..];
                v.to_string()
            }
            3 => {
                // short (i16 BE)
                if buf.len() < 2 {
                    return Err(Error::EventStreamDecode("truncated short header".into()));
                }
                let v = i16::from_be_bytes(buf[..2].try_into().unwrap());
                buf = &buf[2..];
                v.to_string()
            }
            4 => {
                // int (i32 BE)
                if buf.len() < 4 {
                    return Err(Error::EventStreamDecode("truncated int header".into()));
                }
                let v = i32::from_be_bytes(buf[..4].try_into().unwrap());
                buf = &buf[4..];
                v.to_string()
            }
            5 | 8 => {
                // long (i64 BE) or timestamp (i64 BE millis)
                if buf.len() < 8 {
                    return Err(Error::EventStreamDecode("truncated long/timestamp header".into()));
                }
                let v = i64::from_be_bytes(buf[..8].try_into().unwrap());
                buf = &buf[8..];
                v.to_string()
            }
            6 => {
                // byte array: u16 len + bytes
                if buf.len() < 2 {
                    return Err(Error::EventStreamDecode("truncated bytes header length".into()));
                }
                let len = u16::from_be_bytes(buf[..2].try_into().unwrap()) as usize;
                buf = &buf[2..];
                if buf.len() < len {
                    return Err(Error::EventStreamDecode("truncated bytes header value".into()));
                }
                let v = base64_like_preview(&buf[..len]);
                buf = &buf[len..];
                v
            }
            7 => {
                // string: u16 len + utf8 bytes
                if buf.len() < 2 {
                    return Err(Error::EventStreamDecode("truncated string header length".into()));
                }
                let len = u16::from_be_bytes(buf[..2].try_into().unwrap()) as usize;
                buf = &buf[2..];
                if buf.len() < len {
                    return Err(Error::EventStreamDecode("truncated string header value".into()));
                }
                let v = String::from_utf8(buf[..len].to_vec())
                    .map_err(|e| Error::EventStreamDecode(format!("non-utf8 header value: {e}")))?;
                buf = &buf[len..];
                v
            }
            9 => {
                // uuid: 16 raw bytes
                if buf.len() < 16 {
                    return Err(Error::EventStreamDecode("truncated uuid header".into()));
                }
                let v = uuid::Uuid::from_slice(&buf[..16])
                    .map(|u| u.to_string())
                    .unwrap_or_default();
                buf = &buf[16..];
                v
            }
            other => {
                return Err(Error::EventStreamDecode(format!(
                    "unknown header value type {other}"
                )));
            }
        };

        headers.insert(name, value);
    }

    Ok(headers)
}

/// Headers of type `byte array` aren't used operationally; store a short
/// textual placeholder rather than attempting a full base64 encode.
fn base64_like_preview(bytes: &[u8]) -> String {
    format!("<{} bytes>", bytes.len())
}

/// Pool of [`EventStreamDecoder`] instances shared across concurrent
/// requests, to keep a hot path from reallocating a decoder's internal
/// buffer on every request. `get`/`put` are the only operations; a
/// checked-out instance is single-owner until it's returned.
pub struct DecoderPool {
    decoders: Mutex<Vec<EventStreamDecoder>>,
}

impl DecoderPool {
    pub fn new() -> Self {
        Self {
            decoders: Mutex::new(Vec::new()),
        }
    }

    /// Check out a decoder: reused from the pool if one is idle, freshly
    /// allocated otherwise. Always reset before handing it out.
    pub fn get(&self) -> EventStreamDecoder {
        let mut decoder = self
            .decoders
            .lock()
            .expect("decoder pool mutex poisoned")
            .pop()
            .unwrap_or_default();
        decoder.reset();
        decoder
    }

    /// Return a decoder to the pool once the request it served is done.
    pub fn put(&self, decoder: EventStreamDecoder) {
        self.decoders
            .lock()
            .expect("decoder pool mutex poisoned")
            .push(decoder);
    }
}

impl Default for DecoderPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoder checked out of a [`DecoderPool`], returned automatically when
/// dropped so a request that errors or is cancelled mid-stream still gives
/// its decoder back.
pub struct PooledDecoder {
    pool: std::sync::Arc<DecoderPool>,
    decoder: Option<EventStreamDecoder>,
}

impl DecoderPool {
    /// Check out a decoder wrapped in a guard that returns it on drop.
    pub fn checkout(pool: &std::sync::Arc<DecoderPool>) -> PooledDecoder {
        PooledDecoder {
            pool: std::sync::Arc::clone(pool),
            decoder: Some(pool.get()),
        }
    }
}

impl std::ops::Deref for PooledDecoder {
    type Target = EventStreamDecoder;
    fn deref(&self) -> &EventStreamDecoder {
        self.decoder.as_ref().expect("decoder taken before drop")
    }
}

impl std::ops::DerefMut for PooledDecoder {
    fn deref_mut(&mut self) -> &mut EventStreamDecoder {
        self.decoder.as_mut().expect("decoder taken before drop")
    }
}

impl Drop for PooledDecoder {
    fn drop(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            self.pool.put(decoder);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_header(name: &str, value: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        out.push(7); // string
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
        out
    }

    fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
        let mut header_bytes = Vec::new();
        for (name, value) in headers {
            header_bytes.extend(encode_header(name, value));
        }

        let total_length = PRELUDE_LEN + 4 + header_bytes.len() + payload.len() + 4;
        let mut frame = Vec::new();
        frame.extend_from_slice(&(total_length as u32).to_be_bytes());
        frame.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());

        let prelude_crc = crc32fast::hash(&frame[0..PRELUDE_LEN]);
        frame.extend_from_slice(&prelude_crc.to_be_bytes());
        frame.extend_from_slice(&header_bytes);
        frame.extend_from_slice(payload);

        let message_crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&message_crc.to_be_bytes());
        frame
    }

    #[test]
    fn decodes_single_frame() {
        let payload = br#"{"content":"Hello"}"#;
        let frame_bytes = encode_frame(
            &[
                (":message-type", "event"),
                (":event-type", "assistantResponseEvent"),
                (":content-type", "application/json"),
            ],
            payload,
        );

        let mut decoder = EventStreamDecoder::new();
        let frames = decoder.feed(&frame_bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_type.as_deref(), Some("event"));
        assert_eq!(frames[0].payload.as_ref(), payload);
    }

    #[test]
    fn decodes_frame_split_across_feeds() {
        let payload = br#"{"content":"world"}"#;
        let frame_bytes = encode_frame(&[(":message-type", "event")], payload);
        let (first, second) = frame_bytes.split_at(10);

        let mut decoder = EventStreamDecoder::new();
        assert!(decoder.feed(first).unwrap().is_empty());
        let frames = decoder.feed(second).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), payload);
    }

    #[test]
    fn decodes_multiple_frames_in_one_feed() {
        let f1 = encode_frame(&[(":message-type", "event")], br#"{"content":"a"}"#);
        let f2 = encode_frame(&[(":message-type", "event")], br#"{"content":"b"}"#);
        let mut combined = f1.clone();
        combined.extend(f2);

        let mut decoder = EventStreamDecoder::new();
        let frames = decoder.feed(&combined).unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn rejects_bad_message_crc() {
        let mut frame_bytes = encode_frame(&[(":message-type", "event")], br#"{"content":"x"}"#);
        let last = frame_bytes.len() - 1;
        frame_bytes[last] ^= 0xFF;

        let mut decoder = EventStreamDecoder::new();
        assert!(decoder.feed(&frame_bytes).is_err());
    }

    #[test]
    fn reset_clears_partial_buffer() {
        let frame_bytes = encode_frame(&[(":message-type", "event")], br#"{"content":"x"}"#);
        let (first, _rest) = frame_bytes.split_at(10);

        let mut decoder = EventStreamDecoder::new();
        decoder.feed(first).unwrap();
        decoder.reset();

        // Feeding a fresh, complete frame after reset should decode cleanly
        // rather than being corrupted by the discarded partial bytes.
        let frames = decoder.feed(&frame_bytes).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn pool_reuses_returned_decoder_cleared_of_partial_state() {
        let frame_bytes = encode_frame(&[(":message-type", "event")], br#"{"content":"x"}"#);
        let (first, _rest) = frame_bytes.split_at(10);

        let pool = DecoderPool::new();
        let mut decoder = pool.get();
        decoder.feed(first).unwrap();
        pool.put(decoder);

        let mut decoder = pool.get();
        let frames = decoder.feed(&frame_bytes).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn pool_allocates_fresh_decoder_when_empty() {
        let pool = DecoderPool::new();
        let decoder = pool.get();
        assert_eq!(decoder.buffer.len(), 0);
    }

    #[test]
    fn exception_and_error_classification() {
        let frame_bytes = encode_frame(&[(":message-type", "exception"), (":exception-type", "badRequestException")], br#"{"message":"bad"}"#);
        let mut decoder = EventStreamDecoder::new();
        let frames = decoder.feed(&frame_bytes).unwrap();
        assert!(frames[0].is_exception());
        assert_eq!(frames[0].exception_type.as_deref(), Some("badRequestException"));
    }
}
