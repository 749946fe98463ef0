//! Chunked body decoder.
//!
//! Bytes are decoded to text incrementally, so a multi-byte character split
//! across two chunks is held back until the rest of it arrives. Text is
//! accumulated into a line buffer and only complete lines are interpreted;
//! the trailing partial line waits for the next chunk.

use encoding_rs::{CoderResult, UTF_8};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::DATA_PREFIX;
use crate::event::StreamEvent;

/// Recognised data record shapes. `error` takes precedence over `text`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Record {
    Error { error: String },
    Text { text: String },
}

/// Turns the byte chunks of one response body into [`StreamEvent`]s.
///
/// A decoder belongs to exactly one response. Create a new one per request.
pub struct StreamDecoder {
    utf8: encoding_rs::Decoder,
    buffer: String,
    halted: bool,
    closed: bool,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    /// Create a decoder with empty buffers.
    pub fn new() -> Self {
        Self {
            utf8: UTF_8.new_decoder_with_bom_removal(),
            buffer: String::new(),
            halted: false,
            closed: false,
        }
    }

    /// Whether an error record has been seen.
    ///
    /// Once halted the decoder ignores all further input.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Feed the next chunk of the body, in arrival order.
    ///
    /// Returns the events for every line completed by this chunk. If one of
    /// them is [`StreamEvent::Error`] it is the last event returned and the
    /// decoder halts.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.halted || self.closed {
            return Vec::new();
        }

        let text = self.decode_chunk(chunk);
        self.buffer.push_str(&text);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let complete: String = self.buffer.drain(..=last_newline).collect();

        let mut events = Vec::new();
        for line in complete.split('\n') {
            let Some(event) = decode_line(line) else {
                continue;
            };
            if let StreamEvent::DecodeError { line, reason } = &event {
                tracing::debug!(line = %line, reason = %reason, "Undecodable data record");
            }
            let halts = matches!(event, StreamEvent::Error { .. });
            events.push(event);
            if halts {
                self.halted = true;
                self.buffer.clear();
                break;
            }
        }
        events
    }

    /// Signal end of stream.
    ///
    /// A partial line left in the buffer is dropped unparsed and
    /// [`StreamEvent::Done`] is returned. Nothing is returned if the decoder
    /// already halted on an error or was closed before.
    pub fn close(&mut self) -> Vec<StreamEvent> {
        if self.closed || self.halted {
            self.closed = true;
            return Vec::new();
        }
        self.closed = true;

        if !self.buffer.is_empty() {
            tracing::debug!(
                discarded_len = self.buffer.len(),
                "Discarding incomplete trailing line"
            );
            self.buffer.clear();
        }
        vec![StreamEvent::Done]
    }

    fn decode_chunk(&mut self, mut src: &[u8]) -> String {
        let mut text = String::new();
        loop {
            let needed = self
                .utf8
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len().saturating_mul(3).saturating_add(4));
            text.reserve(needed);

            let (result, read, _replaced) = self.utf8.decode_to_string(src, &mut text, false);
            src = &src[read..];
            match result {
                CoderResult::InputEmpty => return text,
                CoderResult::OutputFull => continue,
            }
        }
    }
}

/// Interpret one complete line. `None` for lines that carry no record.
fn decode_line(line: &str) -> Option<StreamEvent> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return None;
    }
    let payload = line.strip_prefix(DATA_PREFIX)?;

    let object = match serde_json::from_str::<Map<String, Value>>(payload) {
        Ok(object) => object,
        Err(e) => {
            return Some(StreamEvent::DecodeError {
                line: line.to_string(),
                reason: e.to_string(),
            });
        }
    };

    Some(match Record::deserialize(Value::Object(object)) {
        Ok(Record::Error { error }) => StreamEvent::Error { message: error },
        Ok(Record::Text { text }) => StreamEvent::Text { text },
        Err(_) => StreamEvent::DecodeError {
            line: line.to_string(),
            reason: "record has neither a string `text` nor a string `error` field".to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed_all(decoder: &mut StreamDecoder, chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.feed(chunk));
        }
        events.extend(decoder.close());
        events
    }

    #[test]
    fn test_record_split_across_chunks() {
        let mut decoder = StreamDecoder::new();
        let events = feed_all(
            &mut decoder,
            &[
                b"data: {\"te",
                b"xt\":\"Hel\"}\n",
                b"data: {\"text\":\"lo\"}\n",
            ],
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::text("Hel"),
                StreamEvent::text("lo"),
                StreamEvent::Done
            ]
        );
    }

    #[test]
    fn test_partial_line_is_not_yielded_early() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.feed(b"data: {\"text\":\"a\"}").is_empty());
        assert_eq!(decoder.feed(b"\n"), vec![StreamEvent::text("a")]);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let bytes = "data: {\"text\":\"héllo ⚠️\"}\n".as_bytes();
        // Split inside the two-byte 'é'.
        let split = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = StreamDecoder::new();
        let events = feed_all(&mut decoder, &[&bytes[..split], &bytes[split..]]);
        assert_eq!(
            events,
            vec![StreamEvent::text("héllo ⚠️"), StreamEvent::Done]
        );
    }

    #[test]
    fn test_blank_and_unprefixed_lines_are_ignored() {
        let mut decoder = StreamDecoder::new();
        let events = feed_all(
            &mut decoder,
            &[b"\n   \n: keep-alive\nevent: message\ndata: {\"text\":\"x\"}\n\n"],
        );
        assert_eq!(events, vec![StreamEvent::text("x"), StreamEvent::Done]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut decoder = StreamDecoder::new();
        let events = feed_all(&mut decoder, &[b"data: {\"text\":\"x\"}\r\n\r\n"]);
        assert_eq!(events, vec![StreamEvent::text("x"), StreamEvent::Done]);
    }

    #[test]
    fn test_malformed_json_is_non_fatal() {
        let mut decoder = StreamDecoder::new();
        let events = feed_all(
            &mut decoder,
            &[b"data: {not json\ndata: {\"text\":\"ok\"}\n"],
        );
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            StreamEvent::DecodeError { line, .. } if line == "data: {not json"
        ));
        assert_eq!(events[1], StreamEvent::text("ok"));
        assert_eq!(events[2], StreamEvent::Done);
    }

    #[test]
    fn test_unrecognised_shapes_are_decode_errors() {
        let mut decoder = StreamDecoder::new();
        let events = feed_all(
            &mut decoder,
            &[b"data: {\"foo\":1}\ndata: [\"boom\"]\ndata: {\"text\":5}\n"],
        );
        assert_eq!(events.len(), 4);
        assert!(
            events[..3]
                .iter()
                .all(|e| matches!(e, StreamEvent::DecodeError { .. }))
        );
        assert!(!decoder.is_halted());
    }

    #[test]
    fn test_error_record_halts_decoding() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(
            b"data: {\"text\":\"a\"}\ndata: {\"error\":\"LLM Server Error: 500\"}\ndata: {\"text\":\"b\"}\n",
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::text("a"),
                StreamEvent::error("LLM Server Error: 500")
            ]
        );
        assert!(decoder.is_halted());
        assert!(decoder.feed(b"data: {\"text\":\"c\"}\n").is_empty());
        assert!(decoder.close().is_empty());
    }

    #[test]
    fn test_error_wins_over_text() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(b"data: {\"text\":\"a\",\"error\":\"bad\"}\n");
        assert_eq!(events, vec![StreamEvent::error("bad")]);
    }

    #[test]
    fn test_null_error_falls_back_to_text() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(b"data: {\"error\":null,\"text\":\"a\"}\n");
        assert_eq!(events, vec![StreamEvent::text("a")]);
    }

    #[test]
    fn test_close_discards_partial_line() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.feed(b"data: {\"text\":\"never\"}").is_empty());
        assert_eq!(decoder.close(), vec![StreamEvent::Done]);
        assert!(decoder.close().is_empty());
        assert!(decoder.feed(b"\n").is_empty());
    }

    #[test]
    fn test_leading_bom_is_stripped() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(b"\xEF\xBB\xBFdata: {\"text\":\"x\"}\n");
        assert_eq!(events, vec![StreamEvent::text("x")]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.feed(b"data: {\"text\":\"a\xFFb\"}\n");
        assert_eq!(events, vec![StreamEvent::text("a\u{FFFD}b")]);
    }
}
