//! Stream decoding for topolab chat responses.
//!
//! The backend answers a chat request with a long-lived body made of
//! newline-terminated records. Data records look like
//! `data: {"text": "..."}` or `data: {"error": "..."}`; everything else is
//! ignored. [`StreamDecoder`] turns the raw byte chunks of such a body into
//! an ordered sequence of [`StreamEvent`]s, independent of where the
//! transport happened to split the bytes.
//!
//! # Example
//!
//! ```rust
//! use topolab_stream::{StreamDecoder, StreamEvent};
//!
//! let mut decoder = StreamDecoder::new();
//! let mut events = decoder.feed(b"data: {\"te");
//! events.extend(decoder.feed(b"xt\":\"Hel\"}\n"));
//! events.extend(decoder.close());
//!
//! assert_eq!(
//!     events,
//!     vec![StreamEvent::text("Hel"), StreamEvent::Done],
//! );
//! ```

mod decoder;
mod event;

pub use decoder::StreamDecoder;
pub use event::StreamEvent;

/// Prefix that marks a line as a data record.
pub const DATA_PREFIX: &str = "data: ";
