//! Line Protocol
//!
//! Wire framing and the messages exchanged with connection actors.
//!
//! ## Modules
//!
//! - `framing`: `$`-delimited line extraction and frame encoding
//! - `types`: `ConnectionMessage`, `LineArrived` and `ConnectionId`
//!
//! ## Example
//!
//! ```
//! use dollarline::protocol::{encode_line, extract_line};
//!
//! let frame = encode_line("hello");
//! assert_eq!(&frame[..], b"hello$");
//!
//! let out = extract_line(String::new(), &frame);
//! assert_eq!(out.line.as_deref(), Some("hello"));
//! ```

pub mod framing;
pub mod types;

pub use framing::{decode_chunk, encode_line, extract_line, Extracted, DELIMITER, DELIMITER_BYTE};
pub use types::{ConnectionId, ConnectionMessage, LineArrived};
