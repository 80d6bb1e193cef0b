//! Line Framing
//!
//! A line on the wire is any run of bytes terminated by a single `$`
//! (0x24). There is no escaping, so a `$` inside application text ends the
//! line early.
//!
//! ## Inbound
//!
//! Each chunk read from the socket is decoded (lossy UTF-8) and appended to
//! the accumulator. Only the first delimiter of the combined text is acted
//! on:
//!
//! ```text
//!   accumulator "WOR" + chunk "LD$X$Y"
//!        │
//!        ▼
//!   "WORLD$X$Y" ── first '$' at 5 ──> line "WORLD"
//!        │
//!        └── "X$Y" ── '$' -> ' ', trim ──> accumulator "X Y"
//! ```
//!
//! Any further complete lines in the same chunk lose their delimiters and
//! stay folded into the accumulator. They only surface when a later chunk
//! brings another delimiter.
//!
//! ## Outbound
//!
//! [`encode_line`] appends the delimiter to the payload. The payload is not
//! inspected.

use bytes::{BufMut, Bytes, BytesMut};
use std::borrow::Cow;

/// The line terminator.
pub const DELIMITER: char = '$';

/// The line terminator as it appears on the wire.
pub const DELIMITER_BYTE: u8 = b'$';

/// Result of feeding one chunk into the accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// The first complete line, if the combined text held a delimiter
    pub line: Option<String>,
    /// What the accumulator holds afterwards
    pub remainder: String,
}

/// Decodes a chunk of raw bytes to text.
///
/// Invalid sequences, including multi-byte characters split across two
/// chunks, become U+FFFD.
pub fn decode_chunk(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

/// Appends `chunk` to `accumulator` and extracts at most one line.
///
/// # Example
///
/// ```
/// use dollarline::protocol::framing::extract_line;
///
/// let first = extract_line(String::new(), b"HELLO$WOR");
/// assert_eq!(first.line.as_deref(), Some("HELLO"));
/// assert_eq!(first.remainder, "WOR");
///
/// let second = extract_line(first.remainder, b"LD$");
/// assert_eq!(second.line.as_deref(), Some("WORLD"));
/// assert_eq!(second.remainder, "");
/// ```
pub fn extract_line(mut accumulator: String, chunk: &[u8]) -> Extracted {
    accumulator.push_str(&decode_chunk(chunk));

    match accumulator.find(DELIMITER) {
        Some(pos) => {
            let remainder = accumulator[pos + DELIMITER.len_utf8()..]
                .replace(DELIMITER, " ")
                .trim()
                .to_string();
            accumulator.truncate(pos);
            Extracted {
                line: Some(accumulator),
                remainder,
            }
        }
        None => Extracted {
            line: None,
            remainder: accumulator,
        },
    }
}

/// Frames `payload` for the wire: the payload bytes followed by one `$`.
pub fn encode_line(payload: &str) -> Bytes {
    let mut frame = BytesMut::with_capacity(payload.len() + 1);
    frame.put_slice(payload.as_bytes());
    frame.put_u8(DELIMITER_BYTE);
    frame.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        let out = extract_line(String::new(), b"hello$");
        assert_eq!(out.line.as_deref(), Some("hello"));
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn test_no_delimiter_keeps_everything() {
        let out = extract_line(String::new(), b"partial");
        assert_eq!(out.line, None);
        assert_eq!(out.remainder, "partial");

        let out = extract_line(out.remainder, b" more");
        assert_eq!(out.line, None);
        assert_eq!(out.remainder, "partial more");
    }

    #[test]
    fn test_line_split_across_chunks() {
        let out = extract_line(String::new(), b"HELLO$WOR");
        assert_eq!(out.line.as_deref(), Some("HELLO"));
        assert_eq!(out.remainder, "WOR");

        let out = extract_line(out.remainder, b"LD$");
        assert_eq!(out.line.as_deref(), Some("WORLD"));
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn test_only_first_delimiter_is_processed() {
        let out = extract_line(String::new(), b"A$B$");
        assert_eq!(out.line.as_deref(), Some("A"));
        // "B$" folded: the trailing delimiter became a space and was trimmed
        assert_eq!(out.remainder, "B");

        // B resurfaces only with the next delimiter
        let out = extract_line(out.remainder, b"$");
        assert_eq!(out.line.as_deref(), Some("B"));
        assert_eq!(out.remainder, "");
    }

    #[test]
    fn test_remainder_delimiters_become_spaces() {
        let out = extract_line(String::new(), b"x$ a$b$c ");
        assert_eq!(out.line.as_deref(), Some("x"));
        assert_eq!(out.remainder, "a b c");
    }

    #[test]
    fn test_empty_line() {
        let out = extract_line(String::new(), b"$rest");
        assert_eq!(out.line.as_deref(), Some(""));
        assert_eq!(out.remainder, "rest");
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let out = extract_line("pending".to_string(), b"");
        assert_eq!(out.line, None);
        assert_eq!(out.remainder, "pending");
    }

    #[test]
    fn test_line_keeps_inner_whitespace() {
        let out = extract_line(String::new(), b"  spaced out  $");
        assert_eq!(out.line.as_deref(), Some("  spaced out  "));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let out = extract_line(String::new(), &[b'o', 0xff, b'k', b'$']);
        assert_eq!(out.line.as_deref(), Some("o\u{fffd}k"));
    }

    #[test]
    fn test_multibyte_within_chunk() {
        let out = extract_line(String::new(), "héllo$".as_bytes());
        assert_eq!(out.line.as_deref(), Some("héllo"));
    }

    #[test]
    fn test_encode_line() {
        assert_eq!(&encode_line("hi there")[..], b"hi there$");
        assert_eq!(&encode_line("")[..], b"$");
    }

    #[test]
    fn test_encoded_line_extracts_back() {
        let frame = encode_line("chat message");
        let out = extract_line(String::new(), &frame);
        assert_eq!(out.line.as_deref(), Some("chat message"));
        assert_eq!(out.remainder, "");
    }
}
