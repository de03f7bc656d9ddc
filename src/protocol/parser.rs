//! Wire Protocol Decoder
//!
//! Turns raw socket bytes into command argument vectors. The decoder keeps no
//! state between calls: the caller owns the buffer and a cursor into it.
//!
//! ## How the Decoder Works
//!
//! [`parse_one`] looks at a single frame starting at `cursor` and returns:
//! - `Ok(Frame::Complete { args, next })` - a whole frame, ending just before `next`
//! - `Ok(Frame::Incomplete)` - the buffer ends mid-frame; wait for more bytes
//! - `Err(ParseError)` - the bytes are not valid RESP; close the connection
//!
//! [`parse_pipeline`] repeats that until the buffer runs out or a frame is cut
//! short, advancing the cursor past every complete frame:
//!
//! ```text
//!   *1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n*2\r\n$3\r\nGET\r\n$
//!   ├──────────────────┤├─────────────────────────────┤├─────────────────┤
//!        frame 1                    frame 2               incomplete
//!                                                    ▲
//!                                              cursor after
//! ```
//!
//! The caller keeps the bytes after the cursor and appends the next read.
//!
//! ## Flattening
//!
//! Each frame becomes one flat argument vector:
//! - `+line` gives `[line]`
//! - `-line` gives its whitespace-separated words
//! - `:digits` gives `[digits]`, verbatim
//! - `$n` gives `[payload]`, and the null bulk string `$-1` gives `[]`
//! - `*n` gives the concatenation of one token per element: the first token
//!   of that element's own vector, or nothing if it is empty. `*-1` gives `[]`

use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Malformed input. Fatal to the connection it came from.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The frame starts with a byte that is not a RESP type prefix
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// A length or count line is not a base-10 integer
    #[error("invalid length: {0:?}")]
    InvalidLength(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// The bulk payload is not followed by CRLF where its length says it ends
    #[error("bulk string length does not match its payload")]
    LengthMismatch,

    #[error("bulk string too large: {size} bytes (max: {max})")]
    BulkTooLarge { size: usize, max: usize },

    #[error("maximum nesting depth exceeded: {0}")]
    TooDeep(usize),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Largest bulk string the decoder accepts (32 MiB).
pub const MAX_BULK_SIZE: usize = 32 * 1024 * 1024;

/// Maximum array nesting depth (prevent stack overflow)
pub const MAX_NESTING_DEPTH: usize = 32;

/// Outcome of decoding one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A whole frame; `next` is the offset just past it.
    Complete { args: Vec<Bytes>, next: usize },
    /// The buffer ends before the frame does.
    Incomplete,
}

/// Decodes the frame that starts at `cursor`.
///
/// # Example
///
/// ```
/// use tidekv::protocol::{parse_one, Frame};
/// use bytes::Bytes;
///
/// let buf = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
/// let frame = parse_one(buf, 0).unwrap();
/// assert_eq!(
///     frame,
///     Frame::Complete {
///         args: vec![Bytes::from("GET"), Bytes::from("name")],
///         next: buf.len(),
///     }
/// );
///
/// assert_eq!(parse_one(&buf[..10], 0).unwrap(), Frame::Incomplete);
/// ```
pub fn parse_one(buf: &[u8], cursor: usize) -> ParseResult<Frame> {
    Ok(match parse_frame(buf, cursor, 0)? {
        Some((args, next)) => Frame::Complete { args, next },
        None => Frame::Incomplete,
    })
}

/// Decodes every complete frame from `cursor` onward.
///
/// On return `cursor` points at the first byte not yet consumed: the end of
/// the buffer, or the start of an incomplete trailing frame. On error the
/// cursor is left at the start of the bad frame.
pub fn parse_pipeline(buf: &[u8], cursor: &mut usize) -> ParseResult<Vec<Vec<Bytes>>> {
    let mut commands = Vec::new();

    while *cursor < buf.len() {
        match parse_one(buf, *cursor)? {
            Frame::Complete { args, next } => {
                commands.push(args);
                *cursor = next;
            }
            Frame::Incomplete => break,
        }
    }

    Ok(commands)
}

/// Internal recursive decoder. `None` means incomplete.
fn parse_frame(buf: &[u8], pos: usize, depth: usize) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ParseError::TooDeep(MAX_NESTING_DEPTH));
    }
    let Some(&type_byte) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, after_line)) = read_line(buf, pos + 1) else {
        return Ok(None);
    };

    match type_byte {
        prefix::SIMPLE_STRING | prefix::INTEGER => {
            Ok(Some((vec![Bytes::copy_from_slice(line)], after_line)))
        }
        prefix::ERROR => {
            let words = line
                .split(|b| b.is_ascii_whitespace())
                .filter(|word| !word.is_empty())
                .map(Bytes::copy_from_slice)
                .collect();
            Ok(Some((words, after_line)))
        }
        prefix::BULK_STRING => parse_bulk(buf, line, after_line),
        prefix::ARRAY => parse_array(buf, line, after_line, depth),
        other => Err(ParseError::UnknownPrefix(other)),
    }
}

/// `$<length>\r\n<data>\r\n`
fn parse_bulk(
    buf: &[u8],
    length_line: &[u8],
    data_start: usize,
) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    let length = parse_length(length_line)?;
    if length == -1 {
        return Ok(Some((Vec::new(), data_start)));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::BulkTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let data_end = data_start + length;
    let total_needed = data_end + CRLF.len();
    if buf.len() < total_needed {
        return Ok(None);
    }
    if &buf[data_end..total_needed] != CRLF {
        return Err(ParseError::LengthMismatch);
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_end]);
    Ok(Some((vec![data], total_needed)))
}

/// `*<count>\r\n<elements...>`
fn parse_array(
    buf: &[u8],
    count_line: &[u8],
    mut pos: usize,
    depth: usize,
) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    let count = parse_length(count_line)?;
    if count == -1 {
        return Ok(Some((Vec::new(), pos)));
    }
    if count < 0 {
        return Err(ParseError::InvalidArrayLength(count));
    }

    // Every element takes at least 3 bytes, so a huge count on a short
    // buffer is simply incomplete and never drives a huge allocation.
    let mut args = Vec::with_capacity((count as usize).min(buf.len() / 3 + 1));
    for _ in 0..count {
        match parse_frame(buf, pos, depth + 1)? {
            Some((element, next)) => {
                if let Some(first) = element.into_iter().next() {
                    args.push(first);
                }
                pos = next;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((args, pos)))
}

/// Returns the line starting at `pos` (without CRLF) and the offset after it.
fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(pos..)?;
    let end = find_crlf(rest)?;
    Some((&rest[..end], pos + end + CRLF.len()))
}

fn parse_length(line: &[u8]) -> ParseResult<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::InvalidLength(String::from_utf8_lossy(line).into_owned()))
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}
