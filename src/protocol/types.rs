//! RESP Reply Values
//!
//! Every reply the server sends is one of five RESP frame types:
//!
//! ```text
//! +OK\r\n                      simple string
//! -ERR unknown command\r\n     error
//! :1000\r\n                    integer
//! $5\r\nhello\r\n              bulk string ($-1\r\n is null)
//! *2\r\n$1\r\na\r\n$1\r\nb\r\n array of any of the above
//! ```
//!
//! Incoming commands use the same grammar and are handled by
//! [`parser`](super::parser), which flattens them straight into argument
//! vectors instead of building `RespValue` trees.

use crate::storage::StorageError;
use bytes::{BufMut, Bytes, BytesMut};

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Short status text. Must not contain CR or LF.
    SimpleString(String),

    /// Error text, conventionally starting with `ERR` or `WRONGTYPE`.
    Error(String),

    Integer(i64),

    /// Binary-safe payload.
    BulkString(Bytes),

    /// The null bulk string, `$-1\r\n`.
    Null,

    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Integer reply for a count or length.
    pub fn count(n: usize) -> Self {
        RespValue::Integer(i64::try_from(n).unwrap_or(i64::MAX))
    }

    /// `:1` or `:0`.
    pub fn boolean(b: bool) -> Self {
        RespValue::Integer(i64::from(b))
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    /// Bulk string, or null when absent.
    pub fn optional(data: Option<Bytes>) -> Self {
        data.map_or(RespValue::Null, RespValue::BulkString)
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Array of bulk strings.
    pub fn bulk_array(items: impl IntoIterator<Item = Bytes>) -> Self {
        RespValue::Array(items.into_iter().map(RespValue::BulkString).collect())
    }

    /// Array of bulk strings with nulls for missing entries.
    pub fn optional_array(items: impl IntoIterator<Item = Option<Bytes>>) -> Self {
        RespValue::Array(items.into_iter().map(RespValue::optional).collect())
    }

    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes into a fresh buffer.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.serialize_into(&mut buf);
        buf.freeze()
    }

    /// Appends the wire form to `buf`.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => {
                buf.put_u8(prefix::SIMPLE_STRING);
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(s) => {
                buf.put_u8(prefix::ERROR);
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(n) => {
                buf.put_u8(prefix::INTEGER);
                buf.put_slice(n.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.put_u8(prefix::BULK_STRING);
                buf.put_slice(data.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => {
                buf.put_u8(prefix::BULK_STRING);
                buf.put_slice(b"-1");
                buf.put_slice(CRLF);
            }
            RespValue::Array(values) => {
                buf.put_u8(prefix::ARRAY);
                buf.put_slice(values.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

impl From<StorageError> for RespValue {
    fn from(err: StorageError) -> Self {
        RespValue::Error(err.to_reply())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_string_serialize() {
        assert_eq!(&RespValue::ok().serialize()[..], b"+OK\r\n");
        assert_eq!(&RespValue::pong().serialize()[..], b"+PONG\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let value = RespValue::error("ERR unknown command");
        assert_eq!(&value.serialize()[..], b"-ERR unknown command\r\n");
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(&RespValue::integer(1000).serialize()[..], b":1000\r\n");
        assert_eq!(&RespValue::integer(-42).serialize()[..], b":-42\r\n");
        assert_eq!(&RespValue::boolean(true).serialize()[..], b":1\r\n");
        assert_eq!(&RespValue::count(3).serialize()[..], b":3\r\n");
    }

    #[test]
    fn test_bulk_and_null_serialize() {
        let value = RespValue::bulk_string(Bytes::from("hello"));
        assert_eq!(&value.serialize()[..], b"$5\r\nhello\r\n");
        assert_eq!(&RespValue::optional(None).serialize()[..], b"$-1\r\n");
        assert_eq!(&RespValue::bulk_string(Bytes::new()).serialize()[..], b"$0\r\n\r\n");
    }

    #[test]
    fn test_array_serialize() {
        let value = RespValue::optional_array(vec![Some(Bytes::from("GET")), None]);
        assert_eq!(&value.serialize()[..], b"*2\r\n$3\r\nGET\r\n$-1\r\n");

        let empty = RespValue::bulk_array(Vec::new());
        assert_eq!(&empty.serialize()[..], b"*0\r\n");
    }

    #[test]
    fn test_nested_array_serialize() {
        let value = RespValue::array(vec![
            RespValue::integer(1),
            RespValue::array(vec![RespValue::integer(2), RespValue::integer(3)]),
        ]);
        assert_eq!(&value.serialize()[..], b"*2\r\n:1\r\n*2\r\n:2\r\n:3\r\n");
    }

    #[test]
    fn test_storage_error_reply() {
        let reply = RespValue::from(StorageError::WrongType);
        assert!(reply.is_error());
        assert!(reply.serialize().starts_with(b"-WRONGTYPE"));
    }
}
