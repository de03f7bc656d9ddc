//! RESP Protocol
//!
//! - `parser`: stateless decoder from socket bytes to argument vectors,
//!   with pipelining and partial-frame handling
//! - `types`: `RespValue` replies and their wire encoding
//!
//! ## Example
//!
//! ```
//! use tidekv::protocol::{parse_pipeline, RespValue};
//! use bytes::Bytes;
//!
//! let data = b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let mut cursor = 0;
//! let commands = parse_pipeline(data, &mut cursor).unwrap();
//! assert_eq!(commands.len(), 2);
//! assert_eq!(cursor, data.len());
//!
//! let reply = RespValue::bulk_string(Bytes::from("tide"));
//! assert_eq!(&reply.serialize()[..], b"$4\r\ntide\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_one, parse_pipeline, Frame, ParseError, ParseResult};
pub use types::RespValue;
