//! Errors returned by keyspace operations.
//!
//! None of these are fatal. Each one is reported to the caller, who turns it
//! into a protocol-level error reply, and no state has been changed when one
//! is returned.

use thiserror::Error;

/// A failed keyspace operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The caller passed the wrong number or shape of arguments.
    #[error("wrong number of arguments for '{0}'")]
    WrongArity(&'static str),

    /// The key holds a value of a different kind than the operation expects.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// The stored string is not a base-10 signed 64-bit integer.
    #[error("value is not an integer or out of range")]
    NotAnInteger,

    /// An increment or decrement would leave the i64 range.
    #[error("increment or decrement would overflow")]
    Overflow,

    /// A list index points outside the list.
    #[error("index out of range")]
    IndexOutOfRange,

    /// The operation needs an existing key.
    #[error("no such key")]
    NoSuchKey,
}

impl StorageError {
    /// Renders the error the way it is sent back over the wire.
    ///
    /// WRONGTYPE carries its own prefix; everything else is an `ERR`.
    pub fn to_reply(&self) -> String {
        match self {
            StorageError::WrongType => self.to_string(),
            StorageError::WrongArity(cmd) => {
                format!("ERR wrong number of arguments for '{}' command", cmd)
            }
            other => format!("ERR {}", other),
        }
    }
}

/// Result type for keyspace operations.
pub type StorageResult<T> = Result<T, StorageError>;
