//! Command Dispatch
//!
//! Sits between the connection loop and the storage engine. The connection
//! hands over one decoded argument vector at a time; the [`CommandHandler`]
//! validates arity and integer arguments, calls the engine, and shapes the
//! result into a reply.
//!
//! ```text
//!   Vec<Bytes> ──> CommandHandler ──> StorageEngine
//!                        │
//!                        ▼
//!                    RespValue
//! ```
//!
//! A [`Session`] sits in front of the handler for each connection and adds
//! what needs per-client state: MULTI/EXEC transactions, channel
//! subscriptions, and running SAVE off the async workers.
//!
//! Engine failures arrive as [`StorageError`](crate::storage::StorageError)
//! and are rendered through `From<StorageError> for RespValue`, so every
//! command body can use `?`.

pub mod handler;
pub mod session;

pub use handler::{is_known_command, is_quit, CommandHandler};
pub use session::Session;
