//! Connection Module
//!
//! One tokio task per client. The accept loop in `main.rs` hands each socket
//! to [`handle_connection`], which reads, decodes with the pipelined decoder,
//! executes through the client's [`Session`](crate::commands::Session),
//! and writes the replies back in order. Messages published to channels the
//! client subscribed to are written between batches.
//!
//! ```text
//!   TcpListener::accept()
//!          │ spawn
//!          ▼
//!   ConnectionHandler ── read ──> parse_pipeline ──> execute ──> write + flush
//!          ▲                                                          │
//!          └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use tidekv::connection::{handle_connection, ConnectionStats};
//! use tidekv::commands::{CommandHandler, Session};
//! use tidekv::pubsub::PubSub;
//! use tidekv::storage::StorageEngine;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(StorageEngine::new());
//! let stats = Arc::new(ConnectionStats::new());
//! let pubsub = Arc::new(PubSub::new());
//! let session = Session::new(CommandHandler::new(storage), pubsub);
//!
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, session, stats));
//! ```

pub mod handler;

pub use handler::{
    handle_connection, ConnectionCounters, ConnectionError, ConnectionHandler, ConnectionStats,
    MAX_BUFFER_SIZE,
};
