//! # TideKV - An In-Memory Key-Value Server
//!
//! TideKV speaks the Redis wire protocol (RESP) and keeps four kinds of
//! values in memory: strings, lists, sets and hashes. Keys may carry a
//! time-to-live, the keyspace is capped at a fixed number of keys with
//! least-recently-used eviction, and the whole keyspace can be saved to and
//! restored from a single snapshot file.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               TideKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐   ┌─────────────────────────────┐   │
//! │                     │ RESP        │   │        StorageEngine        │   │
//! │                     │ pipeline    │   │  64 shards │ TTL │ LRU      │   │
//! │                     │ decoder     │   └──────┬──────────────┬───────┘   │
//! │                     └─────────────┘          │              │           │
//! │                                       ┌──────┴──────┐ ┌─────┴───────┐   │
//! │                                       │ExpirySweeper│ │SnapshotTask │   │
//! │                                       └─────────────┘ └─────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use tidekv::storage::{StorageEngine, start_expiry_sweeper};
//! use tidekv::commands::{CommandHandler, Session};
//! use tidekv::pubsub::PubSub;
//! use tidekv::connection::{handle_connection, ConnectionStats};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let storage = Arc::new(StorageEngine::with_capacity(1_000));
//!     let _sweeper = start_expiry_sweeper(Arc::clone(&storage));
//!     let stats = Arc::new(ConnectionStats::new());
//!     let pubsub = Arc::new(PubSub::new());
//!
//!     let listener = TcpListener::bind("127.0.0.1:6379").await.unwrap();
//!     loop {
//!         let (stream, addr) = listener.accept().await.unwrap();
//!         let handler = CommandHandler::new(Arc::clone(&storage));
//!         let session = Session::new(handler, Arc::clone(&pubsub));
//!         tokio::spawn(handle_connection(stream, addr, session, Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP reply values and the pipelined request decoder
//! - [`storage`]: the keyspace engine, TTL index, LRU tracker and snapshots
//! - [`commands`]: maps argument vectors onto engine calls, plus per-client
//!   transactions and subscriptions
//! - [`pubsub`]: channel registry for PUBLISH/SUBSCRIBE
//! - [`connection`]: per-client read/execute/respond loop
//! - [`config`]: command-line options
//!
//! ## Expiry
//!
//! Keys with a TTL are reclaimed two ways:
//! 1. **Lazy**: any operation that touches an expired key removes it first
//! 2. **Active**: a background task periodically sweeps the TTL index
//!
//! ## Eviction
//!
//! Creating a key when the keyspace is full evicts the least recently used
//! keys first. Updating an existing key never evicts.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod pubsub;
pub mod storage;

pub use commands::{CommandHandler, Session};
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{parse_pipeline, ParseError, RespValue};
pub use pubsub::PubSub;
pub use storage::{start_expiry_sweeper, SnapshotTask, StorageConfig, StorageEngine};

/// The default port TideKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host TideKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of TideKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
