//! Storage Module
//!
//! The in-memory keyspace and everything that keeps it bounded and durable.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────┐
//!   commands ───> │          StorageEngine           │
//!                 │  64 × RwLock<HashMap<Key,Value>> │
//!                 └──┬──────────┬──────────┬─────────┘
//!                    │          │          │
//!              ┌─────▼────┐ ┌───▼─────┐ ┌──▼────────┐
//!              │ TtlIndex │ │   LRU   │ │ Snapshot  │
//!              │ deadlines│ │ recency │ │ TKV1 file │
//!              └─────▲────┘ └─────────┘ └──▲────────┘
//!                    │                     │
//!            ┌───────┴───────┐     ┌───────┴───────┐
//!            │ ExpirySweeper │     │ SnapshotTask  │
//!            │  (tokio task) │     │  (tokio task) │
//!            └───────────────┘     └───────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use tidekv::storage::{Kind, StorageEngine};
//! use bytes::Bytes;
//!
//! let engine = StorageEngine::with_capacity(2);
//!
//! engine.set(Bytes::from("a"), Bytes::from("1"));
//! engine.rpush(&Bytes::from("b"), &[Bytes::from("x")]).unwrap();
//! assert_eq!(engine.key_type(&Bytes::from("b")), Some(Kind::List));
//!
//! // A third key evicts the least recently used one.
//! engine.sadd(&Bytes::from("c"), &[Bytes::from("m")]).unwrap();
//! assert_eq!(engine.len(), 2);
//! assert_eq!(engine.key_type(&Bytes::from("a")), None);
//! ```

pub mod engine;
pub mod error;
pub mod expiry;
pub mod lru;
pub mod snapshot;
pub mod ttl;
pub mod value;

pub use engine::{StorageConfig, StorageEngine, StorageStats, Ttl, DEFAULT_MAX_KEYS};
pub use error::{StorageError, StorageResult};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
pub use lru::LruTracker;
pub use snapshot::{Snapshot, SnapshotError, SnapshotTask};
pub use ttl::{TtlIndex, MAX_TTL};
pub use value::{Kind, Value};
