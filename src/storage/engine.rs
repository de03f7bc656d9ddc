//! Keyspace Engine
//!
//! The engine owns the keyspace and the three structures that have to stay
//! consistent with it: the TTL index, the recency tracker and the size
//! counter. Every public operation goes through the same ritual:
//!
//! 1. **Expire-check**: a key whose deadline has passed is removed from all
//!    structures and treated as absent for the rest of the call.
//! 2. **Touch**: a key that is present (or about to be inserted) becomes the
//!    most recently used.
//! 3. **Capacity gate**: before a *new* key is inserted, least recently used
//!    keys are evicted until the size is below `max_keys`. The key being
//!    inserted is never the victim, because it is not tracked yet.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        StorageEngine                         │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐       ┌─────────┐       │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │  ...  │ Shard N │       │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │       │ RwLock  │       │
//! │  │ HashMap │ │ HashMap │ │ HashMap │       │ HashMap │       │
//! │  └─────────┘ └─────────┘ └─────────┘       └─────────┘       │
//! │                                                              │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │   TtlIndex   │   │  LruTracker  │   │ key_count (atom) │  │
//! │  │    Mutex     │   │    Mutex     │   │                  │  │
//! │  └──────────────┘   └──────────────┘   └──────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lock order is always shard first, then the TTL index or the recency
//! tracker. Those two are never held at the same time, and no shard lock is
//! held while evicting (eviction takes the *victim's* shard lock).
//!
//! Because the structures are locked separately, a concurrent reader can
//! briefly see a key in one structure and not yet in another. The window
//! never outlives a single call, and the size counter may overshoot
//! `max_keys` by at most the number of racing inserts.

use super::error::{StorageError, StorageResult};
use super::lru::LruTracker;
use super::snapshot::Snapshot;
use super::ttl::TtlIndex;
use super::value::{Kind, Value};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Number of shards for the keyspace.
/// More shards = less lock contention, but more memory overhead.
const NUM_SHARDS: usize = 64;

/// Default upper bound on the number of live keys.
pub const DEFAULT_MAX_KEYS: usize = 10_000;

type Shard = RwLock<HashMap<Bytes, Value>>;

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Upper bound on live keys before LRU eviction kicks in. Clamped to at least 1.
    pub max_keys: usize,
    /// Snapshot file. `None` disables persistence.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_keys: DEFAULT_MAX_KEYS,
            snapshot_path: None,
        }
    }
}

/// Result of a TTL query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key does not exist.
    Missing,
    /// The key exists and never expires.
    NoExpiry,
    /// Whole seconds left before the key expires.
    Remaining(i64),
}

impl Ttl {
    /// The integer reported by the TTL command.
    pub fn as_reply(&self) -> i64 {
        match self {
            Ttl::Missing => -2,
            Ttl::NoExpiry => -1,
            Ttl::Remaining(secs) => *secs,
        }
    }
}

/// Counters exposed through INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: usize,
    pub keys_with_ttl: usize,
    pub max_keys: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evicted: u64,
}

/// The shared keyspace.
///
/// Wrap it in an `Arc` and hand a clone to every connection task. All
/// operations take `&self`.
///
/// # Example
///
/// ```
/// use tidekv::storage::{StorageEngine, Ttl};
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), Bytes::from("tide"));
/// assert_eq!(engine.get(&Bytes::from("name")).unwrap(), Some(Bytes::from("tide")));
///
/// engine.expire(&Bytes::from("name"), 60);
/// assert!(matches!(engine.ttl(&Bytes::from("name")), Ttl::Remaining(_)));
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,
    ttl: TtlIndex,
    lru: LruTracker,
    key_count: AtomicUsize,
    max_keys: usize,
    snapshot: Option<Snapshot>,

    hits: AtomicU64,
    misses: AtomicU64,
    expired_count: AtomicU64,
    evicted_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("keys", &self.key_count.load(Ordering::Relaxed))
            .field("max_keys", &self.max_keys)
            .field("snapshot", &self.snapshot.as_ref().map(Snapshot::path))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an engine with the default capacity and no persistence.
    pub fn new() -> Self {
        Self::with_config(StorageConfig::default())
    }

    /// Creates an in-memory engine bounded to `max_keys`.
    pub fn with_capacity(max_keys: usize) -> Self {
        Self::with_config(StorageConfig {
            max_keys,
            snapshot_path: None,
        })
    }

    pub fn with_config(config: StorageConfig) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect();

        Self {
            shards,
            ttl: TtlIndex::new(),
            lru: LruTracker::new(),
            key_count: AtomicUsize::new(0),
            max_keys: config.max_keys.max(1),
            snapshot: config.snapshot_path.map(Snapshot::new),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
            evicted_count: AtomicU64::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    // ========================================================================
    // ACCESS RITUAL
    // ========================================================================

    /// Step 1: drops the key everywhere if its deadline has passed.
    fn reclaim_if_expired(&self, key: &[u8]) -> bool {
        if !self.ttl.is_expired(key) {
            return false;
        }

        let mut data = self.shard(key).write();
        // Re-check under the shard lock: a SET may have cleared the TTL.
        if !self.ttl.remove_if_expired(key) {
            return false;
        }
        if data.remove(key).is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
        }
        self.lru.erase(key);
        self.expired_count.fetch_add(1, Ordering::Relaxed);

        trace!(key = ?Bytes::copy_from_slice(key), "Reclaimed expired key");
        true
    }

    /// Step 3: evicts least recently used keys until there is room for one more.
    ///
    /// Must be called without holding any shard lock.
    fn make_room(&self) {
        while self.key_count.load(Ordering::Relaxed) >= self.max_keys {
            let Some(victim) = self.lru.evict() else {
                break;
            };

            let mut data = self.shard(&victim).write();
            if data.remove(&victim).is_some() {
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.evicted_count.fetch_add(1, Ordering::Relaxed);
            }
            self.ttl.erase(&victim);
            // A racing access may have re-touched the victim after evict().
            self.lru.erase(&victim);

            debug!(key = ?victim, max_keys = self.max_keys, "Evicted least recently used key");
        }
    }

    /// Removes a key from every structure. The caller holds the key's shard lock.
    fn unlink_locked(&self, data: &mut HashMap<Bytes, Value>, key: &[u8]) -> Option<Value> {
        let removed = data.remove(key);
        if removed.is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
        }
        self.ttl.erase(key);
        self.lru.erase(key);
        removed
    }

    fn exists_unlocked(&self, key: &[u8]) -> bool {
        self.shard(key).read().contains_key(key)
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read-only ritual: reclaim, then run `f` on the value under a read lock.
    fn read<T>(&self, key: &Bytes, f: impl FnOnce(Option<&Value>) -> T) -> T {
        self.reclaim_if_expired(key);

        let data = self.shard(key).read();
        let value = data.get(key);
        self.record_lookup(value.is_some());
        if value.is_some() {
            self.lru.touch(key);
        }
        f(value)
    }

    /// Typed read. `Ok(None)` for a missing key, `WrongType` for a key of another kind.
    fn view<P: ?Sized, T>(
        &self,
        key: &Bytes,
        project: fn(&Value) -> Option<&P>,
        f: impl FnOnce(&P) -> T,
    ) -> StorageResult<Option<T>> {
        self.read(key, |value| match value {
            None => Ok(None),
            Some(value) => project(value).map(f).map(Some).ok_or(StorageError::WrongType),
        })
    }

    /// Typed mutation of an existing key. A container left empty is removed.
    fn modify<P: ?Sized, T>(
        &self,
        key: &Bytes,
        project: fn(&mut Value) -> Option<&mut P>,
        f: impl FnOnce(&mut P) -> StorageResult<T>,
    ) -> StorageResult<Option<T>> {
        self.reclaim_if_expired(key);

        let mut data = self.shard(key).write();
        let Some(value) = data.get_mut(key) else {
            return Ok(None);
        };
        self.lru.touch(key);

        let payload = project(value).ok_or(StorageError::WrongType)?;
        let result = f(payload);
        if value.is_drained() {
            self.unlink_locked(&mut data, key);
        }
        result.map(Some)
    }

    /// Typed mutation that creates the key with `create()` when it is missing.
    fn upsert<P: ?Sized, T>(
        &self,
        key: &Bytes,
        create: fn() -> Value,
        project: fn(&mut Value) -> Option<&mut P>,
        f: impl FnOnce(&mut P) -> StorageResult<T>,
    ) -> StorageResult<T> {
        self.reclaim_if_expired(key);
        if !self.exists_unlocked(key) {
            self.make_room();
        }

        let mut data = self.shard(key).write();
        let created = !data.contains_key(key);
        let value = data.entry(key.clone()).or_insert_with(create);
        if created {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
        self.lru.touch(key);

        let result = match project(value) {
            Some(payload) => f(payload),
            None => Err(StorageError::WrongType),
        };
        if value.is_drained() || (created && result.is_err()) {
            self.unlink_locked(&mut data, key);
        }
        result
    }

    /// Inserts or replaces a whole value without touching the TTL index.
    fn store(&self, key: Bytes, value: Value) -> bool {
        if !self.exists_unlocked(&key) {
            self.make_room();
        }

        let mut data = self.shard(&key).write();
        let is_new = data.insert(key.clone(), value).is_none();
        if is_new {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
        self.lru.touch(&key);
        is_new
    }

    // ========================================================================
    // KEY OPERATIONS
    // ========================================================================

    /// Number of live keys (approximate under concurrent writes).
    pub fn len(&self) -> usize {
        self.key_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Alias for [`len`](Self::len), named after the DBSIZE command.
    pub fn dbsize(&self) -> usize {
        self.len()
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// Deletes the keys. Returns how many existed.
    pub fn del(&self, keys: &[Bytes]) -> usize {
        keys.iter()
            .filter(|key| {
                self.reclaim_if_expired(key);
                let mut data = self.shard(key).write();
                self.unlink_locked(&mut data, key).is_some()
            })
            .count()
    }

    /// Counts how many of the keys exist. Repeated keys are counted each time.
    pub fn exists(&self, keys: &[Bytes]) -> usize {
        keys.iter()
            .filter(|key| self.read(key, |value| value.is_some()))
            .count()
    }

    /// Kind of the value stored at `key`.
    pub fn key_type(&self, key: &Bytes) -> Option<Kind> {
        self.read(key, |value| value.map(Value::kind))
    }

    /// Sets a TTL. Returns `false` if the key does not exist.
    pub fn expire_in(&self, key: &Bytes, ttl: Duration) -> bool {
        self.reclaim_if_expired(key);

        // Hold the read lock so a concurrent DEL cannot leave an orphan deadline.
        let data = self.shard(key).read();
        if !data.contains_key(key) {
            return false;
        }
        self.lru.touch(key);
        self.ttl.set_expiry(key.clone(), ttl);
        true
    }

    /// EXPIRE in seconds. A non-positive value expires the key on its next access.
    pub fn expire(&self, key: &Bytes, seconds: i64) -> bool {
        let ttl = Duration::from_secs(seconds.max(0) as u64);
        self.expire_in(key, ttl)
    }

    pub fn ttl(&self, key: &Bytes) -> Ttl {
        self.reclaim_if_expired(key);

        let data = self.shard(key).read();
        if !data.contains_key(key) {
            return Ttl::Missing;
        }
        self.lru.touch(key);
        match self.ttl.remaining_secs(key) {
            Some(secs) => Ttl::Remaining(secs),
            None => Ttl::NoExpiry,
        }
    }

    /// Removes the key's TTL. Returns `true` only if there was one to remove.
    pub fn persist(&self, key: &Bytes) -> bool {
        self.reclaim_if_expired(key);

        let data = self.shard(key).read();
        if !data.contains_key(key) {
            return false;
        }
        self.lru.touch(key);
        self.ttl.erase(key)
    }

    /// Empties the keyspace and its indexes. The snapshot file is left alone.
    pub fn flush(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
        self.ttl.clear();
        self.lru.clear();
        self.key_count.store(0, Ordering::Relaxed);
    }

    /// Empties everything, including the snapshot file when persistence is on.
    pub fn flushall(&self) {
        self.flush();
        if let Some(snapshot) = &self.snapshot {
            snapshot.clear();
        }
        info!("Keyspace flushed");
    }

    /// Active expiry: removes every key whose deadline has passed.
    ///
    /// Returns the number of keys reclaimed.
    pub fn sweep_expired(&self) -> usize {
        self.ttl
            .expired_keys()
            .iter()
            .filter(|key| self.reclaim_if_expired(key))
            .count()
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.len(),
            keys_with_ttl: self.ttl.len(),
            max_keys: self.max_keys,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
            evicted: self.evicted_count.load(Ordering::Relaxed),
        }
    }

    /// Tracked keys, least recently used first.
    pub fn keys_in_recency_order(&self) -> Vec<Bytes> {
        self.lru.keys_least_recent_first()
    }

    /// Every key currently in the keyspace, in no particular order.
    pub fn keys(&self) -> Vec<Bytes> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().keys().cloned().collect::<Vec<_>>())
            .collect()
    }

    // ========================================================================
    // STRING OPERATIONS
    // ========================================================================

    /// Stores a string, replacing a value of any kind and clearing its TTL.
    ///
    /// Returns `true` if the key was new.
    pub fn set(&self, key: Bytes, value: Bytes) -> bool {
        self.reclaim_if_expired(&key);
        if !self.exists_unlocked(&key) {
            self.make_room();
        }

        let mut data = self.shard(&key).write();
        let is_new = data.insert(key.clone(), Value::Str(value)).is_none();
        if is_new {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
        self.ttl.erase(&key);
        self.lru.touch(&key);
        is_new
    }

    pub fn get(&self, key: &Bytes) -> StorageResult<Option<Bytes>> {
        self.view(key, Value::as_str, Bytes::clone)
    }

    /// Values for each key, in order. Missing and non-string keys yield `None`.
    pub fn mget(&self, keys: &[Bytes]) -> Vec<Option<Bytes>> {
        keys.iter()
            .map(|key| self.get(key).ok().flatten())
            .collect()
    }

    pub fn strlen(&self, key: &Bytes) -> StorageResult<usize> {
        self.view(key, Value::as_str, Bytes::len)
            .map(Option::unwrap_or_default)
    }

    /// Appends to a string, creating it if needed. Returns the new length.
    pub fn append(&self, key: &Bytes, suffix: &[u8]) -> StorageResult<usize> {
        self.upsert(
            key,
            || Value::Str(Bytes::new()),
            Value::as_str_mut,
            |current| {
                let mut joined = Vec::with_capacity(current.len() + suffix.len());
                joined.extend_from_slice(current);
                joined.extend_from_slice(suffix);
                *current = Bytes::from(joined);
                Ok(current.len())
            },
        )
    }

    pub fn incr(&self, key: &Bytes) -> StorageResult<i64> {
        self.incr_by(key, 1)
    }

    pub fn decr(&self, key: &Bytes) -> StorageResult<i64> {
        self.incr_by(key, -1)
    }

    /// Adds `delta` to the integer stored at `key`, starting from 0.
    ///
    /// A non-integer value or an overflow leaves the stored value untouched.
    pub fn incr_by(&self, key: &Bytes, delta: i64) -> StorageResult<i64> {
        self.upsert(
            key,
            || Value::Str(Bytes::from_static(b"0")),
            Value::as_str_mut,
            |current| {
                let next = parse_integer(current)?
                    .checked_add(delta)
                    .ok_or(StorageError::Overflow)?;
                *current = Bytes::from(next.to_string());
                Ok(next)
            },
        )
    }

    pub fn decr_by(&self, key: &Bytes, delta: i64) -> StorageResult<i64> {
        let delta = delta.checked_neg().ok_or(StorageError::Overflow)?;
        self.incr_by(key, delta)
    }

    // ========================================================================
    // LIST OPERATIONS
    // ========================================================================

    /// Pushes each value onto the head in turn. Returns the new length.
    pub fn lpush(&self, key: &Bytes, values: &[Bytes]) -> StorageResult<usize> {
        if values.is_empty() {
            return Err(StorageError::WrongArity("lpush"));
        }
        self.upsert(key, Value::empty_list, Value::as_list_mut, |list| {
            for value in values {
                list.push_front(value.clone());
            }
            Ok(list.len())
        })
    }

    /// Pushes each value onto the tail in turn. Returns the new length.
    pub fn rpush(&self, key: &Bytes, values: &[Bytes]) -> StorageResult<usize> {
        if values.is_empty() {
            return Err(StorageError::WrongArity("rpush"));
        }
        self.upsert(key, Value::empty_list, Value::as_list_mut, |list| {
            list.extend(values.iter().cloned());
            Ok(list.len())
        })
    }

    pub fn lpop(&self, key: &Bytes) -> StorageResult<Option<Bytes>> {
        self.modify(key, Value::as_list_mut, |list| Ok(list.pop_front()))
            .map(Option::flatten)
    }

    pub fn rpop(&self, key: &Bytes) -> StorageResult<Option<Bytes>> {
        self.modify(key, Value::as_list_mut, |list| Ok(list.pop_back()))
            .map(Option::flatten)
    }

    pub fn llen(&self, key: &Bytes) -> StorageResult<usize> {
        self.view(key, Value::as_list, VecDeque::len)
            .map(Option::unwrap_or_default)
    }

    /// Element at `index`; negative indexes count from the tail.
    pub fn lindex(&self, key: &Bytes, index: i64) -> StorageResult<Option<Bytes>> {
        self.view(key, Value::as_list, |list| {
            resolve_index(list.len(), index).map(|i| list[i].clone())
        })
        .map(Option::flatten)
    }

    /// Inclusive range with negative indexes counting from the tail.
    ///
    /// Out-of-range bounds are clamped; `start > stop` is empty.
    pub fn lrange(&self, key: &Bytes, start: i64, stop: i64) -> StorageResult<Vec<Bytes>> {
        self.view(key, Value::as_list, |list| match clamp_range(list.len(), start, stop) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
        .map(Option::unwrap_or_default)
    }

    pub fn lset(&self, key: &Bytes, index: i64, value: Bytes) -> StorageResult<()> {
        self.modify(key, Value::as_list_mut, |list| {
            let i = resolve_index(list.len(), index).ok_or(StorageError::IndexOutOfRange)?;
            list[i] = value;
            Ok(())
        })?
        .ok_or(StorageError::NoSuchKey)
    }

    /// Removes occurrences of `value`.
    ///
    /// `count > 0` removes the first `count` from the head, `count < 0` the
    /// first `|count|` from the tail, and `0` removes all of them.
    pub fn lrem(&self, key: &Bytes, count: i64, value: &[u8]) -> StorageResult<usize> {
        self.modify(key, Value::as_list_mut, |list| {
            Ok(remove_matching(list, count, value))
        })
        .map(Option::unwrap_or_default)
    }

    // ========================================================================
    // SET OPERATIONS
    // ========================================================================

    /// Adds members. Returns how many were not already present.
    pub fn sadd(&self, key: &Bytes, members: &[Bytes]) -> StorageResult<usize> {
        if members.is_empty() {
            return Err(StorageError::WrongArity("sadd"));
        }
        self.upsert(key, Value::empty_set, Value::as_set_mut, |set| {
            Ok(members
                .iter()
                .filter(|member| set.insert((*member).clone()))
                .count())
        })
    }

    /// Removes members. Returns how many were present.
    pub fn srem(&self, key: &Bytes, members: &[Bytes]) -> StorageResult<usize> {
        self.modify(key, Value::as_set_mut, |set| {
            Ok(members.iter().filter(|member| set.remove(*member)).count())
        })
        .map(Option::unwrap_or_default)
    }

    pub fn sismember(&self, key: &Bytes, member: &[u8]) -> StorageResult<bool> {
        self.view(key, Value::as_set, |set| set.contains(member))
            .map(Option::unwrap_or_default)
    }

    pub fn smembers(&self, key: &Bytes) -> StorageResult<Vec<Bytes>> {
        self.view(key, Value::as_set, |set| set.iter().cloned().collect())
            .map(Option::unwrap_or_default)
    }

    pub fn scard(&self, key: &Bytes) -> StorageResult<usize> {
        self.view(key, Value::as_set, HashSet::len)
            .map(Option::unwrap_or_default)
    }

    /// Removes and returns up to `count` members, in the set's iteration order.
    pub fn spop(&self, key: &Bytes, count: usize) -> StorageResult<Vec<Bytes>> {
        self.modify(key, Value::as_set_mut, |set| {
            let picked: Vec<Bytes> = set.iter().take(count).cloned().collect();
            for member in &picked {
                set.remove(member);
            }
            Ok(picked)
        })
        .map(Option::unwrap_or_default)
    }

    // ========================================================================
    // HASH OPERATIONS
    // ========================================================================

    /// Sets field/value pairs. Returns how many fields were new.
    pub fn hset(&self, key: &Bytes, pairs: &[Bytes]) -> StorageResult<usize> {
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(StorageError::WrongArity("hset"));
        }
        self.upsert(key, Value::empty_hash, Value::as_hash_mut, |hash| {
            Ok(pairs
                .chunks_exact(2)
                .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
                .count())
        })
    }

    pub fn hget(&self, key: &Bytes, field: &[u8]) -> StorageResult<Option<Bytes>> {
        self.view(key, Value::as_hash, |hash| hash.get(field).cloned())
            .map(Option::flatten)
    }

    /// Removes fields. Returns how many were present.
    pub fn hdel(&self, key: &Bytes, fields: &[Bytes]) -> StorageResult<usize> {
        self.modify(key, Value::as_hash_mut, |hash| {
            Ok(fields
                .iter()
                .filter(|field| hash.remove(*field).is_some())
                .count())
        })
        .map(Option::unwrap_or_default)
    }

    pub fn hexists(&self, key: &Bytes, field: &[u8]) -> StorageResult<bool> {
        self.view(key, Value::as_hash, |hash| hash.contains_key(field))
            .map(Option::unwrap_or_default)
    }

    pub fn hlen(&self, key: &Bytes) -> StorageResult<usize> {
        self.view(key, Value::as_hash, HashMap::len)
            .map(Option::unwrap_or_default)
    }

    pub fn hkeys(&self, key: &Bytes) -> StorageResult<Vec<Bytes>> {
        self.view(key, Value::as_hash, |hash| hash.keys().cloned().collect())
            .map(Option::unwrap_or_default)
    }

    pub fn hvals(&self, key: &Bytes) -> StorageResult<Vec<Bytes>> {
        self.view(key, Value::as_hash, |hash| hash.values().cloned().collect())
            .map(Option::unwrap_or_default)
    }

    /// Values for each field, positionally aligned with `fields`.
    pub fn hmget(&self, key: &Bytes, fields: &[Bytes]) -> StorageResult<Vec<Option<Bytes>>> {
        self.view(key, Value::as_hash, |hash| {
            fields.iter().map(|field| hash.get(field).cloned()).collect()
        })
        .map(|values| values.unwrap_or_else(|| vec![None; fields.len()]))
    }

    /// All field/value pairs.
    pub fn hgetall(&self, key: &Bytes) -> StorageResult<Vec<(Bytes, Bytes)>> {
        self.view(key, Value::as_hash, |hash| {
            hash.iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()
        })
        .map(Option::unwrap_or_default)
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Writes the live keyspace to the snapshot file.
    ///
    /// Returns `false` when persistence is disabled or the write failed.
    pub fn save(&self) -> bool {
        let Some(snapshot) = &self.snapshot else {
            return false;
        };

        self.sweep_expired();
        let records = self.export();
        snapshot.save(&records)
    }

    /// Replaces the keyspace with the snapshot file's contents.
    ///
    /// Returns the number of keys loaded. Keys carry no TTL after a load.
    pub fn load(&self) -> usize {
        let Some(snapshot) = &self.snapshot else {
            return 0;
        };

        let records = snapshot.load();
        self.flush();

        let mut loaded = 0;
        for (key, value) in records {
            if value.is_drained() {
                trace!(key = ?key, "Skipping empty container in snapshot");
                continue;
            }
            self.store(key, value);
            loaded += 1;
        }

        info!(
            loaded,
            keys = self.len(),
            path = %snapshot.path().display(),
            "Snapshot loaded"
        );
        loaded
    }

    /// Truncates the snapshot file. Returns `false` when persistence is disabled.
    pub fn clear_snapshot(&self) -> bool {
        self.snapshot.as_ref().is_some_and(Snapshot::clear)
    }

    /// Clones every live entry, least recently used first.
    ///
    /// Keys not yet tracked by the recency list (a racing insert) go last.
    fn export(&self) -> Vec<(Bytes, Value)> {
        let mut entries: HashMap<Bytes, Value> = HashMap::with_capacity(self.len());
        for shard in &self.shards {
            let data = shard.read();
            entries.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let mut records = Vec::with_capacity(entries.len());
        for key in self.lru.keys_least_recent_first() {
            if let Some(value) = entries.remove(&key) {
                records.push((key, value));
            }
        }
        records.extend(entries);
        records
    }
}

fn parse_integer(text: &[u8]) -> StorageResult<i64> {
    std::str::from_utf8(text)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(StorageError::NotAnInteger)
}

/// Maps a possibly negative index onto `0..len`.
fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// Clamps an inclusive range to `0..len`. `None` when it selects nothing.
fn clamp_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn remove_matching(list: &mut VecDeque<Bytes>, count: i64, value: &[u8]) -> usize {
    let limit = if count == 0 {
        usize::MAX
    } else {
        count.unsigned_abs() as usize
    };
    let mut removed = 0;

    if count >= 0 {
        let mut i = 0;
        while i < list.len() && removed < limit {
            if list[i][..] == *value {
                list.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
    } else {
        let mut i = list.len();
        while i > 0 && removed < limit {
            i -= 1;
            if list[i][..] == *value {
                list.remove(i);
                removed += 1;
            }
        }
    }

    removed
}
