//! TTL Index
//!
//! Maps keys to the absolute instant at which they expire. A key without an
//! entry here never expires. The index has its own lock and knows nothing
//! about the keyspace: it only reports which keys have run out of time, and
//! the storage engine cascades the removal into the other structures.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Longest TTL stored as given. Longer ones are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Expiry deadlines for keys that have a TTL.
#[derive(Debug, Default)]
pub struct TtlIndex {
    deadlines: Mutex<HashMap<Bytes, Instant>>,
}

impl TtlIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs (or replaces) a deadline of `now + ttl` for the key.
    ///
    /// `ttl` is clamped to [`MAX_TTL`]. If even that overflows the clock the
    /// key is left without a deadline.
    pub fn set_expiry(&self, key: Bytes, ttl: Duration) {
        let mut deadlines = self.deadlines.lock();
        match Instant::now().checked_add(ttl.min(MAX_TTL)) {
            Some(deadline) => {
                deadlines.insert(key, deadline);
            }
            None => {
                deadlines.remove(&key);
            }
        }
    }

    /// Remaining lifetime, or `None` if the key has no TTL.
    ///
    /// A deadline that has already passed reports `Duration::ZERO`.
    pub fn remaining(&self, key: &[u8]) -> Option<Duration> {
        self.deadlines
            .lock()
            .get(key)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Remaining lifetime in whole seconds, truncated toward zero.
    pub fn remaining_secs(&self, key: &[u8]) -> Option<i64> {
        self.remaining(key).map(|d| d.as_secs() as i64)
    }

    /// True if the key has a deadline that has passed.
    #[inline]
    pub fn is_expired(&self, key: &[u8]) -> bool {
        self.deadlines
            .lock()
            .get(key)
            .is_some_and(|deadline| Instant::now() >= *deadline)
    }

    /// Drops the key's entry if its deadline has passed.
    ///
    /// Returns `true` when the key is newly expired; the caller must then
    /// remove it from the keyspace and the recency list.
    pub fn remove_if_expired(&self, key: &[u8]) -> bool {
        let mut deadlines = self.deadlines.lock();
        match deadlines.get(key) {
            Some(deadline) if Instant::now() >= *deadline => {
                deadlines.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Keys whose deadline has passed, without removing them.
    ///
    /// A full sweep feeds each of these back through the engine, which
    /// re-checks and drops the entry with [`remove_if_expired`] while it
    /// holds the key's shard lock. A key overwritten in the meantime has
    /// lost its TTL and is left alone.
    ///
    /// [`remove_if_expired`]: TtlIndex::remove_if_expired
    pub fn expired_keys(&self) -> Vec<Bytes> {
        let now = Instant::now();
        self.deadlines
            .lock()
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Removes the key's TTL unconditionally. Returns `true` if it had one.
    pub fn erase(&self, key: &[u8]) -> bool {
        self.deadlines.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.deadlines.lock().clear();
    }

    /// Number of keys that currently carry a TTL.
    pub fn len(&self) -> usize {
        self.deadlines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_has_no_ttl() {
        let index = TtlIndex::new();
        assert_eq!(index.remaining_secs(b"nope"), None);
        assert!(!index.is_expired(b"nope"));
        assert!(!index.remove_if_expired(b"nope"));
    }

    #[test]
    fn test_remaining_truncates_toward_zero() {
        let index = TtlIndex::new();
        index.set_expiry(Bytes::from("key"), Duration::from_millis(2500));

        let secs = index.remaining_secs(b"key").unwrap();
        assert!(secs == 2 || secs == 1, "got {}", secs);
    }

    #[test]
    fn test_overwrite_deadline() {
        let index = TtlIndex::new();
        index.set_expiry(Bytes::from("key"), Duration::from_secs(5));
        index.set_expiry(Bytes::from("key"), Duration::from_secs(100));

        assert!(index.remaining_secs(b"key").unwrap() > 50);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let index = TtlIndex::new();
        index.set_expiry(Bytes::from("key"), Duration::from_secs(u64::MAX));

        let secs = index.remaining_secs(b"key").unwrap();
        assert!(secs > 0 && secs <= MAX_TTL.as_secs() as i64, "got {}", secs);
        assert!(!index.is_expired(b"key"));
    }

    #[test]
    fn test_remove_if_expired() {
        let index = TtlIndex::new();
        index.set_expiry(Bytes::from("live"), Duration::from_secs(60));
        index.set_expiry(Bytes::from("dead"), Duration::ZERO);

        assert!(!index.remove_if_expired(b"live"));
        assert!(index.remove_if_expired(b"dead"));
        // Already reclaimed: a second check reports nothing new.
        assert!(!index.remove_if_expired(b"dead"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_expired_keys_does_not_remove() {
        let index = TtlIndex::new();
        index.set_expiry(Bytes::from("a"), Duration::from_millis(10));
        index.set_expiry(Bytes::from("b"), Duration::from_millis(10));
        index.set_expiry(Bytes::from("c"), Duration::from_secs(60));

        std::thread::sleep(Duration::from_millis(30));

        let mut expired = index.expired_keys();
        expired.sort();
        assert_eq!(expired, vec![Bytes::from("a"), Bytes::from("b")]);
        assert_eq!(index.len(), 3);

        for key in &expired {
            assert!(index.remove_if_expired(key));
        }
        assert_eq!(index.len(), 1);
        assert!(index.expired_keys().is_empty());
    }

    #[test]
    fn test_erase_and_clear() {
        let index = TtlIndex::new();
        index.set_expiry(Bytes::from("a"), Duration::from_secs(60));
        index.set_expiry(Bytes::from("b"), Duration::from_secs(60));

        assert!(index.erase(b"a"));
        assert!(!index.erase(b"a"));

        index.clear();
        assert!(index.is_empty());
    }
}
