//! Snapshot Codec
//!
//! Persists the whole keyspace to a single binary file and restores it on
//! startup. TTLs are not persisted: every restored key is permanent.
//!
//! ## File Format
//!
//! ```text
//! ┌────────┬──────────────────────────────────────────────────┐
//! │ "TKV1" │ bincode(Vec<Record { key, value }>)              │
//! │ 4 bytes│ standard config, records least recently used first│
//! └────────┴──────────────────────────────────────────────────┘
//! ```
//!
//! Writes go to `<path>.tmp` and are renamed over `<path>`, so a crash mid
//! write leaves the previous snapshot intact.
//!
//! The public `save`, `load` and `clear` never fail: problems are logged and
//! reported as `false` (or an empty keyspace). The `try_*` variants expose
//! the underlying [`SnapshotError`].

use super::engine::StorageEngine;
use super::value::Value;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const MAGIC: &[u8; 4] = b"TKV1";

/// Errors raised while reading or writing a snapshot file.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("not a snapshot file (bad magic)")]
    BadMagic,

    #[error("{0} trailing bytes after the last record")]
    TrailingBytes(usize),
}

#[derive(Serialize)]
struct RecordRef<'a> {
    key: &'a Bytes,
    value: &'a Value,
}

#[derive(Deserialize)]
struct Record {
    key: Bytes,
    value: Value,
}

/// Encodes records into the snapshot file format.
pub fn encode(records: &[(Bytes, Value)]) -> Result<Vec<u8>, SnapshotError> {
    let refs: Vec<RecordRef<'_>> = records
        .iter()
        .map(|(key, value)| RecordRef { key, value })
        .collect();

    let body = bincode::serde::encode_to_vec(&refs, bincode::config::standard())?;
    let mut out = Vec::with_capacity(MAGIC.len() + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes a snapshot file body. An empty input is an empty keyspace.
pub fn decode(bytes: &[u8]) -> Result<Vec<(Bytes, Value)>, SnapshotError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let body = bytes.strip_prefix(MAGIC).ok_or(SnapshotError::BadMagic)?;

    let (records, read): (Vec<Record>, usize) =
        bincode::serde::decode_from_slice(body, bincode::config::standard())?;
    if read != body.len() {
        return Err(SnapshotError::TrailingBytes(body.len() - read));
    }

    Ok(records
        .into_iter()
        .map(|record| (record.key, record.value))
        .collect())
}

/// A snapshot file on disk.
#[derive(Debug, Clone)]
pub struct Snapshot {
    path: PathBuf,
}

impl Snapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    /// Writes the records atomically. Returns `false` on failure.
    pub fn save(&self, records: &[(Bytes, Value)]) -> bool {
        match self.try_save(records) {
            Ok(written) => {
                info!(
                    keys = records.len(),
                    bytes = written,
                    path = %self.path.display(),
                    "Snapshot saved"
                );
                true
            }
            Err(e) => {
                error!(error = %e, path = %self.path.display(), "Failed to save snapshot");
                false
            }
        }
    }

    /// Reads the records back. A missing, empty or unreadable file yields nothing.
    pub fn load(&self) -> Vec<(Bytes, Value)> {
        match self.try_load() {
            Ok(records) => records,
            Err(SnapshotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No snapshot file, starting empty");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Ignoring unreadable snapshot");
                Vec::new()
            }
        }
    }

    /// Truncates the file to zero bytes, which loads as an empty keyspace.
    /// Returns `false` on failure.
    pub fn clear(&self) -> bool {
        match self.try_clear() {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, path = %self.path.display(), "Failed to clear snapshot");
                false
            }
        }
    }

    /// Writes to `<path>.tmp`, then renames over `<path>`. Returns the bytes written.
    pub fn try_save(&self, records: &[(Bytes, Value)]) -> Result<usize, SnapshotError> {
        let bytes = encode(records)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.tmp_path();
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &self.path)?;

        Ok(bytes.len())
    }

    pub fn try_clear(&self) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::File::create(&self.path)?;
        Ok(())
    }

    pub fn try_load(&self) -> Result<Vec<(Bytes, Value)>, SnapshotError> {
        let bytes = fs::read(&self.path)?;
        decode(&bytes)
    }
}

/// Handle to the periodic snapshot task. Dropping it stops the task.
#[derive(Debug)]
pub struct SnapshotTask {
    shutdown_tx: watch::Sender<bool>,
}

impl SnapshotTask {
    /// Saves the engine every `interval` on a blocking thread.
    pub fn start(engine: Arc<StorageEngine>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(snapshot_loop(engine, interval, shutdown_rx));

        info!(interval_secs = interval.as_secs(), "Periodic snapshots enabled");

        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for SnapshotTask {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn snapshot_loop(
    engine: Arc<StorageEngine>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Snapshot task received shutdown signal");
                    return;
                }
            }
        }

        let engine = Arc::clone(&engine);
        if let Err(e) = tokio::task::spawn_blocking(move || engine.save()).await {
            error!(error = %e, "Snapshot task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engine::StorageConfig;
    use std::collections::{HashMap, HashSet, VecDeque};

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn sample() -> Vec<(Bytes, Value)> {
        let mut hash = HashMap::new();
        hash.insert(b("f"), b("v"));
        let set: HashSet<Bytes> = [b("x"), b("y")].into_iter().collect();
        let list: VecDeque<Bytes> = [b("1"), b("2"), b("3")].into_iter().collect();

        vec![
            (b("str"), Value::Str(b("hello"))),
            (b("bin"), Value::Str(Bytes::from_static(b"\x00\xff\r\n"))),
            (b("list"), Value::List(list)),
            (b("set"), Value::Set(set)),
            (b("hash"), Value::Hash(hash)),
        ]
    }

    #[test]
    fn test_encode_decode_preserves_order_and_kinds() {
        let records = sample();
        let bytes = encode(&records).unwrap();
        assert!(bytes.starts_with(MAGIC));
        assert_eq!(decode(&bytes).unwrap(), records);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"NOPE1234"), Err(SnapshotError::BadMagic)));
        assert!(matches!(decode(b"TK"), Err(SnapshotError::BadMagic)));

        let mut bytes = encode(&sample()).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(decode(&bytes), Err(SnapshotError::Decode(_))));

        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0);
        assert!(matches!(decode(&bytes), Err(SnapshotError::TrailingBytes(1))));
    }

    #[test]
    fn test_empty_input_is_empty_state() {
        assert!(decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Snapshot::new(dir.path().join("nested").join("dump.tkv"));

        assert!(snapshot.save(&sample()));
        assert!(!snapshot.tmp_path().exists());
        assert_eq!(snapshot.load(), sample());
    }

    #[test]
    fn test_missing_and_corrupt_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Snapshot::new(dir.path().join("dump.tkv"));
        assert!(snapshot.load().is_empty());
        assert!(matches!(snapshot.try_load(), Err(SnapshotError::Io(_))));

        fs::write(snapshot.path(), b"garbage").unwrap();
        assert!(snapshot.load().is_empty());
        assert!(snapshot.try_load().is_err());
    }

    #[test]
    fn test_clear_truncates_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Snapshot::new(dir.path().join("dump.tkv"));
        snapshot.save(&sample());

        assert!(snapshot.clear());
        assert!(fs::read(snapshot.path()).unwrap().is_empty());
        assert!(snapshot.load().is_empty());
        assert!(snapshot.try_load().unwrap().is_empty());
    }

    #[test]
    fn test_clear_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = Snapshot::new(dir.path().join("fresh").join("dump.tkv"));

        assert!(snapshot.clear());
        assert_eq!(fs::metadata(snapshot.path()).unwrap().len(), 0);
    }

    #[test]
    fn test_engine_round_trip_keeps_recency_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            max_keys: 100,
            snapshot_path: Some(dir.path().join("dump.tkv")),
        };

        let engine = StorageEngine::with_config(config.clone());
        engine.set(b("a"), b("1"));
        engine.rpush(&b("b"), &[b("x"), b("y")]).unwrap();
        engine.hset(&b("c"), &[b("f"), b("v")]).unwrap();
        engine.get(&b("a")).unwrap();
        assert!(engine.save());

        let restored = StorageEngine::with_config(config);
        assert_eq!(restored.load(), 3);
        assert_eq!(restored.keys_in_recency_order(), vec![b("b"), b("c"), b("a")]);
        assert_eq!(restored.lrange(&b("b"), 0, -1).unwrap(), vec![b("x"), b("y")]);
        assert_eq!(restored.hget(&b("c"), b"f").unwrap(), Some(b("v")));
    }

    #[test]
    fn test_load_skips_empty_containers_and_keeps_last_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.tkv");
        let records = vec![
            (b("k"), Value::Str(b("first"))),
            (b("empty"), Value::empty_set()),
            (b("k"), Value::Str(b("second"))),
        ];
        Snapshot::new(&path).save(&records);

        let engine = StorageEngine::with_config(StorageConfig {
            max_keys: 100,
            snapshot_path: Some(path),
        });
        engine.load();

        assert_eq!(engine.len(), 1);
        assert_eq!(engine.get(&b("k")).unwrap(), Some(b("second")));
        assert_eq!(engine.key_type(&b("empty")), None);
    }

    #[test]
    fn test_load_over_capacity_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.tkv");
        let records: Vec<_> = (0..5)
            .map(|i| (Bytes::from(format!("k{}", i)), Value::Str(b("v"))))
            .collect();
        Snapshot::new(&path).save(&records);

        let engine = StorageEngine::with_config(StorageConfig {
            max_keys: 3,
            snapshot_path: Some(path),
        });
        engine.load();

        assert_eq!(
            engine.keys_in_recency_order(),
            vec![b("k2"), b("k3"), b("k4")]
        );
    }

    #[test]
    fn test_save_drops_expired_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.tkv");
        let engine = StorageEngine::with_config(StorageConfig {
            max_keys: 100,
            snapshot_path: Some(path.clone()),
        });
        engine.set(b("live"), b("1"));
        engine.set(b("dead"), b("2"));
        engine.expire(&b("dead"), 0);

        engine.save();
        let records = Snapshot::new(path).load();
        assert_eq!(records, vec![(b("live"), Value::Str(b("1")))]);
    }

    #[test]
    fn test_flushall_truncates_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.tkv");
        let engine = StorageEngine::with_config(StorageConfig {
            max_keys: 100,
            snapshot_path: Some(path.clone()),
        });
        engine.set(b("a"), b("1"));
        engine.save();

        engine.flushall();
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
        assert!(Snapshot::new(path).load().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_task_saves_periodically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.tkv");
        let engine = Arc::new(StorageEngine::with_config(StorageConfig {
            max_keys: 100,
            snapshot_path: Some(path.clone()),
        }));
        engine.set(b("k"), b("v"));

        let task = SnapshotTask::start(Arc::clone(&engine), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(task);

        assert_eq!(Snapshot::new(path).load().len(), 1);
    }
}
