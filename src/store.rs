//! TTL-keyed record storage.
//!
//! [`KeyValueStore`] is the backend seam (string keys, string values, optional
//! expiry). [`MemoryStore`] is the bundled backend; with a snapshot file it
//! saves itself on every write. [`DataStore`] layers typed JSON records on top.

use crate::error::StoreError;
use crate::models::Record;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Values aligned with `keys`; missing or expired keys yield `None` in place.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    /// Writes a value. `ttl_secs = None` means no expiry.
    async fn set(&self, key: &str, value: String, ttl_secs: Option<u64>) -> Result<(), StoreError>;

    /// Writes a value and keeps whatever expiry the key already had.
    async fn set_keep_ttl(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Remaining lifetime in seconds; `None` if the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Called once per pass so backends can flush or compact.
    async fn checkpoint(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
    value: String,
    /// Absolute UNIX seconds.
    expires_at: Option<i64>,
}

impl Entry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.map(|t| t > now).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store backed by a snapshot file. Expired entries in the file are
    /// dropped; a missing file yields an empty store.
    pub fn with_snapshot<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut entries: HashMap<String, Entry> = HashMap::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if !content.trim().is_empty() {
                entries = serde_json::from_str(&content).map_err(|e| StoreError::Deserialize {
                    key: path.display().to_string(),
                    source: e,
                })?;
            }
            let now = Utc::now().timestamp();
            let before = entries.len();
            entries.retain(|_, e| e.is_live(now));
            log::info!(
                "Loaded {} records from snapshot {} ({} expired)",
                entries.len(),
                path.display(),
                before - entries.len()
            );
        } else {
            log::info!("Snapshot {} not found, starting empty", path.display());
        }

        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
            snapshot_path: Some(path),
        })
    }

    /// Drops expired entries, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now().timestamp();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        let now = Utc::now().timestamp();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let content = {
            let entries = self.entries.read().await;
            serde_json::to_string(&*entries).map_err(|e| StoreError::Serialize {
                key: path.display().to_string(),
                source: e,
            })?
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        // write-then-rename so a crash never leaves a truncated snapshot
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        log::debug!("Saved record snapshot to {}", path.display());
        Ok(())
    }

    async fn write_through(&self) -> Result<(), StoreError> {
        match &self.snapshot_path {
            Some(path) => self.save_snapshot(path).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Utc::now().timestamp();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let now = Utc::now().timestamp();
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .map(|k| {
                entries
                    .get(k)
                    .filter(|e| e.is_live(now))
                    .map(|e| e.value.clone())
            })
            .collect())
    }

    async fn set(&self, key: &str, value: String, ttl_secs: Option<u64>) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let expires_at = ttl_secs.map(|t| now.saturating_add(i64::try_from(t).unwrap_or(i64::MAX)));
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        self.write_through().await
    }

    async fn set_keep_ttl(&self, key: &str, value: String) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        {
            let mut entries = self.entries.write().await;
            let expires_at = entries
                .get(key)
                .filter(|e| e.is_live(now))
                .and_then(|e| e.expires_at);
            entries.insert(key.to_string(), Entry { value, expires_at });
        }
        self.write_through().await
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = Utc::now().timestamp();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|t| u64::try_from(t - now).unwrap_or(0)))
    }

    async fn checkpoint(&self) -> Result<(), StoreError> {
        let purged = self.purge_expired().await;
        if purged > 0 {
            log::debug!("Purged {purged} expired records");
        }
        self.write_through().await
    }
}

/// Typed view over a [`KeyValueStore`] for one record kind.
pub struct DataStore<T: Record> {
    backend: Arc<dyn KeyValueStore>,
    _marker: PhantomData<T>,
}

impl<T: Record> Clone for DataStore<T> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> DataStore<T> {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            _marker: PhantomData,
        }
    }

    fn encode(key: &str, data: &T) -> Result<String, StoreError> {
        serde_json::to_string(data).map_err(|e| StoreError::Serialize {
            key: key.to_string(),
            source: e,
        })
    }

    fn decode(key: &str, raw: &str) -> Result<T, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::Deserialize {
            key: key.to_string(),
            source: e,
        })
    }

    pub async fn persist(&self, id: &str, data: &T, ttl_secs: Option<u64>) -> Result<(), StoreError> {
        let key = T::key(id);
        let raw = Self::encode(&key, data)?;
        self.backend.set(&key, raw, ttl_secs).await
    }

    /// Replaces the record without touching its remaining lifetime.
    pub async fn update(&self, id: &str, data: &T) -> Result<(), StoreError> {
        let key = T::key(id);
        let raw = Self::encode(&key, data)?;
        self.backend.set_keep_ttl(&key, raw).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        let key = T::key(id);
        match self.backend.get(&key).await? {
            Some(raw) => Ok(Some(Self::decode(&key, &raw)?)),
            None => Ok(None),
        }
    }

    /// Records aligned positionally with `ids`. A value that fails to decode is
    /// treated as absent and logged.
    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<Option<T>>, StoreError> {
        let keys: Vec<String> = ids.iter().map(|id| T::key(id)).collect();
        let raws = self.backend.get_many(&keys).await?;
        Ok(keys
            .iter()
            .zip(raws)
            .map(|(key, raw)| {
                raw.and_then(|r| match Self::decode(key, &r) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        log::warn!("Ignoring unreadable record: {e}");
                        None
                    }
                })
            })
            .collect())
    }

    pub async fn ttl(&self, id: &str) -> Result<Option<u64>, StoreError> {
        self.backend.ttl(&T::key(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubmissionRecord;
    use chrono::TimeZone;

    fn record(id: &str) -> SubmissionRecord {
        SubmissionRecord::new(id, "pikachu", Utc.timestamp_opt(1_000, 0).unwrap())
    }

    #[tokio::test]
    async fn test_persist_then_get_round_trip() {
        let store: DataStore<SubmissionRecord> = DataStore::new(Arc::new(MemoryStore::new()));
        let rec = record("abc");
        store.persist("abc", &rec, Some(4000)).await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), Some(rec));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_preserves_ttl() {
        let store: DataStore<SubmissionRecord> = DataStore::new(Arc::new(MemoryStore::new()));
        let mut rec = record("abc");
        store.persist("abc", &rec, Some(4000)).await.unwrap();
        let before = store.ttl("abc").await.unwrap().unwrap();

        rec.mark_series();
        store.update("abc", &rec).await.unwrap();

        let after = store.ttl("abc").await.unwrap().unwrap();
        assert!(after <= before && after + 2 >= before, "ttl {before} -> {after}");
        assert!(store.get("abc").await.unwrap().unwrap().series);
    }

    #[tokio::test]
    async fn test_update_on_missing_key_has_no_expiry() {
        let backend = MemoryStore::new();
        backend.set_keep_ttl("k", "v".to_string()).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(backend.ttl("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_many_preserves_positions() {
        let store: DataStore<SubmissionRecord> = DataStore::new(Arc::new(MemoryStore::new()));
        store.persist("b", &record("b"), Some(100)).await.unwrap();
        store.persist("d", &record("d"), Some(100)).await.unwrap();

        let ids: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let got = store.get_many(&ids).await.unwrap();
        assert_eq!(got.len(), 4);
        assert!(got[0].is_none());
        assert_eq!(got[1].as_ref().unwrap().id, "b");
        assert!(got[2].is_none());
        assert_eq!(got[3].as_ref().unwrap().id, "d");
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible() {
        let backend = MemoryStore::new();
        backend.set("gone", "x".to_string(), Some(0)).await.unwrap();
        backend.set("kept", "y".to_string(), None).await.unwrap();
        assert!(backend.get("gone").await.unwrap().is_none());
        assert_eq!(backend.purge_expired().await, 1);
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_unreadable_record_is_absent_in_bulk() {
        let backend = Arc::new(MemoryStore::new());
        backend
            .set(&SubmissionRecord::key("bad"), "not json".to_string(), None)
            .await
            .unwrap();
        let store: DataStore<SubmissionRecord> = DataStore::new(backend);
        let got = store.get_many(&["bad".to_string()]).await.unwrap();
        assert!(got[0].is_none());
        assert!(matches!(
            store.get("bad").await,
            Err(StoreError::Deserialize { .. })
        ));
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");

        let first = MemoryStore::with_snapshot(&path).unwrap();
        first.set("live", "1".to_string(), Some(3600)).await.unwrap();
        first.set("dead", "2".to_string(), Some(0)).await.unwrap();
        first.checkpoint().await.unwrap();

        let second = MemoryStore::with_snapshot(&path).unwrap();
        assert_eq!(second.get("live").await.unwrap().as_deref(), Some("1"));
        assert!(second.get("dead").await.unwrap().is_none());
        let ttl = second.ttl("live").await.unwrap().unwrap();
        assert!(ttl > 3590 && ttl <= 3600);
    }

    #[tokio::test]
    async fn test_writes_reach_snapshot_without_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("records.json");

        let first = MemoryStore::with_snapshot(&path).unwrap();
        first.set("submission.a", "1".to_string(), Some(3600)).await.unwrap();
        first.set_keep_ttl("submission.a", "2".to_string()).await.unwrap();
        // no checkpoint: simulates a crash mid-pass
        drop(first);

        let second = MemoryStore::with_snapshot(&path).unwrap();
        assert_eq!(second.get("submission.a").await.unwrap().as_deref(), Some("2"));
        assert!(second.ttl("submission.a").await.unwrap().unwrap() > 3590);
    }
}
