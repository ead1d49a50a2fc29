use super::clock::{Clock, SystemClock};
use super::store::{Commit, QuotaStore, StoreError, WatchedKey};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    version: u64,
    expires_at: Option<u64>,
}

impl StoredValue {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

struct Inner {
    entries: DashMap<String, StoredValue>,
    versions: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Inner {
    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn expires_at(&self, now: u64, ttl_secs: u64) -> Option<u64> {
        (ttl_secs > 0).then(|| now.saturating_add(ttl_secs))
    }

    /// Version of the live value at `key`, `None` if absent or expired
    fn live_version(&self, key: &str, now: u64) -> Option<u64> {
        self.entries
            .get(key)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.version)
    }
}

/// In-process quota store with the same transaction semantics as Redis.
///
/// Every write bumps a per-key version; a commit succeeds only while the
/// version still matches the one seen at watch time. Expiry is evaluated
/// against the injected clock.
#[derive(Clone)]
pub struct MemoryQuotaStore {
    inner: Arc<Inner>,
}

impl Default for MemoryQuotaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                versions: AtomicU64::new(0),
                clock,
            }),
        }
    }

    /// Seconds until `key` expires, `None` if absent or without expiry
    pub fn ttl(&self, key: &str) -> Option<u64> {
        let now = self.inner.clock.now_secs();
        self.inner
            .entries
            .get(key)
            .filter(|stored| stored.is_live(now))
            .and_then(|stored| stored.expires_at)
            .map(|at| at - now)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.inner.clock.now_secs();
        self.inner
            .entries
            .iter()
            .filter(|stored| stored.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired keys
    pub fn purge_expired(&self) {
        let now = self.inner.clock.now_secs();
        self.inner.entries.retain(|_, stored| stored.is_live(now));
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn watch(&self, key: &str) -> Result<Box<dyn WatchedKey>, StoreError> {
        let now = self.inner.clock.now_secs();
        Ok(Box::new(MemoryWatchedKey {
            inner: self.inner.clone(),
            key: key.to_string(),
            version: self.inner.live_version(key, now),
        }))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.inner.clock.now_secs();
        Ok(self
            .inner
            .entries
            .get(key)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let now = self.inner.clock.now_secs();
        let stored = StoredValue {
            value: value.to_string(),
            version: self.inner.next_version(),
            expires_at: self.inner.expires_at(now, ttl_secs),
        };
        self.inner.entries.insert(key.to_string(), stored);
        Ok(())
    }

    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<i64, StoreError> {
        let now = self.inner.clock.now_secs();
        let version = self.inner.next_version();

        match self.inner.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_live(now) => {
                let stored = occupied.get_mut();
                let current: i64 = stored.value.parse().map_err(|_| StoreError::Corrupt {
                    key: key.to_string(),
                    reason: format!("not an integer: {:?}", stored.value),
                })?;
                let next = current + 1;
                stored.value = next.to_string();
                stored.version = version;
                Ok(next)
            }
            entry => {
                debug!(key, ttl_secs, "Creating counter");
                let stored = StoredValue {
                    value: "1".to_string(),
                    version,
                    expires_at: self.inner.expires_at(now, ttl_secs),
                };
                match entry {
                    Entry::Occupied(mut occupied) => {
                        occupied.insert(stored);
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(stored);
                    }
                }
                Ok(1)
            }
        }
    }
}

struct MemoryWatchedKey {
    inner: Arc<Inner>,
    key: String,
    version: Option<u64>,
}

#[async_trait]
impl WatchedKey for MemoryWatchedKey {
    async fn get(&mut self) -> Result<Option<String>, StoreError> {
        let now = self.inner.clock.now_secs();
        Ok(self
            .inner
            .entries
            .get(&self.key)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.value.clone()))
    }

    async fn commit(self: Box<Self>, value: String, ttl_secs: u64) -> Result<Commit, StoreError> {
        let now = self.inner.clock.now_secs();
        let stored = StoredValue {
            value,
            version: self.inner.next_version(),
            expires_at: self.inner.expires_at(now, ttl_secs),
        };

        match self.inner.entries.entry(self.key.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = Some(occupied.get())
                    .filter(|s| s.is_live(now))
                    .map(|s| s.version);
                if current != self.version {
                    return Ok(Commit::Conflict);
                }
                occupied.insert(stored);
            }
            Entry::Vacant(vacant) => {
                if self.version.is_some() {
                    return Ok(Commit::Conflict);
                }
                vacant.insert(stored);
            }
        }
        Ok(Commit::Applied)
    }

    async fn unwatch(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
