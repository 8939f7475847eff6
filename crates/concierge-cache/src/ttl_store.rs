//! In-process cache with per-entry TTL, used as the fallback tier.
//!
//! Expired entries are evicted lazily when read and proactively by a
//! background reaper started with [`TtlStore::start_reaper`].

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info};

/// A cached entry with TTL support.
///
/// The data is wrapped in `Arc` so hits hand out a cheap clone instead of
/// copying the serialized payload.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    /// `None` means the entry never expires.
    pub expires_at: Option<Instant>,
}

impl CachedEntry {
    /// Create a new cached entry. A TTL of zero seconds never expires.
    pub fn new(data: Vec<u8>, ttl_secs: u64) -> Self {
        let expires_at = (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs));
        Self {
            data: Arc::new(data),
            expires_at,
        }
    }

    /// Check if this entry has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Expiry-aware key/value map backed by `DashMap`.
#[derive(Debug, Default)]
pub struct TtlStore {
    entries: DashMap<String, CachedEntry>,
}

impl TtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) {
        self.entries
            .insert(key.to_string(), CachedEntry::new(value, ttl_secs));
    }

    /// Look up a live entry. An expired entry is evicted and reported absent.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            // Only remove if still expired; a concurrent set may have replaced it.
            self.entries.remove_if(key, |_, e| e.is_expired());
            return None;
        }
        Some(Arc::clone(&entry.data))
    }

    /// Remove `key`. Returns true if a live entry was removed.
    pub fn del(&self, key: &str) -> bool {
        self.entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of physically present entries, including expired ones not yet reaped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict every expired entry. Returns the number evicted.
    pub fn purge_expired(&self) -> usize {
        let mut evicted = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired();
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    /// Start the background reaper.
    ///
    /// The first sweep happens one `period` after start. Stop it with
    /// [`ReaperHandle::stop`].
    pub fn start_reaper(self: &Arc<Self>, period: Duration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(self);
        let first_sweep = Instant::now() + period;

        let task = tokio::spawn(async move {
            info!(interval_secs = period.as_secs(), "Cache reaper started");
            let mut ticker = interval_at(first_sweep, period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = store.purge_expired();
                        if evicted > 0 {
                            debug!(evicted, remaining = store.len(), "Reaped expired cache entries");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Cache reaper shutting down");
                            break;
                        }
                    }
                }
            }
        });

        ReaperHandle { shutdown_tx, task }
    }
}

/// Handle to a running reaper task.
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the reaper to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}
