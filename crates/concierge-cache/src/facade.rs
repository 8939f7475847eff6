//! Cache facade routing between the remote tier and the local TTL store.
//!
//! ## Routing
//!
//! Every operation goes to the remote tier while it reports itself connected.
//! A remote error is logged, counted, and the same operation is served by the
//! local [`TtlStore`] instead. Remote errors never reach the caller; the only
//! error a caller can see is a value that fails to serialize.
//!
//! Values are stored as UTF-8 JSON in both tiers.

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::metrics;
use crate::remote::DynRemoteCache;
use crate::ttl_store::{ReaperHandle, TtlStore};

/// Point-in-time counters for the facade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub remote_hits: u64,
    pub local_hits: u64,
    pub misses: u64,
    pub fallbacks: u64,
    pub sets: u64,
}

#[derive(Debug, Default)]
struct Counters {
    remote_hits: AtomicU64,
    local_hits: AtomicU64,
    misses: AtomicU64,
    fallbacks: AtomicU64,
    sets: AtomicU64,
}

/// Dual-backend cache.
///
/// Build one per process at startup and share it behind an `Arc`.
pub struct CacheFacade {
    remote: Option<DynRemoteCache>,
    local: Arc<TtlStore>,
    config: CacheConfig,
    reaper: Mutex<Option<ReaperHandle>>,
    disconnected: AtomicBool,
    counters: Counters,
}

impl CacheFacade {
    /// Create a facade. Pass `None` to run on the local store only.
    pub fn new(config: CacheConfig, remote: Option<DynRemoteCache>) -> Self {
        Self {
            remote,
            local: Arc::new(TtlStore::new()),
            config,
            reaper: Mutex::new(None),
            disconnected: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    /// Local-only facade with the given configuration.
    pub fn local(config: CacheConfig) -> Self {
        Self::new(config, None)
    }

    /// Start the local store's expiry reaper. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut reaper = self.reaper.lock();
        if reaper.is_some() || self.disconnected.load(Ordering::Acquire) {
            return;
        }
        *reaper = Some(self.local.start_reaper(self.config.reaper_interval()));
    }

    /// Store `value` under `key`.
    ///
    /// `ttl_secs = None` applies the configured default, `Some(0)` never
    /// expires. Returns whether a backend accepted the value.
    pub async fn set<T>(&self, key: &str, value: &T, ttl_secs: Option<u64>) -> CacheResult<bool>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(value).map_err(CacheError::from)?;
        let ttl = ttl_secs.unwrap_or(self.config.default_ttl_secs);
        self.counters.sets.fetch_add(1, Ordering::Relaxed);

        if let Some(remote) = self.active_remote() {
            match remote.set(key, &payload, ttl).await {
                Ok(()) => {
                    // A copy left from an outage must not outlive the newer value
                    self.local.del(key);
                    debug!(key = %key, ttl_secs = ttl, "cache set (remote)");
                    return Ok(true);
                }
                Err(e) => self.record_fallback("set", key, &e),
            }
        }

        self.local.set(key, payload, ttl);
        debug!(key = %key, ttl_secs = ttl, "cache set (local)");
        Ok(true)
    }

    /// Fetch and decode the value under `key`.
    ///
    /// A payload that does not decode into `T` is reported absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(remote) = self.active_remote() {
            match remote.get(key).await {
                Ok(Some(payload)) => {
                    self.record_hit("remote");
                    return decode(key, &payload);
                }
                Ok(None) => {
                    self.record_miss();
                    return None;
                }
                Err(e) => self.record_fallback("get", key, &e),
            }
        }

        match self.local.get(key) {
            Some(payload) => {
                self.record_hit("local");
                decode(key, &payload)
            }
            None => {
                self.record_miss();
                None
            }
        }
    }

    /// Remove `key`. Returns true if a backend held it.
    pub async fn del(&self, key: &str) -> bool {
        if let Some(remote) = self.active_remote() {
            match remote.del(key).await {
                // Drop any copy written during an earlier outage too
                Ok(removed) => return self.local.del(key) || removed,
                Err(e) => self.record_fallback("del", key, &e),
            }
        }
        self.local.del(key)
    }

    pub async fn has(&self, key: &str) -> bool {
        if let Some(remote) = self.active_remote() {
            match remote.exists(key).await {
                Ok(found) => return found,
                Err(e) => self.record_fallback("has", key, &e),
            }
        }
        self.local.has(key)
    }

    /// Empty the cache. The remote tier is flushed only while connected.
    pub async fn clear(&self) {
        if let Some(remote) = self.active_remote() {
            match remote.flush_all().await {
                Ok(()) => info!("Remote cache flushed"),
                Err(e) => self.record_fallback("clear", "*", &e),
            }
        }
        self.local.clear();
    }

    /// Release the remote connection and stop the reaper.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub async fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }

        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.stop().await;
        }

        if let Some(remote) = &self.remote {
            remote.close().await;
            info!(backend = remote.backend_name(), "Remote cache disconnected");
        }
    }

    /// `"remote"` while the remote tier is serving, `"local"` otherwise.
    pub fn backend_mode(&self) -> &'static str {
        if self.active_remote().is_some() {
            "remote"
        } else {
            "local"
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            remote_hits: self.counters.remote_hits.load(Ordering::Relaxed),
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
        }
    }

    /// Entries physically held by the local store.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    fn active_remote(&self) -> Option<&DynRemoteCache> {
        self.remote.as_ref().filter(|remote| remote.is_connected())
    }

    fn record_hit(&self, tier: &'static str) {
        let counter = match tier {
            "remote" => &self.counters.remote_hits,
            _ => &self.counters.local_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_hit(tier);
    }

    fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_miss();
    }

    fn record_fallback(&self, op: &'static str, key: &str, error: &CacheError) {
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        metrics::record_fallback(op);
        warn!(op, key = %key, error = %error, "Remote cache failed, using local store");
    }
}

fn decode<T: DeserializeOwned>(key: &str, payload: &[u8]) -> Option<T> {
    match serde_json::from_slice(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key = %key, error = %e, "Cached value could not be decoded");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Session {
        user_id: String,
        roles: Vec<String>,
    }

    fn facade() -> CacheFacade {
        CacheFacade::local(CacheConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_greeting_expires() {
        let cache = facade();
        assert!(cache.set("greeting", "hi", Some(5)).await.unwrap());
        assert_eq!(cache.get::<String>("greeting").await.as_deref(), Some("hi"));

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.get::<String>("greeting").await, None);
        assert!(!cache.has("greeting").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_and_default_ttl() {
        let cache = CacheFacade::local(CacheConfig {
            default_ttl_secs: 10,
            ..Default::default()
        });
        cache.set("pinned", &1u32, Some(0)).await.unwrap();
        cache.set("defaulted", &2u32, None).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(cache.get::<u32>("pinned").await, Some(1));
        assert_eq!(cache.get::<u32>("defaulted").await, None);
    }

    #[tokio::test]
    async fn test_structured_values() {
        let cache = facade();
        let session = Session {
            user_id: "u1".into(),
            roles: vec!["admin".into()],
        };
        cache.set("session:u1", &session, None).await.unwrap();
        assert_eq!(cache.get::<Session>("session:u1").await, Some(session));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_absent() {
        let cache = facade();
        cache.set("count", &42u32, None).await.unwrap();
        assert_eq!(cache.get::<Session>("count").await, None);
    }

    #[tokio::test]
    async fn test_serialization_error_surfaces() {
        use std::collections::HashMap;

        // JSON object keys must be strings
        let mut bad = HashMap::new();
        bad.insert(vec![1u8], "x");

        let cache = facade();
        let err = cache.set("bad", &bad, None).await.unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
        assert!(!cache.has("bad").await);
    }

    #[tokio::test]
    async fn test_del_and_clear() {
        let cache = facade();
        cache.set("a", "1", None).await.unwrap();
        cache.set("b", "2", None).await.unwrap();

        assert!(cache.del("a").await);
        assert!(!cache.del("a").await);

        cache.clear().await;
        assert!(!cache.has("b").await);
        assert_eq!(cache.local_len(), 0);
    }

    #[tokio::test]
    async fn test_stats_and_mode() {
        let cache = facade();
        cache.set("k", "v", None).await.unwrap();
        cache.get::<String>("k").await;
        cache.get::<String>("missing").await;

        let stats = cache.stats();
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.local_hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.remote_hits, 0);
        assert_eq!(cache.backend_mode(), "local");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let cache = facade();
        cache.start();
        cache.start();
        cache.disconnect().await;
        cache.disconnect().await;

        // Local tier keeps serving after disconnect
        cache.set("k", "v", None).await.unwrap();
        assert!(cache.has("k").await);
    }
}
