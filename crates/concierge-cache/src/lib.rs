//! Dual-backend cache for Concierge.
//!
//! A [`CacheFacade`] fronts a remote Redis tier and an in-process
//! [`TtlStore`]. While Redis is reachable it serves every operation; when it
//! is not, the local store takes over transparently.
//!
//! # Example
//!
//! ```ignore
//! use concierge_cache::{CacheConfig, CacheFacade, RedisConfig, create_remote_cache};
//!
//! # async fn example() {
//! let remote = create_remote_cache(&RedisConfig::default());
//! let cache = CacheFacade::new(CacheConfig::default(), remote);
//! cache.start();
//!
//! cache.set("greeting", "hi", Some(5)).await.ok();
//! let greeting: Option<String> = cache.get("greeting").await;
//! # }
//! ```

pub mod config;
pub mod error;
pub mod facade;
pub mod metrics;
pub mod redis_cache;
pub mod remote;
pub mod ttl_store;

pub use config::{CacheConfig, RedisConfig};
pub use error::{CacheError, CacheResult};
pub use facade::{CacheFacade, CacheStats};
pub use redis_cache::RedisCache;
pub use remote::{ConnectionEvent, ConnectionStatus, DynRemoteCache, RemoteCache};
pub use ttl_store::{CachedEntry, ReaperHandle, TtlStore};

use std::sync::Arc;

/// Build the remote tier from configuration.
///
/// Returns `None` when Redis is disabled or the pool cannot be created; the
/// facade then runs on the local store only.
pub fn create_remote_cache(config: &RedisConfig) -> Option<DynRemoteCache> {
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return None;
    }

    match RedisCache::connect(config) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis client. Falling back to local cache."
            );
            None
        }
    }
}
