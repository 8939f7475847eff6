//! Configuration types for the cache layer.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache facade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one, in seconds (0 = never expires)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// How often the local reaper evicts expired entries, in seconds
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_reaper_interval_secs() -> u64 {
    300 // 5 minutes
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.reaper_interval_secs == 0 {
            return Err("cache.reaper_interval_secs must be > 0".into());
        }
        Ok(())
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

/// Redis configuration for the remote cache tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    /// Default: false (local cache only)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Interval between readiness probes (PING) in milliseconds
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Upper bound for the reconnect backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_health_check_interval_ms() -> u64 {
    5000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.url.is_empty() {
            return Err("redis.url must not be empty when redis.enabled=true".into());
        }
        if self.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.health_check_interval_ms == 0 {
            return Err("redis.health_check_interval_ms must be > 0".into());
        }
        if self.max_backoff_ms < self.health_check_interval_ms {
            return Err("redis.max_backoff_ms must be >= redis.health_check_interval_ms".into());
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}
