//! Redis implementation of the remote cache tier.
//!
//! Commands go through a `deadpool-redis` pool. A monitor task probes the
//! server with `PING` and drives the [`ConnectionStatus`]; failed probes back
//! off exponentially up to `max_backoff`.

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, Runtime};
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::ConnectionLike;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RedisConfig;
use crate::error::{CacheError, CacheResult};
use crate::remote::{ConnectionEvent, ConnectionStatus, RemoteCache};

/// Remote cache backed by a Redis connection pool.
pub struct RedisCache {
    pool: Pool,
    status: Arc<ConnectionStatus>,
    monitor: Mutex<Option<MonitorHandle>>,
    closed: AtomicBool,
}

struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RedisCache {
    /// Create the pool and start the connection monitor.
    ///
    /// The pool connects lazily, so this succeeds even when Redis is down;
    /// readiness is reported once the first `PING` answers.
    pub fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let timeout = config.timeout();

        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        let pool_config = redis_config
            .pool
            .get_or_insert_with(|| deadpool_redis::PoolConfig::new(config.pool_size));
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::remote_unavailable(format!("failed to create pool: {e}")))?;

        let status = Arc::new(ConnectionStatus::new());
        status.record(ConnectionEvent::Connect);

        let monitor = spawn_monitor(
            pool.clone(),
            Arc::clone(&status),
            config.health_check_interval(),
            config.max_backoff(),
            timeout,
        );

        info!(url = %mask_url(&config.url), pool_size = config.pool_size, "Redis cache client created");

        Ok(Self {
            pool,
            status,
            monitor: Mutex::new(Some(monitor)),
            closed: AtomicBool::new(false),
        })
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionEvent> {
        self.status.subscribe()
    }

    async fn connection(&self) -> CacheResult<Connection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::remote_unavailable("client closed"));
        }
        self.pool.get().await.map_err(|e| self.fail(format!("pool checkout: {e}")))
    }

    /// Mark the connection as lost and build the error for the caller.
    fn fail(&self, message: String) -> CacheError {
        self.status.record(ConnectionEvent::Error(message.clone()));
        CacheError::remote_unavailable(message)
    }
}

#[async_trait]
impl RemoteCache for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(|e| self.fail(format!("GET {key}: {e}")))
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let result = if ttl_secs == 0 {
            conn.set::<_, _, ()>(key, value).await
        } else {
            conn.set_ex::<_, _, ()>(key, value, ttl_secs).await
        };
        result.map_err(|e| self.fail(format!("SET {key}: {e}")))
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| self.fail(format!("DEL {key}: {e}")))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        conn.exists::<_, bool>(key)
            .await
            .map_err(|e| self.fail(format!("EXISTS {key}: {e}")))
    }

    async fn flush_all(&self) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        conn.req_packed_command(&redis::cmd("FLUSHALL"))
            .await
            .map(|_| ())
            .map_err(|e| self.fail(format!("FLUSHALL: {e}")))
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.status.is_connected()
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Redis cache client already closed");
            return;
        }

        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            let _ = monitor.shutdown_tx.send(true);
            let _ = monitor.task.await;
        }

        self.pool.close();
        self.status.record(ConnectionEvent::End);
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Double the delay, capped at `max`.
pub(crate) fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

fn spawn_monitor(
    pool: Pool,
    status: Arc<ConnectionStatus>,
    interval: Duration,
    max_backoff: Duration,
    timeout: Duration,
) -> MonitorHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut backoff = interval;

        loop {
            if !status.is_connected() {
                status.record(ConnectionEvent::Connect);
            }

            let wait = match ping(&pool, timeout).await {
                Ok(()) => {
                    status.record(ConnectionEvent::Ready);
                    backoff = interval;
                    interval
                }
                Err(reason) => {
                    status.record(ConnectionEvent::Error(reason));
                    let wait = backoff;
                    backoff = next_backoff(backoff, max_backoff);
                    debug!(retry_in_ms = wait.as_millis() as u64, "Redis probe failed, backing off");
                    wait
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Redis connection monitor shutting down");
                        break;
                    }
                }
            }
        }
    });

    MonitorHandle { shutdown_tx, task }
}

async fn ping(pool: &Pool, timeout: Duration) -> Result<(), String> {
    let probe = async {
        let mut conn = pool.get().await.map_err(|e| e.to_string())?;
        conn.req_packed_command(&redis::cmd("PING"))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    };

    match tokio::time::timeout(timeout, probe).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Redis PING timed out");
            Err("PING timed out".to_string())
        }
    }
}

/// Hide the password part of a Redis URL for logging.
fn mask_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.rsplit_once('@') {
        Some((credentials, host)) => match credentials.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:****@{host}"),
            None => format!("{scheme}://****@{host}"),
        },
        None => url.to_string(),
    }
}
