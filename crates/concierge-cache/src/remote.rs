//! Remote cache tier abstraction.
//!
//! The [`RemoteCache`] trait is the narrow contract the facade relies on.
//! Implementations report readiness through a [`ConnectionStatus`] that is
//! driven by connection lifecycle events; retrying and falling back is the
//! facade's job, never the client's.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::CacheResult;

/// Connection lifecycle events emitted by a remote client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt started.
    Connect,
    /// The server answered and commands can be issued.
    Ready,
    /// The connection failed or a command could not be delivered.
    Error(String),
    /// The client was closed.
    End,
}

/// Readiness flag updated from [`ConnectionEvent`]s.
///
/// `Ready` sets the flag, `Error` and `End` clear it, `Connect` leaves it as
/// is. Subscribers observe the most recent event.
#[derive(Debug)]
pub struct ConnectionStatus {
    connected: AtomicBool,
    events: watch::Sender<ConnectionEvent>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStatus {
    pub fn new() -> Self {
        let (events, _) = watch::channel(ConnectionEvent::Connect);
        Self {
            connected: AtomicBool::new(false),
            events,
        }
    }

    /// Apply a lifecycle event.
    pub fn record(&self, event: ConnectionEvent) {
        let was_connected = match &event {
            ConnectionEvent::Connect => self.connected.load(Ordering::Acquire),
            ConnectionEvent::Ready => self.connected.swap(true, Ordering::AcqRel),
            ConnectionEvent::Error(_) | ConnectionEvent::End => {
                self.connected.swap(false, Ordering::AcqRel)
            }
        };

        match &event {
            ConnectionEvent::Ready if !was_connected => info!("Remote cache ready"),
            ConnectionEvent::Error(reason) if was_connected => {
                warn!(error = %reason, "Remote cache connection lost")
            }
            ConnectionEvent::End => info!("Remote cache connection closed"),
            other => debug!(event = ?other, "Remote cache connection event"),
        }

        crate::metrics::set_remote_connected(self.is_connected());
        self.events.send_replace(event);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

/// Contract for a remote key/value cache service.
///
/// Every call may fail with [`CacheError::RemoteUnavailable`](crate::CacheError);
/// implementations must not retry internally.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Fetch the raw payload stored under `key`.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value` under `key`. A TTL of zero never expires.
    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> CacheResult<()>;

    /// Delete `key`. Returns true if it existed.
    async fn del(&self, key: &str) -> CacheResult<bool>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Drop every key on the remote server.
    async fn flush_all(&self) -> CacheResult<()>;

    /// Current readiness as driven by lifecycle events.
    fn is_connected(&self) -> bool;

    /// Release the connection. Must be idempotent.
    async fn close(&self);

    /// Returns the name of this backend (for logs and health output).
    fn backend_name(&self) -> &'static str;
}

/// Type alias for a shared remote cache client.
pub type DynRemoteCache = Arc<dyn RemoteCache>;
