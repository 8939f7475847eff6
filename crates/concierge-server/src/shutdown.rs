//! Process shutdown coordination.

use std::sync::Arc;

use concierge_audit::AuditService;
use concierge_cache::CacheFacade;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Runs the shutdown sequence exactly once, however many times it is
/// triggered: stop the audit flush timer and drain the queue, then stop the
/// cache reaper and close the remote connection.
#[derive(Clone)]
pub struct Shutdown {
    cache: Arc<CacheFacade>,
    audit: AuditService,
    done: Arc<OnceCell<()>>,
}

impl Shutdown {
    pub fn new(cache: Arc<CacheFacade>, audit: AuditService) -> Self {
        Self {
            cache,
            audit,
            done: Arc::new(OnceCell::new()),
        }
    }

    /// Concurrent callers wait for the first run to finish.
    pub async fn run(&self) {
        self.done
            .get_or_init(|| async {
                info!("Shutting down");

                self.audit.stop().await;
                self.cache.disconnect().await;

                let stats = self.audit.stats();
                info!(
                    persisted = stats.persisted,
                    dropped = stats.dropped,
                    "Shutdown complete"
                );
            })
            .await;
    }

    pub fn is_complete(&self) -> bool {
        self.done.initialized()
    }
}

/// Resolves on the first SIGINT or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
