use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    BoxError, Router,
    error_handling::HandleErrorLayer,
    http::StatusCode,
    routing::{get, post},
};
use concierge_audit::{AuditService, AuditStore, DynAuditStore, MemoryAuditStore};
use concierge_cache::{CacheFacade, create_remote_cache};
use concierge_db_postgres::{PostgresAuditStore, mask_password};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::{config::AppConfig, handlers, shutdown::Shutdown};

/// Services shared by all handlers, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheFacade>,
    pub audit: AuditService,
}

impl AppState {
    pub fn new(cache: Arc<CacheFacade>, audit: AuditService) -> Self {
        Self { cache, audit }
    }

    /// Wire the cache and audit services from configuration.
    ///
    /// Redis problems never fail startup; a configured PostgreSQL that
    /// cannot be reached does.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let remote = create_remote_cache(&cfg.redis);
        let cache = Arc::new(CacheFacade::new(cfg.cache.clone(), remote));

        let store: DynAuditStore = match &cfg.storage.postgres {
            Some(pg) => {
                let store = PostgresAuditStore::connect(pg).await.with_context(|| {
                    format!("failed to connect to {}", mask_password(&pg.url))
                })?;
                Arc::new(store)
            }
            None => {
                tracing::info!(
                    max_records = cfg.storage.memory_max_records,
                    "storage.postgres not configured, audit events are kept in memory"
                );
                Arc::new(MemoryAuditStore::new().with_max_records(cfg.storage.memory_max_records))
            }
        };
        tracing::info!(
            backend = store.backend_name(),
            batching = cfg.audit.batching_enabled,
            batch_size = cfg.audit.batch_size,
            flush_interval_ms = cfg.audit.flush_interval_ms,
            "Audit store ready"
        );

        let audit = AuditService::new(store, cfg.audit.clone());
        Ok(Self::new(cache, audit))
    }

    /// Start the reaper and the flush scheduler.
    pub fn start(&self) {
        self.cache.start();
        self.audit.start();
    }
}

pub fn build_app(state: AppState, cfg: &AppConfig) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        // Health and info endpoints
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/metrics", get(handlers::metrics))
        // Audit
        .route("/audit/logs", get(handlers::audit_logs))
        .route("/audit/summary", get(handlers::audit_summary))
        .route("/audit/events", post(handlers::log_user_action))
        .with_state(state)
        // Middleware stack (order: timeout -> compression/cors/trace -> body limit)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .timeout(cfg.server.request_timeout()),
        )
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

async fn handle_timeout_error(err: BoxError) -> (StatusCode, axum::Json<serde_json::Value>) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            axum::Json(json!({ "code": "timeout", "message": "request timed out" })),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(json!({ "code": "exception", "message": err.to_string() })),
        )
    }
}

pub struct ConciergeServer {
    addr: SocketAddr,
    app: Router,
    state: AppState,
    shutdown: Shutdown,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<ConciergeServer> {
        crate::metrics::init_metrics();

        let state = AppState::from_config(&self.config).await?;
        state.start();

        let shutdown = Shutdown::new(state.cache.clone(), state.audit.clone());
        let app = build_app(state.clone(), &self.config);

        Ok(ConciergeServer {
            addr: self.addr,
            app,
            state,
            shutdown,
        })
    }
}

impl ConciergeServer {
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Serve until SIGINT/SIGTERM, then drain audit events and release the cache.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.addr))?;
        tracing::info!("listening on {}", self.addr);

        self.log_lifecycle("SERVER_STARTED").await;

        let served = axum::serve(listener, self.app.clone())
            .with_graceful_shutdown(crate::shutdown::wait_for_signal())
            .await;

        self.log_lifecycle("SERVER_STOPPED").await;
        self.shutdown.run().await;

        served.context("server error")
    }

    async fn log_lifecycle(&self, event_type: &str) {
        let details = json!({
            "addr": self.addr.to_string(),
            "cacheBackend": self.state.cache.backend_mode(),
        });
        if let Err(e) = self
            .state
            .audit
            .log_system_event(event_type, details, None)
            .await
        {
            tracing::warn!(error = %e, event_type, "Failed to record lifecycle event");
        }
    }
}
