//! Audit service: the public API for recording and querying audit events.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use crate::config::AuditConfig;
use crate::error::{AuditError, AuditResult};
use crate::queue::{AuditStats, BatchQueue, FlushTrigger};
use crate::scheduler::FlushScheduler;
use crate::store::DynAuditStore;
use crate::types::{
    AuditEventBuilder, AuditLogParams, AuditRecord, AuditSummary, RequestContext,
};
use crate::writer::BulkWriter;

/// Username and default IP recorded for system events.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// Audit service for creating and storing audit events.
///
/// In batching mode events are queued and written in bulk when the queue
/// reaches `batch_size` or the flush timer fires. In direct mode every event
/// is written before the call returns.
#[derive(Clone)]
pub struct AuditService {
    store: DynAuditStore,
    config: AuditConfig,
    queue: Arc<BatchQueue>,
    scheduler: Arc<Mutex<Option<FlushScheduler>>>,
    stopped: Arc<AtomicBool>,
}

impl AuditService {
    /// Create a new audit service. Call [`start`](Self::start) to run the
    /// flush timer.
    pub fn new(store: DynAuditStore, config: AuditConfig) -> Self {
        let queue = BatchQueue::new(BulkWriter::new(store.clone()), config.batch_size);
        Self {
            store,
            config,
            queue: Arc::new(queue),
            scheduler: Arc::new(Mutex::new(None)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_batching(&self) -> bool {
        self.config.batching_enabled
    }

    /// Spawn the flush timer. No-op in direct mode, after `stop`, or when
    /// already running.
    pub fn start(&self) {
        if !self.config.batching_enabled {
            return;
        }
        // stop() flips the flag before taking this lock, so checking it under
        // the lock means a scheduler spawned here is always seen by stop()
        let mut scheduler = self.scheduler.lock();
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        if scheduler.is_none() {
            *scheduler = Some(FlushScheduler::start(
                Arc::clone(&self.queue),
                self.config.flush_interval(),
            ));
        }
    }

    /// Log an audit event.
    ///
    /// Returns the stored record in direct mode and `None` when the event
    /// was queued.
    pub async fn log_event(&self, builder: AuditEventBuilder) -> AuditResult<Option<AuditRecord>> {
        let event = builder.build()?;

        if !self.config.batching_enabled {
            return match self.store.insert(&event).await {
                Ok(record) => {
                    self.queue.counters.add_persisted(1);
                    debug!(audit_id = record.id, event_type = %record.event.event_type, "Audit event created");
                    Ok(Some(record))
                }
                Err(e @ AuditError::Saturated { .. }) => {
                    self.queue.counters.add_dropped(1);
                    warn!(event_type = %event.event_type, "Audit event skipped, store is full");
                    Err(e)
                }
                Err(e) => {
                    error!(error = %e, event_type = %event.event_type, "Failed to store audit event");
                    Err(e)
                }
            };
        }

        match self.queue.enqueue(event).await {
            Ok(()) => Ok(None),
            // Queue already drained by stop(); write through so nothing is stranded
            Err(event) => match self.store.insert(&event).await {
                Ok(record) => {
                    self.queue.counters.add_persisted(1);
                    Ok(Some(record))
                }
                Err(e) => {
                    self.queue.counters.add_dropped(1);
                    warn!(error = %e, event_type = %event.event_type, "Audit event after shutdown was not stored");
                    Ok(None)
                }
            },
        }
    }

    /// Log an action performed by a user.
    ///
    /// The event type is `USER_ACTION_` followed by the upper-cased action.
    /// An explicit `ip_address` takes precedence over the request context.
    pub async fn log_user_action(
        &self,
        user_id: &str,
        username: Option<&str>,
        action_type: &str,
        details: Value,
        ip_address: Option<&str>,
        resource_type: Option<&str>,
        resource_id: Option<&str>,
        request_context: Option<&RequestContext>,
    ) -> AuditResult<Option<AuditRecord>> {
        if user_id.trim().is_empty() {
            return Err(AuditError::invalid_argument("user_id is required"));
        }
        if action_type.trim().is_empty() {
            return Err(AuditError::invalid_argument("action_type is required"));
        }

        let mut builder = AuditEventBuilder::new(format!(
            "USER_ACTION_{}",
            action_type.to_uppercase()
        ))
        .user_id(user_id)
        .details(details)
        .resource(resource_type.map(String::from), resource_id.map(String::from));

        if let Some(name) = username {
            builder = builder.username(name);
        }
        if let Some(ip) = ip_address {
            builder = builder.ip_address(ip);
        }
        if let Some(context) = request_context {
            builder = builder.request_context(context);
        }

        self.log_event(builder).await
    }

    /// Log an event raised by the system itself.
    pub async fn log_system_event(
        &self,
        event_type: &str,
        details: Value,
        ip_address: Option<&str>,
    ) -> AuditResult<Option<AuditRecord>> {
        let builder = AuditEventBuilder::new(event_type)
            .username(SYSTEM_ACTOR)
            .details(details)
            .ip_address(ip_address.unwrap_or(SYSTEM_ACTOR));

        self.log_event(builder).await
    }

    /// Query persisted events. Events still queued are not visible.
    pub async fn get_audit_logs(&self, params: &AuditLogParams) -> AuditResult<Vec<AuditRecord>> {
        let query = params.normalize();
        self.store.find_all(&query).await.map_err(|e| {
            error!(error = %e, "Failed to query audit logs");
            e
        })
    }

    /// Totals per event type plus the current queue depth.
    pub async fn summary(&self) -> AuditResult<AuditSummary> {
        let by_event_type = self.store.count_by_event_type().await?;
        Ok(AuditSummary {
            total: by_event_type.values().sum(),
            by_event_type,
            pending: self.queue.len(),
        })
    }

    pub fn stats(&self) -> AuditStats {
        self.queue.stats()
    }

    /// Events waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Write all queued events now.
    pub async fn flush(&self) {
        self.queue.flush(FlushTrigger::Timer).await;
    }

    /// Cancel the flush timer, then drain the queue.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.queue.close();

        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }

        if let Some(outcome) = self.queue.flush(FlushTrigger::Shutdown).await {
            info!(
                written = outcome.written,
                failed = outcome.failed,
                "Audit queue drained"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAuditStore;

    fn service() -> AuditService {
        AuditService::new(Arc::new(MemoryAuditStore::new()), AuditConfig::default())
    }

    #[tokio::test]
    async fn test_start_after_stop_spawns_nothing() {
        let service = service();
        service.stop().await;
        service.start();
        assert!(service.scheduler.lock().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_start_and_stop_leave_no_scheduler() {
        for _ in 0..50 {
            let service = service();
            let starter = {
                let service = service.clone();
                tokio::spawn(async move { service.start() })
            };
            let stopper = {
                let service = service.clone();
                tokio::spawn(async move { service.stop().await })
            };
            starter.await.unwrap();
            stopper.await.unwrap();

            assert!(service.scheduler.lock().is_none());
        }
    }

    #[tokio::test]
    async fn test_direct_mode_counts_skipped_events() {
        let store = Arc::new(MemoryAuditStore::new().with_max_records(1));
        let service = AuditService::new(store.clone(), AuditConfig::direct());

        let first = service
            .log_system_event("SERVER_STARTED", Value::Null, None)
            .await
            .unwrap();
        assert!(first.is_some());

        let err = service
            .log_system_event("SERVER_STOPPED", Value::Null, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Saturated { limit: 1 }));
        assert_eq!(service.stats().dropped, 1);
        assert_eq!(store.len(), 1);
    }
}
