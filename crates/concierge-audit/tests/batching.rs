//! Batching behaviour of the audit service: size and time triggers,
//! shutdown drain, validation and ordering.

use async_trait::async_trait;
use concierge_audit::{
    AuditConfig, AuditError, AuditEvent, AuditEventBuilder, AuditLogParams, AuditQuery,
    AuditRecord, AuditResult, AuditService, AuditStore, MemoryAuditStore, RequestContext,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Store that records every bulk insert call it receives.
#[derive(Default)]
struct RecordingStore {
    inner: MemoryAuditStore,
    batches: Mutex<Vec<Vec<AuditEvent>>>,
    inserts: Mutex<Vec<AuditEvent>>,
    failing: AtomicBool,
}

impl RecordingStore {
    fn batches(&self) -> Vec<Vec<AuditEvent>> {
        self.batches.lock().clone()
    }

    fn batch_types(&self) -> Vec<Vec<String>> {
        self.batches()
            .into_iter()
            .map(|b| b.into_iter().map(|e| e.event_type).collect())
            .collect()
    }
}

#[async_trait]
impl AuditStore for RecordingStore {
    async fn bulk_insert(&self, events: &[AuditEvent]) -> AuditResult<u64> {
        self.batches.lock().push(events.to_vec());
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::persistence("database is down"));
        }
        self.inner.bulk_insert(events).await
    }

    async fn insert(&self, event: &AuditEvent) -> AuditResult<AuditRecord> {
        self.inserts.lock().push(event.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::persistence("database is down"));
        }
        self.inner.insert(event).await
    }

    async fn find_all(&self, query: &AuditQuery) -> AuditResult<Vec<AuditRecord>> {
        self.inner.find_all(query).await
    }

    async fn count_by_event_type(&self) -> AuditResult<BTreeMap<String, u64>> {
        self.inner.count_by_event_type().await
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

fn batching(batch_size: usize) -> (Arc<RecordingStore>, AuditService) {
    let store = Arc::new(RecordingStore::default());
    let config = AuditConfig::default()
        .with_batch_size(batch_size)
        .with_flush_interval(Duration::from_secs(10));
    let service = AuditService::new(store.clone(), config);
    (store, service)
}

fn event(kind: &str) -> AuditEventBuilder {
    AuditEventBuilder::new(kind)
}

#[tokio::test]
async fn full_batch_is_written_once() {
    let (store, service) = batching(5);

    for i in 0..5 {
        let queued = service.log_event(event(&format!("E{i}"))).await.unwrap();
        assert!(queued.is_none());
    }

    assert_eq!(store.batches().len(), 1);
    assert_eq!(store.batch_types()[0], vec!["E0", "E1", "E2", "E3", "E4"]);
    assert_eq!(service.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn partial_batch_is_written_by_timer() {
    let (store, service) = batching(50);
    service.start();

    service.log_event(event("A")).await.unwrap();
    service.log_event(event("B")).await.unwrap();

    tokio::time::advance(Duration::from_secs(9)).await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(store.batches().is_empty());

    tokio::time::advance(Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(store.batch_types(), vec![vec!["A", "B"]]);
    assert_eq!(service.pending(), 0);

    // Idle ticks do not produce empty batches
    tokio::time::advance(Duration::from_secs(30)).await;
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(store.batches().len(), 1);

    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_drains_queue_before_returning() {
    let (store, service) = batching(50);
    service.start();

    for kind in ["A", "B", "C"] {
        service.log_event(event(kind)).await.unwrap();
    }
    service.stop().await;

    assert_eq!(store.batch_types(), vec![vec!["A", "B", "C"]]);
    assert_eq!(service.stats().persisted, 3);

    // Second stop is a no-op
    service.stop().await;
    assert_eq!(store.batches().len(), 1);
}

#[tokio::test]
async fn events_after_stop_are_written_through() {
    let (store, service) = batching(50);
    service.start();
    service.stop().await;

    let record = service.log_event(event("LATE")).await.unwrap();
    assert_eq!(record.map(|r| r.event.event_type).as_deref(), Some("LATE"));
    assert!(store.batches().is_empty());
    assert_eq!(store.inserts.lock().len(), 1);
}

#[tokio::test]
async fn missing_event_type_is_rejected_without_side_effects() {
    let (store, service) = batching(1);

    let err = service
        .log_event(AuditEventBuilder::default())
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(service.pending(), 0);
    assert_eq!(service.stats().enqueued, 0);
    assert!(store.batches().is_empty());
    assert!(store.inserts.lock().is_empty());

    let err = service
        .log_user_action("", None, "LOGIN", json!({}), None, None, None, None)
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());

    let err = service
        .log_user_action("u1", None, " ", json!({}), None, None, None, None)
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[tokio::test]
async fn batches_preserve_creation_order() {
    let (store, service) = batching(2);

    for kind in ["e1", "e2", "e3"] {
        service.log_event(event(kind)).await.unwrap();
    }
    service.stop().await;

    let flattened: Vec<String> = store.batch_types().into_iter().flatten().collect();
    assert_eq!(flattened, vec!["e1", "e2", "e3"]);

    let timestamps: Vec<_> = store
        .batches()
        .into_iter()
        .flatten()
        .map(|e| e.timestamp)
        .collect();
    assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn user_logins_are_batched_together() {
    let (store, service) = batching(3);

    for _ in 0..3 {
        service
            .log_user_action(
                "u1",
                Some("alice"),
                "LOGIN",
                json!({}),
                Some("1.2.3.4"),
                None,
                None,
                None,
            )
            .await
            .unwrap();
    }

    let batches = store.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);
    for row in &batches[0] {
        assert_eq!(row.event_type, "USER_ACTION_LOGIN");
        assert_eq!(row.username.as_deref(), Some("alice"));
        assert_eq!(row.ip_address.as_deref(), Some("1.2.3.4"));
    }
}

#[tokio::test]
async fn failed_batch_is_dropped_not_requeued() {
    let (store, service) = batching(2);
    store.failing.store(true, Ordering::SeqCst);

    service.log_event(event("A")).await.unwrap();
    service.log_event(event("B")).await.unwrap();

    assert_eq!(service.pending(), 0);
    let stats = service.stats();
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.persisted, 0);

    // Recovery: later batches go through, the lost ones are not replayed
    store.failing.store(false, Ordering::SeqCst);
    service.log_event(event("C")).await.unwrap();
    service.log_event(event("D")).await.unwrap();
    assert_eq!(store.inner.len(), 2);
}

#[tokio::test]
async fn direct_mode_returns_records_and_errors() {
    let store = Arc::new(RecordingStore::default());
    let service = AuditService::new(store.clone(), AuditConfig::direct());
    service.start();

    let context = RequestContext {
        ip_address: Some("10.1.1.1".into()),
        user_agent: Some("Mozilla/5.0".into()),
        request_url: Some("/api/reminders".into()),
        http_method: Some("POST".into()),
    };
    let record = service
        .log_user_action(
            "u7",
            None,
            "create",
            json!({"title": "dentist"}),
            None,
            Some("reminder"),
            Some("42"),
            Some(&context),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.event.event_type, "USER_ACTION_CREATE");
    assert_eq!(record.event.ip_address.as_deref(), Some("10.1.1.1"));
    assert_eq!(record.event.resource_id.as_deref(), Some("42"));
    assert!(store.batches().is_empty());

    store.failing.store(true, Ordering::SeqCst);
    let err = service.log_event(event("BOOM")).await.unwrap_err();
    assert!(matches!(err, AuditError::Persistence(_)));
}

#[tokio::test]
async fn system_events_default_to_system_actor() {
    let store = Arc::new(MemoryAuditStore::new());
    let service = AuditService::new(store.clone(), AuditConfig::direct());

    let record = service
        .log_system_event("SYSTEM_STARTUP", json!({"version": "0.0.1"}), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.event.username.as_deref(), Some("SYSTEM"));
    assert_eq!(record.event.ip_address.as_deref(), Some("SYSTEM"));
    assert_eq!(record.event.details["version"], "0.0.1");

    let err = service
        .log_system_event("", json!({}), None)
        .await
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[tokio::test]
async fn summary_and_queries() {
    let store = Arc::new(MemoryAuditStore::new());
    let service = AuditService::new(store.clone(), AuditConfig::default().with_batch_size(100));

    for (user, action) in [("u1", "LOGIN"), ("u2", "LOGIN"), ("u1", "LOGOUT")] {
        service
            .log_user_action(user, None, action, json!({}), None, None, None, None)
            .await
            .unwrap();
    }

    let summary = service.summary().await.unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(summary.pending, 3);

    service.flush().await;

    let summary = service.summary().await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.by_event_type.get("USER_ACTION_LOGIN"), Some(&2));
    assert_eq!(summary.pending, 0);

    let logs = service
        .get_audit_logs(&AuditLogParams {
            user_id: Some("u1".into()),
            sort_by: Some("bogus".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|r| r.event.user_id.as_deref() == Some("u1")));
}
