use std::sync::Arc;

use concierge_audit::{AuditConfig, AuditService, MemoryAuditStore};
use concierge_cache::{CacheConfig, CacheFacade};
use concierge_server::{AppConfig, AppState, build_app};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

async fn start_server(
    audit: AuditConfig,
) -> (String, AppState, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let cache = Arc::new(CacheFacade::local(CacheConfig::default()));
    let audit = AuditService::new(Arc::new(MemoryAuditStore::new()), audit);
    let state = AppState::new(cache, audit);
    state.start();

    let app = build_app(state.clone(), &AppConfig::default());

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{addr}"), state, tx, server)
}

#[tokio::test]
async fn health_and_readiness() {
    let (base, _state, shutdown_tx, handle) = start_server(AuditConfig::default()).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let resp = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["cache"]["backend"], "local");
    assert_eq!(body["audit"]["batching"], true);
    assert_eq!(body["audit"]["pending"], 0);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn logged_actions_are_queryable() {
    let (base, _state, shutdown_tx, handle) = start_server(AuditConfig::direct()).await;
    let client = reqwest::Client::new();

    for (user, action) in [("u1", "login"), ("u2", "login"), ("u1", "update")] {
        let resp = client
            .post(format!("{base}/audit/events"))
            .header("x-forwarded-for", "10.0.0.7, 10.0.0.1")
            .header("user-agent", "endpoint-test")
            .json(&json!({
                "userId": user,
                "actionType": action,
                "details": { "source": "test" },
                "resourceType": "task",
                "resourceId": "42"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    }

    let resp = client
        .get(format!(
            "{base}/audit/logs?userId=u1&sortBy=timestamp&sortOrder=asc"
        ))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let logs: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0]["eventType"], "USER_ACTION_LOGIN");
    assert_eq!(logs[1]["eventType"], "USER_ACTION_UPDATE");
    assert_eq!(logs[0]["ipAddress"], "10.0.0.7");
    assert_eq!(logs[0]["userAgent"], "endpoint-test");
    assert_eq!(logs[0]["requestUrl"], "/audit/events");
    assert_eq!(logs[0]["httpMethod"], "POST");
    assert_eq!(logs[0]["details"]["source"], "test");

    let logs: Vec<Value> = client
        .get(format!("{base}/audit/logs?search=UPDATE"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["eventType"], "USER_ACTION_UPDATE");

    let resp = client
        .get(format!("{base}/audit/logs?limit=1"))
        .send()
        .await
        .unwrap();
    let logs: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(logs.len(), 1);

    let resp = client
        .get(format!("{base}/audit/summary"))
        .send()
        .await
        .unwrap();
    let summary: Value = resp.json().await.unwrap();
    assert_eq!(summary["total"], 3);
    assert_eq!(summary["byEventType"]["USER_ACTION_LOGIN"], 2);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn invalid_action_is_rejected() {
    let (base, _state, shutdown_tx, handle) = start_server(AuditConfig::direct()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/audit/events"))
        .json(&json!({ "userId": "u1", "actionType": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "invalid");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn batched_events_become_visible_after_flush() {
    let (base, state, shutdown_tx, handle) = start_server(AuditConfig::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/audit/events"))
        .json(&json!({ "userId": "u1", "actionType": "export" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

    let logs: Vec<Value> = client
        .get(format!("{base}/audit/logs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(logs.is_empty());

    state.audit.flush().await;

    let summary: Value = client
        .get(format!("{base}/audit/summary"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["total"], 1);
    assert_eq!(summary["pending"], 0);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
    state.audit.stop().await;
    state.cache.disconnect().await;
}

#[tokio::test]
async fn metrics_are_rendered() {
    concierge_server::metrics::init_metrics();
    let (base, state, shutdown_tx, handle) = start_server(AuditConfig::default()).await;
    let client = reqwest::Client::new();

    state.cache.set("k", "v", None).await.unwrap();
    let _: Option<String> = state.cache.get("k").await;

    let resp = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body = resp.text().await.unwrap();
    assert!(body.contains("concierge_build_info"));

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
