use std::convert::Infallible;
use std::net::IpAddr;

use axum::{
    Json,
    extract::{FromRequestParts, Query, State},
    http::{HeaderMap, Method, StatusCode, Uri, header, request::Parts},
    response::{IntoResponse, Response},
};
use concierge_audit::{AuditError, AuditLogParams, RequestContext};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let body = json!({
        "status": "ready",
        "cache": {
            "backend": state.cache.backend_mode(),
            "localEntries": state.cache.local_len(),
            "stats": state.cache.stats(),
        },
        "audit": {
            "batching": state.audit.is_batching(),
            "pending": state.audit.pending(),
            "stats": state.audit.stats(),
        },
    });
    (StatusCode::OK, Json(body))
}

pub async fn metrics() -> Response {
    match crate::metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}

// ---- Audit ----

pub async fn audit_logs(
    State(state): State<AppState>,
    Query(params): Query<AuditLogParams>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state.audit.get_audit_logs(&params).await?;
    Ok(Json(records))
}

pub async fn audit_summary(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let summary = state.audit.summary().await?;
    Ok(Json(summary))
}

/// Body of `POST /audit/events`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActionRequest {
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    pub action_type: String,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
}

/// Records a user action. Answers 201 with the stored record in direct mode
/// and 202 when the event was queued for the next flush.
pub async fn log_user_action(
    State(state): State<AppState>,
    ClientContext(context): ClientContext,
    Json(body): Json<UserActionRequest>,
) -> Result<Response, ApiError> {
    let record = state
        .audit
        .log_user_action(
            &body.user_id,
            body.username.as_deref(),
            &body.action_type,
            body.details,
            None,
            body.resource_type.as_deref(),
            body.resource_id.as_deref(),
            Some(&context),
        )
        .await?;

    Ok(match record {
        Some(record) => (StatusCode::CREATED, Json(record)).into_response(),
        None => (StatusCode::ACCEPTED, Json(json!({ "queued": true }))).into_response(),
    })
}

// ---- Request context ----

/// Client details of the current request, for audit events.
pub struct ClientContext(pub RequestContext);

impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(request_context(&parts.headers, &parts.method, &parts.uri)))
    }
}

/// Extract the audit request context from a request.
///
/// The client IP is the first `x-forwarded-for` entry, else `x-real-ip`.
pub fn request_context(headers: &HeaderMap, method: &Method, uri: &Uri) -> RequestContext {
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
        })
        .map(|ip| ip.to_string());

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    RequestContext {
        ip_address,
        user_agent,
        request_url: Some(uri.path().to_string()),
        http_method: Some(method.as_str().to_string()),
    }
}

// ---- Errors ----

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::InvalidArgument(msg) => Self::BadRequest(msg),
            err @ AuditError::Saturated { .. } => Self::Unavailable(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid"),
            Self::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "saturated"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "exception"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "code": code, "message": self.to_string() }))).into_response()
    }
}
