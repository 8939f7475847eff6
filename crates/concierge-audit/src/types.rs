//! Audit event model and query parameters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::{AuditError, AuditResult};

/// Default page size for audit log queries.
pub const DEFAULT_LIMIT: u32 = 100;

/// Largest page size a query may request.
pub const MAX_LIMIT: u32 = 1000;

/// A single audit event.
///
/// Created through [`AuditEventBuilder`], which guarantees a non-empty
/// `event_type` and stamps `timestamp` at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_type: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub details: Map<String, Value>,
    pub ip_address: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub user_agent: Option<String>,
    pub request_url: Option<String>,
    pub http_method: Option<String>,
}

/// A persisted audit event with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// HTTP request attributes attached to user actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_url: Option<String>,
    pub http_method: Option<String>,
}

/// Builder for creating audit events
#[derive(Debug, Clone, Default)]
pub struct AuditEventBuilder {
    event_type: String,
    user_id: Option<String>,
    username: Option<String>,
    details: Option<Value>,
    ip_address: Option<String>,
    resource_type: Option<String>,
    resource_id: Option<String>,
    user_agent: Option<String>,
    request_url: Option<String>,
    http_method: Option<String>,
}

impl AuditEventBuilder {
    /// Create a new audit event builder
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Default::default()
        }
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the details object. `null` is treated as an empty object.
    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Set the target resource
    pub fn resource(mut self, resource_type: Option<String>, resource_id: Option<String>) -> Self {
        self.resource_type = resource_type;
        self.resource_id = resource_id;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Copy request attributes from `context`; an IP already set is kept.
    pub fn request_context(mut self, context: &RequestContext) -> Self {
        if self.ip_address.is_none() {
            self.ip_address = context.ip_address.clone();
        }
        self.user_agent = context.user_agent.clone().or(self.user_agent);
        self.request_url = context.request_url.clone().or(self.request_url);
        self.http_method = context.http_method.clone().or(self.http_method);
        self
    }

    /// Validate and stamp the event.
    pub fn build(self) -> AuditResult<AuditEvent> {
        if self.event_type.trim().is_empty() {
            return Err(AuditError::invalid_argument("event_type is required"));
        }

        let details = match self.details {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(AuditError::invalid_argument("details must be a JSON object"));
            }
        };

        Ok(AuditEvent {
            event_type: self.event_type,
            user_id: self.user_id,
            username: self.username,
            details,
            ip_address: self.ip_address,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            timestamp: OffsetDateTime::now_utc(),
            user_agent: self.user_agent,
            request_url: self.request_url,
            http_method: self.http_method,
        })
    }
}

/// Column an audit log query can be sorted by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    Timestamp,
    EventType,
    UserId,
    IpAddress,
}

impl SortField {
    /// Parse the public field name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "timestamp" => Some(Self::Timestamp),
            "eventType" => Some(Self::EventType),
            "userId" => Some(Self::UserId),
            "ipAddress" => Some(Self::IpAddress),
            _ => None,
        }
    }

    /// Column name in the `audit_logs` table.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::EventType => "event_type",
            Self::UserId => "user_id",
            Self::IpAddress => "ip_address",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(order: &str) -> Option<Self> {
        if order.eq_ignore_ascii_case("asc") {
            Some(Self::Asc)
        } else if order.eq_ignore_ascii_case("desc") {
            Some(Self::Desc)
        } else {
            None
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Raw audit log query as received from callers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogParams {
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    /// Case-insensitive text matched against the event type and details.
    pub search: Option<String>,
}

/// Normalized audit log query handed to stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub start_date: Option<OffsetDateTime>,
    pub end_date: Option<OffsetDateTime>,
    pub limit: u32,
    pub offset: u32,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub search: Option<String>,
}

impl Default for AuditQuery {
    fn default() -> Self {
        AuditLogParams::default().normalize()
    }
}

impl AuditLogParams {
    /// Apply defaults and bounds.
    ///
    /// Non-positive limits use the default, limits above [`MAX_LIMIT`] are
    /// capped, and unknown sort options fall back to newest first.
    pub fn normalize(&self) -> AuditQuery {
        let limit = match self.limit {
            Some(limit) if limit > 0 => limit.min(i64::from(MAX_LIMIT)) as u32,
            _ => DEFAULT_LIMIT,
        };
        let offset = self
            .offset
            .filter(|offset| *offset > 0)
            .map_or(0, |offset| offset.min(i64::from(u32::MAX)) as u32);

        AuditQuery {
            event_type: non_empty(&self.event_type),
            user_id: non_empty(&self.user_id),
            start_date: self.start_date,
            end_date: self.end_date,
            limit,
            offset,
            sort_by: self
                .sort_by
                .as_deref()
                .and_then(SortField::parse)
                .unwrap_or_default(),
            sort_order: self
                .sort_order
                .as_deref()
                .and_then(SortOrder::parse)
                .unwrap_or_default(),
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|term| !term.is_empty())
                .map(String::from),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// Persisted totals reported by [`AuditService::summary`](crate::AuditService::summary).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub total: u64,
    pub by_event_type: std::collections::BTreeMap<String, u64>,
    pub pending: usize,
}
