//! PostgreSQL implementation of the audit store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use sqlx_postgres::{PgPool, Postgres};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use concierge_audit::{AuditEvent, AuditQuery, AuditRecord, AuditResult, AuditStore};

use crate::config::PostgresConfig;
use crate::error::PostgresError;
use crate::pool::create_pool;

const AUDIT_TABLE: &str = "audit_logs";

const SELECT_COLUMNS: &str = "SELECT id, event_type, user_id, username, details, ip_address, \
     resource_type, resource_id, timestamp, user_agent, request_url, http_method FROM audit_logs";

/// A bind value of the audit SELECT, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
enum AuditParam {
    Text(String),
    Timestamp(DateTime<Utc>),
    Integer(i64),
}

struct SelectQuery {
    sql: String,
    params: Vec<AuditParam>,
}

type AuditRow = (
    i64,
    String,
    Option<String>,
    Option<String>,
    serde_json::Value,
    Option<String>,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// PostgreSQL implementation of audit storage.
#[derive(Clone)]
pub struct PostgresAuditStore {
    pool: PgPool,
    tables_created: Arc<DashSet<String>>,
}

impl PostgresAuditStore {
    /// Create a new PostgreSQL audit store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tables_created: Arc::new(DashSet::new()),
        }
    }

    /// Connect and create the audit table up front, so an unreachable or
    /// read-only database fails at startup instead of on the first flush.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, PostgresError> {
        let store = Self::new(create_pool(config).await?);
        store.ensure_tables().await?;
        Ok(store)
    }

    /// Ensure the audit table exists.
    #[instrument(skip(self))]
    async fn ensure_tables(&self) -> Result<(), PostgresError> {
        if self.tables_created.contains(AUDIT_TABLE) {
            return Ok(());
        }

        sqlx_core::query::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id BIGSERIAL PRIMARY KEY,
                event_type TEXT NOT NULL,
                user_id TEXT,
                username TEXT,
                details JSONB NOT NULL DEFAULT '{}',
                ip_address TEXT,
                resource_type TEXT,
                resource_id TEXT,
                timestamp TIMESTAMPTZ NOT NULL,
                user_agent TEXT,
                request_url TEXT,
                http_method TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_event_type ON audit_logs(event_type)",
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_user_id ON audit_logs(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp)",
        ] {
            sqlx_core::query::query(index).execute(&self.pool).await?;
        }

        info!("Created audit_logs table");
        self.tables_created.insert(AUDIT_TABLE.to_string());
        Ok(())
    }

    fn time_to_chrono(t: OffsetDateTime) -> DateTime<Utc> {
        DateTime::from_timestamp(t.unix_timestamp(), t.nanosecond()).unwrap_or_else(Utc::now)
    }

    fn chrono_to_time(t: DateTime<Utc>) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(t.timestamp_micros()) * 1000)
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
    }

    /// The event as the row stores it: timestamps keep microseconds only.
    fn stored_event(event: &AuditEvent) -> AuditEvent {
        AuditEvent {
            timestamp: Self::chrono_to_time(Self::time_to_chrono(event.timestamp)),
            ..event.clone()
        }
    }

    fn details_json(event: &AuditEvent) -> serde_json::Value {
        serde_json::Value::Object(event.details.clone())
    }

    fn row_to_record(row: AuditRow) -> AuditRecord {
        let (
            id,
            event_type,
            user_id,
            username,
            details,
            ip_address,
            resource_type,
            resource_id,
            timestamp,
            user_agent,
            request_url,
            http_method,
        ) = row;

        AuditRecord {
            id,
            event: AuditEvent {
                event_type,
                user_id,
                username,
                details: match details {
                    serde_json::Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                },
                ip_address,
                resource_type,
                resource_id,
                timestamp: Self::chrono_to_time(timestamp),
                user_agent,
                request_url,
                http_method,
            },
        }
    }

    /// Build the filtered, ordered, paginated SELECT for `query`.
    fn select_query(query: &AuditQuery) -> SelectQuery {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(event_type) = &query.event_type {
            params.push(AuditParam::Text(event_type.clone()));
            conditions.push(format!("event_type = ${}", params.len()));
        }
        if let Some(user_id) = &query.user_id {
            params.push(AuditParam::Text(user_id.clone()));
            conditions.push(format!("user_id = ${}", params.len()));
        }
        if let Some(term) = &query.search {
            params.push(AuditParam::Text(like_pattern(term)));
            let n = params.len();
            conditions.push(format!(
                "(event_type ILIKE ${n} OR details::text ILIKE ${n})"
            ));
        }
        if let Some(start) = query.start_date {
            params.push(AuditParam::Timestamp(Self::time_to_chrono(start)));
            conditions.push(format!("timestamp >= ${}", params.len()));
        }
        if let Some(end) = query.end_date {
            params.push(AuditParam::Timestamp(Self::time_to_chrono(end)));
            conditions.push(format!("timestamp <= ${}", params.len()));
        }

        let mut sql = String::from(SELECT_COLUMNS);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        // Column and direction come from closed enums, never from input text
        let direction = query.sort_order.as_sql();
        sql.push_str(&format!(
            " ORDER BY {} {direction}, id {direction}",
            query.sort_by.column()
        ));

        params.push(AuditParam::Integer(i64::from(query.limit)));
        sql.push_str(&format!(" LIMIT ${}", params.len()));
        params.push(AuditParam::Integer(i64::from(query.offset)));
        sql.push_str(&format!(" OFFSET ${}", params.len()));

        SelectQuery { sql, params }
    }
}

/// `%term%` with LIKE wildcards in `term` matched literally.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    async fn bulk_insert(&self, events: &[AuditEvent]) -> AuditResult<u64> {
        if events.is_empty() {
            return Ok(0);
        }
        self.ensure_tables().await?;

        // Build arrays for UNNEST batch insert
        let len = events.len();
        let mut event_types = Vec::with_capacity(len);
        let mut user_ids: Vec<Option<String>> = Vec::with_capacity(len);
        let mut usernames: Vec<Option<String>> = Vec::with_capacity(len);
        let mut details = Vec::with_capacity(len);
        let mut ip_addresses: Vec<Option<String>> = Vec::with_capacity(len);
        let mut resource_types: Vec<Option<String>> = Vec::with_capacity(len);
        let mut resource_ids: Vec<Option<String>> = Vec::with_capacity(len);
        let mut timestamps = Vec::with_capacity(len);
        let mut user_agents: Vec<Option<String>> = Vec::with_capacity(len);
        let mut request_urls: Vec<Option<String>> = Vec::with_capacity(len);
        let mut http_methods: Vec<Option<String>> = Vec::with_capacity(len);

        for event in events {
            event_types.push(event.event_type.clone());
            user_ids.push(event.user_id.clone());
            usernames.push(event.username.clone());
            details.push(Self::details_json(event));
            ip_addresses.push(event.ip_address.clone());
            resource_types.push(event.resource_type.clone());
            resource_ids.push(event.resource_id.clone());
            timestamps.push(Self::time_to_chrono(event.timestamp));
            user_agents.push(event.user_agent.clone());
            request_urls.push(event.request_url.clone());
            http_methods.push(event.http_method.clone());
        }

        // WITH ORDINALITY keeps ids in batch order
        let result = sqlx_core::query::query(
            "INSERT INTO audit_logs (\
                event_type, user_id, username, details, ip_address, \
                resource_type, resource_id, timestamp, user_agent, request_url, http_method\
            ) SELECT event_type, user_id, username, details, ip_address, \
                resource_type, resource_id, timestamp, user_agent, request_url, http_method \
            FROM UNNEST(\
                $1::text[], $2::text[], $3::text[], $4::jsonb[], $5::text[], \
                $6::text[], $7::text[], $8::timestamptz[], $9::text[], $10::text[], $11::text[]\
            ) WITH ORDINALITY AS batch(\
                event_type, user_id, username, details, ip_address, \
                resource_type, resource_id, timestamp, user_agent, request_url, http_method, ord\
            ) ORDER BY ord",
        )
        .bind(&event_types)
        .bind(&user_ids)
        .bind(&usernames)
        .bind(&details)
        .bind(&ip_addresses)
        .bind(&resource_types)
        .bind(&resource_ids)
        .bind(&timestamps)
        .bind(&user_agents)
        .bind(&request_urls)
        .bind(&http_methods)
        .execute(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        let written = result.rows_affected();
        debug!(rows = written, "Bulk inserted audit events");
        Ok(written)
    }

    async fn insert(&self, event: &AuditEvent) -> AuditResult<AuditRecord> {
        self.ensure_tables().await?;

        let (id,): (i64,) = sqlx_core::query_as::query_as(
            r#"
            INSERT INTO audit_logs (
                event_type, user_id, username, details, ip_address, resource_type,
                resource_id, timestamp, user_agent, request_url, http_method
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(&event.event_type)
        .bind(&event.user_id)
        .bind(&event.username)
        .bind(Self::details_json(event))
        .bind(&event.ip_address)
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(Self::time_to_chrono(event.timestamp))
        .bind(&event.user_agent)
        .bind(&event.request_url)
        .bind(&event.http_method)
        .fetch_one(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        debug!(audit_id = id, event_type = %event.event_type, "Inserted audit event");
        Ok(AuditRecord {
            id,
            event: Self::stored_event(event),
        })
    }

    async fn find_all(&self, query: &AuditQuery) -> AuditResult<Vec<AuditRecord>> {
        self.ensure_tables().await?;

        let select = Self::select_query(query);
        let mut db_query = sqlx_core::query_as::query_as::<Postgres, AuditRow>(&select.sql);
        for param in select.params {
            db_query = match param {
                AuditParam::Text(value) => db_query.bind(value),
                AuditParam::Timestamp(value) => db_query.bind(value),
                AuditParam::Integer(value) => db_query.bind(value),
            };
        }

        let rows = db_query
            .fetch_all(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        Ok(rows.into_iter().map(Self::row_to_record).collect())
    }

    async fn count_by_event_type(&self) -> AuditResult<BTreeMap<String, u64>> {
        self.ensure_tables().await?;

        let rows: Vec<(String, i64)> = sqlx_core::query_as::query_as(
            "SELECT event_type, COUNT(*) FROM audit_logs GROUP BY event_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(PostgresError::from)?;

        Ok(rows
            .into_iter()
            .map(|(event_type, count)| (event_type, count.max(0) as u64))
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
