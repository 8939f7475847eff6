//! Storage trait for persisted audit events.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::AuditResult;
use crate::types::{AuditEvent, AuditQuery, AuditRecord};

/// The storage contract the audit writer persists through.
///
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```ignore
/// use concierge_audit::{AuditQuery, AuditStore, MemoryAuditStore};
///
/// async fn latest(store: &dyn AuditStore) -> usize {
///     store.find_all(&AuditQuery::default()).await.map(|r| r.len()).unwrap_or(0)
/// }
/// ```
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Inserts every event in one round trip, preserving order.
    ///
    /// Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns `AuditError::Unsupported` if the backend has no bulk path, in
    /// which case callers fall back to [`insert`](Self::insert).
    async fn bulk_insert(&self, events: &[AuditEvent]) -> AuditResult<u64>;

    /// Inserts one event and returns it with its assigned id.
    async fn insert(&self, event: &AuditEvent) -> AuditResult<AuditRecord>;

    /// Runs a filtered, sorted, paginated query.
    async fn find_all(&self, query: &AuditQuery) -> AuditResult<Vec<AuditRecord>>;

    /// Number of persisted events per event type.
    async fn count_by_event_type(&self) -> AuditResult<BTreeMap<String, u64>>;

    /// Whether [`bulk_insert`](Self::bulk_insert) is available.
    fn supports_bulk_insert(&self) -> bool {
        true
    }

    /// Returns the name of this backend (for logs).
    fn backend_name(&self) -> &'static str;
}

/// Type alias for a shared audit store.
pub type DynAuditStore = Arc<dyn AuditStore>;
