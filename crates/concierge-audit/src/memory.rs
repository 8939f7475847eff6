//! In-process audit store.
//!
//! Used when no database is configured and by tests. Records live for the
//! lifetime of the process, so the store can be capped: once `max_records`
//! rows are held, further events are skipped with a warning.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde_json::Value;
use tracing::warn;

use crate::error::{AuditError, AuditResult};
use crate::store::AuditStore;
use crate::types::{AuditEvent, AuditQuery, AuditRecord, SortField, SortOrder};

#[derive(Debug, Default)]
struct Records {
    rows: Vec<AuditRecord>,
    next_id: i64,
}

impl Records {
    fn push(&mut self, event: AuditEvent) -> AuditRecord {
        self.next_id += 1;
        let record = AuditRecord {
            id: self.next_id,
            event,
        };
        self.rows.push(record.clone());
        record
    }
}

/// Audit store backed by a `Vec` behind a lock.
#[derive(Debug)]
pub struct MemoryAuditStore {
    records: RwLock<Records>,
    bulk_insert: bool,
    max_records: Option<usize>,
    skipped: AtomicU64,
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Records::default()),
            bulk_insert: true,
            max_records: None,
            skipped: AtomicU64::new(0),
        }
    }

    /// Keep at most `limit` records; later events are skipped.
    #[must_use]
    pub fn with_max_records(mut self, limit: usize) -> Self {
        self.max_records = Some(limit);
        self
    }

    /// A store that only accepts single-row inserts.
    pub fn without_bulk_insert() -> Self {
        Self {
            bulk_insert: false,
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records in insertion order.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().rows.clone()
    }

    /// True once the record cap is reached.
    pub fn is_saturated(&self) -> bool {
        self.max_records
            .is_some_and(|limit| self.records.read().rows.len() >= limit)
    }

    /// Events refused because the store was full.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(AtomicOrdering::Relaxed)
    }

    fn capacity_left(&self, records: &Records) -> usize {
        self.max_records
            .map_or(usize::MAX, |limit| limit.saturating_sub(records.rows.len()))
    }

    fn record_skipped(&self, count: usize) {
        self.skipped.fetch_add(count as u64, AtomicOrdering::Relaxed);
        warn!(
            skipped = count,
            max_records = self.max_records.unwrap_or_default(),
            "Audit store saturated, events skipped"
        );
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn bulk_insert(&self, events: &[AuditEvent]) -> AuditResult<u64> {
        if !self.bulk_insert {
            return Err(AuditError::unsupported("bulk_insert"));
        }
        let mut records = self.records.write();
        let accepted = events.len().min(self.capacity_left(&records));
        for event in &events[..accepted] {
            records.push(event.clone());
        }
        drop(records);

        if accepted < events.len() {
            self.record_skipped(events.len() - accepted);
        }
        Ok(accepted as u64)
    }

    async fn insert(&self, event: &AuditEvent) -> AuditResult<AuditRecord> {
        let mut records = self.records.write();
        if self.capacity_left(&records) == 0 {
            drop(records);
            self.record_skipped(1);
            return Err(AuditError::saturated(self.max_records.unwrap_or_default()));
        }
        Ok(records.push(event.clone()))
    }

    async fn find_all(&self, query: &AuditQuery) -> AuditResult<Vec<AuditRecord>> {
        let records = self.records.read();
        let mut matches: Vec<&AuditRecord> = records
            .rows
            .iter()
            .filter(|r| matches_query(&r.event, query))
            .collect();

        matches.sort_by(|a, b| {
            let ordering = compare(a, b, query.sort_by).then(a.id.cmp(&b.id));
            match query.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        Ok(matches
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn count_by_event_type(&self) -> AuditResult<BTreeMap<String, u64>> {
        let mut counts = BTreeMap::new();
        for record in &self.records.read().rows {
            *counts.entry(record.event.event_type.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn supports_bulk_insert(&self) -> bool {
        self.bulk_insert
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

fn matches_query(event: &AuditEvent, query: &AuditQuery) -> bool {
    if let Some(event_type) = &query.event_type
        && &event.event_type != event_type
    {
        return false;
    }
    if let Some(user_id) = &query.user_id
        && event.user_id.as_ref() != Some(user_id)
    {
        return false;
    }
    if query.start_date.is_some_and(|start| event.timestamp < start) {
        return false;
    }
    if query.end_date.is_some_and(|end| event.timestamp > end) {
        return false;
    }
    if let Some(term) = &query.search {
        return contains_ignore_case(&event.event_type, term)
            || contains_ignore_case(&Value::Object(event.details.clone()).to_string(), term);
    }
    true
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn compare(a: &AuditRecord, b: &AuditRecord, field: SortField) -> Ordering {
    match field {
        SortField::Timestamp => a.event.timestamp.cmp(&b.event.timestamp),
        SortField::EventType => a.event.event_type.cmp(&b.event.event_type),
        SortField::UserId => a.event.user_id.cmp(&b.event.user_id),
        SortField::IpAddress => a.event.ip_address.cmp(&b.event.ip_address),
    }
}
