//! Pending-event queue and the flush path that drains it.
//!
//! Mutations of the pending list happen under a `parking_lot` mutex that is
//! never held across an `.await`. Flushes are serialized by an async lock
//! taken before the snapshot, so batches reach the writer in creation order.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

use crate::metrics;
use crate::types::AuditEvent;
use crate::writer::{BatchOutcome, BulkWriter};

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Timer,
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Timer => "timer",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Counters describing the audit pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub enqueued: u64,
    pub persisted: u64,
    pub dropped: u64,
    pub flushes: u64,
    pub pending: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub enqueued: AtomicU64,
    pub persisted: AtomicU64,
    pub dropped: AtomicU64,
    pub flushes: AtomicU64,
}

impl Counters {
    pub fn add_persisted(&self, count: usize) {
        if count > 0 {
            self.persisted.fetch_add(count as u64, Ordering::Relaxed);
            metrics::record_persisted(count as u64);
        }
    }

    pub fn add_dropped(&self, count: usize) {
        if count > 0 {
            self.dropped.fetch_add(count as u64, Ordering::Relaxed);
            metrics::record_dropped(count as u64);
        }
    }
}

#[derive(Debug, Default)]
struct Pending {
    events: Vec<AuditEvent>,
    closed: bool,
}

/// FIFO buffer of events waiting for the bulk writer.
pub struct BatchQueue {
    pending: Mutex<Pending>,
    flush_lock: tokio::sync::Mutex<()>,
    writer: BulkWriter,
    batch_size: usize,
    pub(crate) counters: Counters,
}

impl BatchQueue {
    pub fn new(writer: BulkWriter, batch_size: usize) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            flush_lock: tokio::sync::Mutex::new(()),
            writer,
            batch_size: batch_size.max(1),
            counters: Counters::default(),
        }
    }

    /// Append `event`, flushing before returning when the batch is full.
    ///
    /// A closed queue hands the event back instead.
    pub async fn enqueue(&self, event: AuditEvent) -> Result<(), AuditEvent> {
        let depth = {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(event);
            }
            pending.events.push(event);
            pending.events.len()
        };

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::record_enqueued();
        metrics::set_queue_depth(depth);

        if depth >= self.batch_size {
            self.flush(FlushTrigger::Size).await;
        }
        Ok(())
    }

    /// Write everything queued so far. Returns the outcome of the write, or
    /// `None` when there was nothing to flush.
    ///
    /// A failed batch is logged and dropped, never re-queued.
    pub async fn flush(&self, trigger: FlushTrigger) -> Option<BatchOutcome> {
        let _guard = self.flush_lock.lock().await;

        let batch = std::mem::take(&mut self.pending.lock().events);
        if batch.is_empty() {
            return None;
        }
        metrics::set_queue_depth(self.len());

        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        metrics::record_flush(trigger.as_str());

        match self.writer.write_batch(&batch).await {
            Ok(outcome) => {
                self.counters.add_persisted(outcome.written);
                self.counters.add_dropped(outcome.failed);
                debug!(
                    trigger = trigger.as_str(),
                    written = outcome.written,
                    failed = outcome.failed,
                    "Audit queue flushed"
                );
                Some(outcome)
            }
            Err(e) => {
                self.counters.add_dropped(batch.len());
                error!(
                    error = %e,
                    trigger = trigger.as_str(),
                    dropped = batch.len(),
                    "Failed to write audit batch, events dropped"
                );
                Some(BatchOutcome {
                    written: 0,
                    failed: batch.len(),
                })
            }
        }
    }

    /// Refuse further events. Events already queued stay until flushed.
    pub fn close(&self) {
        self.pending.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    pub fn len(&self) -> usize {
        self.pending.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            pending: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAuditStore;
    use crate::types::AuditEventBuilder;
    use std::sync::Arc;

    fn event(kind: &str) -> AuditEvent {
        AuditEventBuilder::new(kind).build().unwrap()
    }

    fn queue(batch_size: usize) -> (Arc<MemoryAuditStore>, BatchQueue) {
        let store = Arc::new(MemoryAuditStore::new());
        let queue = BatchQueue::new(BulkWriter::new(store.clone()), batch_size);
        (store, queue)
    }

    #[tokio::test]
    async fn test_size_trigger_flushes_inside_enqueue() {
        let (store, queue) = queue(2);
        queue.enqueue(event("A")).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert!(store.is_empty());

        queue.enqueue(event("B")).await.unwrap();
        assert!(queue.is_empty());
        assert_eq!(store.len(), 2);
        assert_eq!(queue.stats().flushes, 1);
    }

    #[tokio::test]
    async fn test_flush_of_empty_queue_does_nothing() {
        let (_, queue) = queue(10);
        assert!(queue.flush(FlushTrigger::Timer).await.is_none());
        assert_eq!(queue.stats().flushes, 0);
    }

    #[tokio::test]
    async fn test_closed_queue_returns_event() {
        let (_, queue) = queue(10);
        queue.enqueue(event("A")).await.unwrap();
        queue.close();

        let rejected = queue.enqueue(event("B")).await.unwrap_err();
        assert_eq!(rejected.event_type, "B");

        // Events queued before close still drain
        let outcome = queue.flush(FlushTrigger::Shutdown).await.unwrap();
        assert_eq!(outcome.written, 1);
    }
}
