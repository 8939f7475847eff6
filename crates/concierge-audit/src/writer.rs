//! Bulk writer: persists a batch in one store call, or row by row when the
//! store has no bulk path.

use tracing::{debug, error, warn};

use crate::error::{AuditError, AuditResult};
use crate::store::DynAuditStore;
use crate::types::AuditEvent;

/// Result of writing one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub written: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct BulkWriter {
    store: DynAuditStore,
}

impl BulkWriter {
    pub fn new(store: DynAuditStore) -> Self {
        Self { store }
    }

    /// Persist `events` in order.
    ///
    /// Fails only when a bulk insert fails; per-row failures on the fallback
    /// path are logged and counted in [`BatchOutcome::failed`].
    pub async fn write_batch(&self, events: &[AuditEvent]) -> AuditResult<BatchOutcome> {
        if events.is_empty() {
            return Ok(BatchOutcome::default());
        }

        if self.store.supports_bulk_insert() {
            match self.store.bulk_insert(events).await {
                Ok(written) => {
                    debug!(
                        rows = written,
                        backend = self.store.backend_name(),
                        "Audit batch written"
                    );
                    return Ok(BatchOutcome {
                        written: written as usize,
                        failed: events.len().saturating_sub(written as usize),
                    });
                }
                Err(AuditError::Unsupported(op)) => {
                    warn!(operation = %op, "Bulk insert unsupported, writing rows one at a time");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(self.write_each(events).await)
    }

    async fn write_each(&self, events: &[AuditEvent]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for event in events {
            match self.store.insert(event).await {
                Ok(_) => outcome.written += 1,
                Err(e) => {
                    error!(
                        error = %e,
                        event_type = %event.event_type,
                        "Failed to store audit event"
                    );
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }
}
