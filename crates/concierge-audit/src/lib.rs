//! Batched, asynchronous audit event writer for Concierge.
//!
//! [`AuditService`] validates events and either writes them immediately
//! (direct mode) or buffers them in a [`BatchQueue`] that is drained by a
//! [`BulkWriter`] when it fills up, when the [`FlushScheduler`] fires, and
//! once more on [`AuditService::stop`].
//!
//! Persistence goes through the [`AuditStore`] trait; [`MemoryAuditStore`]
//! is the in-process implementation.

pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;
pub mod writer;

pub use config::AuditConfig;
pub use error::{AuditError, AuditResult};
pub use memory::MemoryAuditStore;
pub use queue::{AuditStats, BatchQueue, FlushTrigger};
pub use scheduler::FlushScheduler;
pub use service::{AuditService, SYSTEM_ACTOR};
pub use store::{AuditStore, DynAuditStore};
pub use types::{
    AuditEvent, AuditEventBuilder, AuditLogParams, AuditQuery, AuditRecord, AuditSummary,
    DEFAULT_LIMIT, MAX_LIMIT, RequestContext, SortField, SortOrder,
};
pub use writer::{BatchOutcome, BulkWriter};
