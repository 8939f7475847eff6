use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const AUDIT_EVENTS_ENQUEUED_TOTAL: &str = "audit_events_enqueued_total";
    pub const AUDIT_EVENTS_PERSISTED_TOTAL: &str = "audit_events_persisted_total";
    pub const AUDIT_EVENTS_DROPPED_TOTAL: &str = "audit_events_dropped_total";
    pub const AUDIT_FLUSHES_TOTAL: &str = "audit_flushes_total";
    pub const AUDIT_QUEUE_DEPTH: &str = "audit_queue_depth";
}

pub fn record_enqueued() {
    counter!(names::AUDIT_EVENTS_ENQUEUED_TOTAL).increment(1);
}

pub fn record_persisted(count: u64) {
    counter!(names::AUDIT_EVENTS_PERSISTED_TOTAL).increment(count);
}

pub fn record_dropped(count: u64) {
    counter!(names::AUDIT_EVENTS_DROPPED_TOTAL).increment(count);
}

/// Record a completed flush; `trigger` is `size`, `timer` or `shutdown`.
pub fn record_flush(trigger: &'static str) {
    counter!(names::AUDIT_FLUSHES_TOTAL, "trigger" => trigger).increment(1);
}

pub fn set_queue_depth(depth: usize) {
    gauge!(names::AUDIT_QUEUE_DEPTH).set(depth as f64);
}
