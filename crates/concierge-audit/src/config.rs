use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Audit writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Buffer events and write them in batches (false = write each event directly)
    #[serde(default = "default_batching_enabled")]
    pub batching_enabled: bool,

    /// Queue length that triggers an immediate flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Interval of the flush timer in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_batching_enabled() -> bool {
    true
}

fn default_batch_size() -> usize {
    50
}

fn default_flush_interval_ms() -> u64 {
    10_000 // 10 seconds
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            batching_enabled: default_batching_enabled(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl AuditConfig {
    /// Direct-mode configuration: every event is written immediately.
    pub fn direct() -> Self {
        Self {
            batching_enabled: false,
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("audit.batch_size must be > 0".into());
        }
        if self.flush_interval_ms == 0 {
            return Err("audit.flush_interval_ms must be > 0".into());
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuditConfig::default();
        assert!(config.batching_enabled);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(AuditConfig::default().with_batch_size(0).validate().is_err());
        assert!(
            AuditConfig::default()
                .with_flush_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
