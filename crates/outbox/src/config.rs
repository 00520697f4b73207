use std::time::Duration;

/// Tuning for the relay and its scheduled jobs.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Records claimed per publish tick.
    pub batch_size: usize,
    /// Delay between publish ticks.
    pub publish_interval: Duration,
    /// Delay between retry/dead-letter passes.
    pub retry_interval: Duration,
    /// Failed attempts after which a record is dead-lettered.
    pub max_retry: u32,
    /// Records re-queued per retry pass.
    pub retry_batch: usize,
    /// Records dead-lettered per retry pass.
    pub dead_letter_batch: usize,
    /// Base of the exponential backoff (`unit * 2^retry_count`).
    pub backoff_unit: Duration,
    /// Delay between stuck-claim recovery passes.
    pub recovery_interval: Duration,
    /// Age at which a `PROCESSING` claim is considered abandoned.
    pub processing_timeout: Duration,
    /// Claims reverted per recovery pass.
    pub timeout_batch: usize,
    /// How long published records are kept.
    pub retention: Duration,
    /// Delay between cleanup passes.
    pub cleanup_interval: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            publish_interval: Duration::from_secs(1),
            retry_interval: Duration::from_secs(5 * 60),
            max_retry: 5,
            retry_batch: 50,
            dead_letter_batch: 100,
            backoff_unit: Duration::from_secs(60),
            recovery_interval: Duration::from_secs(60),
            processing_timeout: Duration::from_secs(5 * 60),
            timeout_batch: 100,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OutboxConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_retry, 5);
        assert_eq!(config.retry_batch, 50);
        assert_eq!(config.processing_timeout, Duration::from_secs(300));
        assert_eq!(config.retention.as_secs() / 86_400, 7);
    }
}
