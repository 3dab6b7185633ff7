use std::time::Duration;

/// Bounded retry for writes that lose an optimistic-concurrency race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff` before retrying.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Buffered events per watch subscription.
    pub watch_channel_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            watch_channel_capacity: 16,
            retry: RetryPolicy::default(),
        }
    }
}

impl RepositoryConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(capacity) = std::env::var("CONFIG_WATCH_CHANNEL_CAPACITY") {
            config.watch_channel_capacity = capacity.parse::<usize>().map_err(|e| {
                anyhow::anyhow!("Invalid CONFIG_WATCH_CHANNEL_CAPACITY '{capacity}': {e}")
            })?;
        }
        if let Ok(attempts) = std::env::var("CONFIG_RETRY_ATTEMPTS") {
            config.retry.max_attempts = attempts
                .parse::<u32>()
                .map_err(|e| anyhow::anyhow!("Invalid CONFIG_RETRY_ATTEMPTS '{attempts}': {e}"))?;
        }
        if let Ok(ms) = std::env::var("CONFIG_RETRY_BACKOFF_MS") {
            let ms = ms
                .parse::<u64>()
                .map_err(|e| anyhow::anyhow!("Invalid CONFIG_RETRY_BACKOFF_MS '{ms}': {e}"))?;
            config.retry.backoff = Duration::from_millis(ms);
        }

        Ok(config)
    }
}
