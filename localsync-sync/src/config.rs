//! Configuration for the sync engine.

use crate::error::SyncError;
use crate::remote::{RetryAdvice, RetryPolicy};
use localsync_model::QueryPredicate;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

/// Default freshness window for delta syncs.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// A stored sync cursor older than this forces a full sync.
    pub sync_interval: Duration,
    /// Records requested per sync query page.
    pub sync_page_size: usize,
    /// Pagination stops once this many records were received for a model.
    pub sync_max_records: usize,
    /// Per-model filters restricting which remote records are synced.
    pub sync_expressions: HashMap<String, QueryPredicate>,
    /// Retry behaviour for transport failures and engine restarts.
    pub retry: RetryConfig,
    /// Maximum comparisons in one `or` group during cascade discovery.
    pub max_predicates_per_query: usize,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            sync_page_size: 1000,
            sync_max_records: 10_000,
            sync_expressions: HashMap::new(),
            retry: RetryConfig::default(),
            max_predicates_per_query: 950,
            event_capacity: 1024,
        }
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_sync_page_size(mut self, size: usize) -> Self {
        self.sync_page_size = size.max(1);
        self
    }

    pub fn with_sync_max_records(mut self, max: usize) -> Self {
        self.sync_max_records = max;
        self
    }

    /// Restricts syncing of one model to records matching `predicate`.
    pub fn with_sync_expression(mut self, model_name: &str, predicate: QueryPredicate) -> Self {
        self.sync_expressions.insert(model_name.to_string(), predicate);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_predicates_per_query(mut self, max: usize) -> Self {
        self.max_predicates_per_query = max.max(1);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay before jitter.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// A configuration that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Delay before retry number `attempt`; attempt 0 is the first try.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = base.min(self.max_delay.as_secs_f64());
        if self.add_jitter && delay > 0.0 {
            let jitter = rand::thread_rng().gen_range(0.0..0.25);
            Duration::from_secs_f64(delay * (1.0 + jitter))
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

impl RetryPolicy for RetryConfig {
    fn retry_advice(&self, error: &SyncError, attempt: u32) -> RetryAdvice {
        if !error.is_retryable() || attempt >= self.max_attempts {
            return RetryAdvice::DoNotRetry;
        }
        RetryAdvice::RetryAfter(self.delay_for_attempt(attempt))
    }
}
