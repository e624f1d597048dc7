//! Configuration for the sync engine.

use rand::Rng;
use std::time::Duration;

/// Resources fetched by the warm-up service unless configured otherwise.
pub const DEFAULT_ESSENTIAL_RESOURCES: &[&str] = &[
    "/api/auth/user",
    "/api/listings",
    "/api/categories",
    "/api/cart",
    "/api/orders",
    "/api/shipping-methods",
];

/// Query parameters that never participate in cache identity by default.
pub const DEFAULT_TRANSIENT_PARAMS: &[&str] = &["_", "ts", "nocache", "cacheBust"];

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum number of failed executions before a queued write is dropped.
    pub max_attempts: u32,
    /// Backoff between retries of the head operation.
    pub retry: RetryConfig,
    /// Resource addresses fetched by the warm-up service.
    pub essential_resources: Vec<String>,
    /// Query parameters excluded from cache keys.
    pub transient_query_params: Vec<String>,
    /// Age after which the expiry sweep removes a cache entry.
    pub cache_ttl: Option<Duration>,
    /// Delay between a reconnect and the cache-expiry sweep.
    pub sweep_delay: Duration,
    /// Whether to run warm-up after a reconnect drain empties the queue.
    pub refresh_on_reconnect: bool,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Connectivity assumed at startup, before any signal is observed.
    pub start_online: bool,
}

impl SyncConfig {
    /// Creates a new sync configuration with default settings.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            retry: RetryConfig::default(),
            essential_resources: DEFAULT_ESSENTIAL_RESOURCES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            transient_query_params: DEFAULT_TRANSIENT_PARAMS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            cache_ttl: Some(Duration::from_secs(24 * 60 * 60)),
            sweep_delay: Duration::from_millis(500),
            refresh_on_reconnect: true,
            event_capacity: 256,
            start_online: true,
        }
    }

    /// Sets the connectivity assumed at startup.
    pub fn with_start_online(mut self, online: bool) -> Self {
        self.start_online = online;
        self
    }

    /// Sets the maximum number of attempts per queued write.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the essential resources fetched on warm-up.
    pub fn with_essential_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.essential_resources = resources.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the query parameters excluded from cache keys.
    pub fn with_transient_query_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transient_query_params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the cache entry time-to-live (`None` disables expiry).
    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the delay before the post-reconnect expiry sweep.
    pub fn with_sweep_delay(mut self, delay: Duration) -> Self {
        self.sweep_delay = delay;
        self
    }

    /// Enables or disables the warm-up after a reconnect drain.
    pub fn with_refresh_on_reconnect(mut self, refresh: bool) -> Self {
        self.refresh_on_reconnect = refresh;
        self
    }

    /// Sets the event channel capacity.
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

/// Configuration for the delay between retries of a failing queued write.
///
/// Retries never happen inside a single drain pass: a failure ends the pass
/// and the worker schedules the next one after `delay_for_attempt`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that retries on the next scheduler turn.
    pub fn no_backoff() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier. Values below 1.0 or not finite count as
    /// 1.0 (constant delay).
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = clamp_multiplier(multiplier);
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay after `failed_attempts` failures (0 means none).
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(failed_attempts - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64()
            * clamp_multiplier(self.backoff_multiplier).powi(exponent);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        let total = if self.add_jitter && delay_secs > 0.0 {
            // Add up to 25% jitter
            delay_secs + delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0)
        } else {
            delay_secs
        };
        Duration::try_from_secs_f64(total).unwrap_or(self.max_delay)
    }
}

fn clamp_multiplier(multiplier: f64) -> f64 {
    if multiplier.is_finite() {
        multiplier.max(1.0)
    } else {
        1.0
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}
