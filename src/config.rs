//! Configuration for the Muninn caches.

use std::time::Duration;

use crate::loader::LoaderConfig;
use crate::types::SignalId;

/// Configuration for the trend window cache.
///
/// ```rust
/// # use muninn::TrendConfig;
/// let config = TrendConfig::new().window_span(chrono::Duration::minutes(30));
/// ```
#[derive(Debug, Clone)]
pub struct TrendConfig {
    /// Wall-clock span of each machine's sliding window. Default: 1 hour.
    pub window_span: chrono::Duration,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            window_span: chrono::Duration::hours(1),
        }
    }
}

impl TrendConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sliding window span.
    pub fn window_span(mut self, span: chrono::Duration) -> Self {
        self.window_span = span;
        self
    }
}

/// Configuration for the active job cache's closed-job side cache.
#[derive(Debug, Clone)]
pub struct JobCacheConfig {
    /// Maximum number of closed jobs kept by id. Default: 10,000.
    pub closed_max_entries: u64,
    /// Time-to-live for closed-job entries. Default: 1 hour.
    pub closed_ttl: Duration,
}

impl Default for JobCacheConfig {
    fn default() -> Self {
        Self {
            closed_max_entries: 10_000,
            closed_ttl: Duration::from_secs(3600),
        }
    }
}

impl JobCacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached closed jobs.
    pub fn closed_max_entries(mut self, n: u64) -> Self {
        self.closed_max_entries = n;
        self
    }

    /// Set the time-to-live for cached closed jobs.
    pub fn closed_ttl(mut self, ttl: Duration) -> Self {
        self.closed_ttl = ttl;
        self
    }
}

/// Top-level configuration passed to [`MuninnBuilder`](crate::MuninnBuilder).
///
/// ```rust
/// # use muninn::MuninnConfig;
/// # use std::time::Duration;
/// let config = MuninnConfig::new()
///     .signals(["temperature", "pressure"])
///     .coalescing_window(Duration::from_millis(5));
/// ```
#[derive(Debug, Clone)]
pub struct MuninnConfig {
    /// The fixed, known set of trend signals. Trend windows are populated
    /// for exactly these signals, and column-change reads for signals
    /// outside this set are rejected as validation errors.
    pub signals: Vec<SignalId>,
    pub trend: TrendConfig,
    pub loader: LoaderConfig,
    pub jobs: JobCacheConfig,
    /// Capacity of each cache's outward value-changed broadcast channel.
    /// Default: 256.
    pub changes_capacity: usize,
}

impl Default for MuninnConfig {
    fn default() -> Self {
        Self {
            signals: Vec::new(),
            trend: TrendConfig::default(),
            loader: LoaderConfig::default(),
            jobs: JobCacheConfig::default(),
            changes_capacity: 256,
        }
    }
}

impl MuninnConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the known trend signal set.
    pub fn signals<S: Into<SignalId>>(mut self, signals: impl IntoIterator<Item = S>) -> Self {
        self.signals = signals.into_iter().map(Into::into).collect();
        self
    }

    /// Set the trend window span.
    pub fn trend_window_span(mut self, span: chrono::Duration) -> Self {
        self.trend.window_span = span;
        self
    }

    /// Set the coalescing window used by all cache-internal loaders.
    pub fn coalescing_window(mut self, window: Duration) -> Self {
        self.loader.window = window;
        self
    }

    /// Set the closed-job side cache parameters.
    pub fn job_cache(mut self, jobs: JobCacheConfig) -> Self {
        self.jobs = jobs;
        self
    }

    /// Set the outward value-changed channel capacity.
    pub fn changes_capacity(mut self, capacity: usize) -> Self {
        self.changes_capacity = capacity;
        self
    }
}
