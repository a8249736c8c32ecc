//! Muninn facade and builder.

use std::sync::Arc;

use crate::bus::EventBus;
use crate::cache::{ActiveJobCache, ClockResolver, ColumnChangeCache, TrendWindowCache};
use crate::config::MuninnConfig;
use crate::upstream::{ClockStore, JobStore, TrendStore};
use crate::{MuninnError, Result};

/// The assembled aggregation tier: one instance per process (or per
/// logical session), wired to the upstream stores and the push channel,
/// torn down explicitly with [`shutdown`](Muninn::shutdown).
///
/// All state is in-memory and rebuilt on demand; a fresh instance starts
/// cold and warms lazily.
pub struct Muninn {
    clock: Arc<ClockResolver>,
    trend: Arc<TrendWindowCache>,
    jobs: Arc<ActiveJobCache>,
    columns: Arc<ColumnChangeCache>,
}

impl Muninn {
    /// Create a new builder for wiring a Muninn instance.
    pub fn builder() -> MuninnBuilder {
        MuninnBuilder::new()
    }

    /// Per-machine current time resolution.
    pub fn clock(&self) -> &Arc<ClockResolver> {
        &self.clock
    }

    /// Per-machine sliding trend windows.
    pub fn trend(&self) -> &Arc<TrendWindowCache> {
        &self.trend
    }

    /// Active jobs per machine and closed-job lookups.
    pub fn jobs(&self) -> &Arc<ActiveJobCache> {
        &self.jobs
    }

    /// Last-changed timestamps per (machine, signal).
    pub fn columns(&self) -> &Arc<ColumnChangeCache> {
        &self.columns
    }

    /// Tear down all push listener tasks deterministically. Reads keep
    /// working afterwards but no push event updates any cache. Idempotent;
    /// also performed on drop.
    pub fn shutdown(&self) {
        self.clock.shutdown();
        self.trend.shutdown();
        self.jobs.shutdown();
        self.columns.shutdown();
    }
}

/// Builder for wiring [`Muninn`] instances.
///
/// ```rust,ignore
/// let bus = Arc::new(InProcessBus::new());
/// let muninn = Muninn::builder()
///     .trend_store(trend_client)
///     .job_store(job_client)
///     .clock_store(clock_client)
///     .bus(bus.clone())
///     .config(MuninnConfig::new().signals(["temperature", "pressure"]))
///     .build()?;
/// ```
pub struct MuninnBuilder {
    trend_store: Option<Arc<dyn TrendStore>>,
    job_store: Option<Arc<dyn JobStore>>,
    clock_store: Option<Arc<dyn ClockStore>>,
    bus: Option<Arc<dyn EventBus>>,
    config: MuninnConfig,
}

impl MuninnBuilder {
    pub fn new() -> Self {
        Self {
            trend_store: None,
            job_store: None,
            clock_store: None,
            bus: None,
            config: MuninnConfig::default(),
        }
    }

    /// Set the time-series reader client.
    pub fn trend_store(mut self, store: Arc<dyn TrendStore>) -> Self {
        self.trend_store = Some(store);
        self
    }

    /// Set the production registry client.
    pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    /// Set the clock service client.
    pub fn clock_store(mut self, store: Arc<dyn ClockStore>) -> Self {
        self.clock_store = Some(store);
        self
    }

    /// Set the push notification channel.
    pub fn bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Set the cache configuration.
    pub fn config(mut self, config: MuninnConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the wired instance. Requires all three stores, the bus, and
    /// a non-empty known signal set; must run inside a tokio runtime (the
    /// caches spawn their push listener tasks here).
    pub fn build(self) -> Result<Muninn> {
        let trend_store = self
            .trend_store
            .ok_or_else(|| MuninnError::Configuration("no trend store configured".into()))?;
        let job_store = self
            .job_store
            .ok_or_else(|| MuninnError::Configuration("no job store configured".into()))?;
        let clock_store = self
            .clock_store
            .ok_or_else(|| MuninnError::Configuration("no clock store configured".into()))?;
        let bus = self
            .bus
            .ok_or_else(|| MuninnError::Configuration("no event bus configured".into()))?;
        if self.config.signals.is_empty() {
            return Err(MuninnError::Configuration(
                "no trend signals configured".into(),
            ));
        }

        let clock = ClockResolver::new(clock_store, bus.as_ref(), &self.config);
        let trend = TrendWindowCache::new(
            Arc::clone(&trend_store),
            Arc::clone(&clock),
            bus.as_ref(),
            &self.config,
        );
        let jobs = ActiveJobCache::new(job_store, Arc::clone(&clock), bus.as_ref(), &self.config);
        let columns = ColumnChangeCache::new(trend_store, bus.as_ref(), &self.config);

        Ok(Muninn {
            clock,
            trend,
            jobs,
            columns,
        })
    }
}

impl Default for MuninnBuilder {
    fn default() -> Self {
        Self::new()
    }
}
