//! Active production job cache.
//!
//! Holds the current open-ended job per machine, fetched lazily and
//! marked stale (not cleared) by production-period-change pushes: a stale
//! entry keeps its last good value so a failed refresh can leave it in
//! place for the next attempt while the failed caller sees the error.
//!
//! Returned jobs with an open final range get a provisional end
//! synthesized from the clock resolver, applied to a copy — the stored
//! job is never mutated, and if the clock cannot resolve, the range is
//! returned open rather than failing the call.
//!
//! Closed jobs looked up by id are immutable and go through a separate
//! bounded LRU + TTL side cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::clock::ClockResolver;
use super::slots::Slots;
use crate::bus::{EventBus, ValueChanges};
use crate::config::MuninnConfig;
use crate::loader::{BatchFetch, CoalescingLoader, LoaderConfig};
use crate::telemetry;
use crate::types::{JobId, MachineId, ProductionJob, ProductionPeriodChange};
use crate::upstream::{Fetched, JobStore};
use crate::Result;

/// Outward notification: a machine's active job was refreshed to a
/// confirmed new value.
#[derive(Debug, Clone, PartialEq)]
pub struct JobChanged {
    pub machine: MachineId,
    pub job: ProductionJob,
}

/// Per-machine entry. `stale` keeps the last good value available for
/// retries while forcing the next read through a fresh fetch.
#[derive(Debug, Default)]
struct JobEntry {
    job: Option<ProductionJob>,
    stale: bool,
}

impl JobEntry {
    fn needs_fetch(&self) -> bool {
        self.job.is_none() || self.stale
    }
}

/// Coalesced active-job fetch. `None` carries the not-ready sentinel
/// through the loader.
struct ActiveJobFetch {
    store: Arc<dyn JobStore>,
}

#[async_trait]
impl BatchFetch for ActiveJobFetch {
    type Key = MachineId;
    type Value = Option<ProductionJob>;

    async fn fetch_many(
        &self,
        keys: Vec<MachineId>,
    ) -> Result<HashMap<MachineId, Result<Option<ProductionJob>>>> {
        let fetches = keys.iter().map(|machine| self.store.active_job(machine));
        let outcomes = join_all(fetches).await;
        Ok(keys
            .into_iter()
            .zip(outcomes)
            .map(|(machine, outcome)| (machine, outcome.map(Fetched::into_option)))
            .collect())
    }
}

/// Active job per machine, plus a closed-job-by-id side cache. See
/// module docs.
pub struct ActiveJobCache {
    slots: Slots<MachineId, JobEntry>,
    store: Arc<dyn JobStore>,
    clock: Arc<ClockResolver>,
    loader: CoalescingLoader<ActiveJobFetch>,
    closed_jobs: moka::future::Cache<JobId, ProductionJob>,
    changes: broadcast::Sender<JobChanged>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl ActiveJobCache {
    pub(crate) fn new(
        store: Arc<dyn JobStore>,
        clock: Arc<ClockResolver>,
        bus: &dyn EventBus,
        config: &MuninnConfig,
    ) -> Arc<Self> {
        let (changes, _) = broadcast::channel(config.changes_capacity);
        let cache = Arc::new(Self {
            slots: Slots::new(),
            store: Arc::clone(&store),
            clock,
            loader: CoalescingLoader::new(
                "job",
                Arc::new(ActiveJobFetch { store }),
                LoaderConfig {
                    reuse_results: false,
                    ..config.loader.clone()
                },
            ),
            closed_jobs: moka::future::Cache::builder()
                .max_capacity(config.jobs.closed_max_entries)
                .time_to_live(config.jobs.closed_ttl)
                .build(),
            changes,
            listeners: Mutex::new(Vec::new()),
        });

        let handle = spawn_period_change_listener(Arc::downgrade(&cache), bus.period_changes());
        cache
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .push(handle);
        cache
    }

    /// Current active job on `machine`.
    ///
    /// `Ok(None)` means the registry has no active job for this machine
    /// yet. A returned job with an open final range carries a provisional
    /// end equal to the machine's resolved current time; if the clock
    /// cannot resolve, the range is returned open instead.
    #[instrument(skip(self), fields(machine = %machine))]
    pub async fn get(&self, machine: &MachineId) -> Result<Option<ProductionJob>> {
        machine.validate()?;

        let slot = self.slots.slot(machine);
        let mut entry = slot.lock().await;

        if entry.needs_fetch() {
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "cache" => "job").increment(1);
            match self.loader.load(machine.clone()).await? {
                Some(job) => {
                    entry.job = Some(job.clone());
                    entry.stale = false;
                    if self
                        .changes
                        .send(JobChanged {
                            machine: machine.clone(),
                            job,
                        })
                        .is_ok()
                    {
                        metrics::counter!(telemetry::VALUE_CHANGES_TOTAL, "cache" => "job")
                            .increment(1);
                    }
                }
                // Not ready: no active job known yet, entry untouched.
                None => return Ok(None),
            }
        } else {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "cache" => "job").increment(1);
        }

        let job = entry.job.clone().expect("entry populated above");
        drop(entry);

        if job.ranges.last().is_some_and(|range| range.is_open()) {
            match self.clock.resolve(machine).await {
                Ok(now) => return Ok(Some(job.provisionally_ended(now))),
                Err(err) => {
                    debug!(machine = %machine, error = %err,
                        "clock unresolved; returning job with open range");
                }
            }
        }
        Ok(Some(job))
    }

    /// Look up a job by id. Closed jobs are immutable and served from a
    /// bounded LRU + TTL cache; open-ended jobs are never cached here.
    #[instrument(skip(self), fields(job = %id))]
    pub async fn job_by_id(&self, id: &JobId) -> Result<Option<ProductionJob>> {
        id.validate()?;

        if let Some(job) = self.closed_jobs.get(id).await {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "cache" => "job_by_id").increment(1);
            return Ok(Some(job));
        }
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "cache" => "job_by_id").increment(1);

        match self.store.job_by_id(id).await? {
            Fetched::Ready(job) => {
                if job.is_closed() {
                    self.closed_jobs.insert(id.clone(), job.clone()).await;
                }
                Ok(Some(job))
            }
            Fetched::NotReady => Ok(None),
        }
    }

    /// Subscribe to confirmed active-job changes.
    pub fn subscribe(&self) -> ValueChanges<JobChanged> {
        ValueChanges::new(self.changes.subscribe())
    }

    /// Abort the push listener tasks. Idempotent.
    pub(crate) fn shutdown(&self) {
        for handle in self
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .drain(..)
        {
            handle.abort();
        }
    }

    /// Mark the named machine's entry stale. Empty payloads and machines
    /// that were never read are no-ops.
    async fn apply_period_change(&self, change: &ProductionPeriodChange) -> bool {
        let Some(machine) = &change.machine else {
            return false;
        };
        let Some(slot) = self.slots.existing(machine) else {
            return false;
        };
        let mut entry = slot.lock().await;
        if entry.job.is_none() {
            return false;
        }
        entry.stale = true;
        true
    }
}

impl Drop for ActiveJobCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_period_change_listener(
    cache: Weak<ActiveJobCache>,
    mut changes: broadcast::Receiver<ProductionPeriodChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    let Some(cache) = cache.upgrade() else { break };
                    let outcome = if cache.apply_period_change(&change).await {
                        "applied"
                    } else {
                        "ignored"
                    };
                    metrics::counter!(telemetry::PUSH_EVENTS_TOTAL,
                        "cache" => "job", "outcome" => outcome)
                    .increment(1);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "job cache lagged behind period changes");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
