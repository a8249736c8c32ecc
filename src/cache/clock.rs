//! Clock resolver: per-machine current time from two independent sources.
//!
//! Tracks two candidate times per machine: the authoritative server clock
//! (fetched lazily through [`ClockStore`]) and a telemetry-snapshot clock
//! derived from live tick timestamps (push-fed only, both cadences). The
//! resolved time is the more recent of the two when both are available,
//! otherwise whichever is available; with neither, resolution fails.
//!
//! The sources fail independently: a server-clock fetch failure is logged
//! and tolerated whenever the snapshot candidate can answer, and becomes
//! the caller's error only when no source is usable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use super::slots::Slots;
use crate::bus::{EventBus, ValueChanges};
use crate::config::MuninnConfig;
use crate::loader::{BatchFetch, CoalescingLoader, LoaderConfig};
use crate::telemetry;
use crate::types::{LiveTick, MachineId};
use crate::upstream::{ClockStore, Fetched};
use crate::{MuninnError, Result};

/// Outward notification: a machine's resolved time moved forward.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockChanged {
    pub machine: MachineId,
    pub time: DateTime<Utc>,
}

/// Per-machine candidate times.
#[derive(Debug, Default)]
struct ClockEntry {
    /// Authoritative server clock, fetched lazily.
    server: Option<DateTime<Utc>>,
    /// Snapshot clock derived from live tick timestamps.
    snapshot: Option<DateTime<Utc>>,
}

impl ClockEntry {
    fn resolved(&self) -> Option<DateTime<Utc>> {
        match (self.server, self.snapshot) {
            (Some(server), Some(snapshot)) => Some(server.max(snapshot)),
            (server, snapshot) => server.or(snapshot),
        }
    }
}

/// Coalesced server-time fetch. `None` carries the not-ready sentinel
/// through the loader.
struct ServerTimeFetch {
    store: Arc<dyn ClockStore>,
}

#[async_trait]
impl BatchFetch for ServerTimeFetch {
    type Key = MachineId;
    type Value = Option<DateTime<Utc>>;

    async fn fetch_many(
        &self,
        keys: Vec<MachineId>,
    ) -> Result<HashMap<MachineId, Result<Option<DateTime<Utc>>>>> {
        let fetches = keys.iter().map(|machine| self.store.server_time(machine));
        let outcomes = join_all(fetches).await;
        Ok(keys
            .into_iter()
            .zip(outcomes)
            .map(|(machine, outcome)| (machine, outcome.map(Fetched::into_option)))
            .collect())
    }
}

/// Resolves each machine's current time. See module docs.
pub struct ClockResolver {
    slots: Slots<MachineId, ClockEntry>,
    loader: CoalescingLoader<ServerTimeFetch>,
    changes: broadcast::Sender<ClockChanged>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl ClockResolver {
    pub(crate) fn new(
        store: Arc<dyn ClockStore>,
        bus: &dyn EventBus,
        config: &MuninnConfig,
    ) -> Arc<Self> {
        let (changes, _) = broadcast::channel(config.changes_capacity);
        let resolver = Arc::new(Self {
            slots: Slots::new(),
            loader: CoalescingLoader::new(
                "clock",
                Arc::new(ServerTimeFetch { store }),
                LoaderConfig {
                    reuse_results: false,
                    ..config.loader.clone()
                },
            ),
            changes,
            listeners: Mutex::new(Vec::new()),
        });

        let handle = spawn_tick_listener(Arc::downgrade(&resolver), bus.live_ticks());
        resolver
            .listeners
            .lock()
            .expect("listener registry poisoned")
            .push(handle);
        resolver
    }

    /// Resolve the machine's current time.
    ///
    /// Lazily fetches the server clock when it is not yet known;
    /// concurrent callers coalesce into one fetch. A fetch failure is
    /// tolerated (logged) when the snapshot candidate can answer.
    #[instrument(skip(self), fields(machine = %machine))]
    pub async fn resolve(&self, machine: &MachineId) -> Result<DateTime<Utc>> {
        machine.validate()?;

        let slot = self.slots.slot(machine);
        let mut entry = slot.lock().await;

        if entry.server.is_some() {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "cache" => "clock").increment(1);
        } else {
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "cache" => "clock").increment(1);
            match self.loader.load(machine.clone()).await {
                Ok(Some(time)) => entry.server = Some(time),
                // Not ready: no server clock yet, entry untouched.
                Ok(None) => {}
                Err(err) => {
                    if entry.snapshot.is_none() {
                        return Err(err);
                    }
                    warn!(machine = %machine, error = %err,
                        "server clock fetch failed; resolving from snapshot clock");
                }
            }
        }

        entry
            .resolved()
            .ok_or_else(|| MuninnError::ClockUnavailable(machine.clone()))
    }

    /// Subscribe to resolved-time changes.
    pub fn subscribe(&self) -> ValueChanges<ClockChanged> {
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

    /// Advance the snapshot candidate from a live tick. Both cadences
    /// count here; ticks carrying the "no current sample" marker and
    /// ticks older than the known snapshot are ignored.
    async fn apply_tick(&self, tick: &LiveTick) -> bool {
        if tick.values.is_none() {
            return false;
        }
        // The snapshot source is push-fed only, so its entry is seeded
        // from pushes rather than waiting for a first read.
        let slot = self.slots.slot(&tick.machine);
        let mut entry = slot.lock().await;
        if entry.snapshot.is_some_and(|known| known >= tick.timestamp) {
            return false;
        }
        entry.snapshot = Some(tick.timestamp);

        if let Some(resolved) = entry.resolved()
            && self
                .changes
                .send(ClockChanged {
                    machine: tick.machine.clone(),
                    time: resolved,
                })
                .is_ok()
        {
            metrics::counter!(telemetry::VALUE_CHANGES_TOTAL, "cache" => "clock").increment(1);
        }
        true
    }
}

impl Drop for ClockResolver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_tick_listener(
    resolver: Weak<ClockResolver>,
    mut ticks: broadcast::Receiver<LiveTick>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match ticks.recv().await {
                Ok(tick) => {
                    let Some(resolver) = resolver.upgrade() else {
                        break;
                    };
                    let outcome = if resolver.apply_tick(&tick).await {
                        "applied"
                    } else {
                        "ignored"
                    };
                    metrics::counter!(telemetry::PUSH_EVENTS_TOTAL,
                        "cache" => "clock", "outcome" => outcome)
                    .increment(1);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "clock resolver lagged behind live ticks");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
