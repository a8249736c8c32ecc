//! Column-change timestamp cache.
//!
//! Holds, per (machine, signal) pair, the timestamp at which that
//! signal's value last differed from its immediately preceding value.
//! Cold population fetches the authoritative (changed-at, value) pair;
//! after that every live tick updates the entry in place.
//!
//! # Reconciliation
//!
//! Minutely ticks are authoritative, sub-minute ticks provisional. A
//! provisional change is kept as an overlay on top of the authoritative
//! state; comparison against an incoming minutely tick is always made
//! against the last *authoritative* value, never merely the last tick.
//! So if a provisional change turns out not to survive the minute
//! boundary, the entry rolls back to the earlier authoritative
//! changed-timestamp instead of keeping the intermediate one.
//!
//! A historic correction naming a machine clears all of that machine's
//! column entries; the next read re-fetches.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use super::slots::Slots;
use crate::bus::{EventBus, ValueChanges};
use crate::config::MuninnConfig;
use crate::loader::{BatchFetch, CoalescingLoader, LoaderConfig};
use crate::telemetry;
use crate::types::{
    ColumnChange, ColumnKey, HistoricCorrection, LiveTick, SignalId, TickCadence,
};
use crate::upstream::{Fetched, TrendStore};
use crate::{MuninnError, Result};

/// Outward notification: a signal's effective last-changed state moved.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnChanged {
    pub key: ColumnKey,
    pub change: ColumnChange,
}

/// Per-(machine, signal) entry: the authoritative state plus an optional
/// provisional overlay from sub-minute ticks.
#[derive(Debug, Default)]
struct ColumnEntry {
    authoritative: Option<ColumnChange>,
    provisional: Option<ColumnChange>,
}

impl ColumnEntry {
    fn effective(&self) -> Option<&ColumnChange> {
        self.provisional.as_ref().or(self.authoritative.as_ref())
    }
}

/// Coalesced authoritative last-change fetch. `None` carries the
/// not-ready sentinel through the loader.
struct LastChangeFetch {
    store: Arc<dyn TrendStore>,
}

#[async_trait]
impl BatchFetch for LastChangeFetch {
    type Key = ColumnKey;
    type Value = Option<ColumnChange>;

    async fn fetch_many(
        &self,
        keys: Vec<ColumnKey>,
    ) -> Result<HashMap<ColumnKey, Result<Option<ColumnChange>>>> {
        let fetches = keys
            .iter()
            .map(|key| self.store.last_change(&key.machine, &key.signal));
        let outcomes = join_all(fetches).await;
        Ok(keys
            .into_iter()
            .zip(outcomes)
            .map(|(key, outcome)| (key, outcome.map(Fetched::into_option)))
            .collect())
    }
}

/// Last-changed timestamps per (machine, signal). See module docs.
pub struct ColumnChangeCache {
    slots: Slots<ColumnKey, ColumnEntry>,
    loader: CoalescingLoader<LastChangeFetch>,
    known_signals: HashSet<SignalId>,
    changes: broadcast::Sender<ColumnChanged>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl ColumnChangeCache {
    pub(crate) fn new(
        store: Arc<dyn TrendStore>,
        bus: &dyn EventBus,
        config: &MuninnConfig,
    ) -> Arc<Self> {
        let (changes, _) = broadcast::channel(config.changes_capacity);
        let cache = Arc::new(Self {
            slots: Slots::new(),
            loader: CoalescingLoader::new(
                "column",
                Arc::new(LastChangeFetch { store }),
                LoaderConfig {
                    reuse_results: false,
                    ..config.loader.clone()
                },
            ),
            known_signals: config.signals.iter().cloned().collect(),
            changes,
            listeners: Mutex::new(Vec::new()),
        });

        let mut listeners = cache.listeners.lock().expect("listener registry poisoned");
        listeners.push(spawn_tick_listener(
            Arc::downgrade(&cache),
            bus.live_ticks(),
        ));
        listeners.push(spawn_correction_listener(
            Arc::downgrade(&cache),
            bus.corrections(),
        ));
        drop(listeners);
        cache
    }

    /// Effective last-changed state for one (machine, signal) pair.
    ///
    /// `Ok(None)` means the upstream has no recorded change yet. Blank
    /// identifiers and signals outside the configured known set are
    /// rejected before any downstream call.
    #[instrument(skip(self), fields(machine = %key.machine, signal = %key.signal))]
    pub async fn get(&self, key: &ColumnKey) -> Result<Option<ColumnChange>> {
        self.validate(key)?;

        let slot = self.slots.slot(key);
        let mut entry = slot.lock().await;

        if let Some(change) = entry.effective() {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "cache" => "column").increment(1);
            return Ok(Some(change.clone()));
        }
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "cache" => "column").increment(1);

        match self.loader.load(key.clone()).await? {
            Some(change) => {
                entry.authoritative = Some(change.clone());
                entry.provisional = None;
                self.publish(key, &change);
                Ok(Some(change))
            }
            None => Ok(None),
        }
    }

    /// Subscribe to confirmed column-change updates.
    pub fn subscribe(&self) -> ValueChanges<ColumnChanged> {
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

    fn validate(&self, key: &ColumnKey) -> Result<()> {
        key.machine.validate()?;
        key.signal.validate()?;
        if !self.known_signals.contains(&key.signal) {
            return Err(MuninnError::Validation(format!(
                "signal '{}' is not a known trend signal",
                key.signal
            )));
        }
        Ok(())
    }

    fn publish(&self, key: &ColumnKey, change: &ColumnChange) {
        if self
            .changes
            .send(ColumnChanged {
                key: key.clone(),
                change: change.clone(),
            })
            .is_ok()
        {
            metrics::counter!(telemetry::VALUE_CHANGES_TOTAL, "cache" => "column").increment(1);
        }
    }

    /// Apply a live tick to every cached entry it names. Both cadences
    /// count; entries never read (or never cold-populated) stay lazy.
    async fn apply_tick(&self, tick: &LiveTick) -> bool {
        let Some(values) = &tick.values else {
            return false;
        };

        let mut applied = false;
        for (signal, value) in values {
            let key = ColumnKey {
                machine: tick.machine.clone(),
                signal: signal.clone(),
            };
            let Some(slot) = self.slots.existing(&key) else {
                continue;
            };
            let mut entry = slot.lock().await;

            let updated = match tick.cadence {
                TickCadence::Minutely => {
                    // Reconcile against the authoritative state only.
                    let Some(auth) = entry.authoritative.as_ref() else {
                        continue;
                    };
                    if *value == auth.value {
                        // Value unchanged at the minute boundary: any
                        // provisional overlay did not survive; roll back.
                        entry.provisional.take().is_some()
                    } else {
                        entry.authoritative =
                            Some(ColumnChange::new(tick.timestamp, value.clone()));
                        entry.provisional = None;
                        true
                    }
                }
                TickCadence::SubMinute => {
                    let Some(current) = entry.effective() else {
                        continue;
                    };
                    if *value == current.value {
                        false
                    } else {
                        entry.provisional =
                            Some(ColumnChange::new(tick.timestamp, value.clone()));
                        true
                    }
                }
            };

            if updated {
                applied = true;
                let change = entry.effective().expect("entry populated").clone();
                self.publish(&key, &change);
            }
        }
        applied
    }

    /// Clear every column entry for the corrected machine; the next read
    /// re-fetches the authoritative state. Never makes a downstream call.
    async fn apply_correction(&self, correction: &HistoricCorrection) -> bool {
        let cleared = self
            .slots
            .matching(|key| key.machine == correction.machine);
        if cleared.is_empty() {
            return false;
        }
        for (_, slot) in cleared {
            *slot.lock().await = ColumnEntry::default();
        }
        true
    }
}

impl Drop for ColumnChangeCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_tick_listener(
    cache: Weak<ColumnChangeCache>,
    mut ticks: broadcast::Receiver<LiveTick>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match ticks.recv().await {
                Ok(tick) => {
                    let Some(cache) = cache.upgrade() else { break };
                    let outcome = if cache.apply_tick(&tick).await {
                        "applied"
                    } else {
                        "ignored"
                    };
                    metrics::counter!(telemetry::PUSH_EVENTS_TOTAL,
                        "cache" => "column", "outcome" => outcome)
                    .increment(1);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "column cache lagged behind live ticks");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_correction_listener(
    cache: Weak<ColumnChangeCache>,
    mut corrections: broadcast::Receiver<HistoricCorrection>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match corrections.recv().await {
                Ok(correction) => {
                    let Some(cache) = cache.upgrade() else { break };
                    let outcome = if cache.apply_correction(&correction).await {
                        "applied"
                    } else {
                        "ignored"
                    };
                    metrics::counter!(telemetry::PUSH_EVENTS_TOTAL,
                        "cache" => "column", "outcome" => outcome)
                    .increment(1);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "column cache lagged behind corrections");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
