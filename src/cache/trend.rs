//! Per-machine sliding trend window.
//!
//! Each machine's window holds its minutely telemetry samples over a
//! fixed wall-clock span ending at the machine's resolved "now". Windows
//! are populated cold in one bulk fetch, then kept warm in place: a
//! minutely live tick extends the window and evicts what fell out of the
//! span, and a historic-correction push re-fetches only the named signals
//! over the named sub-range and splices them in. Sub-minute ticks never
//! touch this cache.
//!
//! Machines are fully independent: one machine's failed refresh never
//! blocks or corrupts another machine's window, and a failed population
//! leaves nothing cached so the next read retries from scratch.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use super::clock::ClockResolver;
use super::slots::Slots;
use crate::bus::EventBus;
use crate::config::MuninnConfig;
use crate::loader::{BatchFetch, CoalescingLoader, LoaderConfig};
use crate::telemetry;
use crate::types::{
    HistoricCorrection, LiveTick, MachineId, SignalId, TickCadence, TimeRange, TimeSample,
};
use crate::upstream::{Fetched, TrendStore};
use crate::Result;

/// A machine's sliding window of minutely samples, ordered by timestamp
/// and unique by timestamp.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrendWindow {
    samples: VecDeque<TimeSample>,
}

impl TrendWindow {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &TimeSample> {
        self.samples.iter()
    }

    /// Timestamp of the oldest sample.
    pub fn from(&self) -> Option<DateTime<Utc>> {
        self.samples.front().map(|s| s.timestamp)
    }

    /// Timestamp of the newest sample.
    pub fn to(&self) -> Option<DateTime<Utc>> {
        self.samples.back().map(|s| s.timestamp)
    }

    /// Insert a sample at its sorted position. A sample at an already
    /// known timestamp replaces the old one, so redelivered ticks are
    /// idempotent and bounded out-of-order arrival lands correctly.
    fn insert(&mut self, sample: TimeSample) {
        match self
            .samples
            .binary_search_by_key(&sample.timestamp, |s| s.timestamp)
        {
            Ok(i) => self.samples[i] = sample,
            Err(i) => self.samples.insert(i, sample),
        }
    }

    /// Evict samples strictly older than `cutoff`.
    fn evict_before(&mut self, cutoff: DateTime<Utc>) {
        while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
            self.samples.pop_front();
        }
    }

    /// Overwrite the named signals at matching timestamps with corrected
    /// values. A named signal absent from the corrected sample is removed
    /// (the corrected history says it has no value there); other signals
    /// and other timestamps are untouched.
    fn splice(&mut self, signals: &[SignalId], corrected: Vec<TimeSample>) {
        for correction in corrected {
            let Ok(i) = self
                .samples
                .binary_search_by_key(&correction.timestamp, |s| s.timestamp)
            else {
                continue;
            };
            for signal in signals {
                match correction.values.get(signal) {
                    Some(value) => {
                        self.samples[i].values.insert(signal.clone(), value.clone());
                    }
                    None => {
                        self.samples[i].values.remove(signal);
                    }
                }
            }
        }
    }
}

/// Coalesced cold population: clock resolution, first-available lookup,
/// and the bulk sample fetch, per machine. `None` carries the not-ready
/// sentinel through the loader.
struct WindowPopulate {
    store: Arc<dyn TrendStore>,
    clock: Arc<ClockResolver>,
    signals: Vec<SignalId>,
    span: chrono::Duration,
}

impl WindowPopulate {
    async fn populate(&self, machine: &MachineId) -> Result<Option<TrendWindow>> {
        // Clock failure is fatal for this population attempt.
        let to = self.clock.resolve(machine).await?;

        let earliest = match self.store.earliest_sample_time(machine).await? {
            Fetched::Ready(t) => t,
            Fetched::NotReady => return Ok(None),
        };
        // A machine with less history than the span gets a shorter
        // window; that is normal, not an error.
        let from = (to - self.span).max(earliest);

        let range = TimeRange::closed(from, to);
        let samples = match self
            .store
            .fetch_samples(machine, &self.signals, std::slice::from_ref(&range))
            .await?
        {
            Fetched::Ready(samples) => samples,
            Fetched::NotReady => return Ok(None),
        };

        let mut window = TrendWindow::default();
        for sample in samples {
            window.insert(sample);
        }
        Ok(Some(window))
    }
}

#[async_trait]
impl BatchFetch for WindowPopulate {
    type Key = MachineId;
    type Value = Option<TrendWindow>;

    async fn fetch_many(
        &self,
        keys: Vec<MachineId>,
    ) -> Result<HashMap<MachineId, Result<Option<TrendWindow>>>> {
        let fetches = keys.iter().map(|machine| self.populate(machine));
        let outcomes = join_all(fetches).await;
        Ok(keys.into_iter().zip(outcomes).collect())
    }
}

/// Per-machine sliding window cache. See module docs.
pub struct TrendWindowCache {
    slots: Slots<MachineId, Option<TrendWindow>>,
    store: Arc<dyn TrendStore>,
    loader: CoalescingLoader<WindowPopulate>,
    span: chrono::Duration,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl TrendWindowCache {
    pub(crate) fn new(
        store: Arc<dyn TrendStore>,
        clock: Arc<ClockResolver>,
        bus: &dyn EventBus,
        config: &MuninnConfig,
    ) -> Arc<Self> {
        let populate = WindowPopulate {
            store: Arc::clone(&store),
            clock,
            signals: config.signals.clone(),
            span: config.trend.window_span,
        };
        let cache = Arc::new(Self {
            slots: Slots::new(),
            store,
            loader: CoalescingLoader::new(
                "trend",
                Arc::new(populate),
                LoaderConfig {
                    reuse_results: false,
                    ..config.loader.clone()
                },
            ),
            span: config.trend.window_span,
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

    /// Current window for `machine`.
    ///
    /// Populates on miss; `Ok(None)` means the upstream has no data for
    /// this machine yet (nothing is cached, the next call retries). Any
    /// population failure is raised and nothing is cached either.
    #[instrument(skip(self), fields(machine = %machine))]
    pub async fn get(&self, machine: &MachineId) -> Result<Option<TrendWindow>> {
        machine.validate()?;

        let slot = self.slots.slot(machine);
        let mut entry = slot.lock().await;

        if let Some(window) = entry.as_ref() {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "cache" => "trend").increment(1);
            return Ok(Some(window.clone()));
        }
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "cache" => "trend").increment(1);

        match self.loader.load(machine.clone()).await? {
            Some(window) => {
                *entry = Some(window.clone());
                Ok(Some(window))
            }
            None => Ok(None),
        }
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

    /// Apply a live tick. Only minutely ticks for currently cached
    /// machines count; a tick carrying the "no current sample" marker
    /// clears that machine's window entirely.
    async fn apply_tick(&self, tick: &LiveTick) -> bool {
        if tick.cadence != TickCadence::Minutely {
            return false;
        }
        let Some(slot) = self.slots.existing(&tick.machine) else {
            return false;
        };
        let mut entry = slot.lock().await;
        let Some(window) = entry.as_mut() else {
            return false;
        };

        match tick.as_sample() {
            None => {
                // Machine reports no current sample: the window is no
                // longer trustworthy. Cold re-populate on the next get.
                *entry = None;
            }
            Some(sample) => {
                window.insert(sample);
                if let Some(latest) = window.to() {
                    window.evict_before(latest - self.span);
                }
            }
        }
        true
    }

    /// Apply a historic correction: re-fetch only the named signals over
    /// the named sub-range and splice them into the cached window. A
    /// machine without a cached window is a pure no-op — it will be
    /// fetched fresh and correct on its next read.
    async fn apply_correction(&self, correction: &HistoricCorrection) -> Result<bool> {
        let Some(slot) = self.slots.existing(&correction.machine) else {
            return Ok(false);
        };
        let mut entry = slot.lock().await;
        if entry.is_none() {
            return Ok(false);
        }

        // The slot lock is held across the fetch: writes to one machine's
        // window are serialized, while other machines proceed untouched.
        // On failure the window is left exactly as it was.
        let fetched = self
            .store
            .fetch_samples(
                &correction.machine,
                &correction.signals,
                std::slice::from_ref(&correction.range),
            )
            .await?;

        match fetched {
            Fetched::Ready(corrected) => {
                if let Some(window) = entry.as_mut() {
                    window.splice(&correction.signals, corrected);
                }
                Ok(true)
            }
            Fetched::NotReady => Ok(false),
        }
    }
}

impl Drop for TrendWindowCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_tick_listener(
    cache: Weak<TrendWindowCache>,
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
                        "cache" => "trend", "outcome" => outcome)
                    .increment(1);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "trend cache lagged behind live ticks");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_correction_listener(
    cache: Weak<TrendWindowCache>,
    mut corrections: broadcast::Receiver<HistoricCorrection>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match corrections.recv().await {
                Ok(correction) => {
                    let Some(cache) = cache.upgrade() else { break };
                    let outcome = match cache.apply_correction(&correction).await {
                        Ok(true) => "applied",
                        Ok(false) => "ignored",
                        Err(err) => {
                            warn!(machine = %correction.machine, error = %err,
                                "historic correction refresh failed");
                            "failed"
                        }
                    };
                    metrics::counter!(telemetry::PUSH_EVENTS_TOTAL,
                        "cache" => "trend", "outcome" => outcome)
                    .increment(1);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "trend cache lagged behind corrections");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, minute, 0).unwrap()
    }

    fn sample(minute: u32, value: f64) -> TimeSample {
        TimeSample::new(ts(minute)).with_value("temperature", value)
    }

    #[test]
    fn insert_keeps_timestamp_order() {
        let mut window = TrendWindow::default();
        window.insert(sample(5, 1.0));
        window.insert(sample(3, 2.0));
        window.insert(sample(4, 3.0));

        let order: Vec<_> = window.samples().map(|s| s.timestamp).collect();
        assert_eq!(order, vec![ts(3), ts(4), ts(5)]);
    }

    #[test]
    fn insert_replaces_redelivered_timestamp() {
        let mut window = TrendWindow::default();
        window.insert(sample(3, 1.0));
        window.insert(sample(3, 9.0));

        assert_eq!(window.len(), 1);
        assert_eq!(
            window.samples().next().unwrap().value(&"temperature".into()),
            Some(&9.0.into())
        );
    }

    #[test]
    fn evict_drops_only_older_than_cutoff() {
        let mut window = TrendWindow::default();
        for minute in 0..5 {
            window.insert(sample(minute, f64::from(minute)));
        }
        window.evict_before(ts(2));

        assert_eq!(window.from(), Some(ts(2)));
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn splice_touches_only_named_signals_at_matching_timestamps() {
        let mut window = TrendWindow::default();
        window.insert(
            TimeSample::new(ts(1))
                .with_value("temperature", 20.0)
                .with_value("pressure", 5.0),
        );
        window.insert(TimeSample::new(ts(2)).with_value("temperature", 21.0));

        let corrected = vec![
            TimeSample::new(ts(1)).with_value("temperature", 99.0),
            // ts(7) is not in the window and must be ignored.
            TimeSample::new(ts(7)).with_value("temperature", 1.0),
        ];
        window.splice(&["temperature".into()], corrected);

        let first = window.samples().next().unwrap();
        assert_eq!(first.value(&"temperature".into()), Some(&99.0.into()));
        assert_eq!(first.value(&"pressure".into()), Some(&5.0.into()));
        assert_eq!(window.len(), 2);
        assert_eq!(
            window.samples().nth(1).unwrap().value(&"temperature".into()),
            Some(&21.0.into())
        );
    }
}
