//! Shared mock stores and fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use muninn::{
    ClockStore, ColumnChange, ColumnKey, Fetched, InProcessBus, JobId, JobStore, MachineId,
    Muninn, MuninnConfig, MuninnError, ProductionJob, Result, SignalId, TimeRange, TimeSample,
    TrendStore,
};

/// Reference instant: 2026-03-14 09:00 UTC, offset by `minute`.
pub fn ts(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

pub fn m(id: &str) -> MachineId {
    MachineId::new(id)
}

fn upstream_boom() -> MuninnError {
    MuninnError::Upstream {
        status: 500,
        message: "backend exploded".into(),
    }
}

// ============================================================================
// Mock stores
// ============================================================================

/// Scriptable time-series reader. Machines in `failing` error on every
/// call; machines absent from `earliest`/`samples` answer not-ready.
#[derive(Default)]
pub struct MockTrendStore {
    pub earliest: Mutex<HashMap<MachineId, DateTime<Utc>>>,
    pub samples: Mutex<HashMap<MachineId, Vec<TimeSample>>>,
    pub last_changes: Mutex<HashMap<ColumnKey, ColumnChange>>,
    pub failing: Mutex<HashSet<MachineId>>,
    pub fetch_calls: Mutex<Vec<(MachineId, Vec<SignalId>, Vec<TimeRange>)>>,
    pub last_change_calls: AtomicUsize,
}

impl MockTrendStore {
    pub fn seed_machine(&self, machine: &MachineId, earliest: DateTime<Utc>, rows: Vec<TimeSample>) {
        self.earliest.lock().unwrap().insert(machine.clone(), earliest);
        self.samples.lock().unwrap().insert(machine.clone(), rows);
    }

    pub fn seed_last_change(&self, key: ColumnKey, change: ColumnChange) {
        self.last_changes.lock().unwrap().insert(key, change);
    }

    pub fn fail(&self, machine: &MachineId) {
        self.failing.lock().unwrap().insert(machine.clone());
    }

    pub fn heal(&self, machine: &MachineId) {
        self.failing.lock().unwrap().remove(machine);
    }

    pub fn fetch_call_count(&self) -> usize {
        self.fetch_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TrendStore for MockTrendStore {
    async fn fetch_samples(
        &self,
        machine: &MachineId,
        signals: &[SignalId],
        ranges: &[TimeRange],
    ) -> Result<Fetched<Vec<TimeSample>>> {
        self.fetch_calls
            .lock()
            .unwrap()
            .push((machine.clone(), signals.to_vec(), ranges.to_vec()));
        if self.failing.lock().unwrap().contains(machine) {
            return Err(upstream_boom());
        }
        let stored = self.samples.lock().unwrap();
        let Some(rows) = stored.get(machine) else {
            return Ok(Fetched::NotReady);
        };
        let mut out = Vec::new();
        for row in rows {
            if !ranges.iter().any(|range| range.contains(row.timestamp)) {
                continue;
            }
            let mut sample = TimeSample::new(row.timestamp);
            for signal in signals {
                if let Some(value) = row.value(signal) {
                    sample.values.insert(signal.clone(), value.clone());
                }
            }
            out.push(sample);
        }
        Ok(Fetched::Ready(out))
    }

    async fn earliest_sample_time(&self, machine: &MachineId) -> Result<Fetched<DateTime<Utc>>> {
        if self.failing.lock().unwrap().contains(machine) {
            return Err(upstream_boom());
        }
        Ok(self.earliest.lock().unwrap().get(machine).copied().into())
    }

    async fn last_change(
        &self,
        machine: &MachineId,
        signal: &SignalId,
    ) -> Result<Fetched<ColumnChange>> {
        self.last_change_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(machine) {
            return Err(upstream_boom());
        }
        let key = ColumnKey {
            machine: machine.clone(),
            signal: signal.clone(),
        };
        Ok(self.last_changes.lock().unwrap().get(&key).cloned().into())
    }
}

/// Scriptable production registry.
#[derive(Default)]
pub struct MockJobStore {
    pub active: Mutex<HashMap<MachineId, ProductionJob>>,
    pub by_id: Mutex<HashMap<JobId, ProductionJob>>,
    pub failing: Mutex<HashSet<MachineId>>,
    pub active_calls: AtomicUsize,
    pub by_id_calls: AtomicUsize,
}

impl MockJobStore {
    pub fn seed_active(&self, job: ProductionJob) {
        self.active.lock().unwrap().insert(job.machine.clone(), job);
    }

    pub fn seed_by_id(&self, job: ProductionJob) {
        self.by_id.lock().unwrap().insert(job.id.clone(), job);
    }

    pub fn fail(&self, machine: &MachineId) {
        self.failing.lock().unwrap().insert(machine.clone());
    }

    pub fn heal(&self, machine: &MachineId) {
        self.failing.lock().unwrap().remove(machine);
    }
}

#[async_trait]
impl JobStore for MockJobStore {
    async fn active_job(&self, machine: &MachineId) -> Result<Fetched<ProductionJob>> {
        self.active_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(machine) {
            return Err(upstream_boom());
        }
        Ok(self.active.lock().unwrap().get(machine).cloned().into())
    }

    async fn job_by_id(&self, job: &JobId) -> Result<Fetched<ProductionJob>> {
        self.by_id_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.by_id.lock().unwrap().get(job).cloned().into())
    }
}

/// Scriptable clock service.
#[derive(Default)]
pub struct MockClockStore {
    pub times: Mutex<HashMap<MachineId, DateTime<Utc>>>,
    pub failing: Mutex<HashSet<MachineId>>,
    pub calls: AtomicUsize,
}

impl MockClockStore {
    pub fn set_time(&self, machine: &MachineId, time: DateTime<Utc>) {
        self.times.lock().unwrap().insert(machine.clone(), time);
    }

    pub fn fail(&self, machine: &MachineId) {
        self.failing.lock().unwrap().insert(machine.clone());
    }
}

#[async_trait]
impl ClockStore for MockClockStore {
    async fn server_time(&self, machine: &MachineId) -> Result<Fetched<DateTime<Utc>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(machine) {
            return Err(MuninnError::Transport("clock service unreachable".into()));
        }
        Ok(self.times.lock().unwrap().get(machine).copied().into())
    }
}

// ============================================================================
// Fixture
// ============================================================================

pub struct Fixture {
    pub trend: Arc<MockTrendStore>,
    pub jobs: Arc<MockJobStore>,
    pub clock: Arc<MockClockStore>,
    pub bus: Arc<InProcessBus>,
    pub muninn: Muninn,
}

/// Wire a Muninn instance over fresh mocks with the "temperature" and
/// "pressure" signals known.
pub fn fixture() -> Fixture {
    fixture_with(MuninnConfig::new().signals(["temperature", "pressure"]))
}

pub fn fixture_with(config: MuninnConfig) -> Fixture {
    let trend = Arc::new(MockTrendStore::default());
    let jobs = Arc::new(MockJobStore::default());
    let clock = Arc::new(MockClockStore::default());
    let bus = Arc::new(InProcessBus::new());

    let muninn = Muninn::builder()
        .trend_store(trend.clone())
        .job_store(jobs.clone())
        .clock_store(clock.clone())
        .bus(bus.clone())
        .config(config)
        .build()
        .expect("fixture wiring is complete");

    Fixture {
        trend,
        jobs,
        clock,
        bus,
        muninn,
    }
}

/// Let the spawned push listener tasks drain what was just published.
/// Only meaningful on the current-thread runtime, where yielding hands
/// the thread to every ready task.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
