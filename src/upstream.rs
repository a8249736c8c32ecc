//! Contracts for the downstream backend services.
//!
//! The core consumes each backend (time-series reader, job registry,
//! clock service) only through these narrow async traits. The HTTP
//! clients implementing them live with the embedding application, which
//! keeps the caching tier testable with hand-written mocks.
//!
//! # Outcome model
//!
//! Every fetch returns `Result<Fetched<T>>`, keeping the three upstream
//! outcomes distinct in the type system:
//!
//! - `Ok(Fetched::Ready(value))` — the backend answered.
//! - `Ok(Fetched::NotReady)` — the known "no data exists yet" sentinel.
//!   Never an error; caches surface it as an absent value and stay
//!   untouched.
//! - `Err(_)` — the backend failed. Propagated to the caller, never
//!   cached.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::types::{ColumnChange, JobId, MachineId, ProductionJob, SignalId, TimeRange, TimeSample};

/// A fetch outcome that distinguishes "value" from "not ready yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched<T> {
    /// The backend answered with a value.
    Ready(T),
    /// The backend has no data for this key yet. Expected and transient;
    /// not an error.
    NotReady,
}

impl<T> Fetched<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Fetched::Ready(v) => Some(v),
            Fetched::NotReady => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        match self {
            Fetched::Ready(v) => Fetched::Ready(f(v)),
            Fetched::NotReady => Fetched::NotReady,
        }
    }
}

impl<T> From<Option<T>> for Fetched<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => Fetched::Ready(v),
            None => Fetched::NotReady,
        }
    }
}

// ============================================================================
// Time-series reader
// ============================================================================

/// Bulk access to recorded telemetry samples.
#[async_trait]
pub trait TrendStore: Send + Sync {
    /// Fetch all samples for `machine` restricted to `signals`, covering
    /// the given time ranges. Samples are expected in ascending timestamp
    /// order; the caller normalizes regardless.
    async fn fetch_samples(
        &self,
        machine: &MachineId,
        signals: &[SignalId],
        ranges: &[TimeRange],
    ) -> Result<Fetched<Vec<TimeSample>>>;

    /// Timestamp of the earliest sample ever recorded for `machine`.
    async fn earliest_sample_time(&self, machine: &MachineId) -> Result<Fetched<DateTime<Utc>>>;

    /// Authoritative last-changed state for one (machine, signal) pair.
    async fn last_change(
        &self,
        machine: &MachineId,
        signal: &SignalId,
    ) -> Result<Fetched<ColumnChange>>;
}

// ============================================================================
// Production registry
// ============================================================================

/// Access to the production job registry.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// The currently open-ended job on `machine`, if one is running.
    async fn active_job(&self, machine: &MachineId) -> Result<Fetched<ProductionJob>>;

    /// Look up a job by id, whether running or long finished.
    async fn job_by_id(&self, job: &JobId) -> Result<Fetched<ProductionJob>>;
}

// ============================================================================
// Clock service
// ============================================================================

/// Access to the authoritative per-machine server clock.
#[async_trait]
pub trait ClockStore: Send + Sync {
    /// The machine's current time according to the server.
    async fn server_time(&self, machine: &MachineId) -> Result<Fetched<DateTime<Utc>>>;
}
