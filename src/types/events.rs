//! Push notification payloads delivered by the message bus.
//!
//! The transport adapter (out of scope here) deserializes bus messages
//! into these types and publishes them on an
//! [`InProcessBus`](crate::bus::InProcessBus). Delivery is at-least-once
//! and may be mildly out of order; every handler in the core is
//! idempotent under redelivery.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MachineId, SignalId, SignalValue, TimeRange, TimeSample};

/// Whether a live tick is a full-minute sample or a sub-minute reading.
///
/// Minutely ticks are authoritative: they extend trend windows and anchor
/// column-change reconciliation. Sub-minute ticks are provisional and may
/// be rolled back by a later minutely tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickCadence {
    Minutely,
    SubMinute,
}

/// A live value tick for one machine.
///
/// `values: None` is the explicit "no current sample" marker (machine
/// offline or between jobs) — distinct from an empty value set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveTick {
    pub machine: MachineId,
    pub timestamp: DateTime<Utc>,
    pub cadence: TickCadence,
    pub values: Option<BTreeMap<SignalId, SignalValue>>,
}

impl LiveTick {
    pub fn minutely(machine: impl Into<MachineId>, timestamp: DateTime<Utc>) -> Self {
        Self {
            machine: machine.into(),
            timestamp,
            cadence: TickCadence::Minutely,
            values: Some(BTreeMap::new()),
        }
    }

    pub fn sub_minute(machine: impl Into<MachineId>, timestamp: DateTime<Utc>) -> Self {
        Self {
            machine: machine.into(),
            timestamp,
            cadence: TickCadence::SubMinute,
            values: Some(BTreeMap::new()),
        }
    }

    /// The explicit "no current sample" marker.
    pub fn empty(machine: impl Into<MachineId>, timestamp: DateTime<Utc>) -> Self {
        Self {
            machine: machine.into(),
            timestamp,
            cadence: TickCadence::Minutely,
            values: None,
        }
    }

    /// Builder-style value insertion, mainly for tests and adapters.
    pub fn with_value(mut self, signal: impl Into<SignalId>, value: impl Into<SignalValue>) -> Self {
        self.values
            .get_or_insert_with(BTreeMap::new)
            .insert(signal.into(), value.into());
        self
    }

    /// View of this tick as a [`TimeSample`], if it carries values.
    pub fn as_sample(&self) -> Option<TimeSample> {
        self.values.as_ref().map(|values| TimeSample {
            timestamp: self.timestamp,
            values: values.clone(),
        })
    }
}

/// Notification that already-recorded history was corrected upstream.
///
/// Names the machine, the affected sub-range, and the affected signals;
/// values outside that scope are untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricCorrection {
    pub machine: MachineId,
    pub range: TimeRange,
    pub signals: Vec<SignalId>,
}

impl HistoricCorrection {
    pub fn new(
        machine: impl Into<MachineId>,
        range: TimeRange,
        signals: impl IntoIterator<Item = SignalId>,
    ) -> Self {
        Self {
            machine: machine.into(),
            range,
            signals: signals.into_iter().collect(),
        }
    }
}

/// Notification that a machine's production periods changed (job started,
/// ended, or was re-booked). An empty payload carries no machine and is a
/// no-op for every cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionPeriodChange {
    pub machine: Option<MachineId>,
}

impl ProductionPeriodChange {
    pub fn for_machine(machine: impl Into<MachineId>) -> Self {
        Self {
            machine: Some(machine.into()),
        }
    }

    pub fn empty() -> Self {
        Self { machine: None }
    }
}
