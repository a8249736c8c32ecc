//! Telemetry sample types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SignalId;

/// A single telemetry reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<f64> for SignalValue {
    fn from(v: f64) -> Self {
        SignalValue::Float(v)
    }
}

impl From<i64> for SignalValue {
    fn from(v: i64) -> Self {
        SignalValue::Integer(v)
    }
}

impl From<&str> for SignalValue {
    fn from(v: &str) -> Self {
        SignalValue::Text(v.to_string())
    }
}

impl From<bool> for SignalValue {
    fn from(v: bool) -> Self {
        SignalValue::Bool(v)
    }
}

/// One timestamped row of signal values for a machine.
///
/// Samples inside a trend window are ordered by timestamp and unique by
/// timestamp. Signals are keyed in a `BTreeMap` so iteration order is
/// stable for comparisons and serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSample {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<SignalId, SignalValue>,
}

impl TimeSample {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    /// Builder-style value insertion, mainly for tests and adapters.
    pub fn with_value(mut self, signal: impl Into<SignalId>, value: impl Into<SignalValue>) -> Self {
        self.values.insert(signal.into(), value.into());
        self
    }

    pub fn value(&self, signal: &SignalId) -> Option<&SignalValue> {
        self.values.get(signal)
    }
}

/// Authoritative "last changed" state for one (machine, signal) pair:
/// the timestamp at which the signal's value last differed from its
/// immediately preceding value, and that value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnChange {
    pub changed_at: DateTime<Utc>,
    pub value: SignalValue,
}

impl ColumnChange {
    pub fn new(changed_at: DateTime<Utc>, value: impl Into<SignalValue>) -> Self {
        Self {
            changed_at,
            value: value.into(),
        }
    }
}
