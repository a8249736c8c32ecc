//! Identifier newtypes for machines, signals, and jobs.

use serde::{Deserialize, Serialize};

use crate::{MuninnError, Result};

/// Identifier of a physical machine.
///
/// All per-machine cache state is partitioned by this key; there is no
/// cross-machine coupling anywhere in the core.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(String);

impl MachineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject blank identifiers before any downstream call is made.
    pub fn validate(&self) -> Result<()> {
        if self.0.trim().is_empty() {
            return Err(MuninnError::Validation("machine id is blank".into()));
        }
        Ok(())
    }
}

impl std::fmt::Display for MachineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for MachineId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a telemetry signal (a "column" of the machine's data).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalId(String);

impl SignalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject blank identifiers before any downstream call is made.
    pub fn validate(&self) -> Result<()> {
        if self.0.trim().is_empty() {
            return Err(MuninnError::Validation("signal id is blank".into()));
        }
        Ok(())
    }
}

impl std::fmt::Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SignalId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a production job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.trim().is_empty() {
            return Err(MuninnError::Validation("job id is blank".into()));
        }
        Ok(())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Cache key for per-(machine, signal) state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnKey {
    pub machine: MachineId,
    pub signal: SignalId,
}

impl ColumnKey {
    pub fn new(machine: impl Into<MachineId>, signal: impl Into<SignalId>) -> Self {
        Self {
            machine: machine.into(),
            signal: signal.into(),
        }
    }
}

impl From<String> for MachineId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for SignalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_machine_id_fails_validation() {
        assert!(MachineId::new("  ").validate().is_err());
        assert!(MachineId::new("").validate().is_err());
        assert!(MachineId::new("press-01").validate().is_ok());
    }

    #[test]
    fn blank_signal_id_fails_validation() {
        assert!(SignalId::new("").validate().is_err());
        assert!(SignalId::new("temperature").validate().is_ok());
    }
}
