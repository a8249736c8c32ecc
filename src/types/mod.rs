//! Public types for the Muninn API.

mod events;
mod ids;
mod job;
mod sample;

pub use events::{HistoricCorrection, LiveTick, ProductionPeriodChange, TickCadence};
pub use ids::{ColumnKey, JobId, MachineId, SignalId};
pub use job::{ProductionJob, TimeRange};
pub use sample::{ColumnChange, SignalValue, TimeSample};
