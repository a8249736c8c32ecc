//! Muninn - aggregation and caching tier for industrial telemetry.
//!
//! Muninn sits between a query API and a set of independent backend
//! services (time-series readers, metadata catalogs, job registries,
//! clock services) and exposes consistent, low-latency derived views per
//! physical machine: the current clock, a rolling trend window, the
//! active production job, and "when did this signal last change"
//! timestamps.
//!
//! The core is the caching and request-coalescing layer: many concurrent
//! reads for overlapping keys collapse into one downstream call per
//! distinct key, while asynchronous push notifications (live value ticks,
//! historic corrections, production-period changes) update cached state
//! in place without full re-fetches. Any individual upstream call may
//! fail or answer "not ready yet"; neither outcome ever corrupts cached
//! state or leaks across machines.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use muninn::{InProcessBus, Muninn, MuninnConfig};
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let bus = Arc::new(InProcessBus::new());
//!     let muninn = Muninn::builder()
//!         .trend_store(trend_client)   // impl TrendStore
//!         .job_store(job_client)       // impl JobStore
//!         .clock_store(clock_client)   // impl ClockStore
//!         .bus(bus.clone())
//!         .config(MuninnConfig::new().signals(["temperature", "pressure"]))
//!         .build()?;
//!
//!     // Transport adapter publishes decoded bus messages:
//!     // bus.publish_tick(tick);
//!
//!     let window = muninn.trend().get(&"press-01".into()).await?;
//!     let job = muninn.jobs().get(&"press-01".into()).await?;
//!
//!     muninn.shutdown();
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod hub;
pub mod loader;
pub mod telemetry;
pub mod types;
pub mod upstream;

// Re-export main types at crate root
pub use bus::{EventBus, InProcessBus, ValueChanges};
pub use cache::{
    ActiveJobCache, ClockChanged, ClockResolver, ColumnChangeCache, ColumnChanged, JobChanged,
    TrendWindow, TrendWindowCache,
};
pub use config::{JobCacheConfig, MuninnConfig, TrendConfig};
pub use error::{MuninnError, Result};
pub use hub::{Muninn, MuninnBuilder};
pub use loader::{BatchFetch, CoalescingLoader, LoaderConfig};
pub use upstream::{ClockStore, Fetched, JobStore, TrendStore};

// Re-export all data types
pub use types::{
    ColumnChange, ColumnKey, HistoricCorrection, JobId, LiveTick, MachineId, ProductionJob,
    ProductionPeriodChange, SignalId, SignalValue, TickCadence, TimeRange, TimeSample,
};
