//! Caching subsystem.
//!
//! Four independent cache components, all partitioned per machine (or
//! per machine+signal) with a single-writer-per-key discipline:
//!
//! - [`ClockResolver`] — per-machine current time, merged from the
//!   authoritative server clock and the push-fed snapshot clock.
//!
//! - [`TrendWindowCache`] — per-machine sliding window of minutely
//!   telemetry samples, kept warm by live ticks and spliced by historic
//!   corrections.
//!
//! - [`ActiveJobCache`] — the current open-ended production job per
//!   machine, plus a bounded LRU + TTL side cache for closed jobs by id.
//!
//! - [`ColumnChangeCache`] — last-changed timestamp per (machine,
//!   signal), with authoritative/provisional tick reconciliation.
//!
//! The clock, job, and column caches share one shape: construction
//! subscribes to push sources, a relevant event recomputes the derived
//! value in place when the payload suffices (otherwise the entry is
//! marked stale or cleared), reads collapse concurrent callers through a
//! [`CoalescingLoader`](crate::loader::CoalescingLoader), and every
//! confirmed new value is published on the cache's own
//! [`ValueChanges`](crate::bus::ValueChanges) stream. Failed push
//! handling is logged and swallowed at the listener boundary and never
//! publishes.

pub mod clock;
pub mod column;
pub mod job;
pub(crate) mod slots;
pub mod trend;

pub use clock::{ClockChanged, ClockResolver};
pub use column::{ColumnChangeCache, ColumnChanged};
pub use job::{ActiveJobCache, JobChanged};
pub use trend::{TrendWindow, TrendWindowCache};
