//! Telemetry metric name constants.
//!
//! Centralised metric names for muninn operations. Consumers install their
//! own `metrics` recorder (e.g. prometheus, statsd); without a recorder
//! installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `cache` — cache component ("trend", "clock", "job", "column")
//! - `loader` — coalescing loader instance, named after its cache
//! - `outcome` — push handling result: "applied" | "ignored" | "failed"

/// Total cache hits.
///
/// Labels: `cache`.
pub const CACHE_HITS_TOTAL: &str = "muninn_cache_hits_total";

/// Total cache misses.
///
/// Labels: `cache`.
pub const CACHE_MISSES_TOTAL: &str = "muninn_cache_misses_total";

/// Total batches dispatched by coalescing loaders.
///
/// Labels: `loader`.
pub const LOADER_BATCHES_TOTAL: &str = "muninn_loader_batches_total";

/// Distinct keys per dispatched batch.
///
/// Labels: `loader`.
pub const LOADER_BATCH_SIZE: &str = "muninn_loader_batch_size";

/// Total callers that joined an already-pending key instead of triggering
/// their own downstream fetch.
///
/// Labels: `loader`.
pub const LOADER_COALESCED_TOTAL: &str = "muninn_loader_coalesced_callers_total";

/// Total push events handled, by outcome.
///
/// Labels: `cache`, `outcome` ("applied" | "ignored" | "failed").
pub const PUSH_EVENTS_TOTAL: &str = "muninn_push_events_total";

/// Total outward value-changed notifications published.
///
/// Labels: `cache`.
pub const VALUE_CHANGES_TOTAL: &str = "muninn_value_changes_total";

/// Downstream fetch duration in seconds.
///
/// Labels: `loader`.
pub const FETCH_DURATION_SECONDS: &str = "muninn_fetch_duration_seconds";
