//! Generic per-key request coalescing.
//!
//! [`CoalescingLoader`] turns N concurrent single-key reads into one
//! downstream call per distinct key set: every key requested within one
//! short coalescing window is merged into exactly one
//! [`BatchFetch::fetch_many`] call, and callers requesting the same key
//! within that window share the one result without a duplicate call.
//!
//! # Failure semantics
//!
//! Per-key failures reported inside the batch result are delivered only
//! to that key's waiters; other keys in the same batch complete normally.
//! If `fetch_many` itself fails (transport-level), every pending waiter
//! in the batch receives a clone of the same error. The loader never
//! retries — retry policy belongs to callers, or is absent (fail fast).
//!
//! # Cancellation
//!
//! Dropping a `load()` future abandons only that waiter. The dispatched
//! batch still runs to completion and serves the remaining waiters, so a
//! cancelled read never corrupts or starves anyone else.
//!
//! # Memoization
//!
//! With [`LoaderConfig::reuse_results`] enabled (the default), successful
//! per-key results are memoized for the life of the loader instance —
//! the request-scoped dataloader idiom. A fresh instance starts empty, so
//! there is no accidental cross-request memoization. Failures are never
//! memoized; the next `load` for that key is a clean attempt. Caches that
//! keep their own authoritative entry maps construct their loaders with
//! `reuse_results(false)` so only in-flight deduplication applies.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::telemetry;
use crate::{MuninnError, Result};

/// Batch-fetch contract supplied to a [`CoalescingLoader`].
///
/// `fetch_many` resolves a set of distinct keys into per-key results. A
/// key missing from the returned map is surfaced to its waiters as
/// [`MuninnError::NotFound`] — a contract violation must not hang anyone.
#[async_trait]
pub trait BatchFetch: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    async fn fetch_many(
        &self,
        keys: Vec<Self::Key>,
    ) -> Result<HashMap<Self::Key, Result<Self::Value>>>;
}

/// Configuration for a [`CoalescingLoader`].
///
/// ```rust
/// # use muninn::LoaderConfig;
/// # use std::time::Duration;
/// let config = LoaderConfig::new()
///     .window(Duration::from_millis(5))
///     .reuse_results(false);
/// ```
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Length of the coalescing window. Keys requested while a window is
    /// open join its batch; the batch dispatches when the window elapses,
    /// so a lone caller always completes. Default: 10ms.
    pub window: Duration,
    /// Whether successful results are memoized for the life of the
    /// instance. Default: true.
    pub reuse_results: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(10),
            reuse_results: true,
        }
    }
}

impl LoaderConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the coalescing window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Enable or disable per-instance memoization of successful results.
    pub fn reuse_results(mut self, reuse: bool) -> Self {
        self.reuse_results = reuse;
        self
    }
}

/// Waiters per key of the batch currently accumulating.
type PendingBatch<K, V> = HashMap<K, Vec<oneshot::Sender<Result<V>>>>;

struct LoaderState<K, V> {
    /// The batch accumulating during the open coalescing window, if any.
    pending: Option<PendingBatch<K, V>>,
    /// Memoized successful results (only populated with `reuse_results`).
    completed: HashMap<K, V>,
}

/// Windowed per-key request batcher. See module docs.
pub struct CoalescingLoader<F: BatchFetch> {
    /// Instance name used as the metrics `loader` label.
    name: &'static str,
    fetch: Arc<F>,
    config: LoaderConfig,
    state: Arc<Mutex<LoaderState<F::Key, F::Value>>>,
}

impl<F: BatchFetch> CoalescingLoader<F> {
    pub fn new(name: &'static str, fetch: Arc<F>, config: LoaderConfig) -> Self {
        Self {
            name,
            fetch,
            config,
            state: Arc::new(Mutex::new(LoaderState {
                pending: None,
                completed: HashMap::new(),
            })),
        }
    }

    /// Load one key, coalescing with every other concurrent `load` that
    /// falls into the same window.
    pub async fn load(&self, key: F::Key) -> Result<F::Value> {
        let rx = {
            let mut state = self.state.lock().expect("loader state poisoned");

            if self.config.reuse_results
                && let Some(value) = state.completed.get(&key)
            {
                return Ok(value.clone());
            }

            let (tx, rx) = oneshot::channel();
            match state.pending.as_mut() {
                Some(batch) => {
                    metrics::counter!(telemetry::LOADER_COALESCED_TOTAL, "loader" => self.name)
                        .increment(1);
                    batch.entry(key).or_default().push(tx);
                }
                None => {
                    let mut batch: PendingBatch<F::Key, F::Value> = HashMap::new();
                    batch.insert(key, vec![tx]);
                    state.pending = Some(batch);
                    self.spawn_dispatch();
                }
            }
            rx
        };

        // The sender side is dropped only if the dispatch task is torn
        // down mid-batch (runtime shutdown).
        rx.await.map_err(|_| MuninnError::Shutdown)?
    }

    /// Spawn the task that closes the current window and dispatches its
    /// batch. Spawned exactly once per window, by the caller that opened it.
    fn spawn_dispatch(&self) {
        let name = self.name;
        let fetch = Arc::clone(&self.fetch);
        let state = Arc::clone(&self.state);
        let window = self.config.window;
        let reuse = self.config.reuse_results;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let batch = {
                let mut state = state.lock().expect("loader state poisoned");
                state.pending.take().unwrap_or_default()
            };
            if batch.is_empty() {
                return;
            }

            let keys: Vec<F::Key> = batch.keys().cloned().collect();
            metrics::counter!(telemetry::LOADER_BATCHES_TOTAL, "loader" => name).increment(1);
            metrics::histogram!(telemetry::LOADER_BATCH_SIZE, "loader" => name)
                .record(keys.len() as f64);
            tracing::debug!(loader = name, keys = keys.len(), "dispatching batch");

            let start = Instant::now();
            let outcome = fetch.fetch_many(keys).await;
            metrics::histogram!(telemetry::FETCH_DURATION_SECONDS, "loader" => name)
                .record(start.elapsed().as_secs_f64());

            match outcome {
                Ok(mut results) => {
                    for (key, waiters) in batch {
                        let result = results.remove(&key).unwrap_or_else(|| {
                            Err(MuninnError::NotFound(format!(
                                "batch fetch returned no entry for key {key:?}"
                            )))
                        });
                        if reuse && let Ok(value) = &result {
                            state
                                .lock()
                                .expect("loader state poisoned")
                                .completed
                                .insert(key.clone(), value.clone());
                        }
                        for tx in waiters {
                            // A dropped waiter simply stopped caring.
                            let _ = tx.send(result.clone());
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!(loader = name, error = %err, "batch fetch failed");
                    for (_, waiters) in batch {
                        for tx in waiters {
                            let _ = tx.send(Err(err.clone()));
                        }
                    }
                }
            }
        });
    }
}
