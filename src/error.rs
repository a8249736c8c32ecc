//! Muninn error types

use crate::types::MachineId;

/// Muninn error types.
///
/// All variants are `Clone` so a single failure can be fanned out to every
/// caller waiting on the same coalesced downstream fetch.
///
/// Three upstream outcomes are never conflated: "not ready yet" is not an
/// error at all (caches surface it as `Ok(None)`), validation failures are
/// rejected before any downstream call, and everything else is a typed
/// service error that is propagated to the caller but never cached.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MuninnError {
    /// Malformed or missing key components, rejected before any downstream call.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The upstream service answered with an error status.
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// The call to the upstream service failed outright (connection,
    /// timeout, serialization). Delivered to every waiter of the batch
    /// that carried it.
    #[error("transport error: {0}")]
    Transport(String),

    /// Neither clock source could produce a current time for the machine.
    #[error("no clock source available for machine '{0}'")]
    ClockUnavailable(MachineId),

    /// A batch fetch omitted a requested key from its result map.
    #[error("not found: {0}")]
    NotFound(String),

    /// A required component was missing or misconfigured at build time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The component was torn down while a caller was still waiting.
    #[error("shutting down")]
    Shutdown,
}

/// Result type alias for Muninn operations
pub type Result<T> = std::result::Result<T, MuninnError>;
