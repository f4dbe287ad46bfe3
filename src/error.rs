//! Crate-wide error handling
//!
//! Every failure is per-tile and reported through the tile-level result;
//! nothing here is fatal to the process. The error type is `Clone` because
//! one fetch outcome fans out to every waiter attached to the shared
//! in-flight future.

use thiserror::Error;

/// Crate-wide result type
pub type TerrainResult<T> = Result<T, TerrainError>;

/// Tile-level terrain errors
#[derive(Debug, Clone, Error)]
pub enum TerrainError {
    /// Terminal: the node is confirmed to carry no elevation data, or its
    /// fetch target could not be resolved. Not retried.
    #[error("terrain is not available for tile {path}")]
    NotAvailable { path: String },

    /// The transport or tessellation queue is saturated. Retry later; this
    /// is not surfaced to end users as an error.
    #[error("terrain request throttled, retry later")]
    TransientBusy,

    /// Network or transport failure. Demotes the requested node so repeated
    /// automatic retries do not storm a failing endpoint.
    #[error("terrain fetch failed for tile {path}: {reason}")]
    FetchFailed { path: String, reason: String },

    /// The underlying transport cancelled the request. Propagated verbatim,
    /// no state mutation, so a retry is still possible.
    #[error("terrain request cancelled for tile {path}")]
    Cancelled { path: String },

    /// Malformed payload. Treated like a fetch failure.
    #[error("terrain payload could not be decoded: {reason}")]
    DecodeFailed { reason: String },

    /// API misuse, e.g. upsampling across more than one level.
    #[error("unsupported terrain operation: {message}")]
    Unsupported { message: String },

    /// Rejected configuration values.
    #[error("invalid terrain configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl TerrainError {
    /// True for outcomes the caller should retry later rather than report.
    pub fn is_transient(&self) -> bool {
        matches!(self, TerrainError::TransientBusy)
    }
}
