use thiserror::Error;

/// Storage-specific errors that can occur during series operations.
///
/// Per-call errors (`NotFound`, `InvalidRange`, ...) are recoverable by the
/// caller; `BackendInit` only happens at startup and is fatal there.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Operation on a series that does not exist
    #[error("series not found: {series}")]
    NotFound { series: String },

    /// Create on a series that already exists; the existing file is untouched
    #[error("series already exists: {series}")]
    AlreadyExists { series: String },

    /// Malformed or inconsistent retention tier definitions
    #[error("invalid archive configuration: {0}")]
    InvalidArchiveConfig(String),

    /// Unrecognized aggregation method name or wire code
    #[error("unknown aggregation method: {0}")]
    InvalidAggregation(String),

    /// Fetch with an inverted or empty time window
    #[error("invalid fetch range: from {from} must be before until {until}")]
    InvalidRange { from: u32, until: u32 },

    /// Metric name that cannot be mapped to a safe storage location
    #[error("invalid metric name {0}")]
    InvalidMetricName(String),

    /// Backend selection or initialization failure, at startup only
    #[error("storage backend initialization failed: {0}")]
    BackendInit(String),

    /// Series file exists but its header cannot be interpreted
    #[error("corrupt series database: {0}")]
    Corrupt(String),

    /// Underlying storage failure, kind-preserving passthrough
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
