//! Error types for looplag.

use thiserror::Error;

/// Errors that can occur when building the harness or running a workload.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// I/O failure (scratch payload, stream output, runtime construction).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error building the rayon worker pool.
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Registering or encoding prometheus metrics failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Key derivation was asked to do something it cannot.
    #[error("key derivation failed: {0}")]
    Derivation(String),

    /// Cooperative fibonacci depth above the configured ceiling.
    #[error("fibonacci depth {depth} exceeds safety ceiling {ceiling}")]
    DepthCeiling { depth: u32, ceiling: u32 },

    /// A closure offloaded to the worker pool panicked.
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    /// The stream consumer went away before the producer finished.
    #[error("stream pipeline closed before all chunks were delivered")]
    PipelineClosed,

    /// One of the workloads inside an aggregate failed.
    #[error("{operation} failed: {message}")]
    Component {
        /// Operation name of the failed component
        operation: &'static str,
        /// Failure message reported by the component
        message: String,
    },

    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    /// Whether this error is a deliberate rejection of the request's input
    /// rather than a fault while executing it.
    pub fn is_rejection(&self) -> bool {
        matches!(self, HarnessError::DepthCeiling { .. })
    }
}

/// Result type alias for looplag operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
