//! Paired workload library.
//!
//! Every workload family exists twice with the same inputs and the same computed
//! outputs:
//!
//! - [`Monopolizing`] runs each workload to completion without ever returning
//!   control to the scheduler. Called on the shared context, it starves every
//!   other task on that context for its whole duration.
//! - [`Cooperative`] splits the same work at explicit yield points, waits on
//!   scheduler-native timers and I/O, and hands derivation to the worker pool.
//!
//! Both return an [`OperationResult`]. Faults never escape an operation; they
//! come back as a failure record.
//!
//! | Workload | Monopolizing | Cooperative |
//! |----------|--------------|-------------|
//! | read-repeat | `std::fs::read` n times | `tokio::fs::read` n times |
//! | compute | single pass + recursive fib(30) | chunked pass + iterative fib |
//! | derive-key | PBKDF2 inline | PBKDF2 on rayon |
//! | spin / delay | busy poll | `tokio::time::sleep` |
//! | stream-process | n/a | bounded producer/consumer |
//! | bulk-serialize | one pass | chunked build |
//! | aggregate | sequential | `tokio::join!` |

pub(crate) mod kernels;
mod cooperative;
mod monopolizing;
mod scratch;
pub mod stream;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::timing::serialize_ms;

pub use cooperative::Cooperative;
pub use kernels::{KEY_LENGTH, SCRATCH_SIZE};
pub use monopolizing::Monopolizing;
pub use scratch::ScratchFile;

/// Which of the two service variants an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Operations hold the shared context until they finish.
    #[serde(alias = "blocking")]
    #[value(alias = "blocking")]
    Monopolizing,
    /// Operations release the shared context at defined points.
    #[default]
    #[serde(alias = "non-blocking")]
    #[value(alias = "non-blocking")]
    Cooperative,
}

impl Variant {
    /// Whether operations of this variant block the shared context.
    pub const fn blocked(self) -> bool {
        matches!(self, Variant::Monopolizing)
    }

    /// Service identifier reported by the index endpoint.
    pub const fn service_name(self) -> &'static str {
        match self {
            Variant::Monopolizing => "blocking-demo",
            Variant::Cooperative => "non-blocking-demo",
        }
    }

    /// Port used when the configuration does not set one.
    pub const fn default_port(self) -> u16 {
        match self {
            Variant::Monopolizing => 3000,
            Variant::Cooperative => 3001,
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::Monopolizing => f.write_str("monopolizing"),
            Variant::Cooperative => f.write_str("cooperative"),
        }
    }
}

/// Result of one workload invocation.
///
/// Produced once per call and never mutated by the library afterwards. The
/// dispatcher only replaces `note` with its route-level explanation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub success: bool,
    pub operation: &'static str,
    /// Echoed parameters and computed values; absent on failure.
    #[serde(flatten)]
    pub output: Option<Output>,
    #[serde(serialize_with = "serialize_ms")]
    pub duration: Duration,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the failure is a hard rejection of the input.
    #[serde(skip)]
    pub rejected: bool,
}

impl OperationResult {
    /// Turn an operation outcome into a result record.
    pub(crate) fn from_outcome(
        variant: Variant,
        operation: &'static str,
        outcome: Result<Output>,
        duration: Duration,
    ) -> Self {
        match outcome {
            Ok(output) => Self {
                success: true,
                operation,
                output: Some(output),
                duration,
                blocked: variant.blocked(),
                note: None,
                error: None,
                rejected: false,
            },
            Err(err) => {
                tracing::warn!(operation, %variant, error = %err, "operation failed");
                Self {
                    success: false,
                    operation,
                    output: None,
                    duration,
                    blocked: variant.blocked(),
                    note: None,
                    error: Some(err.to_string()),
                    rejected: err.is_rejection(),
                }
            }
        }
    }

    pub(crate) fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Convert a failed component into the error reported by an aggregate.
    pub(crate) fn into_component(self) -> Result<OperationResult> {
        if self.success {
            Ok(self)
        } else {
            Err(HarnessError::Component {
                operation: self.operation,
                message: self.error.unwrap_or_default(),
            })
        }
    }
}

/// Per-workload echoed parameters and computed values.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Output {
    ReadRepeat(ReadRepeatOutput),
    Compute(ComputeOutput),
    DeriveKey(DeriveKeyOutput),
    Spin(SpinOutput),
    Delay(DelayOutput),
    Stream(StreamOutput),
    Serialize(SerializeOutput),
    Aggregate(AggregateOutput),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRepeatOutput {
    pub iterations: u64,
    pub total_size: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeOutput {
    pub limit: u64,
    /// Only reported by the chunked implementation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    pub depth: u32,
    /// Sum of `sqrt(i) * sin(i)`; serialized as `result` with two decimals.
    #[serde(rename = "result", serialize_with = "serialize_two_decimals")]
    pub sum: f64,
    pub fibonacci: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeriveKeyOutput {
    pub iterations: u32,
    pub key_length: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpinOutput {
    #[serde(serialize_with = "serialize_ms")]
    pub requested_duration: Duration,
    #[serde(serialize_with = "serialize_ms")]
    pub actual_duration: Duration,
    pub iterations: u64,
    pub warning: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayOutput {
    #[serde(serialize_with = "serialize_ms")]
    pub requested_duration: Duration,
    #[serde(serialize_with = "serialize_ms")]
    pub actual_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamOutput {
    pub chunks: u64,
    pub bytes_processed: u64,
    pub buffer_capacity: usize,
    pub peak_buffered: usize,
    pub backpressure_pauses: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializeOutput {
    pub object_size: u64,
    pub json_length: usize,
    pub parsed_keys: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateOutput {
    pub results: AggregateResults,
    /// Wall-clock span of the whole aggregate.
    #[serde(serialize_with = "serialize_ms")]
    pub total_duration: Duration,
    /// Sum of the three component durations.
    #[serde(serialize_with = "serialize_ms")]
    pub sequential_duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResults {
    pub file_read: Box<OperationResult>,
    pub computation: Box<OperationResult>,
    pub crypto: Box<OperationResult>,
}

impl AggregateResults {
    fn durations(&self) -> Duration {
        self.file_read.duration + self.computation.duration + self.crypto.duration
    }
}

fn serialize_two_decimals<S>(value: &f64, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str(&format!("{value:.2}"))
}

/// Parameters used by both aggregate implementations.
pub(crate) mod aggregate {
    pub const READ_ITERATIONS: u64 = 2;
    pub const COMPUTE_LIMIT: u64 = 500_000;
    pub const DERIVE_ITERATIONS: u32 = 50_000;
}
