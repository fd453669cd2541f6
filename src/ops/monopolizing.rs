//! Workloads that never yield.
//!
//! Nothing in this module awaits. Called from a task on the shared context,
//! each function holds that context for its entire duration.

use std::hint::black_box;
use std::time::{Duration, Instant};

use super::kernels::{self, FIB_DEPTH, KEY_LENGTH};
use super::{
    aggregate, AggregateOutput, AggregateResults, ComputeOutput, DeriveKeyOutput,
    OperationResult, Output, ReadRepeatOutput, ScratchFile, SerializeOutput, SpinOutput, Variant,
};
use crate::error::Result;

const VARIANT: Variant = Variant::Monopolizing;

pub(crate) const READ_REPEAT: &str = "blocking-file-read";
pub(crate) const COMPUTE: &str = "blocking-computation";
pub(crate) const DERIVE_KEY: &str = "blocking-crypto";
pub(crate) const SPIN: &str = "busy-loop";
pub(crate) const BULK_SERIALIZE: &str = "blocking-json-parse";
pub(crate) const AGGREGATE: &str = "multiple-blocking-ops";

/// The monopolizing implementation of every workload.
#[derive(Debug, Clone)]
pub struct Monopolizing {
    scratch: ScratchFile,
}

impl Monopolizing {
    pub fn new(scratch: ScratchFile) -> Self {
        Self { scratch }
    }

    /// Read the scratch payload `iterations` times with blocking reads.
    pub fn read_repeat(&self, iterations: u64) -> OperationResult {
        let start = Instant::now();
        let outcome = self.try_read_repeat(iterations);
        OperationResult::from_outcome(VARIANT, READ_REPEAT, outcome, start.elapsed())
    }

    fn try_read_repeat(&self, iterations: u64) -> Result<Output> {
        let path = self.scratch.ensure_blocking()?;
        let mut total_size = 0u64;
        for _ in 0..iterations {
            total_size += std::fs::read(&path)?.len() as u64;
        }
        Ok(Output::ReadRepeat(ReadRepeatOutput {
            iterations,
            total_size,
        }))
    }

    /// Sum `limit` terms in one pass, then run the recursive fibonacci.
    pub fn compute(&self, limit: u64) -> OperationResult {
        let start = Instant::now();
        let sum = kernels::accumulate_terms(0.0, 0..limit);
        let fibonacci = kernels::fib_recursive(black_box(FIB_DEPTH));
        let output = Output::Compute(ComputeOutput {
            limit,
            chunk_size: None,
            depth: FIB_DEPTH,
            sum,
            fibonacci,
        });
        OperationResult::from_outcome(VARIANT, COMPUTE, Ok(output), start.elapsed())
    }

    /// Derive a key with PBKDF2 on the calling thread.
    pub fn derive_key(&self, iterations: u32) -> OperationResult {
        let start = Instant::now();
        let outcome = kernels::derive_key(&kernels::random_salt(), iterations).map(|key| {
            debug_assert_eq!(key.len(), KEY_LENGTH);
            Output::DeriveKey(DeriveKeyOutput {
                iterations,
                key_length: key.len(),
            })
        });
        OperationResult::from_outcome(VARIANT, DERIVE_KEY, outcome, start.elapsed())
    }

    /// Busy-poll the clock until `duration` has elapsed.
    ///
    /// Never returns early: the actual duration is always at least the
    /// requested one.
    pub fn spin(&self, duration: Duration) -> OperationResult {
        let start = Instant::now();
        let mut iterations = 0u64;
        while start.elapsed() < duration {
            iterations += 1;
            black_box((iterations as f64).sqrt());
        }
        let actual = start.elapsed();
        let output = Output::Spin(SpinOutput {
            requested_duration: duration,
            actual_duration: actual,
            iterations,
            warning: "Event loop completely blocked during this operation",
        });
        OperationResult::from_outcome(VARIANT, SPIN, Ok(output), actual)
    }

    /// Build a `size`-entry graph, serialize it and parse it back in one pass.
    pub fn bulk_serialize(&self, size: u64) -> OperationResult {
        let start = Instant::now();
        let outcome = Self::try_bulk_serialize(size);
        OperationResult::from_outcome(VARIANT, BULK_SERIALIZE, outcome, start.elapsed())
    }

    fn try_bulk_serialize(size: u64) -> Result<Output> {
        let mut graph = kernels::Graph::new();
        kernels::extend_graph(&mut graph, 0..size);
        let (json_length, parsed_keys) = kernels::round_trip(&graph)?;
        Ok(Output::Serialize(SerializeOutput {
            object_size: size,
            json_length,
            parsed_keys,
        }))
    }

    /// Run read-repeat, compute and derive-key back to back.
    pub fn aggregate(&self) -> OperationResult {
        let start = Instant::now();
        let outcome = self.try_aggregate(start);
        OperationResult::from_outcome(VARIANT, AGGREGATE, outcome, start.elapsed())
            .with_note("Event loop blocked for entire duration of all operations")
    }

    fn try_aggregate(&self, start: Instant) -> Result<Output> {
        let file_read = self.read_repeat(aggregate::READ_ITERATIONS).into_component()?;
        let computation = self.compute(aggregate::COMPUTE_LIMIT).into_component()?;
        let crypto = self
            .derive_key(aggregate::DERIVE_ITERATIONS)
            .into_component()?;
        let results = AggregateResults {
            file_read: Box::new(file_read),
            computation: Box::new(computation),
            crypto: Box::new(crypto),
        };
        Ok(Output::Aggregate(AggregateOutput {
            sequential_duration: results.durations(),
            total_duration: start.elapsed(),
            results,
        }))
    }
}
