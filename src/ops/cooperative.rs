//! Workloads that give the shared context back at defined points.
//!
//! Each workload produces the same output as its monopolizing counterpart.
//! Arithmetic is split with [`tokio::task::yield_now`] between chunks, waits
//! go through tokio timers and `tokio::fs`, and key derivation runs on the
//! worker pool.

use std::time::{Duration, Instant};

use tokio::task::yield_now;
use tracing::debug;

use super::kernels::{self, FIB_DEPTH};
use super::stream::run_pipeline;
use super::{
    aggregate, AggregateOutput, AggregateResults, ComputeOutput, DelayOutput, DeriveKeyOutput,
    OperationResult, Output, ReadRepeatOutput, ScratchFile, SerializeOutput, StreamOutput,
    Variant,
};
use crate::config::ChunkPlan;
use crate::error::{HarnessError, Result};
use crate::pool::WorkerPool;

const VARIANT: Variant = Variant::Cooperative;

pub(crate) const READ_REPEAT: &str = "async-file-read";
pub(crate) const COMPUTE: &str = "async-computation";
pub(crate) const DERIVE_KEY: &str = "async-crypto";
pub(crate) const DELAY: &str = "async-delay";
pub(crate) const STREAM_PROCESS: &str = "stream-processing";
pub(crate) const BULK_SERIALIZE: &str = "async-json-processing";
pub(crate) const AGGREGATE: &str = "parallel-async-ops";

/// The cooperative implementation of every workload.
#[derive(Debug, Clone)]
pub struct Cooperative {
    scratch: ScratchFile,
    plan: ChunkPlan,
    workers: WorkerPool,
    stream_buffer: usize,
}

impl Cooperative {
    /// Zero sizes in `plan` and a zero `stream_buffer` are replaced by defaults.
    pub fn new(
        scratch: ScratchFile,
        plan: ChunkPlan,
        workers: WorkerPool,
        stream_buffer: usize,
    ) -> Self {
        Self {
            scratch,
            plan: plan.normalized(),
            workers,
            stream_buffer: stream_buffer.max(1),
        }
    }

    /// Read the scratch payload `iterations` times, suspending on every read.
    pub async fn read_repeat(&self, iterations: u64) -> OperationResult {
        let start = Instant::now();
        let outcome = self.try_read_repeat(iterations).await;
        OperationResult::from_outcome(VARIANT, READ_REPEAT, outcome, start.elapsed())
    }

    async fn try_read_repeat(&self, iterations: u64) -> Result<Output> {
        let path = self.scratch.ensure().await?;
        let mut total_size = 0u64;
        for _ in 0..iterations {
            total_size += tokio::fs::read(&path).await?.len() as u64;
        }
        Ok(Output::ReadRepeat(ReadRepeatOutput {
            iterations,
            total_size,
        }))
    }

    /// Sum `limit` terms chunk by chunk, then compute fibonacci(`depth`) iteratively.
    ///
    /// A depth above the plan's ceiling is rejected before any work is done.
    pub async fn compute(&self, limit: u64, depth: u32) -> OperationResult {
        let start = Instant::now();
        let outcome = self.try_compute(limit, depth).await;
        OperationResult::from_outcome(VARIANT, COMPUTE, outcome, start.elapsed())
            .with_note("Computation broken into chunks with yield points")
    }

    async fn try_compute(&self, limit: u64, depth: u32) -> Result<Output> {
        if depth > self.plan.fib_ceiling {
            return Err(HarnessError::DepthCeiling {
                depth,
                ceiling: self.plan.fib_ceiling,
            });
        }

        let chunk = self.plan.chunk_size as u64;
        let mut sum = 0.0;
        let mut lo = 0;
        while lo < limit {
            let hi = lo.saturating_add(chunk).min(limit);
            sum = kernels::accumulate_terms(sum, lo..hi);
            lo = hi;
            yield_now().await;
        }

        let fibonacci = self.fib_iterative(depth).await;
        Ok(Output::Compute(ComputeOutput {
            limit,
            chunk_size: Some(self.plan.chunk_size),
            depth,
            sum,
            fibonacci,
        }))
    }

    async fn fib_iterative(&self, n: u32) -> u64 {
        let (mut a, mut b) = (0u64, 1u64);
        for step in 1..=n {
            (a, b) = (b, a.saturating_add(b));
            if step % self.plan.yield_every == 0 {
                yield_now().await;
            }
        }
        a
    }

    /// Derive a key on the worker pool; the caller suspends until it is done.
    pub async fn derive_key(&self, iterations: u32) -> OperationResult {
        let start = Instant::now();
        let outcome = self.try_derive_key(iterations).await;
        OperationResult::from_outcome(VARIANT, DERIVE_KEY, outcome, start.elapsed())
            .with_note("Operation delegated to thread pool")
    }

    async fn try_derive_key(&self, iterations: u32) -> Result<Output> {
        let salt = kernels::random_salt();
        let key = self
            .workers
            .spawn_compute(move || kernels::derive_key(&salt, iterations))
            .await??;
        Ok(Output::DeriveKey(DeriveKeyOutput {
            iterations,
            key_length: key.len(),
        }))
    }

    /// Sleep on a tokio timer.
    pub async fn delay(&self, duration: Duration) -> OperationResult {
        let start = Instant::now();
        tokio::time::sleep(duration).await;
        let actual = start.elapsed();
        let output = Output::Delay(DelayOutput {
            requested_duration: duration,
            actual_duration: actual,
        });
        OperationResult::from_outcome(VARIANT, DELAY, Ok(output), actual)
            .with_note("Event loop remained free during delay")
    }

    /// Push `chunks` lines through the bounded pipeline into a scratch output file.
    pub async fn stream_process(&self, chunks: u64) -> OperationResult {
        let start = Instant::now();
        let outcome = self.try_stream_process(chunks).await;
        OperationResult::from_outcome(VARIANT, STREAM_PROCESS, outcome, start.elapsed())
            .with_note("Streams handle backpressure automatically")
    }

    async fn try_stream_process(&self, chunks: u64) -> Result<Output> {
        tokio::fs::create_dir_all(self.scratch.dir()).await?;
        // Dropping `output` deletes the file, also when this future is dropped mid-stream
        let (file, output) = self.scratch.stream_output()?;
        let sink = tokio::fs::File::from_std(file);

        let report = run_pipeline(chunks, self.stream_buffer, sink).await?;
        if let Err(e) = output.close() {
            debug!(%e, "could not remove stream output");
        }

        Ok(Output::Stream(StreamOutput {
            chunks: report.chunks,
            bytes_processed: report.bytes_processed,
            buffer_capacity: report.capacity,
            peak_buffered: report.peak_buffered,
            backpressure_pauses: report.backpressure_pauses,
        }))
    }

    /// Build the graph chunk by chunk, then serialize and parse it in one step.
    pub async fn bulk_serialize(&self, size: u64) -> OperationResult {
        let start = Instant::now();
        let outcome = self.try_bulk_serialize(size).await;
        OperationResult::from_outcome(VARIANT, BULK_SERIALIZE, outcome, start.elapsed())
            .with_note("Object creation had yield points to prevent blocking")
    }

    async fn try_bulk_serialize(&self, size: u64) -> Result<Output> {
        let chunk = self.plan.serialize_chunk as u64;
        let mut graph = kernels::Graph::new();
        let mut lo = 0;
        while lo < size {
            let hi = lo.saturating_add(chunk).min(size);
            kernels::extend_graph(&mut graph, lo..hi);
            lo = hi;
            yield_now().await;
        }
        let (json_length, parsed_keys) = kernels::round_trip(&graph)?;
        Ok(Output::Serialize(SerializeOutput {
            object_size: size,
            json_length,
            parsed_keys,
        }))
    }

    /// Run read-repeat, compute and derive-key concurrently.
    pub async fn aggregate(&self) -> OperationResult {
        let start = Instant::now();
        let outcome = self.try_aggregate(start).await;
        OperationResult::from_outcome(VARIANT, AGGREGATE, outcome, start.elapsed())
            .with_note("Operations ran in parallel, event loop remained responsive")
    }

    async fn try_aggregate(&self, start: Instant) -> Result<Output> {
        let (file_read, computation, crypto) = tokio::join!(
            self.read_repeat(aggregate::READ_ITERATIONS),
            self.compute(aggregate::COMPUTE_LIMIT, FIB_DEPTH),
            self.derive_key(aggregate::DERIVE_ITERATIONS),
        );
        let total_duration = start.elapsed();
        let results = AggregateResults {
            file_read: Box::new(file_read.into_component()?),
            computation: Box::new(computation.into_component()?),
            crypto: Box::new(crypto.into_component()?),
        };
        Ok(Output::Aggregate(AggregateOutput {
            sequential_duration: results.durations(),
            total_duration,
            results,
        }))
    }
}
