//! Bounded producer/consumer pipeline used by stream-process.
//!
//! The producer generates lines into a channel of `capacity` slots and the
//! consumer drains them into an async sink. A producer that finds every slot
//! taken records a backpressure pause and suspends until the consumer frees
//! one, so at most `capacity` lines are ever buffered.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

use super::kernels::stream_line;
use crate::error::{HarnessError, Result};

/// What one pipeline run observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    pub chunks: u64,
    pub bytes_processed: u64,
    pub capacity: usize,
    /// Most lines buffered at once. Never exceeds `capacity`.
    pub peak_buffered: usize,
    pub backpressure_pauses: u64,
}

/// Push `chunks` lines through a channel of `capacity` slots into `sink`.
///
/// A zero capacity is raised to one.
pub async fn run_pipeline<W>(chunks: u64, capacity: usize, mut sink: W) -> Result<PipelineReport>
where
    W: AsyncWrite + Unpin,
{
    let capacity = capacity.max(1);
    let (tx, mut rx) = mpsc::channel::<String>(capacity);
    let buffered = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let (buffered, peak) = (&buffered, &peak);

    let producer = async move {
        let mut pauses = 0u64;
        for index in 0..chunks {
            let permit = match tx.try_reserve() {
                Ok(permit) => permit,
                Err(TrySendError::Full(())) => {
                    pauses += 1;
                    trace!(index, "stream buffer full, waiting for consumer");
                    tx.reserve()
                        .await
                        .map_err(|_| HarnessError::PipelineClosed)?
                }
                Err(TrySendError::Closed(())) => return Err(HarnessError::PipelineClosed),
            };
            let now = buffered.fetch_add(1, Ordering::AcqRel) + 1;
            peak.fetch_max(now, Ordering::AcqRel);
            permit.send(stream_line(index));
        }
        // Dropping the sender ends the consumer's loop
        drop(tx);
        Ok::<_, HarnessError>(pauses)
    };

    let consumer = async {
        let mut bytes = 0u64;
        while let Some(line) = rx.recv().await {
            buffered.fetch_sub(1, Ordering::AcqRel);
            sink.write_all(line.as_bytes()).await?;
            bytes += line.len() as u64;
        }
        sink.flush().await?;
        Ok::<_, HarnessError>(bytes)
    };

    let (backpressure_pauses, bytes_processed) = tokio::try_join!(producer, consumer)?;

    Ok(PipelineReport {
        chunks,
        bytes_processed,
        capacity,
        peak_buffered: peak.load(Ordering::Acquire),
        backpressure_pauses,
    })
}
