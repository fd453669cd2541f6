//! Independent worker pool for work that cannot be split into yield points.
//!
//! The pool wraps a rayon thread pool and tracks in-flight tasks so shutdown
//! can wait for them without spinning.
//!
//! ```text
//!   shared context (tokio)               worker pool (rayon)
//!   ──────────────────────               ───────────────────
//!   spawn_compute(f) ──── spawn ───────▶ catch_unwind(f)
//!        │ .await (Pending)                    │
//!        ▼                                     ▼
//!   resumes exactly once ◀──── complete ── Ok(value) / Err(panic)
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::bridge::{panic_message, WorkerTask};
use crate::error::{HarnessError, Result};

/// Default number of worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// Number of tasks executing on the pool, with a notification when it drops to zero.
struct InFlight {
    count: AtomicUsize,
    notify: Notify,
}

/// Guard that decrements the in-flight counter on drop.
///
/// Runs even if the task closure panics.
struct InFlightGuard {
    state: Arc<InFlight>,
}

impl InFlightGuard {
    fn new(state: &Arc<InFlight>) -> Self {
        state.count.fetch_add(1, Ordering::Relaxed);
        Self {
            state: Arc::clone(state),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let prev = self.state.count.fetch_sub(1, Ordering::Release);
        if prev == 1 {
            self.state.notify.notify_waiters();
        }
    }
}

/// Cloneable handle to the worker pool.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<WorkerPoolInner>,
}

struct WorkerPoolInner {
    pool: rayon::ThreadPool,
    in_flight: Arc<InFlight>,
    threads: usize,
}

impl WorkerPool {
    /// Build a pool with `threads` workers named `{prefix}-worker-{NNNN}`.
    pub fn new(prefix: &str, threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let name_prefix: Arc<str> = prefix.into();
        let start_prefix = Arc::clone(&name_prefix);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{}-worker-{:04}", name_prefix, i))
            .start_handler(move |thread_index| {
                debug!(thread_index, prefix = %start_prefix, "worker thread starting");
            })
            .build()?;

        Ok(Self {
            inner: Arc::new(WorkerPoolInner {
                pool,
                in_flight: Arc::new(InFlight {
                    count: AtomicUsize::new(0),
                    notify: Notify::new(),
                }),
                threads,
            }),
        })
    }

    /// Run `f` on a worker thread and suspend until it finishes.
    ///
    /// The caller resumes exactly once, with the closure's value or with
    /// [`HarnessError::WorkerPanicked`] if it panicked. There is no way to
    /// observe partial progress or to cancel the closure once it has started.
    pub async fn spawn_compute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, completion) = WorkerTask::new();

        // Created before spawning so the count is visible immediately
        let guard = InFlightGuard::new(&self.inner.in_flight);

        self.inner.pool.spawn(move || {
            // Guard drops before completing, so a woken waiter sees the decrement
            let outcome = {
                let _guard = guard;
                panic::catch_unwind(AssertUnwindSafe(f))
            };
            completion.complete(outcome);
        });

        task.await.map_err(|payload| {
            let message = panic_message(payload.as_ref());
            warn!(%message, "worker task panicked");
            HarnessError::WorkerPanicked(message)
        })
    }

    /// Number of tasks currently executing on the pool.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.count.load(Ordering::Relaxed)
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.inner.threads
    }

    /// Wait until no task is executing on the pool.
    pub async fn wait_idle(&self) {
        let state = &self.inner.in_flight;
        let mut logged = false;
        loop {
            let notified = state.notify.notified();
            let count = state.count.load(Ordering::Acquire);
            if count == 0 {
                break;
            }
            if !logged {
                debug!(count, "waiting for worker tasks to complete");
                logged = true;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.inner.threads)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
