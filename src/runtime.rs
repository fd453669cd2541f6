//! Harness runtime.
//!
//! Owns the shared execution context (a tokio current-thread runtime) and the
//! independent worker pool (rayon). Every request handler and the lag
//! monitor's sampling task run on the single context thread, so any code that
//! does not suspend holds up everything else.
//!
//! ```text
//!   block_on / spawn_async ──► shared context   (1 thread, {prefix}-blocking)
//!   workers().spawn_compute ─► WorkerPool       ({prefix}-worker-NNNN)
//! ```

use std::future::Future;
use std::sync::Arc;

use prometheus::Registry;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::error::Result;
use crate::metrics::HarnessMetrics;
use crate::pool::WorkerPool;

/// The shared context plus worker pool of one harness instance.
///
/// # Examples
///
/// ```ignore
/// use looplag::HarnessBuilder;
///
/// let runtime = HarnessBuilder::new()
///     .prefix("demo")
///     .worker_threads(2)
///     .build()?;
///
/// runtime.block_on(async {
///     let handle = runtime.spawn_async(async { 1 + 1 });
///     let offloaded = runtime.workers().spawn_compute(|| expensive()).await?;
/// });
///
/// runtime.block_until_idle();
/// ```
pub struct HarnessRuntime {
    inner: Arc<HarnessRuntimeInner>,
}

struct HarnessRuntimeInner {
    config: HarnessConfig,
    tokio_runtime: tokio::runtime::Runtime,
    workers: WorkerPool,
    task_tracker: TaskTracker,
    metrics: HarnessMetrics,
    registry: Registry,
}

impl HarnessRuntime {
    /// Build the shared context and worker pool described by `config`.
    ///
    /// Reached through `HarnessBuilder::build()`.
    pub(crate) fn from_config(config: HarnessConfig) -> Result<Self> {
        info!(
            prefix = %config.prefix,
            variant = %config.variant,
            worker_threads = config.worker_threads,
            "building harness runtime"
        );

        let tokio_runtime = tokio::runtime::Builder::new_current_thread()
            .thread_name(format!("{}-blocking", config.prefix))
            .enable_all()
            .build()?;

        let workers = WorkerPool::new(&config.prefix, config.worker_threads)?;

        let metrics = HarnessMetrics::with_prefix(&config.prefix);
        let registry = config.prometheus_registry.clone().unwrap_or_default();
        if let Err(e) = metrics.register(&registry) {
            warn!(%e, "failed to register prometheus metrics");
        }

        Ok(Self {
            inner: Arc::new(HarnessRuntimeInner {
                config,
                tokio_runtime,
                workers,
                task_tracker: TaskTracker::new(),
                metrics,
                registry,
            }),
        })
    }

    /// Configuration after every source was merged.
    pub fn config(&self) -> &HarnessConfig {
        &self.inner.config
    }

    /// Handle to the shared context.
    ///
    /// Used to start the lag monitor and to spawn untracked tasks.
    pub fn tokio_handle(&self) -> &tokio::runtime::Handle {
        self.inner.tokio_runtime.handle()
    }

    /// The worker pool used for offloaded work.
    pub fn workers(&self) -> &WorkerPool {
        &self.inner.workers
    }

    /// Tracker for tasks that shutdown drains, operation tasks included.
    pub fn task_tracker(&self) -> &TaskTracker {
        &self.inner.task_tracker
    }

    pub fn metrics(&self) -> &HarnessMetrics {
        &self.inner.metrics
    }

    /// Registry holding this runtime's metrics.
    ///
    /// This is the registry passed to the builder, or a private one when none was given.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Run a future to completion on the shared context.
    ///
    /// The calling thread becomes the context thread for the duration of the call.
    pub fn block_on<F: Future>(&self, f: F) -> F::Output {
        self.inner.tokio_runtime.block_on(f)
    }

    /// Spawn a task on the shared context that shutdown waits for.
    #[inline]
    pub fn spawn_async<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let token = self.inner.task_tracker.token();
        self.inner.tokio_runtime.spawn(async move {
            let _guard = token;
            future.await
        })
    }

    /// Stop accepting new tracked tasks.
    pub fn shutdown(&self) {
        self.inner.task_tracker.close();
    }

    /// `true` once `shutdown()` was called and no tracked task or worker job remains.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.inner.task_tracker.is_closed()
            && self.inner.task_tracker.is_empty()
            && self.inner.workers.in_flight() == 0
    }

    /// Suspend until tracked tasks and worker jobs have drained.
    ///
    /// Never resolves unless `shutdown()` was called first.
    pub async fn wait_for_shutdown(&self) {
        self.inner.task_tracker.wait().await;
        self.inner.workers.wait_idle().await;
    }

    /// Close the tracker and block until all tracked tasks complete.
    pub fn block_until_idle(&self) {
        self.shutdown();
        self.block_on(self.wait_for_shutdown());
    }
}

impl std::fmt::Debug for HarnessRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessRuntime")
            .field("config", &self.inner.config)
            .field("workers", &self.inner.workers)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for HarnessRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HarnessRuntime[{}]: {} context(1) workers({})",
            self.inner.config.prefix,
            self.inner.config.variant,
            self.inner.workers.threads(),
        )
    }
}
