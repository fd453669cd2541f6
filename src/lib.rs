//! # looplag
//!
//! **Measuring what a busy event loop costs everyone else**
//!
//! A harness that runs the same workloads two ways on a single-threaded tokio
//! context and measures the scheduling lag each one causes.
//!
//! ## Features
//!
//! - **Lag Monitor**: [`LoopMonitor`] ticks on a fixed interval and records how
//!   late each tick ran, counting the ones that exceed a threshold
//! - **Paired Workloads**: [`Monopolizing`] and [`Cooperative`] expose the same
//!   file, compute, key-derivation, delay and serialization workloads with
//!   identical outputs
//! - **Worker Offload**: cooperative key derivation runs on a rayon pool and
//!   resumes its caller through a wake-once bridge
//! - **Bounded Streams**: stream-process pushes lines through a bounded channel
//!   and reports its backpressure pauses
//! - **Flexible Configuration**: files (TOML/YAML/JSON), `LOOPLAG_` environment
//!   variables, builder calls and clap arguments, merged with figment
//! - **Prometheus Metrics**: lag and request counters exported at `/metrics`
//!
//! ## Quick Start
//!
//! ```ignore
//! use looplag::{HarnessBuilder, Variant};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = HarnessBuilder::new()
//!         .variant(Variant::Cooperative)
//!         .port(3001)
//!         .build()?;
//!
//!     runtime.block_on(looplag::server::run(&runtime))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Using the library directly
//!
//! ```ignore
//! use std::time::Duration;
//! use looplag::{HarnessBuilder, LoopMonitor};
//!
//! let runtime = HarnessBuilder::new().build()?;
//! let monitor = LoopMonitor::new(Duration::from_millis(50), Duration::from_millis(10));
//! monitor.start(runtime.tokio_handle());
//!
//! let dispatcher = looplag::Dispatcher::for_runtime(&runtime);
//! runtime.block_on(async {
//!     let params = [("limit".to_string(), "100000".to_string())].into();
//!     let reply = dispatcher.dispatch("/compute-async", &params).await;
//!     assert_eq!(reply.status, 200);
//! });
//!
//! monitor.stop();
//! println!("{:?}", monitor.stats());
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! variant = "monopolizing"
//! port = 3000
//! worker_threads = 2
//!
//! [monitor]
//! threshold_ms = 50
//! interval_ms = 100
//!
//! [chunk]
//! chunk_size = 10000
//! yield_every = 5
//! ```

pub(crate) mod bridge;
mod builder;
mod config;
pub mod dispatch;
mod error;
pub mod metrics;
pub mod monitor;
pub mod ops;
mod pool;
mod runtime;
pub mod server;
mod timing;

pub use builder::{HarnessArgs, HarnessBuilder};
pub use config::{ChunkPlan, HarnessConfig, MonitorConfig};
pub use dispatch::{Dispatcher, Library, Reply, ReplyBody, Route};
pub use error::{HarnessError, Result};
pub use metrics::HarnessMetrics;
pub use monitor::{LoopMonitor, MonitorStats, SchedulerSample};
pub use ops::{Cooperative, Monopolizing, OperationResult, Output, ScratchFile, Variant};
pub use pool::{WorkerPool, DEFAULT_WORKER_THREADS};
pub use runtime::HarnessRuntime;
pub use timing::format_ms;
