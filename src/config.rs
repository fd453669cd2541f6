//! Configuration types for the looplag harness.

use std::path::PathBuf;
use std::time::Duration;

use prometheus::Registry;
use serde::{Deserialize, Serialize};

use crate::ops::Variant;
use crate::pool::DEFAULT_WORKER_THREADS;

/// Configuration for one harness instance.
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment variables
/// using figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HarnessConfig {
    /// Thread and metric name prefix (default: "looplag")
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Which operation library the server exposes
    #[serde(default)]
    pub variant: Variant,

    /// Listen address (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port. Defaults to 3000 for monopolizing and 3001 for cooperative.
    #[serde(default)]
    pub port: Option<u16>,

    /// Number of worker pool threads (default: 2)
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Scheduling lag monitor settings.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Chunking parameters of the cooperative library.
    #[serde(default)]
    pub chunk: ChunkPlan,

    /// Slots in the stream-process channel (default: 16)
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// Directory holding the scratch payload. Defaults to `$TMPDIR/looplag`.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Time allowed for closing connections before the process is forced to exit.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Prometheus registry for metrics exposition.
    /// Not serializable - must be set programmatically.
    #[serde(skip)]
    pub prometheus_registry: Option<Registry>,
}

fn default_prefix() -> String {
    "looplag".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

fn default_stream_buffer() -> usize {
    16
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            variant: Variant::default(),
            host: default_host(),
            port: None,
            worker_threads: default_worker_threads(),
            monitor: MonitorConfig::default(),
            chunk: ChunkPlan::default(),
            stream_buffer: default_stream_buffer(),
            scratch_dir: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            prometheus_registry: None,
        }
    }
}

impl HarnessConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// The configured port, or the variant's conventional one.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.variant.default_port())
    }

    /// `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.effective_port())
    }

    pub fn effective_scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("looplag"))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Threshold and sampling period of the lag monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Lag above this counts as a violation (default: 50)
    pub threshold_ms: u64,
    /// Sampling period (default: 100)
    pub interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold_ms: 50,
            interval_ms: 100,
        }
    }
}

impl MonitorConfig {
    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms)
    }

    /// Sampling period, never shorter than one millisecond.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// How the cooperative library splits its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChunkPlan {
    /// Terms summed between yields in compute (default: 10 000)
    pub chunk_size: usize,
    /// Fibonacci steps between yields (default: 5)
    pub yield_every: u32,
    /// Graph entries built between yields in bulk-serialize (default: 1 000)
    pub serialize_chunk: usize,
    /// Largest fibonacci depth compute accepts (default: 35)
    pub fib_ceiling: u32,
}

impl Default for ChunkPlan {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            yield_every: 5,
            serialize_chunk: 1_000,
            fib_ceiling: 35,
        }
    }
}

impl ChunkPlan {
    /// Replace zero sizes with their defaults.
    ///
    /// A zero ceiling is kept: it rejects every positive depth.
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        Self {
            chunk_size: if self.chunk_size == 0 {
                defaults.chunk_size
            } else {
                self.chunk_size
            },
            yield_every: if self.yield_every == 0 {
                defaults.yield_every
            } else {
                self.yield_every
            },
            serialize_chunk: if self.serialize_chunk == 0 {
                defaults.serialize_chunk
            } else {
                self.serialize_chunk
            },
            fib_ceiling: self.fib_ceiling,
        }
    }
}
