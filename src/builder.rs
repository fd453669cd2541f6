//! Builder for harness runtimes.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use prometheus::Registry;

use crate::config::{ChunkPlan, HarnessConfig};
use crate::error::Result;
use crate::ops::Variant;
use crate::runtime::HarnessRuntime;

/// Builder for constructing a `HarnessRuntime`.
///
/// Configuration sources are merged in the following order (later sources override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
///
/// # Examples
///
/// ```ignore
/// use looplag::{HarnessBuilder, Variant};
///
/// let runtime = HarnessBuilder::new()
///     .file("looplag.toml")
///     .env_prefix("LOOPLAG")
///     .variant(Variant::Monopolizing)
///     .port(3000)
///     .build()?;
/// ```
pub struct HarnessBuilder {
    figment: Figment,
    prometheus_registry: Option<Registry>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HarnessBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessBuilder")
            .field("figment", &self.figment)
            .field(
                "prometheus_registry",
                &self.prometheus_registry.as_ref().map(|_| "<Registry>"),
            )
            .finish()
    }
}

impl HarnessBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(HarnessConfig::default())),
            prometheus_registry: None,
        }
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            _ => self.figment.merge(Toml::file(path)),
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Variables are read as `{PREFIX}_{KEY}`; nested keys are separated by a
    /// double underscore, e.g. `LOOPLAG_WORKER_THREADS` and
    /// `LOOPLAG_MONITOR__THRESHOLD_MS`.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.figment = self
            .figment
            .merge(Env::prefixed(&format!("{prefix}_")).split("__"));
        self
    }

    /// Set the thread and metric name prefix.
    ///
    /// Worker threads are named `{prefix}-worker-{NNNN}`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("prefix", prefix.into()));
        self
    }

    /// Select the operation library the server exposes.
    pub fn variant(mut self, variant: Variant) -> Self {
        self.figment = self.figment.merge(Serialized::default("variant", variant));
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.figment = self.figment.merge(Serialized::default("host", host.into()));
        self
    }

    /// Set the listen port. Port 0 lets the OS pick one.
    pub fn port(mut self, port: u16) -> Self {
        self.figment = self.figment.merge(Serialized::default("port", port));
        self
    }

    /// Set the number of worker pool threads. Default is 2.
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.figment = self.figment.merge(Serialized::default("worker_threads", n));
        self
    }

    /// Set the lag that counts as a violation.
    pub fn monitor_threshold_ms(self, ms: u64) -> Self {
        self.merge_nested("monitor", "threshold_ms", ms)
    }

    /// Set the monitor's sampling period.
    pub fn monitor_interval_ms(self, ms: u64) -> Self {
        self.merge_nested("monitor", "interval_ms", ms)
    }

    /// Set how the cooperative library splits its work.
    pub fn chunk_plan(mut self, plan: ChunkPlan) -> Self {
        self.figment = self.figment.merge(Serialized::default("chunk", plan));
        self
    }

    /// Set the number of slots in the stream-process channel.
    pub fn stream_buffer(mut self, slots: usize) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("stream_buffer", slots));
        self
    }

    /// Set the directory holding the scratch payload.
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("scratch_dir", dir.into()));
        self
    }

    /// Set how long shutdown may take before the process is forced to exit.
    pub fn shutdown_grace_ms(mut self, ms: u64) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("shutdown_grace_ms", ms));
        self
    }

    /// Provide an external Prometheus registry for metrics exposition.
    ///
    /// Without one the runtime registers its metrics in a private registry,
    /// which `/metrics` still renders.
    pub fn prometheus_registry(mut self, registry: Registry) -> Self {
        self.prometheus_registry = Some(registry);
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the `HarnessArgs` struct.
    pub fn with_cli_args(mut self, args: &HarnessArgs) -> Self {
        if let Some(ref prefix) = args.prefix {
            self = self.prefix(prefix.clone());
        }
        if let Some(variant) = args.variant {
            self = self.variant(variant);
        }
        if let Some(ref host) = args.host {
            self = self.host(host.clone());
        }
        if let Some(port) = args.port {
            self = self.port(port);
        }
        if let Some(threads) = args.worker_threads {
            self = self.worker_threads(threads);
        }
        if let Some(ms) = args.threshold_ms {
            self = self.monitor_threshold_ms(ms);
        }
        if let Some(ms) = args.interval_ms {
            self = self.monitor_interval_ms(ms);
        }
        if let Some(slots) = args.stream_buffer {
            self = self.stream_buffer(slots);
        }
        if let Some(ref dir) = args.scratch_dir {
            self = self.scratch_dir(dir.clone());
        }
        self
    }

    fn merge_nested(mut self, table: &str, key: &str, value: u64) -> Self {
        let entry = BTreeMap::from([(key.to_string(), value)]);
        self.figment = self.figment.merge(Serialized::default(table, entry));
        self
    }

    /// Extract the merged configuration without building a runtime.
    pub fn config(self) -> Result<HarnessConfig> {
        let mut config: HarnessConfig = self.figment.extract().map_err(Box::new)?;
        config.prometheus_registry = self.prometheus_registry;
        Ok(config)
    }

    /// Build the runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction fails
    /// - The shared context or the worker pool cannot be constructed
    pub fn build(self) -> Result<HarnessRuntime> {
        HarnessRuntime::from_config(self.config()?)
    }
}

/// CLI arguments for harness configuration.
///
/// Use with clap's `Parser` derive macro. These arguments can be applied
/// to a `HarnessBuilder` using `with_cli_args`.
///
/// # Examples
///
/// ```ignore
/// use clap::Parser;
/// use looplag::{HarnessArgs, HarnessBuilder};
///
/// #[derive(Parser)]
/// struct Cli {
///     #[command(flatten)]
///     harness: HarnessArgs,
/// }
///
/// let cli = Cli::parse();
/// let runtime = HarnessBuilder::new().with_cli_args(&cli.harness).build()?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct HarnessArgs {
    /// Thread and metric name prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Operation library to serve
    #[arg(long, value_enum)]
    pub variant: Option<Variant>,

    /// Listen address
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port
    #[arg(long)]
    pub port: Option<u16>,

    /// Number of worker pool threads
    #[arg(long)]
    pub worker_threads: Option<usize>,

    /// Lag above this many milliseconds counts as a violation
    #[arg(long)]
    pub threshold_ms: Option<u64>,

    /// Monitor sampling period in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Slots in the stream-process channel
    #[arg(long)]
    pub stream_buffer: Option<usize>,

    /// Directory holding the scratch payload
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = HarnessBuilder::new().config().unwrap();
        assert_eq!(config.prefix, "looplag");
        assert_eq!(config.variant, Variant::Cooperative);
        assert!(config.port.is_none());
        assert_eq!(config.monitor.threshold_ms, 50);
        assert!(config.scratch_dir.is_none());
    }

    #[test]
    fn test_builder_programmatic_override() {
        let config = HarnessBuilder::new()
            .prefix("demo")
            .variant(Variant::Monopolizing)
            .port(4100)
            .worker_threads(3)
            .monitor_threshold_ms(25)
            .stream_buffer(4)
            .shutdown_grace_ms(250)
            .config()
            .unwrap();

        assert_eq!(config.prefix, "demo");
        assert_eq!(config.variant, Variant::Monopolizing);
        assert_eq!(config.port, Some(4100));
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.monitor.threshold_ms, 25);
        // Sibling keys of a nested override keep their defaults
        assert_eq!(config.monitor.interval_ms, 100);
        assert_eq!(config.stream_buffer, 4);
        assert_eq!(config.shutdown_grace_ms, 250);
    }

    #[test]
    fn test_builder_chunk_plan() {
        let plan = ChunkPlan {
            chunk_size: 100,
            ..ChunkPlan::default()
        };
        let config = HarnessBuilder::new().chunk_plan(plan).config().unwrap();
        assert_eq!(config.chunk, plan);
    }

    #[test]
    fn test_builder_file_then_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("looplag.toml");
        std::fs::write(
            &path,
            "variant = \"blocking\"\nport = 5000\n[monitor]\ninterval_ms = 20\n",
        )
        .unwrap();

        let config = HarnessBuilder::new()
            .file(&path)
            .port(5001)
            .config()
            .unwrap();

        assert_eq!(config.variant, Variant::Monopolizing);
        assert_eq!(config.port, Some(5001));
        assert_eq!(config.monitor.interval_ms, 20);
        assert_eq!(config.monitor.threshold_ms, 50);
    }

    #[test]
    fn test_builder_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("looplag.json");
        std::fs::write(&path, r#"{"stream_buffer": 2, "chunk": {"fib_ceiling": 20}}"#).unwrap();

        let config = HarnessBuilder::new().file(&path).config().unwrap();
        assert_eq!(config.stream_buffer, 2);
        assert_eq!(config.chunk.fib_ceiling, 20);
        assert_eq!(config.chunk.chunk_size, 10_000);
    }

    #[test]
    fn test_builder_cli_args() {
        let args = HarnessArgs {
            prefix: Some("cli".to_string()),
            variant: Some(Variant::Monopolizing),
            port: Some(0),
            threshold_ms: Some(10),
            ..HarnessArgs::default()
        };

        let config = HarnessBuilder::new()
            .prefix("original")
            .host("0.0.0.0")
            .with_cli_args(&args)
            .config()
            .unwrap();

        // CLI args override programmatic values, unset ones leave them alone
        assert_eq!(config.prefix, "cli");
        assert_eq!(config.variant, Variant::Monopolizing);
        assert_eq!(config.port, Some(0));
        assert_eq!(config.monitor.threshold_ms, 10);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_builder_registry_is_carried() {
        let registry = Registry::new();
        let config = HarnessBuilder::new()
            .prometheus_registry(registry)
            .config()
            .unwrap();
        assert!(config.prometheus_registry.is_some());
    }

    #[test]
    fn test_build_runtime() {
        let runtime = HarnessBuilder::new()
            .prefix("built")
            .worker_threads(1)
            .build()
            .unwrap();
        assert_eq!(runtime.config().prefix, "built");
    }
}
