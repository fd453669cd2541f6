//! Request dispatch.
//!
//! Maps a route path plus raw query parameters to one library call and wraps
//! the result in the response envelope. Parameter parsing never fails a
//! request: anything unusable is replaced by the route's default. The only
//! input rejection is compute's fibonacci ceiling, which the library reports
//! and this module turns into a 400.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::metrics::HarnessMetrics;
use crate::ops::kernels::FIB_DEPTH;
use crate::ops::{Cooperative, Monopolizing, OperationResult, ScratchFile, Variant};
use crate::runtime::HarnessRuntime;
use crate::timing::serialize_ms;

/// One endpoint of a service variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Index,
    ReadRepeat,
    Compute,
    DeriveKey,
    Spin,
    Delay,
    StreamProcess,
    BulkSerialize,
    Aggregate,
    Metrics,
}

const MONOPOLIZING_ROUTES: &[Route] = &[
    Route::Index,
    Route::ReadRepeat,
    Route::Compute,
    Route::DeriveKey,
    Route::Spin,
    Route::BulkSerialize,
    Route::Aggregate,
    Route::Metrics,
];

const COOPERATIVE_ROUTES: &[Route] = &[
    Route::Index,
    Route::ReadRepeat,
    Route::Compute,
    Route::DeriveKey,
    Route::Delay,
    Route::StreamProcess,
    Route::Aggregate,
    Route::BulkSerialize,
    Route::Metrics,
];

impl Route {
    /// Every route `variant` serves, in listing order.
    pub fn all(variant: Variant) -> &'static [Route] {
        match variant {
            Variant::Monopolizing => MONOPOLIZING_ROUTES,
            Variant::Cooperative => COOPERATIVE_ROUTES,
        }
    }

    /// Path of this route under `variant`, if the variant serves it.
    pub fn path(self, variant: Variant) -> Option<&'static str> {
        use Variant::{Cooperative as C, Monopolizing as M};
        let path = match (self, variant) {
            (Route::Index, _) => "/",
            (Route::Metrics, _) => "/metrics",
            (Route::ReadRepeat, M) => "/slow-sync",
            (Route::ReadRepeat, C) => "/slow-async",
            (Route::Compute, M) => "/compute",
            (Route::Compute, C) => "/compute-async",
            (Route::DeriveKey, M) => "/crypto",
            (Route::DeriveKey, C) => "/crypto-async",
            (Route::Spin, M) => "/busy-loop",
            (Route::Delay, C) => "/delay",
            (Route::StreamProcess, C) => "/stream-process",
            (Route::BulkSerialize, M) => "/json-parse",
            (Route::BulkSerialize, C) => "/json-async",
            (Route::Aggregate, M) => "/multiple",
            (Route::Aggregate, C) => "/parallel",
            (Route::Spin, C) | (Route::Delay, M) | (Route::StreamProcess, M) => return None,
        };
        Some(path)
    }

    /// Exact, case-sensitive lookup of `path`.
    pub fn resolve(variant: Variant, path: &str) -> Option<Route> {
        Route::all(variant)
            .iter()
            .copied()
            .find(|route| route.path(variant) == Some(path))
    }

    /// Paths of every route `variant` serves.
    pub fn paths(variant: Variant) -> Vec<&'static str> {
        Route::all(variant)
            .iter()
            .filter_map(|route| route.path(variant))
            .collect()
    }

    fn description(self, variant: Variant) -> &'static str {
        use Variant::{Cooperative as C, Monopolizing as M};
        match (self, variant) {
            (Route::Index, _) => "Health check",
            (Route::Metrics, _) => "Prometheus metrics",
            (Route::ReadRepeat, M) => "Synchronous file read",
            (Route::ReadRepeat, C) => "Asynchronous file read",
            (Route::Compute, M) => "CPU-intensive computation",
            (Route::Compute, C) => "Chunked computation with yield",
            (Route::DeriveKey, M) => "Cryptographic operation",
            (Route::DeriveKey, C) => "Async cryptographic operation",
            (Route::Spin, _) => "Intentional busy loop",
            (Route::Delay, _) => "Async delay (no busy waiting)",
            (Route::StreamProcess, _) => "Stream processing",
            (Route::BulkSerialize, M) => "Large JSON parsing",
            (Route::BulkSerialize, C) => "Async JSON processing",
            (Route::Aggregate, M) => "Multiple blocking operations",
            (Route::Aggregate, C) => "Parallel async operations",
        }
    }

    fn note(self, variant: Variant) -> Option<&'static str> {
        use Variant::{Cooperative as C, Monopolizing as M};
        let note = match (self, variant) {
            (Route::ReadRepeat, M) => "Event loop was blocked during file read",
            (Route::ReadRepeat, C) => "Event loop remained free during file read",
            (Route::Compute, M) => "Event loop was blocked during computation",
            (Route::Compute, C) => "Computation yielded to event loop between chunks",
            (Route::DeriveKey, M) => "Event loop was blocked during crypto operation",
            (Route::DeriveKey, C) => "Crypto operation ran in thread pool - non-blocking",
            (Route::Spin, _) => "Event loop was COMPLETELY blocked - worst case!",
            (Route::Delay, _) => "Proper async delay - no blocking!",
            (Route::StreamProcess, _) => "Stream processing with automatic backpressure",
            (Route::BulkSerialize, M) => "Event loop was blocked during JSON operations",
            (Route::BulkSerialize, C) => "JSON processing with yield points to prevent blocking",
            (Route::Aggregate, M) => "Event loop was blocked for entire duration of all operations",
            (Route::Aggregate, C) => "Multiple operations ran in parallel - much faster!",
            (Route::Index, _) | (Route::Metrics, _) => return None,
        };
        Some(note)
    }
}

/// Defaults and upper bounds of the numeric query parameters.
mod param {
    pub const READ_ITERATIONS: (u64, u64) = (3, 10_000);
    pub const LIMIT: (u64, u64) = (1_000_000, 10_000_000_000);
    pub const DERIVE_ITERATIONS: (u64, u64) = (100_000, 10_000_000);
    pub const DURATION_MS: (u64, u64) = (1_000, 600_000);
    pub const CHUNKS: (u64, u64) = (100, 1_000_000);
    pub const SIZE: (u64, u64) = (10_000, 1_000_000);
}

/// Leading decimal digits of `raw`, ignoring surrounding whitespace and an optional `+`.
///
/// `"12abc"` gives 12 and `"3.7"` gives 3; a sign, no digits or overflow give `None`.
fn leading_integer(raw: &str) -> Option<u64> {
    let s = raw.trim_start();
    let s = s.strip_prefix('+').unwrap_or(s);
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

/// Raw query parameters with default substitution.
struct Params<'a>(&'a HashMap<String, String>);

impl Params<'_> {
    /// Positive value of `name` no larger than `max`, or `default`.
    fn positive(&self, key: &str, (default, max): (u64, u64)) -> u64 {
        match self.0.get(key).and_then(|raw| leading_integer(raw)) {
            Some(value) if value > 0 && value <= max => value,
            Some(value) => {
                debug!(param = key, value, default, "parameter out of range, using default");
                default
            }
            None => default,
        }
    }

    fn duration_ms(&self) -> Duration {
        Duration::from_millis(self.positive("duration", param::DURATION_MS))
    }

    fn derive_iterations(&self) -> u32 {
        // DERIVE_ITERATIONS max fits in u32
        u32::try_from(self.positive("iterations", param::DERIVE_ITERATIONS)).unwrap_or(u32::MAX)
    }

    /// Depths too large for `u32` saturate, so they are still rejected by the ceiling.
    fn depth(&self) -> u32 {
        let depth = self.positive("depth", (u64::from(FIB_DEPTH), u64::MAX));
        u32::try_from(depth).unwrap_or(u32::MAX)
    }
}

/// Parsed arguments, owned so the operation can outlive the request.
#[derive(Debug, Clone, Copy)]
struct Args {
    read_iterations: u64,
    limit: u64,
    depth: u32,
    derive_iterations: u32,
    duration: Duration,
    chunks: u64,
    size: u64,
}

impl From<&Params<'_>> for Args {
    fn from(params: &Params<'_>) -> Self {
        Self {
            read_iterations: params.positive("iterations", param::READ_ITERATIONS),
            limit: params.positive("limit", param::LIMIT),
            depth: params.depth(),
            derive_iterations: params.derive_iterations(),
            duration: params.duration_ms(),
            chunks: params.positive("chunks", param::CHUNKS),
            size: params.positive("size", param::SIZE),
        }
    }
}

/// The operation library a dispatcher invokes.
#[derive(Debug, Clone)]
pub enum Library {
    Monopolizing(Monopolizing),
    Cooperative(Cooperative),
}

impl Library {
    /// Build the library selected by the runtime's configuration.
    pub fn from_runtime(runtime: &HarnessRuntime) -> Self {
        let config = runtime.config();
        let scratch = ScratchFile::new(config.effective_scratch_dir());
        match config.variant {
            Variant::Monopolizing => Library::Monopolizing(Monopolizing::new(scratch)),
            Variant::Cooperative => Library::Cooperative(Cooperative::new(
                scratch,
                config.chunk,
                runtime.workers().clone(),
                config.stream_buffer,
            )),
        }
    }

    pub fn variant(&self) -> Variant {
        match self {
            Library::Monopolizing(_) => Variant::Monopolizing,
            Library::Cooperative(_) => Variant::Cooperative,
        }
    }

    /// Run the workload behind `route`. `None` if this library has no such workload.
    async fn run(&self, route: Route, args: Args) -> Option<OperationResult> {
        let result = match self {
            Library::Monopolizing(lib) => match route {
                Route::ReadRepeat => lib.read_repeat(args.read_iterations),
                Route::Compute => lib.compute(args.limit),
                Route::DeriveKey => lib.derive_key(args.derive_iterations),
                Route::Spin => lib.spin(args.duration),
                Route::BulkSerialize => lib.bulk_serialize(args.size),
                Route::Aggregate => lib.aggregate(),
                _ => return None,
            },
            Library::Cooperative(lib) => match route {
                Route::ReadRepeat => lib.read_repeat(args.read_iterations).await,
                Route::Compute => lib.compute(args.limit, args.depth).await,
                Route::DeriveKey => lib.derive_key(args.derive_iterations).await,
                Route::Delay => lib.delay(args.duration).await,
                Route::StreamProcess => lib.stream_process(args.chunks).await,
                Route::BulkSerialize => lib.bulk_serialize(args.size).await,
                Route::Aggregate => lib.aggregate().await,
                _ => return None,
            },
        };
        Some(result)
    }
}

/// Response produced for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: ReplyBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Json(Value),
    /// Prometheus text exposition.
    Text(String),
}

impl Reply {
    fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => Reply {
                status,
                body: ReplyBody::Json(value),
            },
            Err(e) => {
                warn!(%e, "failed to encode response body");
                Reply::internal_error(e.to_string())
            }
        }
    }

    fn internal_error(message: String) -> Self {
        Reply {
            status: 500,
            body: ReplyBody::Json(json!({ "success": false, "error": message })),
        }
    }

    fn operation_fault(message: String, path: &str) -> Self {
        Reply {
            status: 500,
            body: ReplyBody::Json(json!({
                "success": false,
                "error": message,
                "endpoint": path,
            })),
        }
    }
}

/// Operation result plus request-level fields.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    #[serde(flatten)]
    result: &'a OperationResult,
    #[serde(serialize_with = "serialize_ms")]
    request_duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<&'a str>,
}

/// Routes requests for one service variant to its library.
///
/// Each operation runs as its own task on `tasks`. Dropping the request
/// future, e.g. when the client disconnects, does not stop the operation, and
/// shutdown waits for it through the tracker.
pub struct Dispatcher {
    library: Library,
    metrics: HarnessMetrics,
    registry: Registry,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(
        library: Library,
        metrics: HarnessMetrics,
        registry: Registry,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            library,
            metrics,
            registry,
            tasks,
        }
    }

    /// Dispatcher for the runtime's configured variant, sharing its metrics and task tracker.
    pub fn for_runtime(runtime: &HarnessRuntime) -> Self {
        Self::new(
            Library::from_runtime(runtime),
            runtime.metrics().clone(),
            runtime.registry().clone(),
            runtime.task_tracker().clone(),
        )
    }

    pub fn variant(&self) -> Variant {
        self.library.variant()
    }

    /// Handle one request for `path` with raw query `params`.
    pub async fn dispatch(&self, path: &str, params: &HashMap<String, String>) -> Reply {
        let start = Instant::now();
        self.metrics.record_request();
        let variant = self.variant();

        let Some(route) = Route::resolve(variant, path) else {
            return self.not_found(path);
        };

        match route {
            Route::Index => Reply::json(200, &self.index()),
            Route::Metrics => self.render_metrics(),
            _ => {
                let args = Args::from(&Params(params));
                let library = self.library.clone();
                let metrics = self.metrics.clone();
                let operation = self.tasks.spawn(async move {
                    let result = library.run(route, args).await;
                    if result.is_some() {
                        metrics.record_completion();
                    }
                    result
                });

                match operation.await {
                    Ok(Some(result)) => self.envelope(route, path, result, start),
                    Ok(None) => self.not_found(path),
                    Err(e) => {
                        error!(path, %e, "operation task ended abnormally");
                        self.metrics.record_failure();
                        Reply::operation_fault("Internal Server Error".to_string(), path)
                    }
                }
            }
        }
    }

    fn envelope(
        &self,
        route: Route,
        path: &str,
        mut result: OperationResult,
        start: Instant,
    ) -> Reply {
        let variant = self.variant();
        if let Some(note) = route.note(variant) {
            result.note = Some(note);
        }

        let status = if result.success {
            200
        } else if result.rejected {
            400
        } else {
            self.metrics.record_failure();
            500
        };

        let envelope = Envelope {
            result: &result,
            request_duration: start.elapsed(),
            endpoint: (!result.success).then_some(path),
        };
        info!(
            path,
            status,
            operation = result.operation,
            duration_ms = result.duration.as_millis() as u64,
            blocked = result.blocked,
            "request completed"
        );
        Reply::json(status, &envelope)
    }

    fn index(&self) -> Value {
        let variant = self.variant();
        let endpoints: Vec<String> = Route::all(variant)
            .iter()
            .filter_map(|route| {
                route
                    .path(variant)
                    .map(|path| format!("GET {} - {}", path, route.description(variant)))
            })
            .collect();
        let (message, caveat_key, caveat) = match variant {
            Variant::Monopolizing => (
                "Demonstrating blocking operations",
                "warning",
                "All endpoints block the event loop!",
            ),
            Variant::Cooperative => (
                "Demonstrating non-blocking async operations",
                "note",
                "All endpoints are non-blocking!",
            ),
        };

        let mut body = json!({
            "service": variant.service_name(),
            "version": env!("CARGO_PKG_VERSION"),
            "message": message,
            "endpoints": endpoints,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        body[caveat_key] = Value::from(caveat);
        body
    }

    fn not_found(&self, path: &str) -> Reply {
        debug!(path, "no route");
        Reply::json(
            404,
            &json!({
                "success": false,
                "error": "Not Found",
                "path": path,
                "availableEndpoints": Route::paths(self.variant()),
            }),
        )
    }

    fn render_metrics(&self) -> Reply {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!(%e, "failed to encode metrics");
            return Reply::internal_error(e.to_string());
        }
        match String::from_utf8(buffer) {
            Ok(text) => Reply {
                status: 200,
                body: ReplyBody::Text(text),
            },
            Err(e) => Reply::internal_error(e.to_string()),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("library", &self.library)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}
