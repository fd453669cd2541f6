//! Prometheus metrics for the harness.
//!
//! Metrics are always collected and can optionally be exposed via a
//! Prometheus registry. The server renders the runtime's registry on
//! `/metrics`.
//!
//! # Available Metrics
//!
//! ## Gauges
//!
//! - `looplag_max_lag_ms` - Largest lag recorded by a violation
//! - `looplag_last_lag_ms` - Lag measured by the most recent sample
//!
//! ## Counters
//!
//! - `looplag_monitor_samples` - Monitor ticks compared against a previous tick
//! - `looplag_lag_violations` - Samples whose lag exceeded the threshold
//! - `looplag_requests_total` - Requests handled by the dispatcher
//! - `looplag_operation_failures` - Operations that returned a failure record
//! - `looplag_operations_completed` - Operations that ran to the end

mod prometheus;

pub use prometheus::HarnessMetrics;
