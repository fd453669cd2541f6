//! Prometheus counters and gauges for the lag monitor and dispatcher.
//!
//! Counters work standalone without a Registry; registration is only needed
//! for exposition.

use std::time::Duration;

use prometheus::{Gauge, IntCounter, Opts, Registry};

use crate::timing::as_millis_f64;

/// Prometheus metrics for one harness instance.
#[derive(Clone)]
pub struct HarnessMetrics {
    /// Largest lag recorded by a violation, in milliseconds
    pub max_lag_ms: Gauge,

    /// Lag of the most recent sample, in milliseconds
    pub last_lag_ms: Gauge,

    /// Monitor ticks compared against a previous tick
    pub monitor_samples: IntCounter,

    /// Samples whose lag exceeded the threshold
    pub lag_violations: IntCounter,

    /// Requests handled by the dispatcher
    pub requests_total: IntCounter,

    /// Operations that returned a failure record
    pub operation_failures: IntCounter,

    /// Operations that ran to the end, whether or not the client stayed
    pub operations_completed: IntCounter,
}

impl Default for HarnessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HarnessMetrics {
    /// Create metrics with default prefix "looplag".
    pub fn new() -> Self {
        Self::with_prefix("looplag")
    }

    /// Create metrics with a custom prefix.
    ///
    /// The prefix is sanitized to be a valid Prometheus metric name: hyphens and
    /// other invalid characters are replaced with underscores.
    pub fn with_prefix(prefix: &str) -> Self {
        // Valid chars: [a-zA-Z_:] for first char, [a-zA-Z0-9_:] for rest
        let prefix: String = prefix
            .chars()
            .enumerate()
            .map(|(i, c)| {
                let valid = if i == 0 {
                    c.is_ascii_alphabetic() || c == '_' || c == ':'
                } else {
                    c.is_ascii_alphanumeric() || c == '_' || c == ':'
                };
                if valid {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Self {
            max_lag_ms: Gauge::with_opts(Opts::new(
                format!("{}_max_lag_ms", prefix),
                "Largest scheduling lag recorded by a violation (ms)",
            ))
            .expect("metric creation should not fail"),

            last_lag_ms: Gauge::with_opts(Opts::new(
                format!("{}_last_lag_ms", prefix),
                "Scheduling lag of the most recent sample (ms)",
            ))
            .expect("metric creation should not fail"),

            monitor_samples: IntCounter::with_opts(Opts::new(
                format!("{}_monitor_samples", prefix),
                "Monitor ticks compared against a previous tick",
            ))
            .expect("metric creation should not fail"),

            lag_violations: IntCounter::with_opts(Opts::new(
                format!("{}_lag_violations", prefix),
                "Samples whose lag exceeded the threshold",
            ))
            .expect("metric creation should not fail"),

            requests_total: IntCounter::with_opts(Opts::new(
                format!("{}_requests_total", prefix),
                "Requests handled by the dispatcher",
            ))
            .expect("metric creation should not fail"),

            operation_failures: IntCounter::with_opts(Opts::new(
                format!("{}_operation_failures", prefix),
                "Operations that returned a failure record",
            ))
            .expect("metric creation should not fail"),

            operations_completed: IntCounter::with_opts(Opts::new(
                format!("{}_operations_completed", prefix),
                "Operations that ran to the end",
            ))
            .expect("metric creation should not fail"),
        }
    }

    /// Register all metrics with a Registry for exposition.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate names).
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.max_lag_ms.clone()))?;
        registry.register(Box::new(self.last_lag_ms.clone()))?;
        registry.register(Box::new(self.monitor_samples.clone()))?;
        registry.register(Box::new(self.lag_violations.clone()))?;
        registry.register(Box::new(self.requests_total.clone()))?;
        registry.register(Box::new(self.operation_failures.clone()))?;
        registry.register(Box::new(self.operations_completed.clone()))?;
        Ok(())
    }

    /// Record one monitor sample.
    ///
    /// `max_lag` is the monitor's running maximum after this sample.
    #[inline]
    pub fn record_sample(&self, lag: Duration, violation: bool, max_lag: Duration) {
        self.monitor_samples.inc();
        self.last_lag_ms.set(as_millis_f64(lag));
        if violation {
            self.lag_violations.inc();
            self.max_lag_ms.set(as_millis_f64(max_lag));
        }
    }

    #[inline]
    pub fn record_request(&self) {
        self.requests_total.inc();
    }

    #[inline]
    pub fn record_failure(&self) {
        self.operation_failures.inc();
    }

    #[inline]
    pub fn record_completion(&self) {
        self.operations_completed.inc();
    }
}

impl std::fmt::Debug for HarnessMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessMetrics")
            .field("monitor_samples", &self.monitor_samples.get())
            .field("lag_violations", &self.lag_violations.get())
            .field("requests_total", &self.requests_total.get())
            .field("operation_failures", &self.operation_failures.get())
            .field("operations_completed", &self.operations_completed.get())
            .finish()
    }
}
