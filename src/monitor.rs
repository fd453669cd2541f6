//! Scheduling lag monitor.
//!
//! A sampling task runs on the shared context and wakes every `interval`. If
//! the context was busy when the timer expired, the wakeup is late; the
//! lateness beyond the interval is the lag.
//!
//! ```text
//!   tick n-1          tick n (expected)      tick n (actual)
//!      │◀──── interval ────▶│◀───── lag ─────────▶│
//!      └──────────────── elapsed ────────────────┘
//! ```
//!
//! Only the sampling task mutates the counters. Readers take a snapshot with
//! [`LoopMonitor::stats`] or subscribe to the sample feed.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::bridge::panic_message;
use crate::metrics::HarnessMetrics;
use crate::timing::serialize_ms;

const SAMPLE_FEED_CAPACITY: usize = 64;

/// One comparison of a tick against the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSample {
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_ms")]
    pub lag: Duration,
    #[serde(serialize_with = "serialize_ms")]
    pub threshold: Duration,
    pub violation: bool,
}

/// Snapshot of a monitor's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    pub violation_count: u64,
    #[serde(serialize_with = "serialize_ms")]
    pub max_lag: Duration,
    #[serde(serialize_with = "serialize_ms")]
    pub threshold: Duration,
    /// Ticks compared against a previous tick.
    pub samples: u64,
}

/// Counters owned by one monitor.
#[derive(Debug, Default)]
struct LagState {
    last_tick: Option<Instant>,
    violation_count: u64,
    max_lag: Duration,
    samples: u64,
}

impl LagState {
    /// Fold one tick into the counters.
    ///
    /// The first tick only sets the baseline and yields no sample.
    fn record(
        &mut self,
        now: Instant,
        interval: Duration,
        threshold: Duration,
    ) -> Option<SchedulerSample> {
        let previous = self.last_tick.replace(now)?;
        let lag = now
            .saturating_duration_since(previous)
            .saturating_sub(interval);
        let violation = lag > threshold;

        self.samples += 1;
        if violation {
            self.violation_count += 1;
            self.max_lag = self.max_lag.max(lag);
        }

        Some(SchedulerSample {
            timestamp: Utc::now(),
            lag,
            threshold,
            violation,
        })
    }
}

/// Periodic sampler of scheduling lag on one runtime.
///
/// Instances are independent: each owns its counters and its cancellation
/// token.
///
/// # Examples
///
/// ```ignore
/// let monitor = LoopMonitor::new(Duration::from_millis(50), Duration::from_millis(100));
/// monitor.start(runtime.tokio_handle());
/// // ... serve requests ...
/// monitor.stop();
/// tracing::info!(stats = ?monitor.stats(), "final lag statistics");
/// ```
pub struct LoopMonitor {
    threshold: Duration,
    interval: Duration,
    state: Arc<Mutex<LagState>>,
    started: AtomicBool,
    cancel: CancellationToken,
    feed: broadcast::Sender<SchedulerSample>,
    metrics: Option<HarnessMetrics>,
}

impl LoopMonitor {
    /// Create a stopped monitor. A zero interval is raised to one millisecond.
    pub fn new(threshold: Duration, interval: Duration) -> Self {
        let (feed, _) = broadcast::channel(SAMPLE_FEED_CAPACITY);
        Self {
            threshold,
            interval: interval.max(Duration::from_millis(1)),
            state: Arc::new(Mutex::new(LagState::default())),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            feed,
            metrics: None,
        }
    }

    /// Mirror every sample into `metrics`.
    pub fn with_metrics(mut self, metrics: HarnessMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Begin sampling on `handle`.
    ///
    /// Returns `false` without doing anything if the monitor is already
    /// running or has been stopped.
    pub fn start(&self, handle: &tokio::runtime::Handle) -> bool {
        if self.cancel.is_cancelled() || self.started.swap(true, Ordering::AcqRel) {
            return false;
        }

        let sampler = Sampler {
            threshold: self.threshold,
            interval: self.interval,
            state: Arc::clone(&self.state),
            cancel: self.cancel.clone(),
            feed: self.feed.clone(),
            metrics: self.metrics.clone(),
        };

        handle.spawn(async move {
            if let Err(payload) = AssertUnwindSafe(sampler.run()).catch_unwind().await {
                error!(
                    panic = %panic_message(payload.as_ref()),
                    "lag sampling task ended abnormally"
                );
            }
        });

        debug!(
            threshold_ms = self.threshold.as_millis() as u64,
            interval_ms = self.interval.as_millis() as u64,
            "lag monitor started"
        );
        true
    }

    /// Stop sampling. Calling this more than once is harmless.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            debug!("lag monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> MonitorStats {
        let state = self.state.lock();
        MonitorStats {
            violation_count: state.violation_count,
            max_lag: state.max_lag,
            threshold: self.threshold,
            samples: state.samples,
        }
    }

    /// Receive every sample taken after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerSample> {
        self.feed.subscribe()
    }
}

impl Drop for LoopMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for LoopMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopMonitor")
            .field("threshold", &self.threshold)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}

/// State moved into the sampling task.
struct Sampler {
    threshold: Duration,
    interval: Duration,
    state: Arc<Mutex<LagState>>,
    cancel: CancellationToken,
    feed: broadcast::Sender<SchedulerSample>,
    metrics: Option<HarnessMetrics>,
}

impl Sampler {
    async fn run(self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Measure when the task actually ran, not when the tick was due
            let now = Instant::now();
            let (sample, max_lag) = {
                let mut state = self.state.lock();
                let sample = state.record(now, self.interval, self.threshold);
                (sample, state.max_lag)
            };
            let Some(sample) = sample else {
                continue;
            };

            if sample.violation {
                warn!(
                    lag_ms = sample.lag.as_millis() as u64,
                    threshold_ms = self.threshold.as_millis() as u64,
                    "event loop lag exceeded threshold"
                );
            }
            if let Some(ref metrics) = self.metrics {
                metrics.record_sample(sample.lag, sample.violation, max_lag);
            }
            // No subscribers is not an error
            let _ = self.feed.send(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(100);
    const THRESHOLD: Duration = Duration::from_millis(50);

    #[test]
    fn test_first_tick_is_baseline() {
        let mut state = LagState::default();
        assert!(state.record(Instant::now(), INTERVAL, THRESHOLD).is_none());
        assert_eq!(state.samples, 0);
    }

    #[test]
    fn test_lag_accounting() {
        let mut state = LagState::default();
        let t0 = Instant::now();
        state.record(t0, INTERVAL, THRESHOLD);

        // On time
        let t1 = t0 + Duration::from_millis(100);
        let sample = state.record(t1, INTERVAL, THRESHOLD).unwrap();
        assert_eq!(sample.lag, Duration::ZERO);
        assert!(!sample.violation);

        // 150ms late
        let t2 = t1 + Duration::from_millis(250);
        let sample = state.record(t2, INTERVAL, THRESHOLD).unwrap();
        assert_eq!(sample.lag, Duration::from_millis(150));
        assert!(sample.violation);
        assert_eq!(state.max_lag, Duration::from_millis(150));

        // Late but under threshold: no violation, max unchanged
        let t3 = t2 + Duration::from_millis(140);
        let sample = state.record(t3, INTERVAL, THRESHOLD).unwrap();
        assert_eq!(sample.lag, Duration::from_millis(40));
        assert!(!sample.violation);

        // Exactly at threshold is not a violation
        let t4 = t3 + Duration::from_millis(150);
        assert!(!state.record(t4, INTERVAL, THRESHOLD).unwrap().violation);

        assert_eq!(state.samples, 4);
        assert_eq!(state.violation_count, 1);
        assert_eq!(state.max_lag, Duration::from_millis(150));
    }

    #[test]
    fn test_max_lag_is_non_decreasing() {
        let mut state = LagState::default();
        let mut now = Instant::now();
        state.record(now, INTERVAL, THRESHOLD);

        let mut previous_max = Duration::ZERO;
        for late_ms in [300u64, 0, 80, 500, 60, 200] {
            now += INTERVAL + Duration::from_millis(late_ms);
            state.record(now, INTERVAL, THRESHOLD);
            assert!(state.max_lag >= previous_max);
            previous_max = state.max_lag;
        }
        assert_eq!(state.max_lag, Duration::from_millis(500));
        assert_eq!(state.violation_count, 5);
    }

    #[test]
    fn test_early_tick_has_zero_lag() {
        let mut state = LagState::default();
        let t0 = Instant::now();
        state.record(t0, INTERVAL, THRESHOLD);
        let sample = state
            .record(t0 + Duration::from_millis(30), INTERVAL, THRESHOLD)
            .unwrap();
        assert_eq!(sample.lag, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_blocked_context_is_detected() {
        let monitor = LoopMonitor::new(Duration::from_millis(100), Duration::from_millis(20));
        assert!(monitor.start(&tokio::runtime::Handle::current()));

        time::sleep(Duration::from_millis(60)).await;
        // Hold the context thread without suspending
        std::thread::sleep(Duration::from_millis(300));
        time::sleep(Duration::from_millis(60)).await;

        let stats = monitor.stats();
        assert!(stats.violation_count >= 1, "{stats:?}");
        assert!(stats.max_lag >= Duration::from_millis(150), "{stats:?}");
        monitor.stop();
    }

    #[tokio::test]
    async fn test_subscribe_receives_violation() {
        let monitor = LoopMonitor::new(Duration::from_millis(50), Duration::from_millis(10))
            .with_metrics(HarnessMetrics::new());
        let mut feed = monitor.subscribe();
        monitor.start(&tokio::runtime::Handle::current());

        time::sleep(Duration::from_millis(30)).await;
        std::thread::sleep(Duration::from_millis(200));

        let violation = time::timeout(Duration::from_secs(2), async {
            loop {
                match feed.recv().await {
                    Ok(sample) if sample.violation => break sample,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("feed closed"),
                }
            }
        })
        .await
        .unwrap();

        assert!(violation.lag > Duration::from_millis(50));
        assert_eq!(violation.threshold, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let handle = tokio::runtime::Handle::current();
        let monitor = LoopMonitor::new(THRESHOLD, Duration::from_millis(10));
        assert!(!monitor.is_running());

        assert!(monitor.start(&handle));
        assert!(monitor.is_running());
        // Already running
        assert!(!monitor.start(&handle));

        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());

        // Cannot be restarted
        assert!(!monitor.start(&handle));
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_stopped_monitor_stops_sampling() {
        let monitor = LoopMonitor::new(THRESHOLD, Duration::from_millis(5));
        monitor.start(&tokio::runtime::Handle::current());
        time::sleep(Duration::from_millis(50)).await;
        monitor.stop();
        // Let the sampling task observe the cancellation
        tokio::task::yield_now().await;
        time::sleep(Duration::from_millis(10)).await;

        let frozen = monitor.stats().samples;
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.stats().samples, frozen);
    }

    #[tokio::test]
    async fn test_instances_are_independent() {
        let handle = tokio::runtime::Handle::current();
        let running = LoopMonitor::new(THRESHOLD, Duration::from_millis(5));
        let idle = LoopMonitor::new(Duration::from_millis(10), INTERVAL);
        running.start(&handle);

        time::sleep(Duration::from_millis(40)).await;

        assert!(running.stats().samples > 0);
        let idle_stats = idle.stats();
        assert_eq!(idle_stats.samples, 0);
        assert_eq!(idle_stats.violation_count, 0);
        assert_eq!(idle_stats.threshold, Duration::from_millis(10));
    }

    #[test]
    fn test_stats_serialization() {
        let stats = MonitorStats {
            violation_count: 2,
            max_lag: Duration::from_millis(180),
            threshold: THRESHOLD,
            samples: 9,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["violationCount"], 2);
        assert_eq!(json["maxLag"], "180.00ms");
        assert_eq!(json["threshold"], "50.00ms");
        assert_eq!(json["samples"], 9);
    }
}
