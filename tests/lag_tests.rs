//! Integration tests for lag observed on the shared context.

use std::collections::HashMap;
use std::time::Duration;

use looplag::{Dispatcher, HarnessBuilder, HarnessRuntime, LoopMonitor, Variant};

const THRESHOLD: Duration = Duration::from_millis(150);
const INTERVAL: Duration = Duration::from_millis(20);

fn runtime(variant: Variant, dir: &tempfile::TempDir) -> HarnessRuntime {
    HarnessBuilder::new()
        .prefix("lagtest")
        .variant(variant)
        .worker_threads(1)
        .scratch_dir(dir.path())
        .build()
        .expect("failed to create runtime")
}

/// Dispatch `path` with a monitor running and return the monitor.
fn observe(runtime: &HarnessRuntime, path: &str, params: &[(&str, &str)]) -> LoopMonitor {
    let params: HashMap<String, String> = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let dispatcher = Dispatcher::for_runtime(runtime);
    let monitor = LoopMonitor::new(THRESHOLD, INTERVAL);
    assert!(monitor.start(runtime.tokio_handle()));

    runtime.block_on(async {
        // Let the monitor take its baseline tick
        tokio::time::sleep(INTERVAL * 3).await;
        let reply = dispatcher.dispatch(path, &params).await;
        assert_eq!(reply.status, 200);
        // One more tick to observe whatever the request did
        tokio::time::sleep(INTERVAL * 3).await;
    });
    monitor.stop();
    monitor
}

#[test]
fn test_monopolizing_spin_is_observed() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(Variant::Monopolizing, &dir);

    let monitor = observe(&rt, "/busy-loop", &[("duration", "400")]);
    let stats = monitor.stats();
    assert!(stats.violation_count >= 1, "{stats:?}");
    assert!(stats.max_lag >= Duration::from_millis(300), "{stats:?}");
}

#[test]
fn test_cooperative_delay_is_not_observed() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(Variant::Cooperative, &dir);

    let monitor = observe(&rt, "/delay", &[("duration", "400")]);
    let stats = monitor.stats();
    assert_eq!(stats.violation_count, 0, "{stats:?}");
    assert!(stats.samples >= 10, "{stats:?}");
}

#[test]
fn test_cooperative_compute_keeps_ticking() {
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(Variant::Cooperative, &dir);

    let monitor = observe(&rt, "/compute-async", &[("limit", "2000000"), ("depth", "35")]);
    assert_eq!(monitor.stats().violation_count, 0, "{:?}", monitor.stats());
}
