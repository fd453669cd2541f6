//! Millisecond formatting shared by results, envelopes and monitor snapshots.

use std::time::Duration;

use serde::Serializer;

/// Format a duration as fractional milliseconds with two decimals, e.g. `"12.34ms"`.
pub fn format_ms(duration: Duration) -> String {
    format!("{:.2}ms", as_millis_f64(duration))
}

/// Duration as fractional milliseconds.
#[inline]
pub fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

pub(crate) fn serialize_ms<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_ms(*duration))
}
