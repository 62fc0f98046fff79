// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pipeline counters.
//!
//! Recorded through the `metrics` facade; the hosting process picks the
//! exporter. Without one installed every call is a no-op.
//!
//! # Metric names
//! - `user_pipeline_records_total{stage, status}`
//!   - `stage`: `read`, `publish`, `consume`
//!   - `status`: `ok`, `error`, `ack`, `ack_error`, `reject`
//! - `user_pipeline_cache_total{result}`: `hit`, `miss`, `corrupt`
//! - `user_pipeline_cache_fallback_total`: no-op cache selected at startup

use metrics::counter;

/// Producer read a row (`ok`) or skipped it (`error`).
pub fn record_read(ok: bool) {
    record("read", if ok { "ok" } else { "error" });
}

pub fn record_publish(ok: bool) {
    record("publish", if ok { "ok" } else { "error" });
}

/// Consumer settled a delivery.
pub fn record_settled(acked: bool) {
    record("consume", if acked { "ack" } else { "reject" });
}

/// Row persisted but the broker refused the ack.
pub fn record_ack_failed() {
    record("consume", "ack_error");
}

fn record(stage: &'static str, status: &'static str) {
    counter!(
        "user_pipeline_records_total",
        "stage" => stage,
        "status" => status
    )
    .increment(1);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResult {
    Hit,
    Miss,
    Corrupt,
}

impl CacheResult {
    fn label(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Corrupt => "corrupt",
        }
    }
}

pub fn record_cache(result: CacheResult) {
    counter!("user_pipeline_cache_total", "result" => result.label()).increment(1);
}

pub fn record_cache_fallback() {
    counter!("user_pipeline_cache_fallback_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder installed: calls must be safe no-ops.
    #[test]
    fn test_counters_without_recorder() {
        record_read(true);
        record_read(false);
        record_publish(true);
        record_settled(false);
        record_ack_failed();
        record_cache(CacheResult::Corrupt);
        record_cache_fallback();
    }

    #[test]
    fn test_cache_labels() {
        assert_eq!(CacheResult::Hit.label(), "hit");
        assert_eq!(CacheResult::Miss.label(), "miss");
        assert_eq!(CacheResult::Corrupt.label(), "corrupt");
    }
}
