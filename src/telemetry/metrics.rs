//! Metric instrument factories.
//!
//! Instruments come from the globally-registered `MeterProvider`; without one
//! they are no-ops.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("workq")
}

/// Counter: `add_work` calls.
/// Labels: `result` ("created" | "exists").
pub fn work_submitted() -> Counter<u64> {
    meter()
        .u64_counter("workq.work.submitted")
        .with_description("Number of work items submitted")
        .build()
}

/// Counter: per-candidate claim results during a scan.
/// Labels: `result` ("claimed" | "contended" | "stale" | "at_capacity").
pub fn claim_attempts() -> Counter<u64> {
    meter()
        .u64_counter("workq.claim.attempts")
        .with_description("Claim attempts by result")
        .build()
}

/// Counter: processing attempts by outcome.
/// Labels: `result` ("ok" | "failed" | "panicked").
pub fn work_processed() -> Counter<u64> {
    meter()
        .u64_counter("workq.work.processed")
        .with_description("Processing attempts by outcome")
        .build()
}

/// Counter: deletes that failed after a processing attempt.
/// Labels: `node` ("item" | "lock").
pub fn cleanup_failures() -> Counter<u64> {
    meter()
        .u64_counter("workq.cleanup.failures")
        .with_description("Failed deletes of work items or claim markers")
        .build()
}

/// Counter: registry scans.
/// Labels: `trigger` ("startup" | "watch" | "timer" | "completion").
pub fn scans() -> Counter<u64> {
    meter()
        .u64_counter("workq.scans")
        .with_description("Registry scans by trigger")
        .build()
}

/// Histogram: processing duration in milliseconds.
/// Labels: `result`.
pub fn processing_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("workq.processing.duration_ms")
        .with_description("Processing duration in milliseconds")
        .with_unit("ms")
        .build()
}

pub(crate) fn result_label(result: &'static str) -> [KeyValue; 1] {
    [KeyValue::new("result", result)]
}
