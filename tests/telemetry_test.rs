//! Integration tests for telemetry initialization and span helpers.

use uuid::Uuid;
use workq::model::Outcome;

#[test]
fn telemetry_initializes_without_endpoint() {
    // Only one global subscriber per process; try_init inside makes a
    // second attempt return Err instead of panicking.
    let config = workq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "workq-test".to_string(),
        log_level: "debug".to_string(),
    };
    let _guard = workq::telemetry::init_telemetry(config);
}

#[test]
fn work_span_records_outcome() {
    let worker = Uuid::new_v4();
    let span = workq::telemetry::work::start_work_span("item-1", &worker);
    workq::telemetry::work::record_outcome(&span, Outcome::Failed, 12);
}

#[test]
fn metric_instruments_build_without_provider() {
    use workq::telemetry::metrics;
    metrics::work_submitted().add(1, &[]);
    metrics::claim_attempts().add(1, &[]);
    metrics::processing_duration_ms().record(1.5, &[]);
}
