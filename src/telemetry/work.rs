//! Work execution span helpers.

use crate::model::Outcome;
use tracing::Span;
use uuid::Uuid;

/// Start the span covering one dispatched task.
///
/// `work.outcome` starts empty and is filled by [`record_outcome`].
pub fn start_work_span(work_id: &str, worker_id: &Uuid) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.id" = work_id,
        "worker.id" = %worker_id,
        "work.outcome" = tracing::field::Empty,
    )
}

/// Record how the attempt ended on the span and emit an event inside it.
pub fn record_outcome(span: &Span, outcome: Outcome, duration_ms: u64) {
    span.record("work.outcome", outcome.as_str());
    span.in_scope(|| {
        tracing::info!(outcome = outcome.as_str(), duration_ms, "work attempt finished");
    });
}
