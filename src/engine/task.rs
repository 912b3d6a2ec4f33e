//! Execution of one claimed work item.

use super::{Context, Slot};
use crate::coord::NodeMissingPolicy;
use crate::model::{ClaimedWork, Outcome, Trigger};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_outcome, start_work_span};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, error, info, warn};

/// Process, clean up, free the slot, then ask for the next scan.
pub(super) async fn run(ctx: Arc<Context>, work: ClaimedWork, slot: Slot) {
    let ClaimedWork {
        id,
        item_path,
        lock_path,
        payload,
    } = work;
    let span = start_work_span(&id, &ctx.worker_id);

    let started = Instant::now();
    let outcome = process(&ctx, id.clone(), payload)
        .instrument(span.clone())
        .await;
    let duration_ms = started.elapsed().as_millis() as u64;
    record_outcome(&span, outcome, duration_ms);
    metrics::work_processed().add(1, &metrics::result_label(outcome.as_str()));
    metrics::processing_duration_ms().record(
        duration_ms as f64,
        &[KeyValue::new("result", outcome.as_str())],
    );

    async {
        // Only success retires the item; anything else leaves it for a retry.
        if outcome == Outcome::Processed {
            match ctx
                .client
                .delete_recursive(&item_path, NodeMissingPolicy::Skip)
                .await
            {
                Ok(()) => info!(work_id = %id, "work processed"),
                Err(e) => {
                    error!(path = %item_path, error = %e, "failed to delete processed work item");
                    metrics::cleanup_failures().add(1, &[KeyValue::new("node", "item")]);
                }
            }
        }

        if let Err(e) = ctx
            .client
            .delete_recursive(&lock_path, NodeMissingPolicy::Skip)
            .await
        {
            error!(path = %lock_path, error = %e, "failed to release claim");
            metrics::cleanup_failures().add(1, &[KeyValue::new("node", "lock")]);
        }
    }
    .instrument(span)
    .await;

    // The slot must be free before the rescan looks at capacity.
    drop(slot);
    ctx.request_scan(Trigger::Completion, None);
}

/// Run a fresh processor in its own task so a panic is contained.
async fn process(ctx: &Context, id: String, payload: Vec<u8>) -> Outcome {
    let mut processor = ctx.factory.new_processor();
    let attempt = tokio::spawn(
        async move { processor.process(&id, &payload).await }.in_current_span(),
    );

    match attempt.await {
        Ok(Ok(())) => Outcome::Processed,
        Ok(Err(e)) => {
            warn!(error = %format!("{e:#}"), "failed to process work");
            Outcome::Failed
        }
        Err(e) => {
            error!(error = %e, "processor panicked");
            Outcome::Panicked
        }
    }
}
