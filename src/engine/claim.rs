//! Scan loop and claim protocol.

use super::{Context, ScanRequest, Slot, task};
use crate::coord::NodeMissingPolicy;
use crate::error::{Error, Result};
use crate::model::{ClaimedWork, LOCKS_NODE, Trigger};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Serve scan requests until cancelled.
pub(super) async fn run_scan_loop(
    ctx: Arc<Context>,
    mut requests: UnboundedReceiver<ScanRequest>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };
        let (trigger, children) = coalesce(request, &mut requests);

        let children = match children {
            Some(children) => children,
            None if ctx.at_capacity() => continue,
            None => match ctx.client.get_children(ctx.paths.root(), None).await {
                Ok(children) => children,
                Err(e) => {
                    error!(%trigger, error = %e, "failed to look for work");
                    continue;
                }
            },
        };

        metrics::scans().add(1, &[KeyValue::new("trigger", trigger.as_str())]);
        look_for_work(&ctx, children).await;
    }
    debug!(worker_id = %ctx.worker_id, "scan loop stopped");
}

/// Fold requests that queued up while a scan ran into a single fresh read.
fn coalesce(
    first: ScanRequest,
    requests: &mut UnboundedReceiver<ScanRequest>,
) -> (Trigger, Option<Vec<String>>) {
    let mut trigger = first.trigger;
    let mut children = first.children;
    while let Ok(next) = requests.try_recv() {
        trigger = next.trigger;
        children = None;
    }
    (trigger, children)
}

enum Claim {
    Dispatched,
    Stale,
    AtCapacity,
}

/// Try to claim and dispatch as many of `children` as capacity allows.
/// Failures are logged; the next trigger retries discovery.
async fn look_for_work(ctx: &Arc<Context>, mut children: Vec<String>) {
    if children.is_empty() || ctx.at_capacity() {
        return;
    }

    // Workers see the same list; random order spreads their claims apart.
    children.shuffle(&mut rand::thread_rng());

    if let Err(e) = claim_candidates(ctx, children).await {
        error!(error = %e, "unexpected error looking for work");
    }
}

async fn claim_candidates(ctx: &Arc<Context>, children: Vec<String>) -> Result<()> {
    for id in children {
        if id == LOCKS_NODE {
            continue;
        }

        let lock_path = ctx.paths.lock(&id);
        match ctx.client.create_ephemeral(&lock_path, &[]).await {
            Ok(()) => {}
            Err(Error::NodeExists(_)) => {
                debug!(work_id = %id, "claimed by another worker");
                metrics::claim_attempts().add(1, &metrics::result_label("contended"));
                continue;
            }
            Err(e) => return Err(e),
        }

        match dispatch_claimed(ctx, id, &lock_path).await {
            Ok(Claim::Dispatched | Claim::Stale) => {}
            Ok(Claim::AtCapacity) => break,
            Err(e) => {
                if let Err(release_err) = release(ctx, &lock_path).await {
                    warn!(lock = %lock_path, error = %release_err, "failed to release claim");
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

/// With the claim held: re-verify the item, re-check capacity, dispatch.
async fn dispatch_claimed(ctx: &Arc<Context>, id: String, lock_path: &str) -> Result<Claim> {
    let item_path = ctx.paths.item(&id);

    if !ctx.client.exists(&item_path).await? {
        debug!(work_id = %id, "work already done elsewhere");
        release(ctx, lock_path).await?;
        metrics::claim_attempts().add(1, &metrics::result_label("stale"));
        return Ok(Claim::Stale);
    }

    // Earlier candidates, or other queues on the same pool, may have used up
    // the free slots.
    let Some(pool_slot) = ctx.pool.try_admit() else {
        debug!(work_id = %id, "pool full; releasing claim");
        release(ctx, lock_path).await?;
        metrics::claim_attempts().add(1, &metrics::result_label("at_capacity"));
        return Ok(Claim::AtCapacity);
    };

    let payload = match ctx.client.get_data(&item_path).await {
        Ok(payload) => payload,
        Err(Error::NoNode(_)) => {
            debug!(work_id = %id, "work vanished before its payload was read");
            release(ctx, lock_path).await?;
            metrics::claim_attempts().add(1, &metrics::result_label("stale"));
            return Ok(Claim::Stale);
        }
        Err(e) => return Err(e),
    };

    debug!(work_id = %id, "got lock");
    metrics::claim_attempts().add(1, &metrics::result_label("claimed"));

    let work = ClaimedWork {
        id,
        item_path,
        lock_path: lock_path.to_string(),
        payload,
    };
    let slot = Slot {
        _pool: pool_slot,
        _worker: ctx.in_flight.enter(),
    };
    ctx.pool.execute(task::run(Arc::clone(ctx), work, slot));
    Ok(Claim::Dispatched)
}

async fn release(ctx: &Context, lock_path: &str) -> Result<()> {
    ctx.client
        .delete_recursive(lock_path, NodeMissingPolicy::Skip)
        .await
}
