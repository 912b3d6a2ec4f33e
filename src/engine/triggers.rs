//! Discovery triggers: the registry child watch and the periodic rescan.

use super::Context;
use crate::coord::EventKind;
use crate::error::Error;
use crate::model::Trigger;
use crate::watch::ChildWatch;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Turn registry child changes into scans, re-arming the watch every time.
pub(super) async fn watch_registry(
    ctx: Arc<Context>,
    mut watch: ChildWatch,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = watch.next_event() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event.kind {
            EventKind::ChildrenChanged if event.path.as_deref() == Some(watch.path()) => {
                let Some(children) = rearm(&ctx, &mut watch, &cancel).await else {
                    break;
                };
                ctx.request_scan(Trigger::Watch, Some(children));
            }
            EventKind::ChildrenChanged => {
                info!(path = ?event.path, "unexpected path for children-changed event");
            }
            kind => {
                info!(?kind, path = watch.path(), "unexpected watch event");
            }
        }
    }
    debug!(worker_id = %ctx.worker_id, "registry watch stopped");
}

/// Read the children again, which re-arms the watch. A failed read leaves
/// the registry unwatched, so keep trying until it succeeds, the session is
/// gone, or the worker stops.
async fn rearm(
    ctx: &Context,
    watch: &mut ChildWatch,
    cancel: &CancellationToken,
) -> Option<Vec<String>> {
    loop {
        match watch.children().await {
            Ok(children) => return Some(children),
            Err(Error::SessionExpired) => {
                warn!(path = watch.path(), "session expired; registry no longer watched");
                return None;
            }
            Err(e) => {
                error!(path = watch.path(), error = %e, "failed to re-arm registry watch");
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(ctx.config.rearm_backoff) => {}
        }
    }
}

/// Safety-net rescans for missed or coalesced notifications.
///
/// The first tick lands at a random point within one period so a fleet
/// started together does not hit the coordination service in lockstep.
pub(super) async fn rescan_periodically(ctx: Arc<Context>, cancel: CancellationToken) {
    let period = ctx.config.rescan_period;
    let jitter = initial_delay(period);
    debug!(jitter_ms = jitter.as_millis() as u64, "rescan timer armed");

    let mut ticks = tokio::time::interval_at(Instant::now() + jitter, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => ctx.request_scan(Trigger::Timer, None),
        }
    }
    debug!(worker_id = %ctx.worker_id, "rescan timer stopped");
}

/// Uniform in `[0, period)`.
fn initial_delay(period: Duration) -> Duration {
    let bound = period.as_millis().clamp(1, u64::MAX as u128) as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..bound))
}
