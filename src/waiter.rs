//! Waiting for a set of work items to drain from the registry.

use crate::coord::{Coordinator, EventKind};
use crate::error::{Error, Result};
use crate::watch::ChildWatch;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Resolve once no name in `ids` is a child of `root`.
///
/// Wakes on every child change of `root`, and at least every `recheck` in
/// case a change slipped between a read and the watch it re-armed. A missing
/// `root` counts as drained.
pub(crate) async fn wait_until_gone(
    client: Arc<dyn Coordinator>,
    root: &str,
    ids: &HashSet<String>,
    recheck: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    let mut watch = ChildWatch::new(client, root);

    loop {
        let children = match watch.children().await {
            Ok(children) => children,
            Err(Error::NoNode(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let remaining = children.iter().filter(|c| ids.contains(*c)).count();
        if remaining == 0 {
            return Ok(());
        }
        debug!(root, remaining, "waiting for work to drain");

        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancelled => return Err(Error::Cancelled),
            event = watch.next_event() => match event {
                Some(event) if event.kind != EventKind::ChildrenChanged => {
                    info!(kind = ?event.kind, root, "unexpected watch event while waiting");
                }
                _ => {}
            },
            _ = tokio::time::sleep(recheck) => {}
        }
    }
}
