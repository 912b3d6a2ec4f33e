//! Persistent child-watch subscription over one-shot watches.
//!
//! Every [`ChildWatch::children`] call reads the child list and re-arms the
//! watch in the same request, so a subscriber that reads after each
//! notification never misses a change. Notifications that pile up between
//! reads are coalesced.

use crate::coord::{Coordinator, WatchedEvent, Watcher};
use crate::error::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

pub struct ChildWatch {
    client: Arc<dyn Coordinator>,
    path: String,
    watcher: Watcher,
    events: UnboundedReceiver<WatchedEvent>,
}

impl ChildWatch {
    pub fn new(client: Arc<dyn Coordinator>, path: impl Into<String>) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        Self {
            client,
            path: path.into(),
            watcher: Watcher::new(tx),
            events,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read the current children and re-arm the watch.
    pub async fn children(&mut self) -> Result<Vec<String>> {
        // Anything queued predates this read, which observes it anyway.
        while self.events.try_recv().is_ok() {}
        self.client
            .get_children(&self.path, Some(self.watcher.clone()))
            .await
    }

    /// Wait for the next notification.
    ///
    /// Returns `None` only if the channel closes, which cannot happen while
    /// `self` holds its own sender.
    pub async fn next_event(&mut self) -> Option<WatchedEvent> {
        self.events.recv().await
    }
}
