//! Core data model.
//!
//! A work item is a child node of the registry holding an opaque payload.
//! Its existence means "pending or retryable"; its absence means "done".
//! Claims are ephemeral nodes of the same name under the reserved `locks`
//! child.

use crate::coord::join_path;
use std::fmt;

/// Name of the registry child that holds claim markers. Never a valid work id.
pub const LOCKS_NODE: &str = "locks";

/// Whether `id` collides with the reserved claim namespace.
pub fn is_reserved(id: &str) -> bool {
    id.eq_ignore_ascii_case(LOCKS_NODE)
}

/// Node layout of one registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePaths {
    root: String,
    locks: String,
}

impl QueuePaths {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let locks = join_path(&root, LOCKS_NODE);
        Self { root, locks }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn locks(&self) -> &str {
        &self.locks
    }

    pub fn item(&self, id: &str) -> String {
        join_path(&self.root, id)
    }

    pub fn lock(&self, id: &str) -> String {
        join_path(&self.locks, id)
    }
}

/// A work item this worker holds the claim for.
#[derive(Debug, Clone)]
pub struct ClaimedWork {
    pub id: String,
    pub item_path: String,
    pub lock_path: String,
    pub payload: Vec<u8>,
}

/// What prompted a registry scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// First scan when processing starts.
    Startup,
    /// The registry's child set changed.
    Watch,
    /// Periodic safety-net rescan.
    Timer,
    /// A dispatched task finished and freed capacity.
    Completion,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Startup => "startup",
            Trigger::Watch => "watch",
            Trigger::Timer => "timer",
            Trigger::Completion => "completion",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a processing attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Processed,
    Failed,
    Panicked,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Processed => "ok",
            Outcome::Failed => "failed",
            Outcome::Panicked => "panicked",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
