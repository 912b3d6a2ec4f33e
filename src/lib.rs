//! # workq
//!
//! Distributed work queue over a hierarchical coordination service.
//!
//! Producers publish named work items under a registry node. Any number of
//! worker processes race to claim each item with an exclusive ephemeral
//! lock node, process it, and delete it. Failed items stay put and are
//! retried by whichever worker claims them next; a crashed worker's claims
//! disappear with its session. Delivery is at-least-once.

pub mod config;
pub mod coord;
pub mod engine;
pub mod error;
pub mod model;
pub mod pool;
pub mod processor;
pub mod queue;
pub mod telemetry;
pub mod watch;

mod waiter;

pub use engine::ProcessingHandle;
pub use error::{Error, Result};
pub use pool::WorkerPool;
pub use processor::{Processor, ProcessorFactory};
pub use queue::WorkQueue;
