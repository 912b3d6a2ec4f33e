//! Worker side of the queue: discovery, claiming and execution.
//!
//! Each started worker runs three background loops. The scan loop owns all
//! claiming; the watch loop and the rescan timer only feed it requests, as do
//! finished tasks. Serving every scan from one loop keeps completion chains
//! iterative no matter how long a burst runs.

mod claim;
mod task;
mod triggers;

use crate::config::QueueConfig;
use crate::coord::Coordinator;
use crate::error::Result;
use crate::model::{QueuePaths, Trigger};
use crate::pool::{InFlight, InFlightGuard, WorkerPool};
use crate::processor::ProcessorFactory;
use crate::watch::ChildWatch;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A request for the scan loop. `children` is a child list read just now;
/// `None` asks the loop to read it.
struct ScanRequest {
    trigger: Trigger,
    children: Option<Vec<String>>,
}

/// State shared by one worker's loops and tasks.
struct Context {
    client: Arc<dyn Coordinator>,
    paths: QueuePaths,
    config: QueueConfig,
    pool: Arc<WorkerPool>,
    in_flight: InFlight,
    factory: Arc<dyn ProcessorFactory>,
    worker_id: Uuid,
    scans: UnboundedSender<ScanRequest>,
}

/// Held by a dispatched task: one slot in the pool and one in this worker's
/// own count.
struct Slot {
    _pool: InFlightGuard,
    _worker: InFlightGuard,
}

impl Context {
    /// Backpressure gate: no new claims while every pool slot is taken,
    /// whichever queue holds them.
    fn at_capacity(&self) -> bool {
        self.pool.is_full()
    }

    fn request_scan(&self, trigger: Trigger, children: Option<Vec<String>>) {
        if self.scans.send(ScanRequest { trigger, children }).is_err() {
            debug!(%trigger, "scan loop stopped; dropping request");
        }
    }
}

/// Handle onto a running worker.
///
/// Dropping the handle leaves the worker running; call
/// [`shutdown`](Self::shutdown) to stop it.
pub struct ProcessingHandle {
    worker_id: Uuid,
    in_flight: InFlight,
    cancel: CancellationToken,
    loops: Vec<JoinHandle<()>>,
}

impl ProcessingHandle {
    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Tasks dispatched by this worker that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    /// Stop discovering work. Running tasks are not interrupted; they still
    /// release their claims when they finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.loops {
            if let Err(e) = handle.await {
                warn!(worker_id = %self.worker_id, error = %e, "worker loop ended abnormally");
            }
        }
        self.in_flight.wait_idle().await;
        info!(worker_id = %self.worker_id, "processing stopped");
    }
}

/// Prepare the registry, arm the child watch and spawn the worker loops.
pub(crate) async fn start(
    client: Arc<dyn Coordinator>,
    config: QueueConfig,
    factory: Arc<dyn ProcessorFactory>,
    pool: Arc<WorkerPool>,
) -> Result<ProcessingHandle> {
    let paths = QueuePaths::new(config.root.clone());
    client.ensure_path(paths.root()).await?;
    client.ensure_path(paths.locks()).await?;

    let mut watch = ChildWatch::new(Arc::clone(&client), paths.root());
    let children = watch.children().await?;

    let (scans, requests) = mpsc::unbounded_channel();
    let worker_id = Uuid::new_v4();
    let in_flight = InFlight::new();
    let ctx = Arc::new(Context {
        client,
        paths,
        config,
        pool,
        in_flight: in_flight.clone(),
        factory,
        worker_id,
        scans,
    });

    info!(
        %worker_id,
        root = ctx.paths.root(),
        concurrency = ctx.pool.concurrency(),
        pending = children.len().saturating_sub(1),
        "processing started"
    );
    ctx.request_scan(Trigger::Startup, Some(children));

    let cancel = CancellationToken::new();
    let loops = vec![
        tokio::spawn(claim::run_scan_loop(
            Arc::clone(&ctx),
            requests,
            cancel.clone(),
        )),
        tokio::spawn(triggers::watch_registry(
            Arc::clone(&ctx),
            watch,
            cancel.clone(),
        )),
        tokio::spawn(triggers::rescan_periodically(ctx, cancel.clone())),
    ];

    Ok(ProcessingHandle {
        worker_id,
        in_flight,
        cancel,
        loops,
    })
}
