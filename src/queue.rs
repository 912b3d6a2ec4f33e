//! The public work queue API.
//!
//! A [`WorkQueue`] is a view of one registry node through one coordination
//! session. Producers call [`add_work`](WorkQueue::add_work), workers call
//! [`start_processing`](WorkQueue::start_processing), and anyone can
//! [`wait_until_done`](WorkQueue::wait_until_done) on a set of ids. Any
//! number of processes may do any of these against the same registry.

use crate::config::QueueConfig;
use crate::coord::{Coordinator, NodeExistsPolicy, validate_name};
use crate::engine::{self, ProcessingHandle};
use crate::error::{Error, Result};
use crate::model::{LOCKS_NODE, QueuePaths, is_reserved};
use crate::pool::WorkerPool;
use crate::processor::ProcessorFactory;
use crate::telemetry::metrics;
use crate::waiter;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct WorkQueue {
    client: Arc<dyn Coordinator>,
    paths: QueuePaths,
    config: QueueConfig,
}

impl WorkQueue {
    /// Queue rooted at `root` with default timings.
    pub fn new(client: Arc<dyn Coordinator>, root: impl Into<String>) -> Result<Self> {
        Self::with_config(client, QueueConfig::new(root))
    }

    pub fn with_config(client: Arc<dyn Coordinator>, config: QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            paths: QueuePaths::new(config.root.clone()),
            config,
        })
    }

    /// Publish a work item.
    ///
    /// Submitting an id that is already pending is a no-op: the existing
    /// item and its payload are left untouched.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for the reserved id `locks` (in any case)
    /// or an id that is not a single path segment; coordination errors as is.
    pub async fn add_work(&self, id: &str, payload: &[u8]) -> Result<()> {
        if is_reserved(id) {
            return Err(Error::InvalidArgument(format!(
                "{LOCKS_NODE} is a reserved work id"
            )));
        }
        validate_name(id)?;

        self.client.ensure_path(self.paths.root()).await?;
        match self
            .client
            .create_persistent(&self.paths.item(id), payload, NodeExistsPolicy::Fail)
            .await
        {
            Ok(()) => {
                debug!(work_id = id, bytes = payload.len(), "work added");
                metrics::work_submitted().add(1, &metrics::result_label("created"));
                Ok(())
            }
            Err(Error::NodeExists(_)) => {
                debug!(work_id = id, "work already pending; skipping");
                metrics::work_submitted().add(1, &metrics::result_label("exists"));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Start claiming and processing work from this registry.
    ///
    /// Setup errors (creating the registry, arming the first watch) are
    /// returned. Once running, the worker never surfaces errors: it logs
    /// them and relies on its next scan.
    pub async fn start_processing<F>(
        &self,
        factory: F,
        pool: Arc<WorkerPool>,
    ) -> Result<ProcessingHandle>
    where
        F: ProcessorFactory,
    {
        engine::start(
            Arc::clone(&self.client),
            self.config.clone(),
            Arc::new(factory),
            pool,
        )
        .await
    }

    /// Wait until none of `ids` is pending.
    pub async fn wait_until_done<I, S>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wait(collect_ids(ids), None).await
    }

    /// Like [`wait_until_done`](Self::wait_until_done), returning
    /// [`Error::Cancelled`] if `cancel` fires first.
    pub async fn wait_until_done_cancellable<I, S>(
        &self,
        ids: I,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wait(collect_ids(ids), Some(cancel)).await
    }

    /// Names of the work items currently in the registry.
    pub async fn pending(&self) -> Result<Vec<String>> {
        let mut children = match self.client.get_children(self.paths.root(), None).await {
            Ok(children) => children,
            Err(Error::NoNode(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        children.retain(|c| c != LOCKS_NODE);
        Ok(children)
    }

    async fn wait(&self, ids: HashSet<String>, cancel: Option<&CancellationToken>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        info!(root = self.paths.root(), count = ids.len(), "waiting for work to finish");
        waiter::wait_until_gone(
            Arc::clone(&self.client),
            self.paths.root(),
            &ids,
            self.config.wait_recheck,
            cancel,
        )
        .await
    }
}

fn collect_ids<I, S>(ids: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ids.into_iter().map(Into::into).collect()
}
