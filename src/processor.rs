//! Caller-supplied work processing.

use async_trait::async_trait;

/// Processes one work item.
///
/// An error leaves the item in the registry, so any worker will claim and
/// retry it later. Processing must therefore be idempotent.
#[async_trait]
pub trait Processor: Send {
    async fn process(&mut self, work_id: &str, payload: &[u8]) -> anyhow::Result<()>;
}

/// Produces a fresh [`Processor`] for every dispatched task, so no state is
/// shared between tasks running at the same time.
pub trait ProcessorFactory: Send + Sync + 'static {
    fn new_processor(&self) -> Box<dyn Processor>;
}

impl<F, P> ProcessorFactory for F
where
    F: Fn() -> P + Send + Sync + 'static,
    P: Processor + 'static,
{
    fn new_processor(&self) -> Box<dyn Processor> {
        Box::new(self())
    }
}
