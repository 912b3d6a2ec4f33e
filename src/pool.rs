//! Bounded worker pool and in-flight accounting.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Fixed-ceiling executor for dispatched work.
///
/// Submitted futures queue for a permit and run as tokio tasks, at most
/// [`concurrency`](Self::concurrency) at a time.
///
/// Claimers take an admission slot with [`try_admit`](Self::try_admit)
/// before they commit to a work item. Slots are counted per pool, so several
/// queues sharing one pool never hold more claims than it can run.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    concurrency: AtomicUsize,
    admitted: InFlight,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Arc<Self> {
        let concurrency = concurrency.max(1);
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency: AtomicUsize::new(concurrency),
            admitted: InFlight::new(),
        })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::Acquire)
    }

    /// Slots currently held, by any queue or caller.
    pub fn admitted(&self) -> usize {
        self.admitted.get()
    }

    pub fn is_full(&self) -> bool {
        self.admitted() >= self.concurrency()
    }

    /// Take one slot if the pool is below its ceiling. The slot is held until
    /// the guard drops.
    pub fn try_admit(&self) -> Option<InFlightGuard> {
        self.admitted.try_enter(self.concurrency())
    }

    /// Change the ceiling.
    ///
    /// Admission follows the new ceiling at once. Growth adds permits
    /// immediately; shrinking retires idle permits now and the rest as
    /// running tasks hand them back. Retiring those later needs a tokio
    /// runtime; without one they stay, and admission alone holds the line.
    pub fn set_concurrency(&self, concurrency: usize) {
        let concurrency = concurrency.max(1);
        let previous = self.concurrency.swap(concurrency, Ordering::AcqRel);
        if concurrency > previous {
            self.permits.add_permits(concurrency - previous);
        } else if concurrency < previous {
            let surplus = previous - concurrency;
            let outstanding = surplus - self.permits.forget_permits(surplus);
            if outstanding > 0 {
                self.retire_later(outstanding);
            }
        }
        debug!(previous, concurrency, "worker pool resized");
    }

    fn retire_later(&self, outstanding: usize) {
        let Ok(handle) = Handle::try_current() else {
            warn!(outstanding, "no runtime to retire busy permits; relying on admission");
            return;
        };
        let Ok(count) = u32::try_from(outstanding) else {
            warn!(outstanding, "too many permits to retire");
            return;
        };
        let permits = Arc::clone(&self.permits);
        handle.spawn(async move {
            match permits.acquire_many_owned(count).await {
                Ok(p) => p.forget(),
                Err(_) => warn!("worker pool closed while shrinking"),
            }
        });
    }

    /// Run `task` once a slot is free.
    pub fn execute<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!("worker pool closed; dropping task");
                return;
            };
            task.await;
        })
    }
}

/// Count of tasks handed to the pool and not yet finished.
#[derive(Clone, Default)]
pub struct InFlight {
    inner: Arc<InFlightInner>,
}

#[derive(Default)]
struct InFlightInner {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Count one task in. The returned guard counts it out when dropped,
    /// whichever way the task ends.
    pub fn enter(&self) -> InFlightGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        self.guard()
    }

    /// Like [`enter`](Self::enter), but only while fewer than `limit` are in.
    pub fn try_enter(&self, limit: usize) -> Option<InFlightGuard> {
        self.inner
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()
            .map(|_| self.guard())
    }

    fn guard(&self) -> InFlightGuard {
        InFlightGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Resolve once no task is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            idle.await;
        }
    }
}

pub struct InFlightGuard {
    inner: Arc<InFlightInner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}
