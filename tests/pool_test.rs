//! Worker pool ceiling and in-flight accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;
use tokio::time::timeout;
use workq::WorkerPool;
use workq::pool::InFlight;

async fn max_concurrency(pool: &WorkerPool, tasks: usize) -> usize {
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..tasks)
        .map(|_| {
            let (active, max_active) = (Arc::clone(&active), Arc::clone(&max_active));
            pool.execute(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }
    max_active.load(Ordering::SeqCst)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_runs_at_most_its_ceiling() {
    let pool = WorkerPool::new(2);
    assert!(max_concurrency(&pool, 6).await <= 2);
}

#[tokio::test]
async fn zero_concurrency_is_clamped() {
    let pool = WorkerPool::new(0);
    assert_eq!(pool.concurrency(), 1);
    pool.set_concurrency(0);
    assert_eq!(pool.concurrency(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn growing_the_pool_admits_more_tasks() {
    let pool = WorkerPool::new(1);
    pool.set_concurrency(3);
    assert_eq!(pool.concurrency(), 3);

    // Three tasks that can only finish together.
    let barrier = Arc::new(Barrier::new(3));
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            pool.execute(async move {
                barrier.wait().await;
            })
        })
        .collect();
    timeout(Duration::from_secs(2), async {
        for handle in handles {
            handle.await.unwrap();
        }
    })
    .await
    .expect("grown pool did not run tasks together");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shrinking_the_pool_lowers_the_ceiling() {
    let pool = WorkerPool::new(3);
    pool.set_concurrency(1);
    assert_eq!(pool.concurrency(), 1);

    // Let the surplus permits be retired.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(max_concurrency(&pool, 4).await, 1);
}

#[tokio::test]
async fn in_flight_counts_guards() {
    let in_flight = InFlight::new();
    let a = in_flight.enter();
    let b = in_flight.enter();
    assert_eq!(in_flight.get(), 2);

    drop(a);
    assert_eq!(in_flight.get(), 1);

    let waiter = {
        let in_flight = in_flight.clone();
        tokio::spawn(async move { in_flight.wait_idle().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    drop(b);
    timeout(Duration::from_secs(1), waiter)
        .await
        .expect("wait_idle did not resolve")
        .unwrap();
    assert_eq!(in_flight.get(), 0);
}

#[test]
fn shrinking_outside_a_runtime_retires_idle_permits() {
    let pool = WorkerPool::new(3);
    pool.set_concurrency(1);
    assert_eq!(pool.concurrency(), 1);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    assert_eq!(runtime.block_on(max_concurrency(&pool, 4)), 1);
}

#[test]
fn admission_stops_at_the_ceiling() {
    let pool = WorkerPool::new(2);
    let a = pool.try_admit().expect("first slot");
    let _b = pool.try_admit().expect("second slot");
    assert!(pool.try_admit().is_none());
    assert!(pool.is_full());
    assert_eq!(pool.admitted(), 2);

    drop(a);
    assert!(!pool.is_full());
    let _c = pool.try_admit().expect("freed slot");

    // Shrinking below what is held admits nothing until enough slots free up.
    pool.set_concurrency(1);
    assert!(pool.try_admit().is_none());
}
