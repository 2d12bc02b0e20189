//! Bounded worker pools
//!
//! Two pools drive a run: a dataset pool whose tasks own the discovery of
//! one dataset each, and a larger page pool whose tasks fetch individual
//! listing pages. Both are thin wrappers over a semaphore so the kernel
//! threads stay with the tokio runtime; the pool only bounds how many
//! submitted tasks run at once.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::constants::workers::DRAIN_POLL_INTERVAL_MS;
use crate::errors::{PoolError, PoolResult};

/// Point-in-time occupancy of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Tasks waiting for a permit
    pub waiting: usize,
    /// Tasks currently holding a permit
    pub in_flight: usize,
    /// Configured concurrency bound
    pub capacity: usize,
}

/// Semaphore-bounded task pool
///
/// `submit` always accepts work immediately (unless the pool is closed) and
/// returns a `JoinHandle`; the submitted future begins executing only once
/// a permit is available. Closing the pool rejects new submissions while
/// letting queued and running tasks finish.
#[derive(Debug)]
pub struct WorkerPool {
    name: &'static str,
    permits: Arc<Semaphore>,
    capacity: usize,
    waiting: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl WorkerPool {
    /// Create a pool with the given concurrency bound
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            waiting: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    /// Submit a task for bounded execution
    pub fn submit<F, T>(&self, task: F) -> PoolResult<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed {
                name: self.name.to_string(),
            });
        }

        let permits = self.permits.clone();
        let waiting = self.waiting.clone();
        let in_flight = self.in_flight.clone();

        waiting.fetch_add(1, Ordering::SeqCst);
        Ok(tokio::spawn(async move {
            // acquire() only errors after close_permits(), which this pool
            // never calls; closing is signalled through `closed` instead.
            let _permit = permits.acquire_owned().await;
            waiting.fetch_sub(1, Ordering::SeqCst);
            in_flight.fetch_add(1, Ordering::SeqCst);
            let output = task.await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            output
        }))
    }

    /// Reject further submissions
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the pool accepts new work
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tasks submitted but not yet running
    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Current occupancy
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            waiting: self.waiting.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            capacity: self.capacity,
        }
    }

    /// Close the pool and wait for all accepted tasks to finish
    pub async fn drain(&self) {
        self.close();
        loop {
            let status = self.status();
            if status.waiting == 0 && status.in_flight == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(DRAIN_POLL_INTERVAL_MS)).await;
        }
        debug!("{} pool drained", self.name);
    }
}
