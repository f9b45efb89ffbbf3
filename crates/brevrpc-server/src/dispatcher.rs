//! Bounded worker pool for request handlers.
//!
//! Handlers run on tokio's blocking thread pool so business logic never
//! blocks the I/O runtime. Two semaphores bound the work: `workers` caps how
//! many handlers run at once, `admission` caps how many are running or
//! waiting for a worker. A request that cannot get an admission permit is
//! rejected immediately.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, error, warn};

use brevrpc_common::protocol::error::{Result, RpcError};

/// Message carried by the FAIL response for a rejected request.
pub const REJECTED_MESSAGE: &str = "request rejected: dispatch queue full";

pub struct WorkerPool {
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    max_workers: usize,
    capacity: usize,
}

impl WorkerPool {
    /// `max_workers` handlers run concurrently and up to `queue_depth` more
    /// wait for a free worker.
    pub fn new(max_workers: usize, queue_depth: usize) -> Self {
        let max_workers = max_workers.max(1);
        let capacity = max_workers + queue_depth;
        debug!("Created worker pool: workers={} queue={}", max_workers, queue_depth);
        Self {
            admission: Arc::new(Semaphore::new(capacity)),
            workers: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            capacity,
        }
    }

    /// Admits `task` and runs it on the blocking pool once a worker is free.
    /// Fails with [`REJECTED_MESSAGE`] when the pool is saturated.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let admitted = match Arc::clone(&self.admission).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => {
                return Err(RpcError::CallFailure("worker pool is shut down".to_string()));
            }
            Err(TryAcquireError::NoPermits) => {
                warn!("Dispatch queue full with {} requests admitted, rejecting request", self.capacity);
                return Err(RpcError::CallFailure(REJECTED_MESSAGE.to_string()));
            }
        };

        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            let running = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("Worker semaphore closed before task started");
                    return;
                }
            };
            run_blocking(task, admitted, running).await;
        });
        Ok(())
    }

    /// Handlers currently executing.
    pub fn running(&self) -> usize {
        self.max_workers - self.workers.available_permits()
    }

    /// Admitted requests still waiting for a worker.
    pub fn queued(&self) -> usize {
        self.in_flight().saturating_sub(self.running())
    }

    fn in_flight(&self) -> usize {
        self.capacity - self.admission.available_permits()
    }

    pub fn is_shut_down(&self) -> bool {
        self.admission.is_closed()
    }

    /// Stops admitting requests. Already admitted ones still run.
    pub fn shutdown(&self) {
        if !self.admission.is_closed() {
            debug!("Worker pool shutting down with {} requests in flight", self.in_flight());
            self.admission.close();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_blocking<F>(task: F, admitted: OwnedSemaphorePermit, running: OwnedSemaphorePermit)
where
    F: FnOnce() + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        // the worker slot frees as soon as the handler returns
        let _running = running;
        task()
    })
    .await;
    drop(admitted);

    if let Err(e) = result {
        if e.is_panic() {
            error!("Dispatch task panicked");
        } else {
            debug!("Dispatch task cancelled: {}", e);
        }
    }
}
