//! Bounded pool that runs per-connection decode work.
//!
//! Ordering per connection is NOT enforced here — it falls out of the
//! reactor's structure, which spawns exactly one reader future per
//! connection and lets that future acquire a slot per read rather than
//! handing decode work to arbitrary pool tasks. This pool only bounds
//! total concurrent decode work across all connections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::Error;

pub struct DecodeWorkerPool {
    semaphore: Arc<Semaphore>,
    detach: AtomicBool,
    started: AtomicBool,
}

impl DecodeWorkerPool {
    pub fn new(worker_count: usize, detach: bool) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(worker_count.max(1))),
            detach: AtomicBool::new(detach),
            started: AtomicBool::new(false),
        }
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    /// Changes the daemon/non-daemon (detach) switch. Only legal before the
    /// endpoint has started.
    pub fn set_detach(&self, detach: bool) -> Result<(), Error> {
        if self.started.load(Ordering::SeqCst) {
            return Err(Error::IllegalState(
                "cannot change daemon/detach mode on a running endpoint",
            ));
        }
        self.detach.store(detach, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_detached(&self) -> bool {
        self.detach.load(Ordering::SeqCst)
    }

    /// Runs `task` once a worker slot is free. Returns the `JoinHandle` so
    /// callers can await completion; detached pools still return a handle
    /// (Tokio has no true daemon threads) but callers are free to drop it.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            task.await;
        })
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquires one decode slot without spawning a task — used when the
    /// caller wants to keep doing the decode work on its own task (e.g. a
    /// connection's reader future, which already owns the staging buffer
    /// and can't easily hand it across a `tokio::spawn` boundary per read).
    pub async fn acquire(self: &Arc<Self>) -> tokio::sync::OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore not closed")
    }
}
