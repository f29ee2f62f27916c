//! Write-back pool
//!
//! Bounded set of background tier writes. Submitting never blocks: the task
//! is spawned immediately and waits for one of `size` permits before running.
//! Finished tasks are reaped on every submit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

struct PoolState {
    tasks: JoinSet<()>,
    closed: bool,
}

/// Background task pool for write-back and write-behind writes
pub struct WritebackPool {
    name: String,
    state: Mutex<PoolState>,
    permits: Arc<Semaphore>,
}

impl WritebackPool {
    /// Create a pool running at most `size` tasks at once
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(PoolState {
                tasks: JoinSet::new(),
                closed: false,
            }),
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Queue a task, failing with [`Error::PoolShutdown`] once closed
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::PoolShutdown);
        }

        while let Some(finished) = state.tasks.try_join_next() {
            if let Err(e) = finished {
                if e.is_panic() {
                    warn!(pool = %self.name, "Write-back task panicked");
                }
            }
        }

        let permits = Arc::clone(&self.permits);
        state.tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.await;
        });
        Ok(())
    }

    /// Tasks queued or running, including finished ones not yet reaped
    pub fn pending(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Close the pool and wait for queued tasks.
    ///
    /// Waits up to `grace` for the queue to drain, then aborts the rest and
    /// waits up to `force` for them to stop. Returns how many tasks did not
    /// complete. Calling it again returns 0.
    pub async fn shutdown(&self, grace: Duration, force: Duration) -> usize {
        let mut tasks = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            state.closed = true;
            std::mem::take(&mut state.tasks)
        };

        let queued = tasks.len();
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_ok() {
            info!(pool = %self.name, completed = queued, "Write-back pool drained");
            return 0;
        }

        let incomplete = tasks.len();
        tasks.abort_all();
        let _ = tokio::time::timeout(force, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        error!(
            pool = %self.name,
            incomplete,
            "Write-back pool did not drain within {:?}, aborted remaining tasks",
            grace
        );
        incomplete
    }
}

// =============================================================================
// Tests
// =============================================================================
