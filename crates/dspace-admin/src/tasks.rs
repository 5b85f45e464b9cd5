// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded worker pool for the slow half of mutating methods.
//!
//! `submit` waits for a free worker, so a full pool pushes back on the RPC
//! handler that submitted. Tasks cannot be cancelled once running. A task
//! that fails with a programming error (or panics) is logged, and in debug
//! mode the whole process exits.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dspace_protocol::{Result, StorError};
use futures::FutureExt;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error};

/// Exit code used when debug mode aborts on a programming error.
pub const FAIL_FAST_EXIT_CODE: i32 = 70;

#[derive(Clone)]
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    inflight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    debug: bool,
}

struct InflightGuard {
    inflight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl TaskPool {
    pub fn new(workers: usize, debug: bool) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
            inflight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            debug,
        }
    }

    /// Run `task` on a worker, waiting for one to become free.
    pub async fn submit<F>(&self, name: &'static str, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorError::Failed {
                message: "task pool is closed".to_string(),
            })?;
        self.inflight.fetch_add(1, Ordering::AcqRel);
        let guard = InflightGuard {
            inflight: self.inflight.clone(),
            idle: self.idle.clone(),
        };
        let fail_fast = self.debug;

        tokio::spawn(async move {
            // permit is released before the guard reports idle
            let _guard = guard;
            let _permit = permit;
            debug!(task = name, "task started");
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => debug!(task = name, "task finished"),
                Ok(Err(e)) => {
                    error!(task = name, error = %e, class = %e.class(), "task crashed");
                    if fail_fast && e.is_programming() {
                        std::process::exit(FAIL_FAST_EXIT_CODE);
                    }
                }
                Err(_) => {
                    error!(task = name, "task panicked");
                    if fail_fast {
                        std::process::exit(FAIL_FAST_EXIT_CODE);
                    }
                }
            }
        });
        Ok(())
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Resolve once no task is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.inflight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Refuse further submissions; running tasks finish.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_tasks_run_and_pool_goes_idle() {
        let pool = TaskPool::new(2, false);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            pool.submit("count", async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }
        pool.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_submit_blocks_when_full() {
        let pool = TaskPool::new(1, false);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        pool.submit("hold", async move {
            let _ = release_rx.await;
            Ok(())
        })
        .await
        .unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.submit("second", async { Ok(()) })).await;
        assert!(blocked.is_err(), "second submit should wait for a worker");

        release_tx.send(()).unwrap();
        pool.submit("third", async { Ok(()) }).await.unwrap();
        pool.wait_idle().await;
    }

    #[tokio::test]
    async fn test_failures_and_panics_do_not_poison_the_pool() {
        let pool = TaskPool::new(1, false);
        pool.submit("fails", async { Err(StorError::ceph("boom")) }).await.unwrap();
        pool.submit("panics", async {
            let bug: Option<()> = None;
            bug.unwrap();
            Ok(())
        })
        .await
        .unwrap();
        pool.wait_idle().await;
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects() {
        let pool = TaskPool::new(1, false);
        pool.close();
        assert!(pool.submit("late", async { Ok(()) }).await.is_err());
    }
}
