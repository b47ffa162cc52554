// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Task executors
//!
//! The container runs its polling loop and every per-message task on a [`TaskExecutor`]. The
//! degree of true parallelism is whatever the executor provides; the container only bounds the
//! number of produce pipelines in flight.
//!
//! An executor that owns resources can also implement [`ManagedResource`]. Such an executor is
//! handed to the container explicitly, and the container initializes it on `initialize()` and
//! disposes it once a stopped container has drained its in-flight work.
//!

use crate::Error;

use futures::future::BoxFuture;
use tokio::{runtime::Handle, sync::oneshot};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::debug;

use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
};

/// A task submitted to an executor.
pub type Task = BoxFuture<'static, ()>;

/// Something able to run detached asynchronous tasks.
pub trait TaskExecutor: Send + Sync + 'static {
    /// Runs the task in the background.
    ///
    /// # Errors
    ///
    /// Returns `Error::Executor` if the executor does not accept more work.
    ///
    fn execute(&self, task: Task) -> Result<(), Error>;
}

/// A resource with an explicit init/dispose lifecycle.
pub trait ManagedResource: Send + Sync + 'static {
    /// Prepares the resource before first use.
    fn init(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Releases the resource. Work already running is left to finish.
    fn dispose(&self) -> Result<(), Error>;

    /// Aborts work still running. Used when draining overruns its timeout.
    fn cancel(&self) {}
}

/// Executor spawning tasks onto a tokio runtime.
#[derive(Clone, Debug)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Executor for the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor for the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// Returns `Error::Executor` when called outside a tokio runtime.
    ///
    pub fn current() -> Result<Self, Error> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::Executor(e.to_string()))
    }
}

impl TaskExecutor for TokioExecutor {
    fn execute(&self, task: Task) -> Result<(), Error> {
        self.handle.spawn(task);
        Ok(())
    }
}

/// Executor tracking every task it runs so they can be cancelled together.
///
/// Disposing it rejects new tasks and lets running ones finish; cancelling aborts the running
/// ones at their next suspension point.
#[derive(Debug)]
pub struct TrackedExecutor {
    handle: Handle,
    tracker: TaskTracker,
    token: CancellationToken,
    disposed: AtomicBool,
}

impl TrackedExecutor {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Tracked executor for the current runtime.
    pub fn current() -> Result<Self, Error> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::Executor(e.to_string()))
    }

    /// Number of tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Returns true once the executor has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Waits until every tracked task has finished. Only returns after disposal.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }
}

impl TaskExecutor for TrackedExecutor {
    fn execute(&self, task: Task) -> Result<(), Error> {
        if self.is_disposed() {
            return Err(Error::Executor(
                "executor has been disposed".to_owned(),
            ));
        }
        let token = self.token.clone();
        self.tracker.spawn_on(
            async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = task => {}
                }
            },
            &self.handle,
        );
        Ok(())
    }
}

impl ManagedResource for TrackedExecutor {
    fn dispose(&self) -> Result<(), Error> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err(Error::Executor(
                "executor already disposed".to_owned(),
            ));
        }
        debug!("Disposing tracked executor with {} active tasks.", self.tracker.len());
        self.tracker.close();
        Ok(())
    }

    fn cancel(&self) {
        debug!("Cancelling {} tracked tasks.", self.tracker.len());
        self.token.cancel();
    }
}

/// Runs `future` on the executor and returns a receiver for its output.
///
/// The returned future fails with `Error::Executor` if the task is dropped before it
/// completes, e.g. because it panicked or the executor was disposed.
pub fn submit<F>(
    executor: &dyn TaskExecutor,
    future: F,
) -> Result<impl Future<Output = Result<F::Output, Error>>, Error>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    executor.execute(Box::pin(async move {
        let _ = sender.send(future.await);
    }))?;
    Ok(async move {
        receiver.await.map_err(|_| {
            Error::Executor("task dropped before completion".to_owned())
        })
    })
}
