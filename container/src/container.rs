// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Message listener container
//!
//! The container polls its producers in a loop while it is running and dispatches every
//! message it gets to the listener:
//!
//! ```text
//!   loop while running
//!     for each producer
//!       acquire permit ──► produce(n, timeout) ──► one task per message ──► release permit
//!                                                    │
//!                                          interceptor ─► listener ─► ack / error handling
//! ```
//!
//! The permit pool holds `simultaneous_produce_calls` permits and is the only backpressure
//! mechanism: at most that many produce pipelines (produce call, fan-out, result handling) are
//! in flight per container. A permit is an owned value moved into its pipeline task, so it
//! comes back on every path, including failures, panics and executor disposal.
//!
//! `start()` returns as soon as the loop has been handed to the executor. `stop()` is
//! cooperative: it cancels the loop's token so no new pipeline begins, and pipelines already
//! dispatched run to completion. A managed executor is disposed once they have drained; only
//! work still running after `listener_shutdown_timeout` is cancelled.
//!

use crate::{
    Error, Message,
    executor::{ManagedResource, TaskExecutor, TokioExecutor, submit},
    handler::{
        AsyncAckHandler, AsyncErrorHandler, LoggingErrorHandler, ResultHandler, ack_handler_for,
    },
    interceptor::AsyncMessageInterceptor,
    listener::{ListenerKind, ResultCallback},
    options::ContainerOptions,
    producer::AsyncMessageProducer,
};

use backoff::{ExponentialBackoff, backoff::Backoff};
use futures::future::join_all;
use tokio::{
    runtime::Handle,
    sync::{OwnedSemaphorePermit, Semaphore},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle contract shared by every container.
pub trait MessageListenerContainer: Send + Sync + 'static {
    /// Identifier used in logs and registry lookups.
    fn id(&self) -> &str;

    /// Starts consuming. Non-blocking.
    fn start(&self) -> Result<(), Error>;

    /// Stops consuming. Cooperative: in-flight work is not cancelled by the stop itself.
    fn stop(&self) -> Result<(), Error>;

    fn is_running(&self) -> bool;

    /// Whether a registry should start this container.
    fn auto_startup(&self) -> bool {
        true
    }
}

/// Hooks for transports that need to open or close resources around the polling loop.
pub trait LifecycleHooks: Send + Sync + 'static {
    /// Runs under the lifecycle lock before the loop is scheduled.
    fn on_start(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Runs under the lifecycle lock after the loop has been told to stop.
    fn on_stop(&self) -> Result<(), Error> {
        Ok(())
    }
}

struct Lifecycle {
    running: bool,
    /// A stopped container is waiting for in-flight work before disposing its executor.
    draining: bool,
    token: CancellationToken,
}

/// Poll back-off of one producer.
///
/// A failure that happens while an earlier one is still being waited out joins that wait
/// instead of advancing the back-off, so pipelines failing together count once.
struct PollBackOff {
    back_off: ExponentialBackoff,
    waiting_until: Option<Instant>,
}

impl PollBackOff {
    fn new(back_off: ExponentialBackoff) -> Self {
        Self {
            back_off,
            waiting_until: None,
        }
    }
}

/// A producer together with its poll back-off state.
struct ProducerSlot<T> {
    producer: Arc<dyn AsyncMessageProducer<T>>,
    back_off: Mutex<PollBackOff>,
}

impl<T> ProducerSlot<T> {
    fn next_back_off(&self) -> Option<Duration> {
        let mut state = self.back_off.lock().ok()?;
        let now = Instant::now();
        if let Some(until) = state.waiting_until {
            if until > now {
                return Some(until - now);
            }
        }
        let delay = state.back_off.next_backoff()?;
        state.waiting_until = now.checked_add(delay);
        Some(delay)
    }

    fn reset_back_off(&self) {
        if let Ok(mut state) = self.back_off.lock() {
            state.back_off.reset();
            state.waiting_until = None;
        }
    }
}

struct Inner<T> {
    id: String,
    options: ContainerOptions,
    producers: Vec<ProducerSlot<T>>,
    listener: ListenerKind<T>,
    interceptor: Option<Arc<dyn AsyncMessageInterceptor<T>>>,
    results: Arc<ResultHandler<T>>,
    executor: Arc<dyn TaskExecutor>,
    managed: Option<Arc<dyn ManagedResource>>,
    hooks: Option<Arc<dyn LifecycleHooks>>,
    semaphore: Arc<Semaphore>,
    lifecycle: Mutex<Lifecycle>,
}

impl<T> Inner<T>
where
    T: Send + Sync + 'static,
{
    fn lock_lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle>, Error> {
        self.lifecycle.lock().map_err(|e| {
            Error::Lock(format!("lifecycle of container {}: {}", self.id, e))
        })
    }

    /// Flags the container as stopped and tells the loop to finish.
    fn halt(&self, lifecycle: &mut Lifecycle) -> Result<(), Error> {
        lifecycle.running = false;
        lifecycle.token.cancel();
        if let Some(hooks) = &self.hooks {
            hooks.on_stop().map_err(|e| Error::Stop(e.to_string()))?;
        }
        Ok(())
    }

    fn dispose_executor(&self) -> Result<(), Error> {
        if let Some(managed) = &self.managed {
            managed.dispose().map_err(|e| {
                Error::Stop(format!("Error shutting down task executor: {}", e))
            })?;
        }
        Ok(())
    }

    /// Size of the permit pool.
    fn pool_size(&self) -> Result<u32, Error> {
        u32::try_from(self.options.simultaneous_produce_calls())
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Waits up to `listener_shutdown_timeout` for every permit to come back, then disposes
    /// the managed executor. Work still running after the timeout is cancelled.
    async fn drain_and_dispose(&self, permits: u32) -> Result<(), Error> {
        let timeout = self.options.listener_shutdown_timeout();
        match tokio::time::timeout(timeout, self.semaphore.acquire_many(permits)).await {
            Ok(Ok(_drained)) => {
                debug!("All pipelines of container {} finished.", self.id);
            }
            Ok(Err(e)) => {
                warn!("Permit pool closed in container {}: {}", self.id, e);
            }
            Err(_) => {
                warn!(
                    "Container {} still had work in flight after {:?}",
                    self.id, timeout
                );
                if let Some(managed) = &self.managed {
                    managed.cancel();
                }
            }
        }

        let mut lifecycle = self.lock_lifecycle()?;
        let disposed = self.dispose_executor();
        lifecycle.draining = false;
        disposed
    }

    async fn produce_and_process_messages(self: Arc<Self>, token: CancellationToken) {
        debug!("Listener loop started for container {}", self.id);
        if self.producers.is_empty() {
            warn!("Container {} has no message producers.", self.id);
            token.cancelled().await;
        }
        'running: while !token.is_cancelled() {
            for index in 0..self.producers.len() {
                let acquired = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    permit = self.semaphore.clone().acquire_owned() => Some(permit),
                };
                let permit = match acquired {
                    None => break 'running,
                    Some(Ok(permit)) => permit,
                    Some(Err(e)) => {
                        error!("Permit pool closed in container {}: {}", self.id, e);
                        break 'running;
                    }
                };
                trace!(
                    "Semaphore acquired for producer {} in container {}",
                    index, self.id
                );
                let pipeline =
                    self.clone().produce_and_process(index, permit, token.clone());
                if let Err(e) = self.executor.execute(Box::pin(pipeline)) {
                    // The rejected pipeline has been dropped along with its permit.
                    error!("Error in listener container {}: {}", self.id, e);
                    self.back_off(&self.producers[index], &token).await;
                }
            }
            tokio::task::yield_now().await;
        }
        debug!("Listener loop finished for container {}", self.id);
    }

    /// One produce pipeline: produce, fan out, handle results. The permit is released when
    /// this future completes or is dropped.
    async fn produce_and_process(
        self: Arc<Self>,
        index: usize,
        permit: OwnedSemaphorePermit,
        token: CancellationToken,
    ) {
        let _permit = permit;
        if token.is_cancelled() {
            trace!("Container {} stopped before producer {} was polled", self.id, index);
            return;
        }
        let slot = &self.producers[index];
        let produced = slot
            .producer
            .produce(
                self.options.messages_per_produce(),
                self.options.produce_timeout(),
            )
            .await;
        match produced {
            Ok(messages) => {
                slot.reset_back_off();
                if let Err(e) = self.split_and_process_messages(messages).await {
                    error!("Error handling messages in container {}: {}", self.id, e);
                }
            }
            Err(e) => {
                error!("Error producing messages in container {}: {}", self.id, e);
                self.back_off(slot, &token).await;
            }
        }
        trace!(
            "Semaphore released for producer {} in container {}",
            index, self.id
        );
    }

    async fn back_off(&self, slot: &ProducerSlot<T>, token: &CancellationToken) {
        if let Some(delay) = slot.next_back_off() {
            debug!("Container {} backing off for {:?}", self.id, delay);
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Processes every message of the batch concurrently and waits for all of them.
    async fn split_and_process_messages(
        self: &Arc<Self>,
        messages: Vec<Message<T>>,
    ) -> Result<(), Error> {
        trace!("Received {} messages in container {}", messages.len(), self.id);
        let mut failure = None;
        let mut tasks = Vec::with_capacity(messages.len());
        for message in messages {
            let inner = self.clone();
            match submit(self.executor.as_ref(), async move {
                inner.process_message(message).await
            }) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        for result in join_all(tasks).await {
            if let Err(e) = result.and_then(|processed| processed) {
                failure.get_or_insert(e);
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn process_message(&self, message: Message<T>) -> Result<(), Error> {
        debug!("Processing message {} in container {}", message.id(), self.id);
        match &self.listener {
            ListenerKind::FutureBased(listener) => {
                let outcome = match self.intercept(&message).await {
                    Ok(()) => listener.on_message(&message).await,
                    Err(e) => Err(e),
                };
                self.results.handle_result(&message, outcome).await
            }
            ListenerKind::CallbackBased(listener) => {
                // The listener never sees an intercepted-out message, so it cannot report it.
                if let Err(e) = self.intercept(&message).await {
                    return self.results.handle_result(&message, Err(e)).await;
                }
                let message = Arc::new(message);
                if let Err(e) = listener.on_message(message.clone()).await {
                    warn!(
                        "Callback listener rejected message {} in container {}: {}",
                        message.id(),
                        self.id,
                        e
                    );
                }
                Ok(())
            }
        }
    }

    async fn intercept(&self, message: &Message<T>) -> Result<(), Error> {
        match &self.interceptor {
            Some(interceptor) => interceptor.intercept(message).await,
            None => Ok(()),
        }
    }
}

/// Asynchronous message listener container.
///
/// Cloning is cheap and every clone drives the same container.
pub struct ListenerContainer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ListenerContainer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> ListenerContainer<T>
where
    T: Send + Sync + 'static,
{
    /// Starts building a container around a listener.
    pub fn builder(listener: ListenerKind<T>) -> ListenerContainerBuilder<T> {
        ListenerContainerBuilder {
            id: None,
            options: ContainerOptions::default(),
            listener,
            producers: Vec::new(),
            error_handler: None,
            ack_handler: None,
            interceptor: None,
            executor: None,
            managed: None,
            hooks: None,
        }
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.inner.options
    }

    /// Permits currently free in the pool.
    pub fn available_permits(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Initializes the managed executor, if any.
    pub fn initialize(&self) -> Result<(), Error> {
        if let Some(managed) = &self.inner.managed {
            managed.init().map_err(|e| {
                Error::Start(format!("Could not initialize task executor: {}", e))
            })?;
        }
        Ok(())
    }

    /// Stops the container and waits for in-flight pipelines to drain, at most
    /// `listener_shutdown_timeout`, before disposing the managed executor.
    pub async fn shutdown(&self) -> Result<(), Error> {
        debug!("Shutting down container {}", self.inner.id);
        let permits = self.inner.pool_size()?;
        {
            let mut lifecycle = self.inner.lock_lifecycle()?;
            if !lifecycle.running {
                debug!("Container {} is not running.", self.inner.id);
                return Ok(());
            }
            self.inner.halt(&mut lifecycle)?;
        }
        self.inner.drain_and_dispose(permits).await?;
        debug!("Container {} stopped", self.inner.id);
        Ok(())
    }
}

impl<T> MessageListenerContainer for ListenerContainer<T>
where
    T: Send + Sync + 'static,
{
    fn id(&self) -> &str {
        &self.inner.id
    }

    fn start(&self) -> Result<(), Error> {
        debug!("Starting container {}", self.inner.id);
        let mut lifecycle = self.inner.lock_lifecycle()?;
        if lifecycle.running {
            debug!("Container {} is already running.", self.inner.id);
            return Ok(());
        }
        if lifecycle.draining {
            return Err(Error::Start(format!(
                "Container {} is still draining in-flight work",
                self.inner.id
            )));
        }
        if let Some(hooks) = &self.inner.hooks {
            hooks.on_start().map_err(|e| Error::Start(e.to_string()))?;
        }
        let token = CancellationToken::new();
        let inner = self.inner.clone();
        let loop_token = token.clone();
        let scheduled = self.inner.executor.execute(Box::pin(async move {
            inner.produce_and_process_messages(loop_token).await;
        }));
        if let Err(e) = scheduled {
            if let Some(hooks) = &self.inner.hooks {
                if let Err(stop_error) = hooks.on_stop() {
                    warn!(
                        "Stop hook of container {} failed: {}",
                        self.inner.id, stop_error
                    );
                }
            }
            return Err(Error::Start(e.to_string()));
        }
        lifecycle.running = true;
        lifecycle.token = token;
        debug!("Container {} started", self.inner.id);
        Ok(())
    }

    fn stop(&self) -> Result<(), Error> {
        debug!("Stopping container {}", self.inner.id);
        let permits = self.inner.pool_size()?;
        let mut lifecycle = self.inner.lock_lifecycle()?;
        if !lifecycle.running {
            debug!("Container {} is not running.", self.inner.id);
            return Ok(());
        }
        self.inner.halt(&mut lifecycle)?;
        if self.inner.managed.is_some() {
            let idle = self.inner.semaphore.available_permits() == permits as usize;
            match Handle::try_current() {
                Ok(handle) if !idle => {
                    // Disposal waits for the pipelines already dispatched.
                    lifecycle.draining = true;
                    let inner = self.inner.clone();
                    handle.spawn(async move {
                        if let Err(e) = inner.drain_and_dispose(permits).await {
                            error!("Error stopping container {}: {}", inner.id, e);
                        }
                    });
                    debug!("Container {} stopped, draining in-flight work", self.inner.id);
                    return Ok(());
                }
                _ => self.inner.dispose_executor()?,
            }
        }
        debug!("Container {} stopped", self.inner.id);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.inner
            .lifecycle
            .lock()
            .map(|lifecycle| lifecycle.running)
            .unwrap_or(false)
    }

    fn auto_startup(&self) -> bool {
        self.inner.options.auto_startup()
    }
}

/// Builder for [`ListenerContainer`].
pub struct ListenerContainerBuilder<T> {
    id: Option<String>,
    options: ContainerOptions,
    listener: ListenerKind<T>,
    producers: Vec<Arc<dyn AsyncMessageProducer<T>>>,
    error_handler: Option<Arc<dyn AsyncErrorHandler<T>>>,
    ack_handler: Option<Arc<dyn AsyncAckHandler<T>>>,
    interceptor: Option<Arc<dyn AsyncMessageInterceptor<T>>>,
    executor: Option<Arc<dyn TaskExecutor>>,
    managed: Option<Arc<dyn ManagedResource>>,
    hooks: Option<Arc<dyn LifecycleHooks>>,
}

impl<T> ListenerContainerBuilder<T>
where
    T: Send + Sync + 'static,
{
    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_owned());
        self
    }

    pub fn options(mut self, options: ContainerOptions) -> Self {
        self.options = options;
        self
    }

    /// Adds a producer. Producers are polled in the order they were added.
    pub fn producer<P>(mut self, producer: P) -> Self
    where
        P: AsyncMessageProducer<T>,
    {
        self.producers.push(Arc::new(producer));
        self
    }

    pub fn error_handler<H>(mut self, handler: H) -> Self
    where
        H: AsyncErrorHandler<T>,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Overrides the ack handler derived from the acknowledgement mode.
    pub fn ack_handler<H>(mut self, handler: H) -> Self
    where
        H: AsyncAckHandler<T>,
    {
        self.ack_handler = Some(Arc::new(handler));
        self
    }

    pub fn interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: AsyncMessageInterceptor<T>,
    {
        self.interceptor = Some(Arc::new(interceptor));
        self
    }

    /// Runs the container on an executor it does not own.
    pub fn executor<E>(mut self, executor: E) -> Self
    where
        E: TaskExecutor,
    {
        self.executor = Some(Arc::new(executor));
        self.managed = None;
        self
    }

    /// Runs the container on an executor it initializes and disposes.
    pub fn managed_executor<E>(mut self, executor: Arc<E>) -> Self
    where
        E: TaskExecutor + ManagedResource,
    {
        self.executor = Some(executor.clone());
        self.managed = Some(executor);
        self
    }

    pub fn hooks<H>(mut self, hooks: H) -> Self
    where
        H: LifecycleHooks,
    {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Builds the container.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for invalid options and `Error::Executor` if no executor was
    /// given and the builder is not running inside a tokio runtime.
    ///
    pub fn build(self) -> Result<ListenerContainer<T>, Error> {
        self.options.validate()?;
        let executor: Arc<dyn TaskExecutor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(TokioExecutor::current()?),
        };
        let error_handler = self
            .error_handler
            .unwrap_or_else(|| Arc::new(LoggingErrorHandler::default()));
        let ack_handler = self
            .ack_handler
            .unwrap_or_else(|| ack_handler_for(self.options.acknowledgement_mode()));
        let results = Arc::new(ResultHandler::new(error_handler, ack_handler));

        if let ListenerKind::CallbackBased(listener) = &self.listener {
            listener.set_result_callback(ResultCallback::new(results.clone()));
        }

        let id = self.id.unwrap_or_else(|| {
            format!(
                "listener-container-{}",
                NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed)
            )
        });
        let producers = self
            .producers
            .into_iter()
            .map(|producer| ProducerSlot {
                producer,
                back_off: Mutex::new(PollBackOff::new(
                    self.options.poll_back_off().to_backoff(),
                )),
            })
            .collect();
        let semaphore = Arc::new(Semaphore::new(self.options.simultaneous_produce_calls()));

        Ok(ListenerContainer {
            inner: Arc::new(Inner {
                id,
                options: self.options,
                producers,
                listener: self.listener,
                interceptor: self.interceptor,
                results,
                executor,
                managed: self.managed,
                hooks: self.hooks,
                semaphore,
                lifecycle: Mutex::new(Lifecycle {
                    running: false,
                    draining: false,
                    token: CancellationToken::new(),
                }),
            }),
        })
    }
}
