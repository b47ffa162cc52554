// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Behavioural tests for the listener container: concurrency bound, permit accounting,
//! fan-out, result routing and lifecycle.

use async_trait::async_trait;
use container::{
    Acknowledgement, AsyncAckHandler, AsyncErrorHandler, AsyncMessageInterceptor,
    AsyncMessageListener, AsyncMessageProducer, BackOffOptions, CallbackMessageListener,
    ContainerOptions, Error, ListenerContainer, ListenerKind, Message,
    MessageListenerContainer, MessageListenerContainerRegistry, ResultCallback,
    TrackedExecutor,
};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tracing_subscriber::EnvFilter;

// Test collaborators

/// Producer tracking how many produce calls are in flight.
#[derive(Clone)]
struct SlowProducer {
    delay: Duration,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl SlowProducer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl AsyncMessageProducer<u32> for SlowProducer {
    async fn produce(
        &self,
        _max_messages: usize,
        _timeout: Duration,
    ) -> Result<Vec<Message<u32>>, Error> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as u32;
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![Message::new(call)])
    }
}

/// Producer handing out prepared batches, then idling.
struct BatchProducer {
    batches: Mutex<VecDeque<Result<Vec<Message<u32>>, Error>>>,
}

impl BatchProducer {
    fn new(batches: Vec<Result<Vec<Message<u32>>, Error>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
        }
    }

    fn single(payloads: impl IntoIterator<Item = u32>) -> Self {
        Self::new(vec![Ok(payloads.into_iter().map(Message::new).collect())])
    }
}

#[async_trait]
impl AsyncMessageProducer<u32> for BatchProducer {
    async fn produce(
        &self,
        max_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<Message<u32>>, Error> {
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(batch) => batch.map(|mut messages| {
                messages.truncate(max_messages);
                messages
            }),
            None => {
                tokio::time::sleep(timeout.min(Duration::from_millis(20))).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Producer that always fails.
#[derive(Clone, Default)]
struct FailingProducer {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl AsyncMessageProducer<u32> for FailingProducer {
    async fn produce(
        &self,
        _max_messages: usize,
        _timeout: Duration,
    ) -> Result<Vec<Message<u32>>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Produce("queue unreachable".to_owned()))
    }
}

/// Producer failing every third call, yielding three messages otherwise.
#[derive(Clone, Default)]
struct FlakyProducer {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl AsyncMessageProducer<u32> for FlakyProducer {
    async fn produce(
        &self,
        _max_messages: usize,
        _timeout: Duration,
    ) -> Result<Vec<Message<u32>>, Error> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as u32;
        tokio::time::sleep(Duration::from_millis(5)).await;
        if call % 3 == 2 {
            return Err(Error::Produce(format!("call {} failed", call)));
        }
        Ok((0..3).map(|i| Message::new(call * 10 + i)).collect())
    }
}

/// Listener recording payloads, failing odd ones when asked to.
#[derive(Clone, Default)]
struct RecordingListener {
    received: Arc<Mutex<Vec<u32>>>,
    fail_odd: bool,
    delay_by_payload: bool,
}

#[async_trait]
impl AsyncMessageListener<u32> for RecordingListener {
    async fn on_message(&self, message: &Message<u32>) -> Result<(), Error> {
        let payload = *message.payload();
        if self.delay_by_payload {
            tokio::time::sleep(Duration::from_millis(20 * (5 - payload as u64 % 5))).await;
        }
        self.received.lock().unwrap().push(payload);
        if self.fail_odd && payload % 2 == 1 {
            Err(Error::Listener(format!("payload {}", payload)))
        } else {
            Ok(())
        }
    }
}

type Events = Arc<Mutex<Vec<(u32, &'static str)>>>;

/// Error handler and ack handler writing to a shared event log.
#[derive(Clone, Default)]
struct RecordingHandlers {
    events: Events,
}

impl RecordingHandlers {
    fn events_for(&self, payload: u32) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == payload)
            .map(|(_, e)| *e)
            .collect()
    }

    fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| *e == event)
            .count()
    }
}

#[async_trait]
impl AsyncErrorHandler<u32> for RecordingHandlers {
    async fn handle_error(
        &self,
        message: &Message<u32>,
        _error: &Error,
    ) -> Result<(), Error> {
        self.events
            .lock()
            .unwrap()
            .push((*message.payload(), "handle_error"));
        Ok(())
    }
}

#[async_trait]
impl AsyncAckHandler<u32> for RecordingHandlers {
    async fn on_success(&self, message: &Message<u32>) -> Result<(), Error> {
        self.events
            .lock()
            .unwrap()
            .push((*message.payload(), "on_success"));
        message.acknowledge().await
    }

    async fn on_error(
        &self,
        message: &Message<u32>,
        _error: &Error,
    ) -> Result<(), Error> {
        self.events
            .lock()
            .unwrap()
            .push((*message.payload(), "on_error"));
        Ok(())
    }
}

struct CountingAck(Arc<AtomicUsize>);

#[async_trait]
impl Acknowledgement for CountingAck {
    async fn acknowledge(&self) -> Result<(), Error> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Installs a subscriber honouring `RUST_LOG`; only the first call per binary takes effect.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

fn options(simultaneous: usize) -> ContainerOptions {
    ContainerOptions::builder()
        .simultaneous_produce_calls(simultaneous)
        .messages_per_produce(10)
        .produce_timeout(Duration::from_secs(1))
        .listener_shutdown_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

// Concurrency bound

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_produce_calls_never_exceed_permits() {
    init_tracing();
    let producer = SlowProducer::new(Duration::from_millis(30));
    let container = ListenerContainer::builder(ListenerKind::future_based(
        RecordingListener::default(),
    ))
    .options(options(3))
    .producer(producer.clone())
    .producer(producer.clone())
    .build()
    .unwrap();

    container.start().unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    container.shutdown().await.unwrap();

    let max = producer.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "observed {} produce calls in flight", max);
    assert!(max >= 2, "produce calls never overlapped");
    assert!(producer.calls.load(Ordering::SeqCst) > 3);
}

// Permit release

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_permits_return_on_every_path() {
    init_tracing();
    let producer = FlakyProducer::default();
    let listener = RecordingListener {
        fail_odd: true,
        ..Default::default()
    };
    let options = ContainerOptions::builder()
        .simultaneous_produce_calls(4)
        .poll_back_off(BackOffOptions {
            initial_interval: Duration::from_millis(5),
            multiplier: 1.0,
            max_interval: Duration::from_millis(5),
        })
        .listener_shutdown_timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let container = ListenerContainer::builder(ListenerKind::future_based(listener.clone()))
        .options(options)
        .producer(producer.clone())
        .build()
        .unwrap();

    container.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || producer.calls.load(Ordering::SeqCst) >= 20).await);
    container.shutdown().await.unwrap();

    assert_eq!(container.available_permits(), 4);
    assert!(!listener.received.lock().unwrap().is_empty());
}

// Fan-out completeness

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_message_of_a_batch_is_processed_once() {
    init_tracing();
    let listener = RecordingListener::default();
    let handlers = RecordingHandlers::default();
    let container = ListenerContainer::builder(ListenerKind::future_based(listener.clone()))
        .options(options(2))
        .producer(BatchProducer::single(0..5))
        .error_handler(handlers.clone())
        .ack_handler(handlers.clone())
        .build()
        .unwrap();

    container.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || handlers.count("on_success") == 5).await);
    container.shutdown().await.unwrap();

    let mut received = listener.received.lock().unwrap().clone();
    received.sort();
    assert_eq!(received, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_batch_size_is_bounded_by_messages_per_produce() {
    init_tracing();
    let listener = RecordingListener::default();
    let options = ContainerOptions::builder()
        .simultaneous_produce_calls(1)
        .messages_per_produce(2)
        .build()
        .unwrap();
    let container = ListenerContainer::builder(ListenerKind::future_based(listener.clone()))
        .options(options)
        .producer(BatchProducer::single(0..5))
        .build()
        .unwrap();

    container.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || listener.received.lock().unwrap().len() == 2).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    container.stop().unwrap();
    assert_eq!(listener.received.lock().unwrap().len(), 2);
}

// Ack on success, error then nack on failure

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_success_acks_and_failure_goes_through_error_handler_first() {
    init_tracing();
    let listener = RecordingListener {
        fail_odd: true,
        ..Default::default()
    };
    let handlers = RecordingHandlers::default();
    let container = ListenerContainer::builder(ListenerKind::future_based(listener))
        .options(options(1))
        .producer(BatchProducer::single(vec![2, 3]))
        .error_handler(handlers.clone())
        .ack_handler(handlers.clone())
        .build()
        .unwrap();

    container.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || handlers.events.lock().unwrap().len() == 3).await);
    container.stop().unwrap();

    assert_eq!(handlers.events_for(2), vec!["on_success"]);
    assert_eq!(handlers.events_for(3), vec!["handle_error", "on_error"]);
}

#[tokio::test]
async fn test_default_handlers_ack_only_successes() {
    init_tracing();
    let acks = Arc::new(AtomicUsize::new(0));
    let batch = (0..4)
        .map(|i| {
            Message::builder(i)
                .acknowledgement(Arc::new(CountingAck(acks.clone())))
                .build()
        })
        .collect();
    let listener = RecordingListener {
        fail_odd: true,
        ..Default::default()
    };
    let container = ListenerContainer::builder(ListenerKind::future_based(listener.clone()))
        .options(options(1))
        .producer(BatchProducer::new(vec![Ok(batch)]))
        .build()
        .unwrap();

    container.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || listener.received.lock().unwrap().len() == 4).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    container.stop().unwrap();
    assert_eq!(acks.load(Ordering::SeqCst), 2);
}

// Out-of-order completion

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_out_of_order_completion_acks_everything() {
    init_tracing();
    let listener = RecordingListener {
        delay_by_payload: true,
        ..Default::default()
    };
    let handlers = RecordingHandlers::default();
    let container = ListenerContainer::builder(ListenerKind::future_based(listener.clone()))
        .options(options(1))
        .producer(BatchProducer::single(0..5))
        .ack_handler(handlers.clone())
        .build()
        .unwrap();

    container.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || handlers.count("on_success") == 5).await);
    container.stop().unwrap();

    // Later payloads sleep less, so they finish first.
    let received = listener.received.lock().unwrap().clone();
    assert_ne!(received, vec![0, 1, 2, 3, 4]);
    for payload in 0..5 {
        assert_eq!(handlers.events_for(payload), vec!["on_success"]);
    }
}

// Lifecycle

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_is_non_blocking_and_stop_prevents_new_produce_calls() {
    init_tracing();
    let producer = SlowProducer::new(Duration::from_millis(200));
    let container = ListenerContainer::builder(ListenerKind::future_based(
        RecordingListener::default(),
    ))
    .options(options(1))
    .producer(producer.clone())
    .build()
    .unwrap();

    container.start().unwrap();
    assert!(container.is_running());
    assert!(producer.calls.load(Ordering::SeqCst) <= 1);
    assert!(wait_until(Duration::from_secs(1), || producer.calls.load(Ordering::SeqCst) == 1).await);
    assert_eq!(producer.in_flight.load(Ordering::SeqCst), 1);

    container.stop().unwrap();
    assert!(!container.is_running());

    // The in-flight call finishes, no new one starts.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(producer.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(producer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(container.available_permits(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_container_can_restart() {
    init_tracing();
    let producer = SlowProducer::new(Duration::from_millis(10));
    let container = ListenerContainer::builder(ListenerKind::future_based(
        RecordingListener::default(),
    ))
    .options(options(1))
    .producer(producer.clone())
    .build()
    .unwrap();

    container.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || producer.calls.load(Ordering::SeqCst) >= 1).await);
    container.stop().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let after_stop = producer.calls.load(Ordering::SeqCst);

    container.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || producer.calls.load(Ordering::SeqCst) > after_stop).await);
    container.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_managed_executor_is_disposed_after_drain() {
    init_tracing();
    let executor = Arc::new(TrackedExecutor::current().unwrap());
    let producer = SlowProducer::new(Duration::from_secs(30));
    let options = ContainerOptions::builder()
        .simultaneous_produce_calls(2)
        .listener_shutdown_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let container = ListenerContainer::builder(ListenerKind::future_based(
        RecordingListener::default(),
    ))
    .options(options)
    .producer(producer.clone())
    .managed_executor(executor.clone())
    .build()
    .unwrap();

    container.initialize().unwrap();
    container.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || producer.calls.load(Ordering::SeqCst) == 2).await);

    // Both pipelines are stuck in produce, so disposal waits for them.
    container.stop().unwrap();
    assert!(!container.is_running());
    assert!(!executor.is_disposed());
    assert!(matches!(container.start(), Err(Error::Start(_))));

    // They overrun the shutdown timeout and get cancelled.
    assert!(wait_until(Duration::from_secs(2), || executor.is_disposed()).await);
    executor.wait().await;
    assert_eq!(container.available_permits(), 2);

    // A disposed executor rejects the loop of a restarted container.
    assert!(matches!(container.start(), Err(Error::Start(_))));
    assert!(!container.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_lets_in_flight_message_reach_ack_handler() {
    init_tracing();
    let executor = Arc::new(TrackedExecutor::current().unwrap());
    let handlers = RecordingHandlers::default();
    // Payload 0 keeps the listener busy for 100ms.
    let listener = RecordingListener {
        delay_by_payload: true,
        ..Default::default()
    };
    let container = ListenerContainer::builder(ListenerKind::future_based(listener.clone()))
        .options(options(1))
        .producer(BatchProducer::single([0]))
        .error_handler(handlers.clone())
        .ack_handler(handlers.clone())
        .managed_executor(executor.clone())
        .build()
        .unwrap();

    container.start().unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(listener.received.lock().unwrap().is_empty());

    container.stop().unwrap();
    assert!(!executor.is_disposed());

    assert!(wait_until(Duration::from_secs(2), || handlers.count("on_success") == 1).await);
    assert_eq!(*listener.received.lock().unwrap(), vec![0]);
    assert!(wait_until(Duration::from_secs(2), || executor.is_disposed()).await);
    assert_eq!(container.available_permits(), 1);
}

// Poll back-off

#[tokio::test]
async fn test_failing_producer_is_backed_off() {
    init_tracing();
    let producer = FailingProducer::default();
    let options = ContainerOptions::builder()
        .simultaneous_produce_calls(1)
        .poll_back_off(BackOffOptions {
            initial_interval: Duration::from_millis(100),
            multiplier: 2.0,
            max_interval: Duration::from_secs(1),
        })
        .build()
        .unwrap();
    let container = ListenerContainer::builder(ListenerKind::future_based(
        RecordingListener::default(),
    ))
    .options(options)
    .producer(producer.clone())
    .build()
    .unwrap();

    container.start().unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    container.stop().unwrap();

    let calls = producer.calls.load(Ordering::SeqCst);
    assert!((2..=4).contains(&calls), "unexpected produce calls: {}", calls);
}

// Interceptors

struct RejectOdd;

#[async_trait]
impl AsyncMessageInterceptor<u32> for RejectOdd {
    async fn intercept(&self, message: &Message<u32>) -> Result<(), Error> {
        if message.payload() % 2 == 1 {
            Err(Error::Interceptor("odd payload".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn test_interceptor_failure_skips_listener() {
    init_tracing();
    let listener = RecordingListener::default();
    let handlers = RecordingHandlers::default();
    let container = ListenerContainer::builder(ListenerKind::future_based(listener.clone()))
        .options(options(1))
        .producer(BatchProducer::single(vec![4, 5]))
        .interceptor(RejectOdd)
        .error_handler(handlers.clone())
        .ack_handler(handlers.clone())
        .build()
        .unwrap();

    container.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || handlers.events.lock().unwrap().len() == 3).await);
    container.stop().unwrap();

    assert_eq!(*listener.received.lock().unwrap(), vec![4]);
    assert_eq!(handlers.events_for(4), vec!["on_success"]);
    assert_eq!(handlers.events_for(5), vec!["handle_error", "on_error"]);
}

// Callback listeners

#[derive(Clone, Default)]
struct CallbackListener {
    callback: Arc<Mutex<Option<ResultCallback<u32>>>>,
    received: Arc<AtomicUsize>,
}

#[async_trait]
impl CallbackMessageListener<u32> for CallbackListener {
    fn set_result_callback(&self, callback: ResultCallback<u32>) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    async fn on_message(&self, message: Arc<Message<u32>>) -> Result<(), Error> {
        self.received.fetch_add(1, Ordering::SeqCst);
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                let outcome = if message.payload() % 2 == 0 {
                    Ok(())
                } else {
                    Err(Error::Listener("odd".to_owned()))
                };
                let _ = callback.report(&message, outcome).await;
            });
        }
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_callback_listener_reports_through_callback() {
    init_tracing();
    let listener = CallbackListener::default();
    let handlers = RecordingHandlers::default();
    let container = ListenerContainer::builder(ListenerKind::callback_based(listener.clone()))
        .options(options(1))
        .producer(BatchProducer::single(vec![6, 7]))
        .error_handler(handlers.clone())
        .ack_handler(handlers.clone())
        .build()
        .unwrap();
    assert!(listener.callback.lock().unwrap().is_some());

    container.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || handlers.events.lock().unwrap().len() == 3).await);
    container.stop().unwrap();

    assert_eq!(listener.received.load(Ordering::SeqCst), 2);
    assert_eq!(handlers.events_for(6), vec!["on_success"]);
    assert_eq!(handlers.events_for(7), vec!["handle_error", "on_error"]);
}

// Registry with real containers

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registry_drives_containers() {
    init_tracing();
    let orders = SlowProducer::new(Duration::from_millis(10));
    let audit = SlowProducer::new(Duration::from_millis(10));
    let orders_container = ListenerContainer::builder(ListenerKind::future_based(
        RecordingListener::default(),
    ))
    .id("orders")
    .options(options(1))
    .producer(orders.clone())
    .build()
    .unwrap();
    let audit_options = ContainerOptions::builder().auto_startup(false).build().unwrap();
    let audit_container = ListenerContainer::builder(ListenerKind::future_based(
        RecordingListener::default(),
    ))
    .id("audit")
    .options(audit_options)
    .producer(audit.clone())
    .build()
    .unwrap();

    let registry = MessageListenerContainerRegistry::new();
    registry.register(orders_container.clone()).unwrap();
    registry.register(audit_container.clone()).unwrap();

    registry.start().unwrap();
    assert!(orders_container.is_running());
    assert!(!audit_container.is_running());
    assert!(wait_until(Duration::from_secs(1), || orders.calls.load(Ordering::SeqCst) > 0).await);
    assert_eq!(audit.calls.load(Ordering::SeqCst), 0);

    registry.stop().unwrap();
    assert!(!orders_container.is_running());
    assert!(!registry.get("orders").unwrap().is_running());
}
