// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Asynchronous Message Listener Container
//!
//! A bounded-concurrency polling container for consuming messages from queue-like sources.
//! The container repeatedly asks its producers for batches of messages, fans every batch out
//! to one task per message, runs each message through an optional interceptor and the
//! listener, and routes the outcome to pluggable acknowledgement and error handling.
//!
//! ## Core Architecture
//!
//! ### Polling loop
//!
//! While a container is running, a single loop iterates over its producers. Before each
//! produce call it acquires a permit from a pool sized by
//! [`ContainerOptions::simultaneous_produce_calls`]; the permit travels with the pipeline and
//! is released only once production, fan-out and result handling are done. The pool is the
//! sole backpressure mechanism and bounds the produce pipelines in flight per container,
//! independently of how many threads the executor has.
//!
//! ### Message processing
//!
//! Messages of one batch are processed concurrently, with no ordering guarantee between
//! them. For every message:
//!
//! - The [`AsyncMessageInterceptor`], if configured, runs first.
//! - The listener is invoked. A [`ListenerKind::FutureBased`] listener returns its outcome; a
//!   [`ListenerKind::CallbackBased`] listener reports it later through a [`ResultCallback`].
//! - On success the [`AsyncAckHandler`] is told `on_success`. On failure the
//!   [`AsyncErrorHandler`] runs and then the ack handler's `on_error`.
//!
//! Per-message failures never abort the loop or the other messages of the batch.
//!
//! ### Lifecycle
//!
//! Containers move between stopped and running. `start()` schedules the loop and returns
//! immediately; `stop()` prevents new loop iterations without cancelling in-flight work.
//! A [`MessageListenerContainerRegistry`] starts and stops a group of containers together.
//!
//! ## Usage
//!
//! ```ignore
//! use container::*;
//!
//! let options = ContainerOptions::builder()
//!     .simultaneous_produce_calls(4)
//!     .messages_per_produce(10)
//!     .build()?;
//!
//! let container = ListenerContainer::builder(ListenerKind::future_based(OrderListener))
//!     .id("orders")
//!     .options(options)
//!     .producer(orders_producer)
//!     .build()?;
//!
//! let registry = MessageListenerContainerRegistry::new();
//! registry.register(container.clone())?;
//! registry.start()?;
//! // ...
//! container.shutdown().await?;
//! ```
//!

mod container;
mod error;
mod executor;
mod handler;
mod interceptor;
mod listener;
mod message;
mod options;
mod producer;
mod registry;

//
// Container and lifecycle
//

/// The listener container, its builder and the lifecycle contract it implements.
pub use container::{
    LifecycleHooks, ListenerContainer, ListenerContainerBuilder, MessageListenerContainer,
};

/// Registry propagating start and stop to a group of containers.
pub use registry::MessageListenerContainerRegistry;

//
// Configuration
//

/// Immutable container configuration and its builder.
pub use options::{AcknowledgementMode, BackOffOptions, ContainerOptions, ContainerOptionsBuilder};

//
// Messages and collaborators
//

/// Message envelope, headers and acknowledgement callback.
pub use message::{Acknowledgement, Message, MessageBuilder, MessageHeaders, headers};

/// Source of message batches polled by the container.
pub use producer::AsyncMessageProducer;

/// Listener shapes and the callback used by callback-based listeners.
pub use listener::{AsyncMessageListener, CallbackMessageListener, ListenerKind, ResultCallback};

/// Interceptors chained before the listener.
pub use interceptor::{AsyncMessageInterceptor, CompositeInterceptor};

/// Error and acknowledgement strategies with their default implementations.
pub use handler::{
    AlwaysAckHandler, AsyncAckHandler, AsyncErrorHandler, LoggingErrorHandler, NeverAckHandler,
    OnSuccessAckHandler, ack_handler_for,
};

//
// Execution
//

/// Executors running the loop and per-message tasks.
pub use executor::{ManagedResource, Task, TaskExecutor, TokioExecutor, TrackedExecutor, submit};

/// Error type.
pub use error::Error;
