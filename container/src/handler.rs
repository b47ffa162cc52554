// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Result handling
//!
//! Once the listener is done with a message its outcome goes through two pluggable
//! strategies. On success the [`AsyncAckHandler`] decides whether to acknowledge. On failure
//! the [`AsyncErrorHandler`] runs first for its side effects (logging, dead-lettering,
//! visibility changes) and then the ack handler makes the ack/nack decision, whatever the
//! error handler did.
//!

use crate::{Error, Message, options::AcknowledgementMode};

use async_trait::async_trait;
use tracing::{error, trace, warn};

use std::{marker::PhantomData, sync::Arc};

/// Strategy invoked when processing a message fails.
#[async_trait]
pub trait AsyncErrorHandler<T>: Send + Sync + 'static {
    async fn handle_error(
        &self,
        message: &Message<T>,
        error: &Error,
    ) -> Result<(), Error>;
}

/// Strategy deciding what happens to a message after processing.
#[async_trait]
pub trait AsyncAckHandler<T>: Send + Sync + 'static {
    /// Called when the listener processed the message successfully.
    async fn on_success(&self, message: &Message<T>) -> Result<(), Error>;

    /// Called after the error handler when processing failed.
    async fn on_error(
        &self,
        message: &Message<T>,
        error: &Error,
    ) -> Result<(), Error>;
}

/// Default error handler: logs the failure and swallows it.
pub struct LoggingErrorHandler<T> {
    _phantom: PhantomData<fn(T)>,
}

impl<T> Default for LoggingErrorHandler<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T> AsyncErrorHandler<T> for LoggingErrorHandler<T>
where
    T: Send + Sync + 'static,
{
    async fn handle_error(
        &self,
        message: &Message<T>,
        error: &Error,
    ) -> Result<(), Error> {
        error!("Error processing message {}: {}", message.id(), error);
        Ok(())
    }
}

/// Acknowledges only successfully processed messages.
pub struct OnSuccessAckHandler<T> {
    _phantom: PhantomData<fn(T)>,
}

impl<T> Default for OnSuccessAckHandler<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T> AsyncAckHandler<T> for OnSuccessAckHandler<T>
where
    T: Send + Sync + 'static,
{
    async fn on_success(&self, message: &Message<T>) -> Result<(), Error> {
        trace!("Acknowledging message {}", message.id());
        message.acknowledge().await
    }

    async fn on_error(
        &self,
        message: &Message<T>,
        _error: &Error,
    ) -> Result<(), Error> {
        trace!("Leaving message {} for redelivery", message.id());
        Ok(())
    }
}

/// Acknowledges every message regardless of the outcome.
pub struct AlwaysAckHandler<T> {
    _phantom: PhantomData<fn(T)>,
}

impl<T> Default for AlwaysAckHandler<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T> AsyncAckHandler<T> for AlwaysAckHandler<T>
where
    T: Send + Sync + 'static,
{
    async fn on_success(&self, message: &Message<T>) -> Result<(), Error> {
        message.acknowledge().await
    }

    async fn on_error(
        &self,
        message: &Message<T>,
        _error: &Error,
    ) -> Result<(), Error> {
        message.acknowledge().await
    }
}

/// Never acknowledges; for listeners that acknowledge by themselves.
pub struct NeverAckHandler<T> {
    _phantom: PhantomData<fn(T)>,
}

impl<T> Default for NeverAckHandler<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T> AsyncAckHandler<T> for NeverAckHandler<T>
where
    T: Send + Sync + 'static,
{
    async fn on_success(&self, _message: &Message<T>) -> Result<(), Error> {
        Ok(())
    }

    async fn on_error(
        &self,
        _message: &Message<T>,
        _error: &Error,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Ack handler matching an acknowledgement mode.
pub fn ack_handler_for<T>(mode: AcknowledgementMode) -> Arc<dyn AsyncAckHandler<T>>
where
    T: Send + Sync + 'static,
{
    match mode {
        AcknowledgementMode::OnSuccess => Arc::new(OnSuccessAckHandler::default()),
        AcknowledgementMode::Always => Arc::new(AlwaysAckHandler::default()),
        AcknowledgementMode::Manual => Arc::new(NeverAckHandler::default()),
    }
}

/// The error handler and ack handler pair applied to every processing outcome.
pub(crate) struct ResultHandler<T> {
    error_handler: Arc<dyn AsyncErrorHandler<T>>,
    ack_handler: Arc<dyn AsyncAckHandler<T>>,
}

impl<T> ResultHandler<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(
        error_handler: Arc<dyn AsyncErrorHandler<T>>,
        ack_handler: Arc<dyn AsyncAckHandler<T>>,
    ) -> Self {
        Self {
            error_handler,
            ack_handler,
        }
    }

    /// Routes the outcome of processing `message`.
    pub(crate) async fn handle_result(
        &self,
        message: &Message<T>,
        outcome: Result<(), Error>,
    ) -> Result<(), Error> {
        match outcome {
            Ok(()) => self.ack_handler.on_success(message).await,
            Err(error) => {
                let handled = self.error_handler.handle_error(message, &error).await;
                if let Err(e) = &handled {
                    warn!(
                        "Error handler failed for message {}: {}",
                        message.id(),
                        e
                    );
                }
                let acked = self.ack_handler.on_error(message, &error).await;
                handled.and(acked)
            }
        }
    }
}
