// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Message listeners
//!
//! A listener comes in one of two shapes, chosen once when the container is built:
//!
//! - [`AsyncMessageListener`]: returns the processing outcome and the container routes it
//!   through the error and ack handlers.
//! - [`CallbackMessageListener`]: receives a [`ResultCallback`] at build time and reports each
//!   outcome through it whenever it is ready. The container does not drive acknowledgement for
//!   these listeners.
//!

use crate::{Error, Message, handler::ResultHandler};

use async_trait::async_trait;

use std::sync::Arc;

/// Listener reporting its outcome by completing the returned future.
#[async_trait]
pub trait AsyncMessageListener<T>: Send + Sync + 'static {
    async fn on_message(&self, message: &Message<T>) -> Result<(), Error>;
}

/// Listener reporting its outcome through a registered callback.
#[async_trait]
pub trait CallbackMessageListener<T>: Send + Sync + 'static {
    /// Receives the callback the listener must report results to.
    fn set_result_callback(&self, callback: ResultCallback<T>);

    /// Hands a message over to the listener.
    ///
    /// An error here only means the message could not be accepted; processing outcomes go
    /// through the callback.
    async fn on_message(&self, message: Arc<Message<T>>) -> Result<(), Error>;
}

/// The listener a container dispatches to.
pub enum ListenerKind<T> {
    FutureBased(Arc<dyn AsyncMessageListener<T>>),
    CallbackBased(Arc<dyn CallbackMessageListener<T>>),
}

impl<T> ListenerKind<T> {
    pub fn future_based<L>(listener: L) -> Self
    where
        L: AsyncMessageListener<T>,
    {
        ListenerKind::FutureBased(Arc::new(listener))
    }

    pub fn callback_based<L>(listener: L) -> Self
    where
        L: CallbackMessageListener<T>,
    {
        ListenerKind::CallbackBased(Arc::new(listener))
    }
}

impl<T> Clone for ListenerKind<T> {
    fn clone(&self) -> Self {
        match self {
            ListenerKind::FutureBased(l) => ListenerKind::FutureBased(l.clone()),
            ListenerKind::CallbackBased(l) => ListenerKind::CallbackBased(l.clone()),
        }
    }
}

/// Handle a callback listener uses to report processing outcomes to its container.
pub struct ResultCallback<T> {
    handler: Arc<ResultHandler<T>>,
}

impl<T> ResultCallback<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(handler: Arc<ResultHandler<T>>) -> Self {
        Self { handler }
    }

    /// Reports the outcome of processing `message`.
    ///
    /// Success goes to the ack handler; failure to the error handler and then the ack handler.
    pub async fn report(
        &self,
        message: &Message<T>,
        outcome: Result<(), Error>,
    ) -> Result<(), Error> {
        self.handler.handle_result(message, outcome).await
    }
}

impl<T> Clone for ResultCallback<T> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}
