// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Queue producer
//!
//! Bridges a [`MemoryQueue`] into a listener container. Every received message carries the
//! queue headers and an acknowledgement that deletes it from the queue.
//!

use crate::{error::Error, memory::MemoryQueue};

use container::{
    Acknowledgement, AsyncMessageProducer, Error as ContainerError, Message, headers,
};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::error;

use std::{marker::PhantomData, sync::Arc, time::Duration};

/// Deletes the delivered message from its queue.
pub struct QueueAcknowledgement {
    queue: MemoryQueue,
    receipt_handle: String,
}

impl QueueAcknowledgement {
    pub fn new(queue: MemoryQueue, receipt_handle: String) -> Self {
        Self {
            queue,
            receipt_handle,
        }
    }
}

#[async_trait]
impl Acknowledgement for QueueAcknowledgement {
    async fn acknowledge(&self) -> Result<(), ContainerError> {
        self.queue
            .delete(&self.receipt_handle)
            .map_err(|e| ContainerError::Ack(e.to_string()))
    }
}

/// Message producer reading from a [`MemoryQueue`].
///
/// Messages whose body can not be decoded are logged and left in the queue, so they become
/// visible again once the visibility timeout expires.
pub struct QueueProducer<T> {
    queue: MemoryQueue,
    visibility_timeout: Duration,
    _payload: PhantomData<fn() -> T>,
}

impl<T> QueueProducer<T> {
    pub fn new(queue: MemoryQueue, visibility_timeout: Duration) -> Self {
        Self {
            queue,
            visibility_timeout,
            _payload: PhantomData,
        }
    }

    pub fn queue(&self) -> &MemoryQueue {
        &self.queue
    }
}

impl<T: DeserializeOwned> QueueProducer<T> {
    fn decode(body: &[u8]) -> Result<T, Error> {
        bincode::deserialize(body).map_err(|e| Error::Decode(e.to_string()))
    }
}

#[async_trait]
impl<T> AsyncMessageProducer<T> for QueueProducer<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    async fn produce(
        &self,
        max_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<Message<T>>, ContainerError> {
        let received = self
            .queue
            .receive(max_messages, timeout, self.visibility_timeout)
            .await
            .map_err(|e| ContainerError::Produce(e.to_string()))?;

        let mut messages = Vec::with_capacity(received.len());
        for delivery in received {
            let payload = match Self::decode(&delivery.body) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(
                        "Message {} from queue {} skipped, left for redelivery: {}",
                        delivery.message_id,
                        self.queue.name(),
                        e
                    );
                    continue;
                }
            };
            let acknowledgement = QueueAcknowledgement::new(
                self.queue.clone(),
                delivery.receipt_handle.clone(),
            );
            let message = Message::builder(payload)
                .header(headers::ID, delivery.message_id.to_string())
                .header(headers::RECEIPT_HANDLE, delivery.receipt_handle)
                .header(headers::RECEIVE_COUNT, delivery.receive_count.to_string())
                .header(headers::QUEUE_NAME, self.queue.name())
                .acknowledgement(Arc::new(acknowledgement))
                .build();
            messages.push(message);
        }
        Ok(messages)
    }
}
