// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Message envelope
//!
//! A [`Message`] carries a payload, a set of string headers with delivery metadata, and an
//! optional [`Acknowledgement`] supplied by the producer. The container never mutates a
//! message; it only routes the envelope between the listener and its handlers.
//!

use crate::Error;

use async_trait::async_trait;
use tracing::debug;

use std::{
    collections::BTreeMap,
    fmt::{self, Debug},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Well-known header names.
pub mod headers {
    /// Unique id of the message.
    pub const ID: &str = "id";
    /// Handle used to acknowledge or change the visibility of a delivery.
    pub const RECEIPT_HANDLE: &str = "ReceiptHandle";
    /// Number of times the message has been received.
    pub const RECEIVE_COUNT: &str = "ApproximateReceiveCount";
    /// Name of the queue the message was received from.
    pub const QUEUE_NAME: &str = "QueueName";
}

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Callback that acknowledges a delivered message at its source.
#[async_trait]
pub trait Acknowledgement: Send + Sync + 'static {
    /// Acknowledge the message, removing it from its source.
    async fn acknowledge(&self) -> Result<(), Error>;
}

/// Ordered message headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    values: BTreeMap<String, String>,
}

impl MessageHeaders {
    /// Returns the header value, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Returns true if the header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Iterates over the headers in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Message envelope with a generic payload.
pub struct Message<T> {
    payload: T,
    headers: MessageHeaders,
    acknowledgement: Option<Arc<dyn Acknowledgement>>,
}

impl<T> Message<T> {
    /// Creates a message with a generated id and no acknowledgement.
    pub fn new(payload: T) -> Self {
        Self::builder(payload).build()
    }

    /// Starts building a message around the payload.
    pub fn builder(payload: T) -> MessageBuilder<T> {
        MessageBuilder {
            payload,
            headers: BTreeMap::new(),
            acknowledgement: None,
        }
    }

    /// The payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// The headers.
    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// Shortcut for a single header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The message id.
    pub fn id(&self) -> &str {
        self.headers.get(headers::ID).unwrap_or_default()
    }

    /// Returns true if the producer attached an acknowledgement callback.
    pub fn is_acknowledgeable(&self) -> bool {
        self.acknowledgement.is_some()
    }

    /// Acknowledges the message through the producer's callback.
    ///
    /// Without a callback this is a no-op.
    pub async fn acknowledge(&self) -> Result<(), Error> {
        match &self.acknowledgement {
            Some(acknowledgement) => acknowledgement.acknowledge().await,
            None => {
                debug!("Message {} has no acknowledgement callback.", self.id());
                Ok(())
            }
        }
    }

    /// Consumes the message returning its payload.
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Debug> Debug for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("payload", &self.payload)
            .field("headers", &self.headers)
            .field("acknowledgeable", &self.acknowledgement.is_some())
            .finish()
    }
}

/// Builder for [`Message`].
pub struct MessageBuilder<T> {
    payload: T,
    headers: BTreeMap<String, String>,
    acknowledgement: Option<Arc<dyn Acknowledgement>>,
}

impl<T> MessageBuilder<T> {
    /// Adds a header, replacing any previous value.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_owned(), value.into());
        self
    }

    /// Attaches the acknowledgement callback.
    pub fn acknowledgement(mut self, acknowledgement: Arc<dyn Acknowledgement>) -> Self {
        self.acknowledgement = Some(acknowledgement);
        self
    }

    /// Builds the message, generating an id header when none was given.
    pub fn build(mut self) -> Message<T> {
        if !self.headers.contains_key(headers::ID) {
            let id = NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed);
            self.headers.insert(headers::ID.to_owned(), id.to_string());
        }
        Message {
            payload: self.payload,
            headers: MessageHeaders {
                values: self.headers,
            },
            acknowledgement: self.acknowledgement,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use std::sync::atomic::AtomicUsize;

    struct CountingAck(Arc<AtomicUsize>);

    #[async_trait]
    impl Acknowledgement for CountingAck {
        async fn acknowledge(&self) -> Result<(), Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let first = Message::new(1);
        let second = Message::new(2);
        assert!(!first.id().is_empty());
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_explicit_headers() {
        let message = Message::builder("payload")
            .header(headers::ID, "abc")
            .header(headers::RECEIPT_HANDLE, "r-1")
            .build();
        assert_eq!(message.id(), "abc");
        assert_eq!(message.header(headers::RECEIPT_HANDLE), Some("r-1"));
        assert_eq!(message.headers().len(), 2);
        assert!(!message.is_acknowledgeable());
    }

    #[tokio::test]
    async fn test_acknowledge() {
        let counter = Arc::new(AtomicUsize::new(0));
        let message = Message::builder(())
            .acknowledgement(Arc::new(CountingAck(counter.clone())))
            .build();
        assert!(message.is_acknowledgeable());
        message.acknowledge().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Without a callback acknowledging is a no-op.
        Message::new(()).acknowledge().await.unwrap();
    }
}
