// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Message producer contract.
//!

use crate::{Error, Message};

use async_trait::async_trait;

use std::time::Duration;

/// A source of messages polled by the container, typically one per queue.
///
/// Implementations must be safe to call concurrently; the container bounds the number of
/// calls in flight but does not serialize them.
#[async_trait]
pub trait AsyncMessageProducer<T>: Send + Sync + 'static {
    /// Asks for up to `max_messages` messages, waiting at most `timeout` for them.
    ///
    /// An empty batch is a valid answer meaning "nothing available". The timeout is advisory:
    /// the container passes it through and does not enforce it.
    ///
    async fn produce(
        &self,
        max_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<Message<T>>, Error>;
}
