// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Visibility back-off error handler
//!
//! Delays redelivery of a failed message by raising its visibility timeout exponentially with
//! the number of times it has been received.
//!

use crate::memory::MemoryQueue;

use container::{AsyncErrorHandler, Error, Message, headers};

use async_trait::async_trait;
use tracing::{debug, warn};

use std::{marker::PhantomData, time::Duration};

/// Error handler that backs off redelivery through the message visibility timeout.
///
/// The timeout for the n-th receive is `initial * multiplier^(n - 1)`, capped at `max`.
pub struct VisibilityBackoffErrorHandler<T> {
    queue: MemoryQueue,
    initial: Duration,
    multiplier: f64,
    max: Duration,
    _payload: PhantomData<fn(T)>,
}

impl<T> VisibilityBackoffErrorHandler<T> {
    pub const DEFAULT_INITIAL: Duration = Duration::from_secs(100);
    pub const DEFAULT_MULTIPLIER: f64 = 2.0;
    /// Twelve hours.
    pub const DEFAULT_MAX: Duration = Duration::from_secs(43_200);

    /// Creates a handler with the default timeouts.
    pub fn new(queue: MemoryQueue) -> Self {
        Self {
            queue,
            initial: Self::DEFAULT_INITIAL,
            multiplier: Self::DEFAULT_MULTIPLIER,
            max: Self::DEFAULT_MAX,
            _payload: PhantomData,
        }
    }

    /// Creates a handler with custom timeouts.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `initial` is zero, `multiplier` is below one or not finite,
    /// or `max` is below `initial`.
    ///
    pub fn with_backoff(
        queue: MemoryQueue,
        initial: Duration,
        multiplier: f64,
        max: Duration,
    ) -> Result<Self, Error> {
        if initial.is_zero() {
            return Err(Error::Config(
                "initial visibility timeout must be greater than zero".to_owned(),
            ));
        }
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::Config(format!(
                "visibility multiplier must be at least 1, got {}",
                multiplier
            )));
        }
        if max < initial {
            return Err(Error::Config(
                "max visibility timeout must not be lower than the initial one".to_owned(),
            ));
        }
        Ok(Self {
            queue,
            initial,
            multiplier,
            max,
            _payload: PhantomData,
        })
    }

    /// Visibility timeout applied after the `receive_count`-th delivery fails.
    pub fn visibility_timeout(&self, receive_count: u32) -> Duration {
        let exponent = receive_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[async_trait]
impl<T> AsyncErrorHandler<T> for VisibilityBackoffErrorHandler<T>
where
    T: Send + Sync + 'static,
{
    async fn handle_error(
        &self,
        message: &Message<T>,
        error: &Error,
    ) -> Result<(), Error> {
        let Some(receipt_handle) = message.header(headers::RECEIPT_HANDLE) else {
            warn!(
                "Message {} has no receipt handle, visibility not changed",
                message.id()
            );
            return Ok(());
        };
        let receive_count = message
            .header(headers::RECEIVE_COUNT)
            .and_then(|count| count.parse::<u32>().ok())
            .unwrap_or(1);
        let timeout = self.visibility_timeout(receive_count);
        debug!(
            "Message {} failed ({}), visible again in {:?}",
            message.id(),
            error,
            timeout
        );
        self.queue
            .change_visibility(receipt_handle, timeout)
            .map_err(|e| Error::ErrorHandler(e.to_string()))
    }
}
