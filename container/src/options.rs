// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Container options
//!
//! Tuning knobs for a listener container. Options are validated once when they are built and
//! are never mutated afterwards; changing them requires building a new container.
//!

use crate::Error;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};

use std::time::Duration;

const DEFAULT_SIMULTANEOUS_PRODUCE_CALLS: usize = 2;
const DEFAULT_MESSAGES_PER_PRODUCE: usize = 10;
const DEFAULT_PRODUCE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LISTENER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_BACK_OFF_INITIAL_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_BACK_OFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_BACK_OFF_MAX_INTERVAL: Duration = Duration::from_millis(10000);

/// What happens to a message once the listener has finished with it, when no acknowledgement
/// handler is set explicitly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcknowledgementMode {
    /// Acknowledge only messages the listener processed successfully.
    #[default]
    OnSuccess,
    /// Acknowledge every message, whatever the outcome.
    Always,
    /// Never acknowledge; the listener acknowledges messages itself.
    Manual,
}

/// Exponential back-off applied between polls of a producer that keeps failing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackOffOptions {
    /// First wait after a failure.
    pub initial_interval: Duration,
    /// Growth factor between consecutive waits.
    pub multiplier: f64,
    /// Upper bound for a single wait.
    pub max_interval: Duration,
}

impl Default for BackOffOptions {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_BACK_OFF_INITIAL_INTERVAL,
            multiplier: DEFAULT_BACK_OFF_MULTIPLIER,
            max_interval: DEFAULT_BACK_OFF_MAX_INTERVAL,
        }
    }
}

impl BackOffOptions {
    /// Builds a fresh back-off that never gives up and has no jitter.
    pub fn to_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_multiplier(self.multiplier)
            .with_max_interval(self.max_interval)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Immutable container configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    simultaneous_produce_calls: usize,
    messages_per_produce: usize,
    produce_timeout: Duration,
    acknowledgement_mode: AcknowledgementMode,
    auto_startup: bool,
    poll_back_off: BackOffOptions,
    listener_shutdown_timeout: Duration,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            simultaneous_produce_calls: DEFAULT_SIMULTANEOUS_PRODUCE_CALLS,
            messages_per_produce: DEFAULT_MESSAGES_PER_PRODUCE,
            produce_timeout: DEFAULT_PRODUCE_TIMEOUT,
            acknowledgement_mode: AcknowledgementMode::default(),
            auto_startup: true,
            poll_back_off: BackOffOptions::default(),
            listener_shutdown_timeout: DEFAULT_LISTENER_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ContainerOptions {
    /// Starts a builder from the defaults.
    pub fn builder() -> ContainerOptionsBuilder {
        ContainerOptionsBuilder {
            options: ContainerOptions::default(),
        }
    }

    /// Maximum number of produce calls in flight at once.
    pub fn simultaneous_produce_calls(&self) -> usize {
        self.simultaneous_produce_calls
    }

    /// Upper bound on the batch size requested per produce call.
    pub fn messages_per_produce(&self) -> usize {
        self.messages_per_produce
    }

    /// Time a producer may take to answer; passed through to the producer.
    pub fn produce_timeout(&self) -> Duration {
        self.produce_timeout
    }

    pub fn acknowledgement_mode(&self) -> AcknowledgementMode {
        self.acknowledgement_mode
    }

    pub fn auto_startup(&self) -> bool {
        self.auto_startup
    }

    pub fn poll_back_off(&self) -> &BackOffOptions {
        &self.poll_back_off
    }

    pub fn listener_shutdown_timeout(&self) -> Duration {
        self.listener_shutdown_timeout
    }

    /// Checks the invariants the container relies on.
    ///
    /// Options coming from deserialization bypass the builder, so the container validates
    /// again when it is built.
    pub fn validate(&self) -> Result<(), Error> {
        if self.simultaneous_produce_calls == 0 {
            return Err(Error::Config(
                "simultaneous_produce_calls must be greater than zero".to_owned(),
            ));
        }
        // Draining acquires the whole pool in a single call, which takes a u32.
        let max_permits = tokio::sync::Semaphore::MAX_PERMITS.min(u32::MAX as usize);
        if self.simultaneous_produce_calls > max_permits {
            return Err(Error::Config(format!(
                "simultaneous_produce_calls must not exceed {}",
                max_permits
            )));
        }
        if self.messages_per_produce == 0 {
            return Err(Error::Config(
                "messages_per_produce must be greater than zero".to_owned(),
            ));
        }
        if self.produce_timeout.is_zero() {
            return Err(Error::Config(
                "produce_timeout must be greater than zero".to_owned(),
            ));
        }
        if self.poll_back_off.multiplier < 1.0 {
            return Err(Error::Config(format!(
                "poll back-off multiplier {} should be greater than or equal to 1",
                self.poll_back_off.multiplier
            )));
        }
        Ok(())
    }
}

/// Fluent builder for [`ContainerOptions`].
#[derive(Clone, Debug)]
pub struct ContainerOptionsBuilder {
    options: ContainerOptions,
}

impl ContainerOptionsBuilder {
    pub fn simultaneous_produce_calls(mut self, value: usize) -> Self {
        self.options.simultaneous_produce_calls = value;
        self
    }

    pub fn messages_per_produce(mut self, value: usize) -> Self {
        self.options.messages_per_produce = value;
        self
    }

    pub fn produce_timeout(mut self, value: Duration) -> Self {
        self.options.produce_timeout = value;
        self
    }

    pub fn acknowledgement_mode(mut self, value: AcknowledgementMode) -> Self {
        self.options.acknowledgement_mode = value;
        self
    }

    pub fn auto_startup(mut self, value: bool) -> Self {
        self.options.auto_startup = value;
        self
    }

    pub fn poll_back_off(mut self, value: BackOffOptions) -> Self {
        self.options.poll_back_off = value;
        self
    }

    pub fn listener_shutdown_timeout(mut self, value: Duration) -> Self {
        self.options.listener_shutdown_timeout = value;
        self
    }

    /// Validates and returns the options.
    pub fn build(self) -> Result<ContainerOptions, Error> {
        self.options.validate()?;
        Ok(self.options)
    }
}
