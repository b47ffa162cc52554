// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!
//! A single error type is shared by the container and every collaborator it drives. Listener
//! and interceptor failures are the values handed to the error and acknowledgement handlers,
//! so the type is cheap to clone and carries its context as plain strings.
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the listener container.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Invalid container or handler configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// A producer could not yield a batch of messages.
    #[error("Error producing messages: {0}")]
    Produce(String),
    /// The message listener failed to process a message.
    #[error("Listener failed: {0}")]
    Listener(String),
    /// An interceptor rejected or failed on a message.
    #[error("Interceptor failed: {0}")]
    Interceptor(String),
    /// The error handler itself failed.
    #[error("Error handler failed: {0}")]
    ErrorHandler(String),
    /// Acknowledging a message failed.
    #[error("Acknowledgement failed: {0}")]
    Ack(String),
    /// The task executor rejected or lost a task.
    #[error("Task executor error: {0}")]
    Executor(String),
    /// The container could not be started.
    #[error("An error occurred while starting the container: {0}")]
    Start(String),
    /// The container could not be stopped cleanly.
    #[error("An error occurred while stopping the container: {0}")]
    Stop(String),
    /// A container with the same id is already registered.
    #[error("Container {0} exists.")]
    Exists(String),
    /// A lifecycle lock was poisoned.
    #[error("Can not lock {0}")]
    Lock(String),
    /// Error that does not compromise the operation of the container.
    #[error("Error: {0}")]
    Functional(String),
}
