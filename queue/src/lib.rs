// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! In-memory queue module.
//!
//! A queue with visibility-timeout delivery semantics and the collaborators that plug it into
//! a listener container: a producer, an acknowledgement deleting the message, and an error
//! handler backing off redelivery.
//!

pub mod error;
pub mod error_handler;
pub mod memory;
pub mod producer;

pub use error::Error;
pub use error_handler::VisibilityBackoffErrorHandler;
pub use memory::{MemoryQueue, ReceivedMessage};
pub use producer::{QueueAcknowledgement, QueueProducer};
