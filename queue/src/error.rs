// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Queue errors
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the in-memory queue.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// A payload could not be serialized.
    #[error("Can't encode message: {0}")]
    Encode(String),
    /// A message body could not be deserialized into the expected payload type.
    #[error("Can't decode message: {0}")]
    Decode(String),
    /// The receipt handle does not match a current delivery.
    #[error("Receipt handle {0} not found or expired.")]
    ReceiptNotFound(String),
    /// The queue state lock was poisoned.
    #[error("Can not lock queue: {0}")]
    Lock(String),
}
