// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Memory queue implementation.
//!
//! Received messages stay in the queue but become invisible for a visibility timeout. Each
//! delivery gets a fresh receipt handle; only the receipt of the latest delivery can delete
//! the message or change its visibility.
//!

use crate::error::Error;

use serde::Serialize;
use tokio::{
    sync::Notify,
    time::{Instant, sleep_until},
};
use tracing::{debug, trace};

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

/// A message handed out by [`MemoryQueue::receive`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: u64,
    pub body: Vec<u8>,
    pub receipt_handle: String,
    pub receive_count: u32,
}

struct Entry {
    id: u64,
    body: Vec<u8>,
    receive_count: u32,
    visible_at: Instant,
    receipt: Option<String>,
}

/// Stands in for deadlines too far away to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    entries: VecDeque<Entry>,
}

/// A queue that keeps its messages in memory.
#[derive(Clone)]
pub struct MemoryQueue {
    name: String,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, Error> {
        self.state
            .lock()
            .map_err(|e| Error::Lock(format!("{}: {}", self.name, e)))
    }

    /// Serializes and enqueues a payload, returning the message id.
    pub fn send<T: Serialize>(&self, payload: &T) -> Result<u64, Error> {
        let body = bincode::serialize(payload).map_err(|e| Error::Encode(e.to_string()))?;
        let id = {
            let mut state = self.lock()?;
            state.next_id += 1;
            let id = state.next_id;
            state.entries.push_back(Entry {
                id,
                body,
                receive_count: 0,
                visible_at: Instant::now(),
                receipt: None,
            });
            id
        };
        trace!("Message {} sent to queue {}", id, self.name);
        self.notify.notify_waiters();
        Ok(id)
    }

    /// Receives up to `max` visible messages, waiting up to `wait` for at least one.
    ///
    /// Received messages are hidden for `visibility`.
    pub async fn receive(
        &self,
        max: usize,
        wait: Duration,
        visibility: Duration,
    ) -> Result<Vec<ReceivedMessage>, Error> {
        let deadline = deadline_after(Instant::now(), wait);
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (batch, next_visible) = self.try_receive(max, visibility)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if Instant::now() >= deadline {
                return Ok(batch);
            }
            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    fn try_receive(
        &self,
        max: usize,
        visibility: Duration,
    ) -> Result<(Vec<ReceivedMessage>, Option<Instant>), Error> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let mut batch = Vec::new();
        let mut next_visible: Option<Instant> = None;
        for entry in state.entries.iter_mut() {
            if entry.visible_at > now {
                next_visible = Some(
                    next_visible.map_or(entry.visible_at, |at| at.min(entry.visible_at)),
                );
                continue;
            }
            if batch.len() == max {
                break;
            }
            entry.receive_count += 1;
            entry.visible_at = deadline_after(now, visibility);
            let receipt = format!("{}-{}", entry.id, entry.receive_count);
            entry.receipt = Some(receipt.clone());
            batch.push(ReceivedMessage {
                message_id: entry.id,
                body: entry.body.clone(),
                receipt_handle: receipt,
                receive_count: entry.receive_count,
            });
        }
        if !batch.is_empty() {
            debug!("Received {} messages from queue {}", batch.len(), self.name);
        }
        Ok((batch, next_visible))
    }

    /// Deletes the message delivered with `receipt_handle`.
    pub fn delete(&self, receipt_handle: &str) -> Result<(), Error> {
        let mut state = self.lock()?;
        let position = state
            .entries
            .iter()
            .position(|entry| entry.receipt.as_deref() == Some(receipt_handle))
            .ok_or_else(|| Error::ReceiptNotFound(receipt_handle.to_owned()))?;
        state.entries.remove(position);
        trace!("Deleted {} from queue {}", receipt_handle, self.name);
        Ok(())
    }

    /// Makes the message delivered with `receipt_handle` visible again after `timeout`.
    pub fn change_visibility(
        &self,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), Error> {
        {
            let mut state = self.lock()?;
            let entry = state
                .entries
                .iter_mut()
                .find(|entry| entry.receipt.as_deref() == Some(receipt_handle))
                .ok_or_else(|| Error::ReceiptNotFound(receipt_handle.to_owned()))?;
            entry.visible_at = deadline_after(Instant::now(), timeout);
        }
        if timeout.is_zero() {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    /// Messages in the queue, visible or not.
    pub fn len(&self) -> usize {
        self.lock().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages currently hidden by a visibility timeout.
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|state| state.entries.iter().filter(|e| e.visible_at > now).count())
            .unwrap_or(0)
    }
}
