//! Required/optional write policy.
//!
//! BLE writes fail under flow-control pressure, and a high-rate source (a
//! slider being dragged) can flood the link. Required payloads are kept in
//! submission order and retried one at a time until they go through.
//! Optional payloads are best effort: they are dropped if the link refuses
//! them or if anything is already backed up.
//!
//! This type holds no timer and performs no I/O itself; the caller supplies
//! the connection state and a write function, and arms its own timer
//! whenever [`WriteDisposition::Queued`] or [`TickOutcome::needs_retry`]
//! says so.

use std::collections::VecDeque;
use tracing::{debug, trace};

/// What happened to a submitted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    /// Written straight through.
    Sent,
    /// Appended to the backlog; a retry tick is needed.
    Queued,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotConnected,
    /// Optional payload while required ones are waiting.
    Backlog,
    /// Optional payload refused by the link.
    WriteFailed,
}

/// Result of one retry tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    pub delivered: bool,
    /// Items discarded because the link was no longer connected.
    pub cleared: usize,
    pub remaining: usize,
}

impl TickOutcome {
    pub fn needs_retry(&self) -> bool {
        self.remaining > 0
    }
}

#[derive(Debug, Default)]
pub struct WriteQueue {
    pending: VecDeque<Vec<u8>>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a payload for delivery.
    pub fn submit<F>(
        &mut self,
        payload: Vec<u8>,
        required: bool,
        connected: bool,
        mut write: F,
    ) -> WriteDisposition
    where
        F: FnMut(&[u8]) -> bool,
    {
        if !connected {
            trace!("Write ignored while not connected ({} bytes)", payload.len());
            return WriteDisposition::Dropped(DropReason::NotConnected);
        }

        if !self.pending.is_empty() {
            if !required {
                debug!("Optional write ignored behind backlog: {}", preview(&payload));
                return WriteDisposition::Dropped(DropReason::Backlog);
            }
            debug!("Required write queued: {}", preview(&payload));
            self.pending.push_back(payload);
            return WriteDisposition::Queued;
        }

        if write(&payload) {
            trace!("Write succeeded: {}", preview(&payload));
            WriteDisposition::Sent
        } else if required {
            debug!("Required write failed, queued: {}", preview(&payload));
            self.pending.push_back(payload);
            WriteDisposition::Queued
        } else {
            debug!("Optional write failed, not queued: {}", preview(&payload));
            WriteDisposition::Dropped(DropReason::WriteFailed)
        }
    }

    /// Retry the front item. Only the front is ever attempted.
    pub fn tick<F>(&mut self, connected: bool, mut write: F) -> TickOutcome
    where
        F: FnMut(&[u8]) -> bool,
    {
        if self.pending.is_empty() {
            return TickOutcome::default();
        }

        if !connected {
            let cleared = self.clear();
            debug!("Link not connected, abandoned {} queued writes", cleared);
            return TickOutcome {
                cleared,
                ..TickOutcome::default()
            };
        }

        let mut delivered = false;
        if let Some(front) = self.pending.front() {
            if write(front) {
                debug!("Queued write succeeded: {}", preview(front));
                self.pending.pop_front();
                delivered = true;
            } else {
                debug!("Queued write failed, will retry: {}", preview(front));
            }
        }

        TickOutcome {
            delivered,
            cleared: 0,
            remaining: self.pending.len(),
        }
    }

    /// Drop every pending payload, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending payloads, front first.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.pending.iter().map(Vec::as_slice)
    }
}

fn preview(payload: &[u8]) -> String {
    format!("{:?}", String::from_utf8_lossy(payload))
}
