//! Matchmaking waiting queue.
//!
//! Strict FIFO: the seeker waiting longest is matched first when a helper
//! frees up. The queue holds at most one entry per seeker identity; a repeat
//! request refreshes the metadata without losing the original position.
//!
//! The queue itself never picks helpers — the gateway combines a pop here
//! with a claim on the helper registry inside one actor turn, which is what
//! makes the match-and-flip atomic.

use crate::errors::RelayError;
use crate::events::SeekerMeta;

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// One waiting seeker.
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    pub identity: String,
    pub meta: SeekerMeta,
    pub enqueued_at: DateTime<Utc>,
}

/// FIFO waiting queue with a capacity bound.
#[derive(Debug)]
pub struct Matchmaker {
    queue: VecDeque<WaitingEntry>,
    capacity: usize,
}

impl Matchmaker {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
        }
    }

    /// Append a seeker at the tail.
    ///
    /// Re-requesting while queued keeps the original position and refreshes
    /// the metadata. Errors with [`RelayError::QueueFull`] at capacity.
    pub fn enqueue(&mut self, identity: &str, meta: SeekerMeta) -> Result<(), RelayError> {
        if let Some(entry) = self.queue.iter_mut().find(|e| e.identity == identity) {
            entry.meta = meta;
            return Ok(());
        }
        if self.queue.len() >= self.capacity {
            return Err(RelayError::QueueFull);
        }
        self.queue.push_back(WaitingEntry {
            identity: identity.to_string(),
            meta,
            enqueued_at: Utc::now(),
        });
        Ok(())
    }

    /// Pop the longest-waiting seeker.
    pub fn pop_front(&mut self) -> Option<WaitingEntry> {
        self.queue.pop_front()
    }

    /// Put an entry back at the head (double-booking rollback: re-queue at
    /// the front, never the tail, to avoid starving the rolled-back seeker).
    pub fn requeue_front(&mut self, entry: WaitingEntry) {
        self.queue.push_front(entry);
    }

    /// Remove a seeker wherever it sits (cancel or disconnect). No-op if not
    /// waiting; returns whether an entry was removed.
    pub fn remove(&mut self, identity: &str) -> bool {
        let before = self.queue.len();
        self.queue.retain(|e| e.identity != identity);
        self.queue.len() != before
    }

    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.queue.iter().any(|e| e.identity == identity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
