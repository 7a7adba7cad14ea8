//! Update buffering and throttling.
//!
//! Envelopes accumulate until either `batch_size` of them are pending or the
//! throttle timer fires. Two flushes are never closer than `update_interval`;
//! a flush that comes due too early is pushed back to exactly
//! `last_flush + update_interval`.
//!
//! The buffer owns no timers. It reports the instant it next wants to be
//! polled through [`UpdateBuffer::deadline`] and the caller sleeps until then.

use crate::config::EngineConfig;
use crate::protocol::Envelope;
use livestate_types::{Schema, Timestamp};
use std::time::Duration;

#[derive(Debug)]
pub struct UpdateBuffer<S: Schema> {
    pending: Vec<Envelope<S>>,
    batch_size: usize,
    throttle: bool,
    throttle_interval: Duration,
    update_interval: Duration,
    last_flush: Option<Timestamp>,
    deadline: Option<Timestamp>,
}

impl<S: Schema> UpdateBuffer<S> {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            pending: Vec::with_capacity(config.batch_size),
            batch_size: config.batch_size.max(1),
            throttle: config.throttle_updates,
            throttle_interval: config.throttle_interval,
            update_interval: config.update_interval,
            last_flush: None,
            deadline: None,
        }
    }

    /// Buffers an envelope. Returns the envelopes to commit if a flush is
    /// due right now.
    pub fn enqueue(&mut self, envelope: Envelope<S>, now: Timestamp) -> Option<Vec<Envelope<S>>> {
        if !self.throttle {
            self.last_flush = Some(now);
            return Some(vec![envelope]);
        }

        self.pending.push(envelope);
        if self.pending.len() >= self.batch_size {
            return self.try_flush(now);
        }
        if self.deadline.is_none() {
            self.deadline = Some(now + self.throttle_interval);
        }
        None
    }

    /// Flushes if the armed deadline has passed.
    pub fn poll(&mut self, now: Timestamp) -> Option<Vec<Envelope<S>>> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.try_flush(now),
            _ => None,
        }
    }

    /// When the buffer next wants to be polled.
    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    /// Drops everything pending and disarms the timer. Returns how many
    /// envelopes were discarded.
    pub fn clear(&mut self) -> usize {
        self.deadline = None;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn last_flush(&self) -> Option<Timestamp> {
        self.last_flush
    }

    fn try_flush(&mut self, now: Timestamp) -> Option<Vec<Envelope<S>>> {
        if self.pending.is_empty() {
            self.deadline = None;
            return None;
        }
        if let Some(last) = self.last_flush {
            let earliest = last + self.update_interval;
            if now < earliest {
                self.deadline = Some(earliest);
                return None;
            }
        }
        self.deadline = None;
        self.last_flush = Some(now);
        Some(std::mem::take(&mut self.pending))
    }
}
