//! Debounce and depth-one queueing for filesystem change batches.
//!
//! Events merge into one pending [`ChangeSet`]. The batch becomes ready once
//! no new event arrived for the quiet period. While a run is in flight the
//! batch keeps absorbing events but is never released, so at most one run
//! is ever waiting behind the current one.

use std::time::Duration;

use lectern_changes::ChangeSet;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Batcher {
    quiet: Duration,
    pending: Option<ChangeSet>,
    deadline: Option<Instant>,
    running: bool,
}

impl Batcher {
    pub fn new(quiet: Duration) -> Self {
        Batcher {
            quiet,
            pending: None,
            deadline: None,
            running: false,
        }
    }

    /// Merge `changes` and restart the quiet period.
    pub fn push(&mut self, changes: ChangeSet, now: Instant) {
        if self.absorb(changes) {
            self.deadline = Some(now + self.quiet);
        }
    }

    /// Merge `changes` and make the batch ready without waiting.
    pub fn push_now(&mut self, changes: ChangeSet, now: Instant) {
        if self.absorb(changes) {
            self.deadline = Some(now);
        }
    }

    /// Merge `changes` and hold the batch for `delay`; a later event
    /// shortens that back to the quiet period.
    pub fn push_after(&mut self, changes: ChangeSet, now: Instant, delay: Duration) {
        if self.absorb(changes) {
            self.deadline = Some(now + delay);
        }
    }

    /// Drop the remaining quiet period of the pending batch.
    pub fn flush(&mut self, now: Instant) {
        if self.pending.is_some() {
            self.deadline = Some(now);
        }
    }

    fn absorb(&mut self, changes: ChangeSet) -> bool {
        if changes.is_empty() {
            return false;
        }
        match &mut self.pending {
            Some(pending) => pending.merge(changes),
            None => self.pending = Some(changes),
        }
        true
    }

    /// When the pending batch may start; `None` while a run is in flight.
    pub fn deadline(&self) -> Option<Instant> {
        if self.running {
            None
        } else {
            self.deadline
        }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|d| d <= now)
    }

    /// Hand out the pending batch and mark a run in flight.
    pub fn start(&mut self) -> Option<ChangeSet> {
        if self.running {
            return None;
        }
        let batch = self.pending.take()?;
        self.deadline = None;
        self.running = true;
        Some(batch)
    }

    pub fn finish(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
