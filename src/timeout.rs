//! Cooperative timeout tracking
//!
//! Every potentially blocking operation is budgeted by two independent knobs:
//! a **total** timeout, the wall-clock deadline for the whole logical
//! operation, and a **block** timeout, the longest a single low-level wait
//! may take. `None` means no limit; `Some(Duration::ZERO)` means
//! non-blocking, so the next wait reports a would-block timeout immediately.
//!
//! The tracker itself never sleeps. The readiness wait in [`crate::sys`]
//! asks it for the next wait quantum and for the give-up decision after a
//! quantum expires.

use std::time::{Duration, Instant};

/// Which timeout knob an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Budget for one low-level wait.
    Block,
    /// Deadline for the whole operation, measured from the last
    /// [`Timeout::mark_start`].
    Total,
}

/// Elapsed/remaining time tracker for one TCP entity.
#[derive(Debug, Clone)]
pub struct Timeout {
    block: Option<Duration>,
    total: Option<Duration>,
    start: Instant,
}

impl Timeout {
    /// New tracker with no limits configured.
    pub fn new() -> Timeout {
        Timeout {
            block: None,
            total: None,
            start: Instant::now(),
        }
    }

    pub fn set(&mut self, kind: TimeoutKind, value: Option<Duration>) {
        match kind {
            TimeoutKind::Block => self.block = value,
            TimeoutKind::Total => self.total = value,
        }
    }

    pub fn get(&self, kind: TimeoutKind) -> Option<Duration> {
        match kind {
            TimeoutKind::Block => self.block,
            TimeoutKind::Total => self.total,
        }
    }

    /// Reset the elapsed-time origin for the total budget. Called once at the
    /// start of each logical operation; the block budget is unaffected.
    pub fn mark_start(&mut self) {
        self.start = Instant::now();
    }

    /// Remaining per-wait budget. Not decremented by elapsed time; each wait
    /// gets a full quantum.
    pub fn remaining_block(&self) -> Option<Duration> {
        self.block
    }

    /// Remaining total budget since the last `mark_start`, saturating at
    /// zero. `None` when no total timeout is configured.
    pub fn remaining_total(&self) -> Option<Duration> {
        self.total.map(|t| t.saturating_sub(self.start.elapsed()))
    }

    /// Budget for the next low-level wait: the minimum of the two remaining
    /// values. `None` means wait indefinitely.
    pub fn next_wait(&self) -> Option<Duration> {
        match (self.remaining_block(), self.remaining_total()) {
            (Some(b), Some(t)) => Some(b.min(t)),
            (Some(b), None) => Some(b),
            (None, Some(t)) => Some(t),
            (None, None) => None,
        }
    }

    /// Give-up decision after a wait quantum expired without readiness.
    ///
    /// A spent total budget always ends the operation. With no total
    /// configured, a block timeout bounds the whole operation, so one expired
    /// quantum ends it too. Otherwise the quantum was only a slice of a live
    /// total budget and the wait is retried.
    pub(crate) fn wait_expired(&self) -> bool {
        if let Some(remaining) = self.remaining_total() {
            if remaining.is_zero() {
                return true;
            }
        }
        match self.block {
            Some(b) => b.is_zero() || self.total.is_none(),
            None => false,
        }
    }
}

impl Default for Timeout {
    fn default() -> Timeout {
        Timeout::new()
    }
}
