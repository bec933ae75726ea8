//! Poll state machine
//!
//! A [`Poller`] hands out checks at a fixed interval until its deadline
//! passes or its token is cancelled. Time comes from `tokio::time`, so a
//! paused runtime drives it deterministically.

use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Outcome of waiting for the next check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTick {
    /// Time to look at the cluster again
    Check,
    /// The budget is spent
    Expired,
    /// The owner was stopped
    Cancelled,
}

/// Interval-driven poll loop with a deadline
#[derive(Debug)]
pub struct Poller {
    interval: Duration,
    deadline: Instant,
    next_check: Instant,
    cancel: CancellationToken,
}

impl Poller {
    /// Start polling now; the first check is immediate
    #[must_use]
    pub fn new(interval: Duration, budget: Duration, cancel: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            interval,
            deadline: now + budget,
            next_check: now,
            cancel,
        }
    }

    /// Shrink the remaining budget to zero
    pub fn expire_now(&mut self) {
        self.deadline = Instant::now();
    }

    /// When the budget runs out
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Wait for the next scheduled check
    pub async fn tick(&mut self) -> PollTick {
        if self.cancel.is_cancelled() {
            return PollTick::Cancelled;
        }
        if Instant::now() >= self.deadline {
            return PollTick::Expired;
        }

        let wake = self.next_check.min(self.deadline);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return PollTick::Cancelled,
            _ = sleep_until(wake) => {}
        }

        if wake >= self.deadline {
            return PollTick::Expired;
        }
        self.next_check = wake + self.interval;
        PollTick::Check
    }
}

#[cfg(test)]
mod tests;
