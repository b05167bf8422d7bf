//! Deadline-based timer for the cooperative loop
//!
//! A ticker never sleeps. It records when it is next due and the loop asks
//! whether that instant has passed.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Ticker {
    period: Duration,
    next_due: Option<Instant>,
}

impl Ticker {
    /// A disarmed ticker with the given default period
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_due: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_some_and(|due| now >= due)
    }

    pub fn fire_at(&mut self, at: Instant) {
        self.next_due = Some(at);
    }

    pub fn schedule_after(&mut self, now: Instant, delay: Duration) {
        self.next_due = Some(now + delay);
    }

    /// Re-arm one default period after `now`
    pub fn rearm(&mut self, now: Instant) {
        self.schedule_after(now, self.period);
    }

    pub fn disarm(&mut self) {
        self.next_due = None;
    }
}
