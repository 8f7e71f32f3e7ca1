//! Deadline-based scheduling primitives.
//!
//! Neither primitive owns a timer. Each one records the instant at which it
//! wants to run; the session task sleeps until the earliest deadline and
//! then polls them. That keeps every state transition on the session task
//! and lets tests drive the primitives with explicit instants.
//!
//! - [`Debounce`]: trailing edge. Every trigger pushes the deadline out, so a
//!   burst of triggers runs once, `delay` after the last one.
//! - [`Throttle`]: leading and trailing edge. A call outside the window runs
//!   immediately; calls inside the window collapse into a single run at the
//!   end of the window and never extend it.

use tokio::time::{Duration, Instant};

/// Trailing-edge debounce.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Arm (or re-arm) the debounce relative to `now`.
    pub fn trigger(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Returns true exactly once when the deadline has passed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Outcome of calling a [`Throttle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Outside any window: run now.
    RunNow,
    /// Inside the window: a single run is scheduled at this instant.
    Deferred(Instant),
}

/// Leading/trailing-edge throttle.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_run: Option<Instant>,
    pending: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
            pending: None,
        }
    }

    pub fn call(&mut self, now: Instant) -> ThrottleDecision {
        if let Some(at) = self.pending {
            return ThrottleDecision::Deferred(at);
        }

        match self.last_run {
            Some(last) if now < last + self.interval => {
                let at = last + self.interval;
                self.pending = Some(at);
                ThrottleDecision::Deferred(at)
            }
            _ => {
                self.last_run = Some(now);
                ThrottleDecision::RunNow
            }
        }
    }

    /// Deadline of the scheduled trailing run, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending
    }

    /// Returns true exactly once when the trailing run is due.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(at) if now >= at => {
                self.pending = None;
                self.last_run = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
