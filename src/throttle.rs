//! Alert cool-down.
//!
//! Sustained motion at close range would otherwise produce an alert on every frame. The
//! throttler approves at most one alert per cool-down interval.

use std::time::{Duration, SystemTime};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleState {
    /// No alert within the cool-down interval.
    Idle,
    /// An alert fired at `since`; further alerts are suppressed.
    Cooling { since: SystemTime },
}

#[derive(Clone, Debug)]
pub struct AlertThrottler {
    interval: Duration,
    last_alert_at: Option<SystemTime>,
}

impl AlertThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_alert_at: None,
        }
    }

    pub fn last_alert_at(&self) -> Option<SystemTime> {
        self.last_alert_at
    }

    pub fn state(&self, now: SystemTime) -> ThrottleState {
        match self.last_alert_at {
            None => ThrottleState::Idle,
            Some(last) => {
                // A clock stepping backwards counts as no elapsed time.
                let elapsed = now.duration_since(last).unwrap_or(Duration::ZERO);
                if elapsed > self.interval {
                    ThrottleState::Idle
                } else {
                    ThrottleState::Cooling { since: last }
                }
            }
        }
    }

    /// Approve an alert when idle and a candidate is present. Approval starts a new cool-down.
    pub fn try_fire(&mut self, now: SystemTime, candidate_present: bool) -> bool {
        if !candidate_present {
            return false;
        }
        match self.state(now) {
            ThrottleState::Cooling { .. } => false,
            ThrottleState::Idle => {
                if self.last_alert_at.is_some_and(|last| now <= last) {
                    return false;
                }
                self.last_alert_at = Some(now);
                true
            }
        }
    }
}
