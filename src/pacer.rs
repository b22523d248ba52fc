//! Frame pacing.
//!
//! The pacer caps how many frames per second reach the detector. It never holds frames back
//! or sleeps; frames arriving too soon after the last processed one are simply dropped.

use std::time::{Duration, SystemTime};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pacer {
    interval: Duration,
}

impl Pacer {
    /// Pacer for a target rate. A rate of 0 disables pacing.
    pub fn new(target_fps: u32) -> Self {
        Self {
            interval: frame_interval(target_fps),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True when a frame captured at `now` should be processed, given the capture time of the
    /// last processed frame. Elapsed time must strictly exceed the interval.
    pub fn should_process(&self, last_processed_at: Option<SystemTime>, now: SystemTime) -> bool {
        let Some(last) = last_processed_at else {
            return true;
        };
        if self.interval.is_zero() {
            return true;
        }
        let elapsed = now.duration_since(last).unwrap_or(Duration::ZERO);
        elapsed > self.interval
    }
}

pub fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(1.0 / target_fps as f64)
    }
}
