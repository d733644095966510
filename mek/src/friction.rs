//! Friction gate.
//!
//! Mandatory wait before execution, derived from consequence level and
//! declared confidence. The duration is computed, never stored, and the
//! wait runs on the calling thread against a monotonic clock. There is no
//! bypass, no emergency mode and no interruption: the only interruption
//! API is a trap.

use std::thread;
use std::time::{Duration, Instant};

use crate::negative::{
    block_adaptive_thresholds, block_urgency_shortcut, ProhibitedBehaviorError,
};
use crate::types::ConsequenceLevel;

/// The friction table. Base seconds by consequence, plus a low-confidence
/// surcharge.
pub fn friction_duration(level: ConsequenceLevel, confidence: f64) -> Duration {
    let base: u64 = match level {
        ConsequenceLevel::Low => 0,
        ConsequenceLevel::Medium => 3,
        ConsequenceLevel::High => 10,
    };
    let surcharge: u64 = if confidence < 0.3 {
        5
    } else if confidence < 0.6 {
        2
    } else {
        0
    };
    Duration::from_secs(base + surcharge)
}

/// One friction window. Starts timing at construction so work done between
/// construction and [`wait`](Self::wait) counts against the window.
#[derive(Debug)]
pub struct FrictionWindow {
    duration: Duration,
    started: Instant,
}

impl FrictionWindow {
    pub fn new(level: ConsequenceLevel, confidence: f64) -> Self {
        Self {
            duration: friction_duration(level, confidence),
            started: Instant::now(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Block the calling thread for the remainder of the window.
    pub fn wait(self) {
        let elapsed = self.started.elapsed();
        if elapsed < self.duration {
            thread::sleep(self.duration - elapsed);
        }
    }

    /// Interrupting friction is an urgency shortcut and structurally
    /// impossible.
    pub fn interrupt(&self) -> Result<(), ProhibitedBehaviorError> {
        Err(block_urgency_shortcut("friction window interruption"))
    }
}

/// The friction table is immutable; tuning it from observed usage is a
/// prohibited behavior.
pub fn tune_friction_table(operation: &str) -> Result<(), ProhibitedBehaviorError> {
    Err(block_adaptive_thresholds(operation))
}
