//! Debounce state machines for turning noisy per-tick detections into
//! discrete business events.
//!
//! Three machine shapes recur across the agents:
//!
//! - [`SpanDebouncer`]: confirm a condition after it has held for a timeout,
//!   close the span when the condition clears (cashier absence, staff work
//!   sessions: same machine, opposite polarity).
//! - [`CompositeDebouncer`]: debounced appearance and departure around a
//!   secondary "was anyone serving them" check (client wait).
//! - [`StreakCounter`]: consecutive-hit counter that fires a side effect
//!   once per full streak (PPE violations, scale overload).
//!
//! All timers compare monotonic readings; wall-clock timestamps are carried
//! through untouched and appear only in the emitted spans.

pub mod composite;
pub mod span;
pub mod streak;

pub use composite::{CompositeConfig, CompositeDebouncer};
pub use span::{MeasureUnit, Polarity, SpanConfig, SpanDebouncer};
pub use streak::StreakCounter;

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A closed debounced span, ready to be wrapped into an event.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedSpan {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub measure: i64,
}

/// Arm-once hold timer over monotonic readings.
///
/// The primitive under every duration-based debounce: arming an already
/// armed timer keeps the original deadline, so a flickering signal cannot
/// push the confirmation point forward.
#[derive(Debug, Clone)]
pub struct HoldTimer {
    hold: Duration,
    armed_at: Option<Duration>,
}

impl HoldTimer {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            armed_at: None,
        }
    }

    /// Start the timer at `now` unless it is already running.
    pub fn arm(&mut self, now: Duration) {
        if self.armed_at.is_none() {
            self.armed_at = Some(now);
        }
    }

    pub fn clear(&mut self) {
        self.armed_at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    /// True once the full hold has elapsed since arming.
    pub fn expired(&self, now: Duration) -> bool {
        match self.armed_at {
            Some(at) => now.saturating_sub(at) >= self.hold,
            None => false,
        }
    }
}
