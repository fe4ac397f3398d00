//! Variant A: absence/timeout span debouncing.
//!
//! Tracks one condition derived from the presence signal. The condition
//! must hold for `confirm_after` before the span is confirmed; the span
//! closes the moment the condition clears. Cashier absence tracks "nobody
//! in the zone"; a staff work session is the same machine with polarity
//! flipped so that presence, not absence, produces the span.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::{ClosedSpan, HoldTimer};

/// Which side of the presence signal the machine debounces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// The tracked condition is "signal absent" (cashier left the till).
    OnAbsent,
    /// The tracked condition is "signal present" (staff working).
    OnPresent,
}

impl Polarity {
    fn condition(self, present: bool) -> bool {
        match self {
            Polarity::OnAbsent => !present,
            Polarity::OnPresent => present,
        }
    }
}

/// Unit the span measure is reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureUnit {
    /// Floor-divided whole minutes (absence, wait).
    Minutes,
    /// Whole seconds (work sessions).
    Seconds,
}

impl MeasureUnit {
    fn measure(self, elapsed: Duration) -> i64 {
        match self {
            MeasureUnit::Minutes => (elapsed.as_secs() / 60) as i64,
            MeasureUnit::Seconds => elapsed.as_secs() as i64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpanConfig {
    /// How long the condition must hold before the span is confirmed.
    pub confirm_after: Duration,
    pub polarity: Polarity,
    pub unit: MeasureUnit,
    /// Spans measuring below this are silently dropped (policy: sub-minute
    /// absences are not reportable).
    pub min_measure: i64,
}

#[derive(Debug, Clone)]
enum Phase {
    /// Condition inactive.
    Idle,
    /// Condition active, hold timer running, not yet confirmed.
    Pending,
    /// Condition confirmed; the span is open.
    Confirmed {
        since_mono: Duration,
        since_wall: DateTime<Utc>,
    },
}

/// The Variant A state machine. One instance per camera zone per session.
#[derive(Debug)]
pub struct SpanDebouncer {
    cfg: SpanConfig,
    hold: HoldTimer,
    phase: Phase,
}

impl SpanDebouncer {
    pub fn new(cfg: SpanConfig) -> Self {
        let hold = HoldTimer::new(cfg.confirm_after);
        Self {
            cfg,
            hold,
            phase: Phase::Idle,
        }
    }

    /// Feed one tick. Emits at most one closed span.
    pub fn observe(
        &mut self,
        present: bool,
        mono: Duration,
        wall: DateTime<Utc>,
    ) -> Option<ClosedSpan> {
        let active = self.cfg.polarity.condition(present);
        match self.phase {
            Phase::Idle => {
                if active {
                    self.hold.arm(mono);
                    self.phase = Phase::Pending;
                }
                None
            }
            Phase::Pending => {
                if active {
                    if self.hold.expired(mono) {
                        self.hold.clear();
                        // The span starts at the confirmation instant, not
                        // at the first flickering observation.
                        self.phase = Phase::Confirmed {
                            since_mono: mono,
                            since_wall: wall,
                        };
                    }
                    None
                } else {
                    self.hold.clear();
                    self.phase = Phase::Idle;
                    None
                }
            }
            Phase::Confirmed {
                since_mono,
                since_wall,
            } => {
                if active {
                    None
                } else {
                    let closed = self.close(since_mono, since_wall, mono, wall);
                    self.phase = Phase::Idle;
                    closed
                }
            }
        }
    }

    /// Close an open span at session end (window close, stream failure,
    /// operator stop). A confirmed span must never be silently dropped.
    pub fn force_close(&mut self, mono: Duration, wall: DateTime<Utc>) -> Option<ClosedSpan> {
        let closed = match self.phase {
            Phase::Confirmed {
                since_mono,
                since_wall,
            } => self.close(since_mono, since_wall, mono, wall),
            _ => None,
        };
        self.hold.clear();
        self.phase = Phase::Idle;
        closed
    }

    /// Whether a span is currently confirmed open.
    pub fn is_confirmed(&self) -> bool {
        matches!(self.phase, Phase::Confirmed { .. })
    }

    fn close(
        &self,
        since_mono: Duration,
        since_wall: DateTime<Utc>,
        now_mono: Duration,
        now_wall: DateTime<Utc>,
    ) -> Option<ClosedSpan> {
        let elapsed = now_mono.saturating_sub(since_mono);
        let measure = self.cfg.unit.measure(elapsed);
        if measure >= self.cfg.min_measure {
            Some(ClosedSpan {
                started_at: since_wall,
                ended_at: now_wall,
                measure,
            })
        } else {
            None
        }
    }
}
