//! Variant B: two-stage appearance/departure debouncing with a secondary
//! neglect condition.
//!
//! Used by the client agent: a client must be visible for the appearance
//! hold before they count as present, and invisible for the departure hold
//! before the visit closes. At closure the machine reports a wait span only
//! if the visit outlasted the neglect threshold AND the cashier is absent
//! at that very instant; a client who was served in time produces nothing.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::{ClosedSpan, HoldTimer};
use crate::event::whole_minutes;

#[derive(Debug, Clone)]
pub struct CompositeConfig {
    /// Continuous presence required before the visit is confirmed.
    pub appearance_after: Duration,
    /// Continuous absence required before the visit is closed.
    pub departure_after: Duration,
    /// Minimum confirmed visit length for a neglect report.
    pub neglect_after: Duration,
    /// Wait spans measuring below this many minutes are dropped.
    pub min_minutes: i64,
}

/// The Variant B state machine. One instance per client zone per session.
#[derive(Debug)]
pub struct CompositeDebouncer {
    cfg: CompositeConfig,
    appearance: HoldTimer,
    departure: HoldTimer,
    /// Set once the visit is confirmed: (monotonic instant, wall instant).
    confirmed: Option<(Duration, DateTime<Utc>)>,
}

impl CompositeDebouncer {
    pub fn new(cfg: CompositeConfig) -> Self {
        let appearance = HoldTimer::new(cfg.appearance_after);
        let departure = HoldTimer::new(cfg.departure_after);
        Self {
            cfg,
            appearance,
            departure,
            confirmed: None,
        }
    }

    /// Feed one tick: `primary` is the client-zone signal, `secondary` the
    /// cashier-zone signal sampled on the same frame.
    pub fn observe(
        &mut self,
        primary: bool,
        secondary: bool,
        mono: Duration,
        wall: DateTime<Utc>,
    ) -> Option<ClosedSpan> {
        if primary {
            if self.confirmed.is_none() {
                self.appearance.arm(mono);
                if self.appearance.expired(mono) {
                    self.appearance.clear();
                    // The neglect clock runs from the confirmation instant.
                    self.confirmed = Some((mono, wall));
                }
            }
            self.departure.clear();
            None
        } else if let Some((confirmed_mono, confirmed_wall)) = self.confirmed {
            self.departure.arm(mono);
            if self.departure.expired(mono) {
                let closed = self.close(confirmed_mono, confirmed_wall, mono, wall, secondary);
                self.confirmed = None;
                self.departure.clear();
                closed
            } else {
                None
            }
        } else {
            // Not-yet-confirmed appearances cancel fully, no partial credit.
            self.appearance.clear();
            None
        }
    }

    /// Close an open visit at session end, re-sampling the secondary
    /// condition at this instant exactly as a natural departure would.
    pub fn force_close(
        &mut self,
        secondary: bool,
        mono: Duration,
        wall: DateTime<Utc>,
    ) -> Option<ClosedSpan> {
        let closed = match self.confirmed {
            Some((confirmed_mono, confirmed_wall)) => {
                self.close(confirmed_mono, confirmed_wall, mono, wall, secondary)
            }
            None => None,
        };
        self.confirmed = None;
        self.appearance.clear();
        self.departure.clear();
        closed
    }

    /// Whether a confirmed visit is currently open.
    pub fn is_present(&self) -> bool {
        self.confirmed.is_some()
    }

    fn close(
        &self,
        confirmed_mono: Duration,
        confirmed_wall: DateTime<Utc>,
        now_mono: Duration,
        now_wall: DateTime<Utc>,
        secondary_now: bool,
    ) -> Option<ClosedSpan> {
        let visit = now_mono.saturating_sub(confirmed_mono);
        if visit < self.cfg.neglect_after || secondary_now {
            // Served in time, or the cashier is there right now.
            return None;
        }
        let measure = whole_minutes(visit);
        if measure >= self.cfg.min_minutes {
            Some(ClosedSpan {
                started_at: confirmed_wall,
                ended_at: now_wall,
                measure,
            })
        } else {
            None
        }
    }
}
