//! Tick and event types shared by every monitoring agent.
//!
//! A `Tick` is one sampling iteration's worth of detector output; it is
//! consumed immediately and never persisted. An `Event` is the debounced
//! business fact that survives: an absence span, a wait span, a work
//! session, a violation capture, or a people count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Raw detector signal for one tick.
///
/// Agents watching a camera zone report `Presence`; agents watching a
/// numeric sensor (the scale) report `Level` and threshold it upstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    /// Person (or violation) detected in the zone this tick.
    Presence(bool),
    /// Numeric reading, e.g. weight delta in grams.
    Level(f64),
}

impl Signal {
    /// Collapse the signal to the boolean the debounce machines consume.
    ///
    /// A `Level` is considered active when strictly positive; callers that
    /// need a different cut-off threshold before building the tick.
    pub fn is_active(&self) -> bool {
        match *self {
            Signal::Presence(p) => p,
            Signal::Level(v) => v > 0.0,
        }
    }
}

/// Agent-specific side-band payloads carried alongside the primary signal.
#[derive(Debug, Clone, Default)]
pub struct TickAux {
    /// Secondary zone reading (cashier presence, for the client agent).
    pub secondary: Option<bool>,
    /// PPE violation flag for the person in frame (chef agent).
    pub violation: Option<bool>,
    /// Tracker IDs observed this tick (people counter).
    pub track_ids: Vec<u32>,
    /// Raw numeric reading (weight delta), when the detector exposes one.
    pub level: Option<f64>,
}

/// One sampling iteration's input.
#[derive(Debug, Clone)]
pub struct Tick {
    /// Monotonic reading used for all timer arithmetic.
    pub mono: Duration,
    /// Wall-clock timestamp persisted into events.
    pub wall: DateTime<Utc>,
    /// Primary detection signal.
    pub signal: Signal,
    /// Agent-specific payloads.
    pub aux: TickAux,
}

impl Tick {
    /// Build a presence tick with no side-band payloads.
    pub fn presence(mono: Duration, wall: DateTime<Utc>, present: bool) -> Self {
        Self {
            mono,
            wall,
            signal: Signal::Presence(present),
            aux: TickAux::default(),
        }
    }
}

/// Business event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Cashier left the till; `measure` is whole minutes absent.
    Absence,
    /// Client waited unattended; `measure` is whole minutes waited.
    ClientWait,
    /// Staff work session; `measure` is whole seconds worked.
    WorkSession,
    /// PPE violation streak reached its threshold; `measure` is the streak.
    ViolationPhoto,
    /// Unique people seen in a report interval; `measure` is the count.
    PeopleCount,
}

impl EventKind {
    /// Stable identifier used in the local queue and remote payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Absence => "absence",
            EventKind::ClientWait => "client_wait",
            EventKind::WorkSession => "work_session",
            EventKind::ViolationPhoto => "violation_photo",
            EventKind::PeopleCount => "people_count",
        }
    }

    /// Inverse of [`EventKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "absence" => Some(EventKind::Absence),
            "client_wait" => Some(EventKind::ClientWait),
            "work_session" => Some(EventKind::WorkSession),
            "violation_photo" => Some(EventKind::ViolationPhoto),
            "people_count" => Some(EventKind::PeopleCount),
            _ => None,
        }
    }
}

/// The unit persisted by the durable sink.
///
/// Immutable once created. Identity at the remote store is the composite
/// `(point_id, started_at)`, so redelivery after a crash is an idempotent
/// upsert rather than a duplicate row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Trading point this agent instance is deployed at.
    pub point_id: i64,
    /// Wall-clock start, derived from tick timestamps.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end; absent for instantaneous events.
    pub ended_at: Option<DateTime<Utc>>,
    /// Kind-dependent magnitude (minutes, seconds, streak, count).
    pub measure: i64,
}

impl Event {
    /// A closed span event.
    ///
    /// Wall clocks can step backwards under NTP corrections; the end is
    /// clamped so `ended_at >= started_at` always holds in stored rows.
    pub fn span(
        kind: EventKind,
        point_id: i64,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        measure: i64,
    ) -> Self {
        Self {
            kind,
            point_id,
            started_at,
            ended_at: Some(ended_at.max(started_at)),
            measure,
        }
    }

    /// An instantaneous event (violation capture, people count).
    pub fn instant(kind: EventKind, point_id: i64, at: DateTime<Utc>, measure: i64) -> Self {
        Self {
            kind,
            point_id,
            started_at: at,
            ended_at: None,
            measure,
        }
    }
}

/// Monotonic clock for timer arithmetic.
///
/// Debounce timers must not be corrupted by wall-clock adjustments (NTP
/// steps, manual changes), so every interval comparison runs on elapsed
/// readings from one of these. Wall clocks appear only inside events.
#[derive(Debug, Clone)]
pub struct MonoClock {
    origin: Instant,
}

impl MonoClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Elapsed time since this clock was created.
    pub fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for MonoClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole minutes in `elapsed`, floor division.
///
/// Sub-minute remainders are dropped by policy: a 59-second absence is not
/// a reportable absence anywhere in the system.
pub fn whole_minutes(elapsed: Duration) -> i64 {
    (elapsed.as_secs() / 60) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_activity() {
        assert!(Signal::Presence(true).is_active());
        assert!(!Signal::Presence(false).is_active());
        assert!(Signal::Level(120.0).is_active());
        assert!(!Signal::Level(0.0).is_active());
    }

    #[test]
    fn event_kind_round_trips_through_str() {
        for kind in [
            EventKind::Absence,
            EventKind::ClientWait,
            EventKind::WorkSession,
            EventKind::ViolationPhoto,
            EventKind::PeopleCount,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("bogus"), None);
    }

    #[test]
    fn span_clamps_backward_end_timestamps() {
        use chrono::TimeZone;
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let stepped_back = start - chrono::Duration::seconds(30);
        let event = Event::span(EventKind::Absence, 1, start, stepped_back, 1);
        assert_eq!(event.ended_at, Some(start));
    }

    #[test]
    fn whole_minutes_floors() {
        assert_eq!(whole_minutes(Duration::from_secs(59)), 0);
        assert_eq!(whole_minutes(Duration::from_secs(60)), 1);
        assert_eq!(whole_minutes(Duration::from_secs(179)), 2);
    }

    #[test]
    fn mono_clock_is_nondecreasing() {
        let clock = MonoClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
