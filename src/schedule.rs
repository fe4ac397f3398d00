//! Work-window schedule evaluation.
//!
//! Trading points have a daily work window `[start, end)` expressed as
//! `HH:MM` strings in point-local time, where "local" means a plain hour
//! offset from UTC (not a full timezone; the points predate DST handling
//! and store a single integer). The oracle answers two questions: are we
//! inside the window right now, and how long until that changes.
//!
//! Every failure path degrades to "not working, ask again in a minute";
//! schedule trouble must never take an agent down.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::sink::RemoteStoreError;

/// Seconds in a day.
const DAY: i64 = 86_400;

/// Retry delay reported when the schedule is unusable.
const SOFT_RETRY: Duration = Duration::from_secs(60);

/// Immutable snapshot of a trading point's daily schedule.
///
/// Returned by [`ScheduleProvider::fetch`] and passed by value; there is no
/// shared mutable schedule anywhere in the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSchedule {
    /// Window start, `"HH:MM"`. `None` while the point is unconfigured.
    pub start_time: Option<String>,
    /// Window end, `"HH:MM"`. May be earlier than the start (overnight).
    pub end_time: Option<String>,
    /// Plain hour offset added to the UTC hour, wrapped mod 24.
    #[serde(default)]
    pub gmt_offset: i32,
}

impl WorkSchedule {
    pub fn new(start_time: &str, end_time: &str, gmt_offset: i32) -> Self {
        Self {
            start_time: Some(start_time.to_string()),
            end_time: Some(end_time.to_string()),
            gmt_offset,
        }
    }

    /// A schedule with no window configured.
    pub fn unset() -> Self {
        Self {
            start_time: None,
            end_time: None,
            gmt_offset: 0,
        }
    }
}

/// Outcome of one schedule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleDecision {
    /// Whether the point is inside its work window right now.
    pub working: bool,
    /// Time until the next window-boundary crossing, never zero.
    pub until_change: Duration,
}

impl ScheduleDecision {
    fn idle_retry() -> Self {
        Self {
            working: false,
            until_change: SOFT_RETRY,
        }
    }
}

/// Source of schedule snapshots (the remote service in production).
pub trait ScheduleProvider {
    fn fetch(&self) -> Result<WorkSchedule, RemoteStoreError>;
}

/// Evaluate the schedule at `now_utc`.
///
/// Pure function of its inputs; parse or arithmetic trouble soft-fails to
/// "not working, retry in 60s" rather than propagating.
pub fn evaluate(now_utc: DateTime<Utc>, schedule: &WorkSchedule) -> ScheduleDecision {
    let (start_raw, end_raw) = match (&schedule.start_time, &schedule.end_time) {
        (Some(s), Some(e)) => (s, e),
        _ => return ScheduleDecision::idle_retry(),
    };

    let (start, end) = match (parse_hhmm(start_raw), parse_hhmm(end_raw)) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            tracing::warn!(start = %start_raw, end = %end_raw, "unparseable schedule window");
            return ScheduleDecision::idle_retry();
        }
    };

    let local_hour = (now_utc.hour() as i64 + schedule.gmt_offset as i64).rem_euclid(24);
    let now = local_hour * 3600 + now_utc.minute() as i64 * 60 + now_utc.second() as i64;

    let (working, wait) = if start <= end {
        // Same-day window, e.g. 09:00-18:00.
        if start <= now && now < end {
            (true, end - now)
        } else if now < start {
            (false, start - now)
        } else {
            (false, (DAY - now) + start)
        }
    } else {
        // Overnight window, e.g. 22:00-06:00.
        if now >= start {
            (true, (DAY - now) + end)
        } else if now < end {
            (true, end - now)
        } else {
            (false, start - now)
        }
    };

    ScheduleDecision {
        working,
        until_change: Duration::from_secs(wait.max(1) as u64),
    }
}

/// Parse `"HH:MM"` into seconds since local midnight.
fn parse_hhmm(s: &str) -> Option<i64> {
    let (h, m) = s.trim().split_once(':')?;
    let h: i64 = h.parse().ok()?;
    let m: i64 = m.parse().ok()?;
    if (0..24).contains(&h) && (0..60).contains(&m) {
        Some(h * 3600 + m * 60)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, min, 0).unwrap()
    }

    fn secs(d: &ScheduleDecision) -> u64 {
        d.until_change.as_secs()
    }

    #[test]
    fn same_day_window() {
        let schedule = WorkSchedule::new("09:00", "18:00", 0);

        let before = evaluate(at(8, 0), &schedule);
        assert!(!before.working);
        assert_eq!(secs(&before), 3600);

        let during = evaluate(at(12, 0), &schedule);
        assert!(during.working);
        assert_eq!(secs(&during), 6 * 3600);

        let after = evaluate(at(20, 0), &schedule);
        assert!(!after.working);
        // Until 09:00 tomorrow.
        assert_eq!(secs(&after), (24 - 20 + 9) * 3600);
    }

    #[test]
    fn window_end_is_exclusive() {
        let schedule = WorkSchedule::new("09:00", "18:00", 0);
        let at_end = evaluate(at(18, 0), &schedule);
        assert!(!at_end.working);
        assert_eq!(secs(&at_end), (24 - 18 + 9) * 3600);

        let at_start = evaluate(at(9, 0), &schedule);
        assert!(at_start.working);
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let schedule = WorkSchedule::new("22:00", "06:00", 0);

        // Before midnight: working, wait runs across midnight to 06:00.
        let late = evaluate(at(23, 30), &schedule);
        assert!(late.working);
        assert_eq!(secs(&late), (24 * 3600 - 84_600) + 6 * 3600);

        // After midnight, still inside the window.
        let early = evaluate(at(5, 0), &schedule);
        assert!(early.working);
        assert_eq!(secs(&early), 3600);

        // Midday: off shift, 12 hours until 22:00.
        let midday = evaluate(at(10, 0), &schedule);
        assert!(!midday.working);
        assert_eq!(secs(&midday), 12 * 3600);
    }

    #[test]
    fn gmt_offset_shifts_the_local_clock() {
        // 20:00 UTC at offset +3 is 23:00 local, inside 22:00-06:00.
        let schedule = WorkSchedule::new("22:00", "06:00", 3);
        assert!(evaluate(at(20, 0), &schedule).working);

        // 01:00 UTC at offset -2 is 23:00 local.
        let schedule = WorkSchedule::new("22:00", "06:00", -2);
        assert!(evaluate(at(1, 0), &schedule).working);
    }

    #[test]
    fn unset_schedule_idles_with_short_retry() {
        let decision = evaluate(at(12, 0), &WorkSchedule::unset());
        assert!(!decision.working);
        assert_eq!(secs(&decision), 60);
    }

    #[test]
    fn malformed_window_soft_fails() {
        let garbled = WorkSchedule::new("9am", "late", 0);
        let decision = evaluate(at(12, 0), &garbled);
        assert!(!decision.working);
        assert_eq!(secs(&decision), 60);

        let out_of_range = WorkSchedule::new("25:00", "99:99", 0);
        assert!(!evaluate(at(12, 0), &out_of_range).working);
    }

    #[test]
    fn wait_is_clamped_to_at_least_one_second() {
        // One second before close: wait is exactly 1, never 0.
        let schedule = WorkSchedule::new("09:00", "18:00", 0);
        let nearly = evaluate(
            Utc.with_ymd_and_hms(2026, 3, 2, 17, 59, 59).unwrap(),
            &schedule,
        );
        assert!(nearly.working);
        assert_eq!(secs(&nearly), 1);
    }

    #[test]
    fn parse_hhmm_accepts_only_valid_windows() {
        assert_eq!(parse_hhmm("00:00"), Some(0));
        assert_eq!(parse_hhmm("23:59"), Some(23 * 3600 + 59 * 60));
        assert_eq!(parse_hhmm(" 08:30 "), Some(8 * 3600 + 30 * 60));
        assert_eq!(parse_hhmm("24:00"), None);
        assert_eq!(parse_hhmm("12"), None);
        assert_eq!(parse_hhmm("ab:cd"), None);
    }
}
