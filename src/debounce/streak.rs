//! Variant C: consecutive-streak counting with fire-and-reset.
//!
//! Frame-windowed rather than time-windowed: each violating tick increments
//! the streak, each clean tick resets it. Reaching the threshold fires
//! exactly once and resets immediately, so a persistent violation cannot
//! re-fire on every subsequent frame; a fresh full streak is required.

use std::time::Duration;

/// Consecutive-hit counter. One instance per camera zone per session.
#[derive(Debug)]
pub struct StreakCounter {
    threshold: u32,
    /// Reset a streak whose last hit is older than this (gaps from camera
    /// stalls must not glue two separate incidents together).
    stale_after: Option<Duration>,
    count: u32,
    last_hit: Option<Duration>,
}

impl StreakCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            stale_after: None,
            count: 0,
            last_hit: None,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    /// Feed one tick. Returns `true` exactly when a full streak completes;
    /// the counter resets at that instant.
    pub fn observe(&mut self, violating: bool, mono: Duration) -> bool {
        if !violating {
            self.reset();
            return false;
        }

        if let (Some(stale), Some(last)) = (self.stale_after, self.last_hit) {
            if mono.saturating_sub(last) > stale {
                self.count = 0;
            }
        }

        self.count += 1;
        self.last_hit = Some(mono);

        if self.count >= self.threshold {
            self.count = 0;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.last_hit = None;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn fires_once_at_threshold_then_requires_fresh_streak() {
        let mut counter = StreakCounter::new(3);

        assert!(!counter.observe(true, secs(0)));
        assert!(!counter.observe(true, secs(1)));
        assert!(counter.observe(true, secs(2)));

        // Still violating on the very next tick: no saturation re-fire.
        assert!(!counter.observe(true, secs(3)));
        assert!(!counter.observe(true, secs(4)));
        assert!(counter.observe(true, secs(5)));
    }

    #[test]
    fn clean_tick_resets_the_streak() {
        let mut counter = StreakCounter::new(3);
        counter.observe(true, secs(0));
        counter.observe(true, secs(1));
        assert!(!counter.observe(false, secs(2)));
        assert_eq!(counter.count(), 0);

        // Two more hits do not complete the interrupted streak.
        counter.observe(true, secs(3));
        assert!(!counter.observe(true, secs(4)));
    }

    #[test]
    fn stale_gap_resets_the_streak() {
        let mut counter = StreakCounter::new(3).with_stale_after(secs(5));
        counter.observe(true, secs(0));
        counter.observe(true, secs(1));
        // 10s gap: the old streak is stale, this hit starts a new one.
        assert!(!counter.observe(true, secs(11)));
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn threshold_of_one_fires_every_violating_tick() {
        let mut counter = StreakCounter::new(1);
        assert!(counter.observe(true, secs(0)));
        assert!(counter.observe(true, secs(1)));
        assert!(!counter.observe(false, secs(2)));
    }
}
