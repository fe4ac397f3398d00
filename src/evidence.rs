//! Evidence and notification port.
//!
//! When a violation streak completes, the agent captures evidence (a frame
//! upload, an audible warning in the kitchen). Delivery is fire-and-forget:
//! the capture side can fail without ever affecting event persistence.

use chrono::{DateTime, Utc};

/// Sink for violation evidence. Implementations must not block the
/// sampling loop and must swallow their own failures.
pub trait EvidenceSink: Send + Sync {
    fn capture(&self, zone: &str, streak: u32, at: DateTime<Utc>);
}

/// Default sink: records the firing in the log and nothing else. The
/// production uploader/alert player plugs in behind the same trait.
pub struct LogEvidenceSink;

impl EvidenceSink for LogEvidenceSink {
    fn capture(&self, zone: &str, streak: u32, at: DateTime<Utc>) {
        tracing::warn!(zone, streak, at = %at, "violation streak confirmed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSink(AtomicU32);

    impl EvidenceSink for CountingSink {
        fn capture(&self, _zone: &str, _streak: u32, _at: DateTime<Utc>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn sinks_are_object_safe() {
        let sink: Box<dyn EvidenceSink> = Box::new(CountingSink(AtomicU32::new(0)));
        sink.capture("kitchen", 5, Utc::now());
    }
}
