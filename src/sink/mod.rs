//! Durable event persistence: remote-first with a local store-and-forward
//! fallback.
//!
//! The contract is "never lose an event": after [`DurableEventSink::persist`]
//! returns, the event lives in exactly one of the remote store or the local
//! queue. The single accepted loss path is a local storage failure while the
//! remote is also down, surfaced as [`SinkError::Storage`] for the caller to
//! log.

pub mod queue;
pub mod remote;

pub use queue::{LocalQueue, QueueError, QueuedEvent};
pub use remote::{BlockingRemoteClient, RemoteClient, RemoteConfig};

use crate::event::Event;

/// Acknowledgement returned by a successful remote write.
#[derive(Debug, Clone, Default)]
pub struct RemoteAck {
    /// Server-side processing timestamp, when the store reports one.
    pub timestamp: Option<String>,
}

/// Remote store failures, split by what the sink should do about them.
///
/// Both kinds trigger local buffering: connectivity comes back on its own,
/// and rejected writes are safe to replay because the remote keys events by
/// `(point_id, started_at)` and upserts.
#[derive(Debug)]
pub enum RemoteStoreError {
    /// The store could not be reached (connect failure, timeout, DNS).
    Unreachable(String),
    /// The store answered and said no.
    Rejected { status: u16, message: String },
}

impl std::fmt::Display for RemoteStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteStoreError::Unreachable(msg) => write!(f, "remote store unreachable: {msg}"),
            RemoteStoreError::Rejected { status, message } => {
                write!(f, "remote store rejected write ({status}): {message}")
            }
        }
    }
}

impl std::error::Error for RemoteStoreError {}

/// The remote persistence port. Implemented over HTTP in production
/// ([`BlockingRemoteClient`]) and by in-memory fakes in tests.
pub trait RemoteStore {
    fn write(&self, event: &Event) -> Result<RemoteAck, RemoteStoreError>;
}

/// Where a persisted event ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Committed to the remote store.
    Remote,
    /// Buffered locally, to be drained when connectivity returns.
    Queued,
}

/// Unrecoverable sink failures.
#[derive(Debug)]
pub enum SinkError {
    /// The local buffer could not take the event. The event is gone.
    Storage(QueueError),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Storage(e) => write!(f, "local event buffer failed: {e}"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Outcome of one opportunistic drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Rows delivered remotely and deleted locally.
    pub synced: usize,
    /// Whether the pass stopped early on a remote failure.
    pub halted: bool,
}

/// The durable sink: one per process, shared behind a mutex by all agent
/// threads (the queue's read/delete/insert sequence must not interleave).
pub struct DurableEventSink<R: RemoteStore> {
    remote: R,
    queue: LocalQueue,
}

impl<R: RemoteStore> DurableEventSink<R> {
    pub fn new(remote: R, queue: LocalQueue) -> Self {
        Self { remote, queue }
    }

    /// Persist one event durably.
    ///
    /// Order matters: drain the backlog first so reconnection delivers old
    /// events before new ones, then write the new event, then fall back to
    /// the local buffer.
    pub fn persist(&mut self, event: &Event) -> Result<Delivery, SinkError> {
        match self.drain() {
            Ok(report) if report.synced > 0 => {
                tracing::info!(synced = report.synced, "drained buffered events");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "backlog drain failed, continuing"),
        }

        match self.remote.write(event) {
            Ok(_) => Ok(Delivery::Remote),
            Err(e) => {
                tracing::warn!(error = %e, kind = event.kind.as_str(), "remote write failed, buffering locally");
                self.queue.push(event).map_err(SinkError::Storage)?;
                Ok(Delivery::Queued)
            }
        }
    }

    /// Push buffered events to the remote store, oldest first.
    ///
    /// Each row is deleted only after its remote write is confirmed. The
    /// pass aborts on the first remote failure: if the store is still down
    /// there is no point hammering it with the rest of the backlog.
    pub fn drain(&mut self) -> Result<DrainReport, SinkError> {
        let pending = self.queue.pending().map_err(SinkError::Storage)?;
        let mut report = DrainReport::default();

        for row in pending {
            match self.remote.write(&row.event) {
                Ok(_) => {
                    self.queue.delete(row.id).map_err(SinkError::Storage)?;
                    report.synced += 1;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "drain halted, remote still down");
                    report.halted = true;
                    break;
                }
            }
        }
        Ok(report)
    }

    /// Number of events waiting in the local buffer.
    pub fn backlog(&self) -> Result<usize, SinkError> {
        self.queue.len().map_err(SinkError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use chrono::{TimeZone, Utc};
    use std::cell::{Cell, RefCell};

    /// Remote fake whose connectivity can be toggled mid-test.
    struct FlakyRemote {
        up: Cell<bool>,
        written: RefCell<Vec<Event>>,
    }

    impl FlakyRemote {
        fn new(up: bool) -> Self {
            Self {
                up: Cell::new(up),
                written: RefCell::new(Vec::new()),
            }
        }
    }

    impl RemoteStore for FlakyRemote {
        fn write(&self, event: &Event) -> Result<RemoteAck, RemoteStoreError> {
            if self.up.get() {
                self.written.borrow_mut().push(event.clone());
                Ok(RemoteAck::default())
            } else {
                Err(RemoteStoreError::Unreachable("connection refused".into()))
            }
        }
    }

    fn event(minute: u32) -> Event {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 14, minute, 0).unwrap();
        Event::span(
            EventKind::Absence,
            3,
            start,
            start + chrono::Duration::minutes(2),
            2,
        )
    }

    fn sink(up: bool) -> DurableEventSink<FlakyRemote> {
        DurableEventSink::new(FlakyRemote::new(up), LocalQueue::open_in_memory().unwrap())
    }

    #[test]
    fn healthy_remote_gets_the_event_directly() {
        let mut sink = sink(true);
        let delivery = sink.persist(&event(0)).unwrap();
        assert_eq!(delivery, Delivery::Remote);
        assert_eq!(sink.backlog().unwrap(), 0);
        assert_eq!(sink.remote.written.borrow().len(), 1);
    }

    #[test]
    fn outage_buffers_exactly_one_copy() {
        let mut sink = sink(false);
        let delivery = sink.persist(&event(0)).unwrap();
        assert_eq!(delivery, Delivery::Queued);
        // In the queue, not at the remote: exactly one of the two.
        assert_eq!(sink.backlog().unwrap(), 1);
        assert!(sink.remote.written.borrow().is_empty());
    }

    #[test]
    fn recovery_drains_backlog_before_the_new_event_in_order() {
        let mut sink = sink(false);
        for m in 0..3 {
            sink.persist(&event(m)).unwrap();
        }
        assert_eq!(sink.backlog().unwrap(), 3);

        sink.remote.up.set(true);
        let delivery = sink.persist(&event(3)).unwrap();
        assert_eq!(delivery, Delivery::Remote);
        assert_eq!(sink.backlog().unwrap(), 0);

        let written = sink.remote.written.borrow();
        let starts: Vec<_> = written.iter().map(|e| e.started_at).collect();
        assert_eq!(
            starts,
            vec![
                event(0).started_at,
                event(1).started_at,
                event(2).started_at,
                event(3).started_at
            ]
        );
    }

    #[test]
    fn drain_halts_on_first_failure_without_deleting() {
        let mut sink = sink(false);
        for m in 0..3 {
            sink.persist(&event(m)).unwrap();
        }

        // Still down: the drain pass gives up immediately, nothing lost.
        let report = sink.drain().unwrap();
        assert_eq!(report.synced, 0);
        assert!(report.halted);
        assert_eq!(sink.backlog().unwrap(), 3);
    }

    #[test]
    fn explicit_drain_after_recovery_empties_the_queue() {
        let mut sink = sink(false);
        for m in 0..4 {
            sink.persist(&event(m)).unwrap();
        }

        sink.remote.up.set(true);
        let report = sink.drain().unwrap();
        assert_eq!(report.synced, 4);
        assert!(!report.halted);
        assert_eq!(sink.backlog().unwrap(), 0);
    }

    #[test]
    fn rejected_writes_buffer_like_connectivity_failures() {
        struct RejectingRemote;
        impl RemoteStore for RejectingRemote {
            fn write(&self, _: &Event) -> Result<RemoteAck, RemoteStoreError> {
                Err(RemoteStoreError::Rejected {
                    status: 409,
                    message: "duplicate key".into(),
                })
            }
        }

        let mut sink =
            DurableEventSink::new(RejectingRemote, LocalQueue::open_in_memory().unwrap());
        assert_eq!(sink.persist(&event(0)).unwrap(), Delivery::Queued);
        assert_eq!(sink.backlog().unwrap(), 1);
    }
}
