//! End-to-end tests for the debounce + persistence pipeline.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use storewatch::{
    agent::AgentRunner,
    config::{AgentConfig, AgentKind},
    event::{Event, EventKind, MonoClock, Tick},
    evidence::LogEvidenceSink,
    schedule::{ScheduleProvider, WorkSchedule},
    sink::{Delivery, DurableEventSink, LocalQueue, RemoteAck, RemoteStore, RemoteStoreError},
    source::{TickSource, TickSourceError},
};

/// Remote fake with switchable connectivity and a full write log.
#[derive(Clone)]
struct FakeRemote {
    up: Arc<AtomicBool>,
    written: Arc<Mutex<Vec<Event>>>,
}

impl FakeRemote {
    fn new(up: bool) -> Self {
        Self {
            up: Arc::new(AtomicBool::new(up)),
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn events(&self) -> Vec<Event> {
        self.written.lock().unwrap().clone()
    }
}

impl RemoteStore for FakeRemote {
    fn write(&self, event: &Event) -> Result<RemoteAck, RemoteStoreError> {
        if self.up.load(Ordering::SeqCst) {
            self.written.lock().unwrap().push(event.clone());
            Ok(RemoteAck::default())
        } else {
            Err(RemoteStoreError::Unreachable("no route to host".into()))
        }
    }
}

/// Schedule fake: a window spanning the current instant, so evaluation
/// always lands inside working hours regardless of when the test runs.
struct AlwaysOpen;

impl ScheduleProvider for AlwaysOpen {
    fn fetch(&self) -> Result<WorkSchedule, RemoteStoreError> {
        let now = Utc::now();
        let start = (now - chrono::Duration::hours(1)).format("%H:%M").to_string();
        let end = (now + chrono::Duration::hours(1)).format("%H:%M").to_string();
        Ok(WorkSchedule {
            start_time: Some(start),
            end_time: Some(end),
            gmt_offset: 0,
        })
    }
}

/// Tick source that replays a scripted presence sequence, one reading per
/// `read` call, then raises the stop flag so the runner winds down.
struct ScriptedSource {
    script: Vec<bool>,
    cursor: usize,
    clock: MonoClock,
    stop: Arc<AtomicBool>,
}

impl ScriptedSource {
    fn new(script: Vec<bool>, clock: MonoClock, stop: Arc<AtomicBool>) -> Self {
        Self {
            script,
            cursor: 0,
            clock,
            stop,
        }
    }
}

impl TickSource for ScriptedSource {
    fn read(&mut self, _timeout: Duration) -> Result<Option<Tick>, TickSourceError> {
        if self.cursor >= self.script.len() {
            self.stop.store(true, Ordering::SeqCst);
            return Ok(None);
        }
        let present = self.script[self.cursor];
        self.cursor += 1;
        Ok(Some(Tick::presence(self.clock.now(), Utc::now(), present)))
    }
}

fn sample_event(minute: u32) -> Event {
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 15, minute, 0).unwrap();
    Event::span(
        EventKind::Absence,
        11,
        start,
        start + chrono::Duration::minutes(minute as i64 + 1),
        minute as i64 + 1,
    )
}

fn queue_file(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("storewatch-{tag}-{}.db", uuid::Uuid::new_v4()))
}

#[test]
fn outage_restart_and_recovery_loses_nothing() {
    let path = queue_file("outage");

    // Process one: remote is down, three events buffer locally.
    {
        let remote = FakeRemote::new(false);
        let queue = LocalQueue::open(&path).unwrap();
        let mut sink = DurableEventSink::new(remote.clone(), queue);
        for m in 0..3 {
            assert_eq!(sink.persist(&sample_event(m)).unwrap(), Delivery::Queued);
        }
        assert_eq!(sink.backlog().unwrap(), 3);
        assert!(remote.events().is_empty());
    }

    // Process two (after a restart): connectivity is back; the next
    // persist call drains the backlog first, oldest first, then delivers
    // the new event.
    {
        let remote = FakeRemote::new(true);
        let queue = LocalQueue::open(&path).unwrap();
        let mut sink = DurableEventSink::new(remote.clone(), queue);
        assert_eq!(sink.persist(&sample_event(3)).unwrap(), Delivery::Remote);
        assert_eq!(sink.backlog().unwrap(), 0);

        let delivered = remote.events();
        let starts: Vec<DateTime<Utc>> = delivered.iter().map(|e| e.started_at).collect();
        assert_eq!(
            starts,
            (0..4).map(|m| sample_event(m).started_at).collect::<Vec<_>>()
        );
        // Exactly once each.
        assert_eq!(delivered.len(), 4);
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn mid_drain_outage_keeps_undelivered_rows() {
    let path = queue_file("middrain");
    let remote = FakeRemote::new(false);
    let queue = LocalQueue::open(&path).unwrap();
    let mut sink = DurableEventSink::new(remote.clone(), queue);

    for m in 0..3 {
        sink.persist(&sample_event(m)).unwrap();
    }

    // Remote comes up, syncs everything, goes down again mid-stream on a
    // later write: the later event must stay buffered, nothing vanished.
    remote.up.store(true, Ordering::SeqCst);
    let report = sink.drain().unwrap();
    assert_eq!(report.synced, 3);

    remote.up.store(false, Ordering::SeqCst);
    assert_eq!(sink.persist(&sample_event(7)).unwrap(), Delivery::Queued);
    assert_eq!(sink.backlog().unwrap(), 1);
    assert_eq!(remote.events().len(), 3);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn chef_agent_force_closes_open_session_on_stop() {
    let clock = MonoClock::new();
    let stop = Arc::new(AtomicBool::new(false));
    let remote = FakeRemote::new(true);
    let sink = Arc::new(Mutex::new(DurableEventSink::new(
        remote.clone(),
        LocalQueue::open_in_memory().unwrap(),
    )));

    let cfg = AgentConfig {
        kind: AgentKind::Chef,
        zone: "kitchen".to_string(),
        sampling_interval_secs: 1,
        timeout_secs: Some(0),
        appearance_secs: None,
        departure_secs: None,
        neglect_secs: None,
        violation_streak: Some(100),
        violation_stale_secs: None,
        report_interval_secs: None,
    };

    // Staff visible on every scripted frame; the script ends (raising the
    // stop flag) while the work session is still open.
    let source = ScriptedSource::new(vec![true; 4], clock.clone(), stop.clone());

    let mut runner = AgentRunner::new(
        cfg,
        11,
        source,
        AlwaysOpen,
        sink.clone(),
        Arc::new(LogEvidenceSink),
        stop.clone(),
    )
    .unwrap()
    .with_clock(clock);

    runner.run();

    let delivered = remote.events();
    assert_eq!(delivered.len(), 1, "exactly one closing event");
    let session = &delivered[0];
    assert_eq!(session.kind, EventKind::WorkSession);
    assert_eq!(session.point_id, 11);
    assert!(session.measure >= 1, "seconds worked: {}", session.measure);
    assert!(session.ended_at.unwrap() >= session.started_at);
}

#[test]
fn stopped_runner_exits_promptly_while_waiting_for_schedule() {
    struct NeverReachable;
    impl ScheduleProvider for NeverReachable {
        fn fetch(&self) -> Result<WorkSchedule, RemoteStoreError> {
            Err(RemoteStoreError::Unreachable("offline".into()))
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let clock = MonoClock::new();
    let remote = FakeRemote::new(true);
    let sink = Arc::new(Mutex::new(DurableEventSink::new(
        remote,
        LocalQueue::open_in_memory().unwrap(),
    )));

    let cfg = AgentConfig {
        kind: AgentKind::Cashier,
        zone: "till".to_string(),
        sampling_interval_secs: 1,
        timeout_secs: Some(30),
        appearance_secs: None,
        departure_secs: None,
        neglect_secs: None,
        violation_streak: None,
        violation_stale_secs: None,
        report_interval_secs: None,
    };

    let source = ScriptedSource::new(Vec::new(), clock.clone(), Arc::new(AtomicBool::new(false)));
    let mut runner = AgentRunner::new(
        cfg,
        11,
        source,
        NeverReachable,
        sink,
        Arc::new(LogEvidenceSink),
        stop.clone(),
    )
    .unwrap()
    .with_schedule_retry(Duration::from_secs(30));

    let stopper = {
        let stop = stop.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            stop.store(true, Ordering::SeqCst);
        })
    };

    let started = std::time::Instant::now();
    runner.run();
    let elapsed = started.elapsed();
    stopper.join().unwrap();

    // The 30s retry sleep must be interrupted within the 1s chunk bound.
    assert!(
        elapsed < Duration::from_secs(5),
        "runner took {elapsed:?} to honor the stop signal"
    );
}
