//! The session orchestrator.
//!
//! One parametrized loop drives every agent kind: poll the schedule, sleep
//! through closed hours, and during the work window pull ticks from the
//! detector, feed the kind's debounce machines, and forward whatever they
//! emit to the durable sink. When the window ends, the stream dies, or
//! the operator stops the process, any open debounced span is force-closed
//! and persisted before the tick source is released. Partial sessions are
//! never silently dropped.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::{AgentConfig, AgentKind, ConfigError};
use crate::debounce::{
    CompositeConfig, CompositeDebouncer, MeasureUnit, Polarity, SpanConfig, SpanDebouncer,
    StreakCounter,
};
use crate::event::{Event, EventKind, MonoClock, Tick};
use crate::evidence::EvidenceSink;
use crate::schedule::{self, ScheduleProvider, WorkSchedule};
use crate::sink::{Delivery, DurableEventSink, RemoteStore};
use crate::source::{TickSource, TickSourceError};

/// Sleep granularity; the stop signal is observed at least this often.
const SLEEP_CHUNK: Duration = Duration::from_secs(1);

/// Per-kind machine wiring. Created at work-window entry, force-closed and
/// dropped at window exit, so debounce state never leaks across sessions.
pub enum AgentLogic {
    Cashier {
        absence: SpanDebouncer,
    },
    Client {
        composite: CompositeDebouncer,
        /// Most recent cashier-zone reading, re-checked at forced close.
        last_secondary: bool,
    },
    Chef {
        session: SpanDebouncer,
        ppe: StreakCounter,
        ppe_threshold: u32,
    },
    People {
        seen: HashSet<u32>,
        report_every: Duration,
        /// Start of the current counting period (mono, wall).
        period: Option<(Duration, DateTime<Utc>)>,
    },
    Scale {
        overload: StreakCounter,
        streak_threshold: u32,
    },
}

impl AgentLogic {
    /// Wire up the machines for one agent kind. Fails when the config is
    /// missing a threshold the kind needs.
    pub fn build(cfg: &AgentConfig) -> Result<Self, ConfigError> {
        match cfg.kind {
            AgentKind::Cashier => Ok(AgentLogic::Cashier {
                absence: SpanDebouncer::new(SpanConfig {
                    confirm_after: cfg.timeout()?,
                    polarity: Polarity::OnAbsent,
                    unit: MeasureUnit::Minutes,
                    min_measure: 1,
                }),
            }),
            AgentKind::Client => Ok(AgentLogic::Client {
                composite: CompositeDebouncer::new(CompositeConfig {
                    appearance_after: cfg.appearance()?,
                    departure_after: cfg.departure()?,
                    neglect_after: cfg.neglect()?,
                    min_minutes: 1,
                }),
                last_secondary: true,
            }),
            AgentKind::Chef => {
                let threshold = cfg.streak()?;
                let mut ppe = StreakCounter::new(threshold);
                if let Some(stale) = cfg.violation_stale_secs {
                    ppe = ppe.with_stale_after(Duration::from_secs(stale));
                }
                Ok(AgentLogic::Chef {
                    session: SpanDebouncer::new(SpanConfig {
                        confirm_after: cfg.timeout()?,
                        polarity: Polarity::OnPresent,
                        unit: MeasureUnit::Seconds,
                        min_measure: 1,
                    }),
                    ppe,
                    ppe_threshold: threshold,
                })
            }
            AgentKind::People => Ok(AgentLogic::People {
                seen: HashSet::new(),
                report_every: cfg.report_interval()?,
                period: None,
            }),
            AgentKind::Scale => {
                let threshold = cfg.streak()?;
                let mut overload = StreakCounter::new(threshold);
                if let Some(stale) = cfg.violation_stale_secs {
                    overload = overload.with_stale_after(Duration::from_secs(stale));
                }
                Ok(AgentLogic::Scale {
                    overload,
                    streak_threshold: threshold,
                })
            }
        }
    }

    /// Feed one tick; returns the events to persist.
    pub fn on_tick(
        &mut self,
        tick: &Tick,
        point_id: i64,
        zone: &str,
        evidence: &dyn EvidenceSink,
    ) -> Vec<Event> {
        let present = tick.signal.is_active();
        match self {
            AgentLogic::Cashier { absence } => absence
                .observe(present, tick.mono, tick.wall)
                .map(|span| {
                    Event::span(
                        EventKind::Absence,
                        point_id,
                        span.started_at,
                        span.ended_at,
                        span.measure,
                    )
                })
                .into_iter()
                .collect(),

            AgentLogic::Client {
                composite,
                last_secondary,
            } => {
                // Missing cashier reading counts as "present": a neglect
                // report must never rest on absent data.
                let secondary = tick.aux.secondary.unwrap_or(true);
                *last_secondary = secondary;
                composite
                    .observe(present, secondary, tick.mono, tick.wall)
                    .map(|span| {
                        Event::span(
                            EventKind::ClientWait,
                            point_id,
                            span.started_at,
                            span.ended_at,
                            span.measure,
                        )
                    })
                    .into_iter()
                    .collect()
            }

            AgentLogic::Chef {
                session,
                ppe,
                ppe_threshold,
            } => {
                let mut events = Vec::new();
                if let Some(span) = session.observe(present, tick.mono, tick.wall) {
                    events.push(Event::span(
                        EventKind::WorkSession,
                        point_id,
                        span.started_at,
                        span.ended_at,
                        span.measure,
                    ));
                }
                // Violations only count while someone is actually in frame.
                let violating = present && tick.aux.violation.unwrap_or(false);
                if ppe.observe(violating, tick.mono) {
                    evidence.capture(zone, *ppe_threshold, tick.wall);
                    events.push(Event::instant(
                        EventKind::ViolationPhoto,
                        point_id,
                        tick.wall,
                        *ppe_threshold as i64,
                    ));
                }
                events
            }

            AgentLogic::People {
                seen,
                report_every,
                period,
            } => {
                let (period_mono, period_wall) = *period.get_or_insert((tick.mono, tick.wall));
                seen.extend(tick.aux.track_ids.iter().copied());
                if tick.mono.saturating_sub(period_mono) >= *report_every {
                    let count = seen.len() as i64;
                    seen.clear();
                    *period = Some((tick.mono, tick.wall));
                    vec![Event::span(
                        EventKind::PeopleCount,
                        point_id,
                        period_wall,
                        tick.wall,
                        count,
                    )]
                } else {
                    Vec::new()
                }
            }

            AgentLogic::Scale {
                overload,
                streak_threshold,
            } => {
                if overload.observe(present, tick.mono) {
                    evidence.capture(zone, *streak_threshold, tick.wall);
                }
                Vec::new()
            }
        }
    }

    /// Close any open span at session end.
    pub fn force_close(
        &mut self,
        mono: Duration,
        wall: DateTime<Utc>,
        point_id: i64,
    ) -> Option<Event> {
        match self {
            AgentLogic::Cashier { absence } => absence.force_close(mono, wall).map(|span| {
                Event::span(
                    EventKind::Absence,
                    point_id,
                    span.started_at,
                    span.ended_at,
                    span.measure,
                )
            }),
            AgentLogic::Client {
                composite,
                last_secondary,
            } => composite
                .force_close(*last_secondary, mono, wall)
                .map(|span| {
                    Event::span(
                        EventKind::ClientWait,
                        point_id,
                        span.started_at,
                        span.ended_at,
                        span.measure,
                    )
                }),
            AgentLogic::Chef { session, .. } => session.force_close(mono, wall).map(|span| {
                Event::span(
                    EventKind::WorkSession,
                    point_id,
                    span.started_at,
                    span.ended_at,
                    span.measure,
                )
            }),
            AgentLogic::People { seen, period, .. } => {
                let (_, period_wall) = period.take()?;
                if seen.is_empty() {
                    return None;
                }
                let count = seen.len() as i64;
                seen.clear();
                Some(Event::span(
                    EventKind::PeopleCount,
                    point_id,
                    period_wall,
                    wall,
                    count,
                ))
            }
            AgentLogic::Scale { .. } => None,
        }
    }
}

/// The per-zone control loop.
pub struct AgentRunner<S, R, P>
where
    S: TickSource,
    R: RemoteStore,
    P: ScheduleProvider,
{
    cfg: AgentConfig,
    point_id: i64,
    schedule_retry: Duration,
    clock: MonoClock,
    source: S,
    schedule: P,
    sink: Arc<Mutex<DurableEventSink<R>>>,
    evidence: Arc<dyn EvidenceSink>,
    stop: Arc<AtomicBool>,
}

impl<S, R, P> AgentRunner<S, R, P>
where
    S: TickSource,
    R: RemoteStore,
    P: ScheduleProvider,
{
    pub fn new(
        cfg: AgentConfig,
        point_id: i64,
        source: S,
        schedule: P,
        sink: Arc<Mutex<DurableEventSink<R>>>,
        evidence: Arc<dyn EvidenceSink>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            point_id,
            schedule_retry: Duration::from_secs(60),
            clock: MonoClock::new(),
            source,
            schedule,
            sink,
            evidence,
            stop,
        })
    }

    /// Override the schedule-fetch retry delay (tests, unusual deployments).
    pub fn with_schedule_retry(mut self, retry: Duration) -> Self {
        self.schedule_retry = retry;
        self
    }

    /// Share a monotonic clock with the tick producer.
    ///
    /// Tick monos and the runner's own readings must come from the same
    /// origin or forced-close arithmetic would mix two timelines.
    pub fn with_clock(mut self, clock: MonoClock) -> Self {
        self.clock = clock;
        self
    }

    /// Drive the agent until the stop flag is raised.
    pub fn run(&mut self) {
        let zone = self.cfg.zone.clone();
        tracing::info!(zone = %zone, kind = self.cfg.kind.as_str(), "agent started");

        while !self.stopped() {
            // Opportunistic backlog sync: whatever the schedule says, a
            // reachable remote means buffered events can go out now.
            match self.lock_sink().drain() {
                Ok(report) if report.synced > 0 => {
                    tracing::info!(zone = %zone, synced = report.synced, "offline backlog synced");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(zone = %zone, error = %e, "backlog sync failed"),
            }

            let Some(snapshot) = self.fetch_schedule() else {
                break; // stopped while waiting for the schedule
            };

            let decision = schedule::evaluate(Utc::now(), &snapshot);
            if decision.working {
                tracing::info!(
                    zone = %zone,
                    session_secs = decision.until_change.as_secs(),
                    "work window open, sampling"
                );
                self.run_sampling_session(decision.until_change);
            } else {
                tracing::info!(
                    zone = %zone,
                    sleep_secs = decision.until_change.as_secs(),
                    "off shift, sleeping until next window"
                );
                self.sleep_interruptible(decision.until_change);
            }
        }

        tracing::info!(zone = %zone, "agent stopped");
    }

    /// Fetch a schedule snapshot, retrying forever. `None` only when the
    /// stop flag was raised while waiting.
    fn fetch_schedule(&self) -> Option<WorkSchedule> {
        loop {
            if self.stopped() {
                return None;
            }
            match self.schedule.fetch() {
                Ok(snapshot) => return Some(snapshot),
                Err(e) => {
                    tracing::warn!(
                        zone = %self.cfg.zone,
                        error = %e,
                        retry_secs = self.schedule_retry.as_secs(),
                        "schedule fetch failed, retrying"
                    );
                    self.sleep_interruptible(self.schedule_retry);
                }
            }
        }
    }

    /// One bounded sampling session of roughly `duration`.
    fn run_sampling_session(&mut self, duration: Duration) {
        let mut logic = match AgentLogic::build(&self.cfg) {
            Ok(logic) => logic,
            Err(e) => {
                // Unreachable after the constructor's validate, but a config
                // bug must not poison the outer loop.
                tracing::error!(zone = %self.cfg.zone, error = %e, "cannot build agent logic");
                return;
            }
        };

        let interval = self.cfg.sampling_interval();
        let session_end = self.clock.now() + duration;
        let zone = self.cfg.zone.clone();

        while !self.stopped() && self.clock.now() < session_end {
            let iteration_start = self.clock.now();

            match self.source.read(interval) {
                Ok(Some(tick)) => {
                    let events =
                        logic.on_tick(&tick, self.point_id, &zone, self.evidence.as_ref());
                    for event in events {
                        self.forward(event);
                    }
                }
                Ok(None) => {
                    // No frame inside the interval: the stream is paused.
                    // Debounce state must not move: silence is not absence.
                    tracing::debug!(zone = %zone, "no tick, stream paused");
                    continue;
                }
                Err(TickSourceError::Disconnected) => {
                    tracing::error!(zone = %zone, "tick source disconnected, closing session");
                    break;
                }
            }

            // Keep the sampling cadence; an overrunning iteration proceeds
            // immediately rather than sleeping a negative remainder.
            let spent = self.clock.now().saturating_sub(iteration_start);
            if let Some(rest) = interval.checked_sub(spent) {
                self.sleep_interruptible(rest);
            }
        }

        if let Some(event) = logic.force_close(self.clock.now(), Utc::now(), self.point_id) {
            tracing::info!(zone = %zone, kind = event.kind.as_str(), "closing open span at session end");
            self.forward(event);
        }
        self.source.release();
    }

    /// Hand one event to the durable sink. A storage failure here is the
    /// single accepted loss path: log it and move on.
    fn forward(&self, event: Event) {
        match self.lock_sink().persist(&event) {
            Ok(Delivery::Remote) => {
                tracing::info!(
                    zone = %self.cfg.zone,
                    kind = event.kind.as_str(),
                    measure = event.measure,
                    "event delivered"
                );
            }
            Ok(Delivery::Queued) => {
                tracing::info!(
                    zone = %self.cfg.zone,
                    kind = event.kind.as_str(),
                    measure = event.measure,
                    "event buffered locally"
                );
            }
            Err(e) => {
                tracing::error!(
                    zone = %self.cfg.zone,
                    kind = event.kind.as_str(),
                    error = %e,
                    "event dropped: local buffer unavailable"
                );
            }
        }
    }

    fn lock_sink(&self) -> MutexGuard<'_, DurableEventSink<R>> {
        self.sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sleep in short chunks so the stop signal is honored promptly.
    fn sleep_interruptible(&self, duration: Duration) {
        let deadline = self.clock.now() + duration;
        while !self.stopped() {
            let now = self.clock.now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(SLEEP_CHUNK.min(deadline - now));
        }
    }
}
