//! Tick acquisition port.
//!
//! The detector process (video capture + inference, out of scope here)
//! produces one [`Tick`] per sampling iteration. The orchestrator pulls
//! ticks through this trait so that a camera hiccup surfaces as "no data
//! right now", which pauses the loop, rather than as a false "nobody
//! there" signal.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::event::{MonoClock, Signal, Tick, TickAux};

/// Tick source failures.
#[derive(Debug)]
pub enum TickSourceError {
    /// The producing side is gone for good; the sampling session must end.
    Disconnected,
}

impl std::fmt::Display for TickSourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickSourceError::Disconnected => write!(f, "tick source disconnected"),
        }
    }
}

impl std::error::Error for TickSourceError {}

/// One stream of detector output.
pub trait TickSource: Send {
    /// Wait up to `timeout` for the next tick.
    ///
    /// `Ok(None)` means no data arrived in time (a pause, not a failure);
    /// the caller keeps looping without touching debounce state.
    fn read(&mut self, timeout: Duration) -> Result<Option<Tick>, TickSourceError>;

    /// Release the underlying stream at session end.
    fn release(&mut self) {}
}

/// Tick source over a crossbeam channel fed by the detector.
pub struct ChannelTickSource {
    receiver: Receiver<Tick>,
}

impl ChannelTickSource {
    pub fn new(receiver: Receiver<Tick>) -> Self {
        Self { receiver }
    }
}

impl TickSource for ChannelTickSource {
    fn read(&mut self, timeout: Duration) -> Result<Option<Tick>, TickSourceError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(tick) => Ok(Some(tick)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TickSourceError::Disconnected),
        }
    }
}

/// One detector reading on the wire: a JSON line on the feed stream.
///
/// The detector process knows nothing about this process's monotonic
/// clock, so records carry at most a wall timestamp; the router stamps
/// the monotonic reading on receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct TickRecord {
    /// Zone label, matched against the configured agents.
    pub zone: String,
    #[serde(default)]
    pub present: Option<bool>,
    #[serde(default)]
    pub level: Option<f64>,
    #[serde(default)]
    pub secondary: Option<bool>,
    #[serde(default)]
    pub violation: Option<bool>,
    #[serde(default)]
    pub track_ids: Vec<u32>,
    /// Capture timestamp; receipt time is used when absent.
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

impl TickRecord {
    fn into_tick(self, mono: Duration, received_at: DateTime<Utc>) -> Tick {
        let signal = match (self.present, self.level) {
            (Some(p), _) => Signal::Presence(p),
            (None, Some(v)) => Signal::Level(v),
            (None, None) => Signal::Presence(false),
        };
        Tick {
            mono,
            wall: self.at.unwrap_or(received_at),
            signal,
            aux: TickAux {
                secondary: self.secondary,
                violation: self.violation,
                track_ids: self.track_ids,
                level: self.level,
            },
        }
    }
}

/// Route detector records from a line stream to per-zone tick channels.
///
/// Runs until the stream ends or the stop flag is raised. Unparseable
/// lines and unknown zones are logged and skipped; a full channel drops
/// the tick (the next frame supersedes it anyway).
pub fn route_feed<F: BufRead>(
    feed: F,
    routes: &HashMap<String, Sender<Tick>>,
    clock: &MonoClock,
    stop: &AtomicBool,
) {
    for line in feed.lines() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "detector feed read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let record: TickRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable tick record");
                continue;
            }
        };

        match routes.get(&record.zone) {
            Some(sender) => {
                let tick = record.into_tick(clock.now(), Utc::now());
                if sender.try_send(tick).is_err() {
                    tracing::debug!("tick channel full or closed, frame dropped");
                }
            }
            None => tracing::debug!(zone = %record.zone, "tick for unconfigured zone"),
        }
    }
    tracing::info!("detector feed ended");
}

/// Spawn the stdin feed router on its own thread.
pub fn spawn_stdin_router(
    routes: HashMap<String, Sender<Tick>>,
    clock: MonoClock,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("storewatch-feed".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            route_feed(stdin.lock(), &routes, &clock, &stop);
        })
        .expect("failed to spawn feed router thread")
}
