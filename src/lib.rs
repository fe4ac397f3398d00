//! Storewatch - retail back-office monitoring agents.
//!
//! This library turns noisy per-frame detector output into clean,
//! temporally-debounced business events (cashier absences, client waits,
//! kitchen work sessions, violation captures, people counts) and persists
//! them without loss across network outages and restarts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Storewatch                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌─────────────┐   ┌──────────────────────┐  │
//! │  │  Tick     │──▶│  Debounce   │──▶│  Durable Event Sink  │  │
//! │  │  Source   │   │  Machines   │   │  remote ⇄ local queue│  │
//! │  └───────────┘   └─────────────┘   └──────────────────────┘  │
//! │        ▲                ▲                      │             │
//! │        │         ┌─────────────┐       ┌─────────────┐      │
//! │        └─────────│  Session    │◀──────│  Schedule   │      │
//! │                  │ Orchestrator│       │   Oracle    │      │
//! │                  └─────────────┘       └─────────────┘      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The detector (video capture + inference) and the evidence pipeline
//! (photo upload, audio alerts) live outside this crate, behind the
//! [`source::TickSource`] and [`evidence::EvidenceSink`] ports.
//!
//! # Guarantees
//!
//! - **Debounced**: a state change is reported only after the signal has
//!   been stable for the configured hold; flicker never reaches the store.
//! - **No lost events**: every emitted event is committed remotely or
//!   buffered in the embedded local queue, drained when connectivity
//!   returns, oldest first.
//! - **Degrade, don't die**: connectivity loss, camera stalls and schedule
//!   trouble all downgrade to "keep running, keep retrying".

pub mod agent;
pub mod config;
pub mod debounce;
pub mod event;
pub mod evidence;
pub mod schedule;
pub mod sink;
pub mod source;

// Re-export key types at crate root for convenience
pub use agent::{AgentLogic, AgentRunner};
pub use config::{AgentConfig, AgentKind, Config, ConfigError};
pub use debounce::{CompositeDebouncer, SpanDebouncer, StreakCounter};
pub use event::{Event, EventKind, MonoClock, Signal, Tick, TickAux};
pub use evidence::{EvidenceSink, LogEvidenceSink};
pub use schedule::{evaluate, ScheduleDecision, ScheduleProvider, WorkSchedule};
pub use sink::{
    BlockingRemoteClient, Delivery, DurableEventSink, LocalQueue, QueueError, RemoteConfig,
    RemoteStore, RemoteStoreError, SinkError,
};
pub use source::{ChannelTickSource, TickSource, TickSourceError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
