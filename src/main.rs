//! Storewatch CLI
//!
//! Retail back-office monitoring agents for one trading point.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use storewatch::{
    agent::AgentRunner,
    config::Config,
    event::MonoClock,
    evidence::LogEvidenceSink,
    sink::{BlockingRemoteClient, DurableEventSink, LocalQueue},
    source::{spawn_stdin_router, ChannelTickSource},
    VERSION,
};

#[derive(Parser)]
#[command(name = "storewatch")]
#[command(version = VERSION)]
#[command(about = "Retail back-office monitoring agents", long_about = None)]
struct Cli {
    /// Path to the configuration file (defaults to the platform location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured agents against the detector feed on stdin
    Run {
        /// Agent kinds to run (comma-separated, or "all")
        #[arg(long, default_value = "all")]
        agents: String,
    },

    /// Show configuration and local buffer status
    Status,

    /// Push locally buffered events to the remote store once
    Sync,

    /// Show the resolved configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };

    match cli.command {
        Commands::Run { agents } => cmd_run(config, &agents),
        Commands::Status => cmd_status(config),
        Commands::Sync => cmd_sync(config),
        Commands::Config => cmd_config(config),
    }
}

fn cmd_run(config: Config, selector: &str) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    config
        .validate()
        .context("configuration rejected at startup")?;
    config
        .ensure_directories()
        .context("could not create data directories")?;

    let selected = config.select_agents(selector);
    if selected.is_empty() {
        bail!("no agents matched selector '{selector}' (configured: {})", config.agents.len());
    }

    println!("Storewatch v{VERSION}");
    println!();
    println!("Point ID: {}", config.point_id);
    println!("Remote: {}", config.remote.url());
    println!("Event buffer: {}", config.queue_path().display());
    for agent in &selected {
        println!(
            "  Agent: {} (zone '{}', every {}s)",
            agent.kind.as_str(),
            agent.zone,
            agent.sampling_interval_secs
        );
    }
    println!();
    println!("Reading detector feed from stdin. Press Ctrl+C to stop.");
    println!();

    // Shared durable sink: one local queue, one writer lock.
    let queue = LocalQueue::open(&config.queue_path())
        .context("could not open the local event buffer")?;
    let store = BlockingRemoteClient::new(config.remote.clone(), config.point_id)
        .context("could not build the remote client")?;
    match store.test_connection() {
        Ok(true) => println!("Remote store connection: OK"),
        Ok(false) => eprintln!("Warning: remote store health check failed"),
        Err(e) => eprintln!("Warning: remote store unreachable at startup: {e}"),
    }
    let backlog = queue.len().unwrap_or(0);
    if backlog > 0 {
        println!("Buffered events awaiting sync: {backlog}");
    }
    let sink = Arc::new(Mutex::new(DurableEventSink::new(store, queue)));

    let evidence = Arc::new(LogEvidenceSink);
    let clock = MonoClock::new();
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .context("failed to set Ctrl+C handler")?;
    }

    // One tick channel and one runner thread per zone; the feed router
    // fans stdin records out to them.
    let mut routes = HashMap::new();
    let mut workers = Vec::new();

    for agent_cfg in selected {
        let (sender, receiver) = crossbeam_channel::bounded(64);
        routes.insert(agent_cfg.zone.clone(), sender);

        // Each runner owns its own schedule client so a slow fetch in one
        // zone never blocks another.
        let schedule = BlockingRemoteClient::new(config.remote.clone(), config.point_id)
            .context("could not build the schedule client")?;

        let mut runner = AgentRunner::new(
            agent_cfg.clone(),
            config.point_id,
            ChannelTickSource::new(receiver),
            schedule,
            sink.clone(),
            evidence.clone(),
            stop.clone(),
        )
        .with_context(|| format!("agent '{}' rejected", agent_cfg.zone))?
        .with_schedule_retry(std::time::Duration::from_secs(config.schedule_retry_secs))
        .with_clock(clock.clone());

        let handle = thread::Builder::new()
            .name(format!("storewatch-{}", agent_cfg.zone))
            .spawn(move || runner.run())
            .context("failed to spawn agent thread")?;
        workers.push(handle);
    }

    // Not joined: the router blocks on stdin between records and exits
    // with the process once the agents are down.
    let _feed = spawn_stdin_router(routes, clock, stop.clone());

    for worker in workers {
        let _ = worker.join();
    }

    println!();
    println!("All agents stopped.");
    Ok(())
}

fn cmd_status(config: Config) -> anyhow::Result<()> {
    println!("Storewatch Status");
    println!("=================");
    println!();
    println!("Config file: {}", Config::config_path().display());
    println!("Point ID: {}", config.point_id);
    println!("Remote: {}", config.remote.url());
    println!("Schedule retry: {}s", config.schedule_retry_secs);
    println!();

    println!("Configured agents:");
    if config.agents.is_empty() {
        println!("  (none)");
    }
    for agent in &config.agents {
        let valid = match agent.validate() {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("INVALID: {e}"),
        };
        println!(
            "  {} zone '{}' every {}s [{}]",
            agent.kind.as_str(),
            agent.zone,
            agent.sampling_interval_secs,
            valid
        );
    }
    println!();

    let queue_path = config.queue_path();
    if queue_path.exists() {
        match LocalQueue::open(&queue_path) {
            Ok(queue) => match queue.len() {
                Ok(0) => println!("Local buffer: empty"),
                Ok(n) => println!("Local buffer: {n} event(s) awaiting sync"),
                Err(e) => println!("Local buffer: unreadable ({e})"),
            },
            Err(e) => println!("Local buffer: could not open ({e})"),
        }
    } else {
        println!("Local buffer: not created yet");
    }

    Ok(())
}

fn cmd_sync(config: Config) -> anyhow::Result<()> {
    let queue_path = config.queue_path();
    if !queue_path.exists() {
        println!("Nothing to sync: no local buffer at {}", queue_path.display());
        return Ok(());
    }

    let queue = LocalQueue::open(&queue_path).context("could not open the local event buffer")?;
    let pending = queue.len().context("could not read the local event buffer")?;
    if pending == 0 {
        println!("Nothing to sync: local buffer is empty.");
        return Ok(());
    }

    println!("Syncing {pending} buffered event(s)...");
    let store = BlockingRemoteClient::new(config.remote.clone(), config.point_id)
        .context("could not build the remote client")?;
    let mut sink = DurableEventSink::new(store, queue);

    let report = sink.drain().context("drain failed")?;
    if report.halted {
        println!(
            "Synced {} event(s); remote unavailable, {} still buffered.",
            report.synced,
            sink.backlog().map(|n| n.to_string()).unwrap_or_else(|_| "?".into())
        );
    } else {
        println!("Synced {} event(s). Local buffer is empty.", report.synced);
    }
    Ok(())
}

fn cmd_config(config: Config) -> anyhow::Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {}", Config::config_path().display());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
    Ok(())
}
