//! Drip scheduler — runs sequenced email automation on a daily or interval
//! schedule.
//!
//! Loads configuration, restores the store snapshot, seeds the built-in
//! sequences, then drives the trigger until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use drip_automation::{AutomationEngine, AutomationStore, EmailTransport, FireOutcome};
use drip_channels::{DryRunTransport, SendGridTransport};
use drip_core::config::{AppConfig, TriggerMode};
use drip_automation::store::journal_path;
use drip_core::event_bus::{NodeSink, TracingSink};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "drip-scheduler")]
#[command(about = "Sequenced email drip automation scheduler")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML/JSON/YAML), overlaid by DRIP__* env vars
    #[arg(long, short, env = "DRIP_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "DRIP__NODE_ID")]
    node_id: Option<String>,

    /// Fire every N seconds instead of once a day
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Daily fire time in UTC, HH:MM
    #[arg(long, conflicts_with = "interval_secs")]
    daily_at: Option<String>,

    /// Snapshot file for durable state (overrides config)
    #[arg(long)]
    snapshot_path: Option<PathBuf>,

    /// Log messages instead of sending them, even if an API key is set
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Execute a single run now and exit
    #[arg(long, default_value_t = false)]
    run_once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "drip_scheduler=info,drip_automation=info,drip_channels=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Drip scheduler starting up");

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(secs) = cli.interval_secs {
        config.trigger.mode = TriggerMode::Interval;
        config.trigger.interval_secs = secs;
    }
    if let Some(at) = cli.daily_at {
        config.trigger.mode = TriggerMode::Daily;
        config.trigger.daily_at = at;
    }
    let snapshot_path = cli
        .snapshot_path
        .or_else(|| config.storage.snapshot_path.as_ref().map(PathBuf::from));

    info!(
        node_id = %config.node_id,
        trigger_mode = ?config.trigger.mode,
        daily_at = %config.trigger.daily_at,
        interval_secs = config.trigger.interval_secs,
        max_attempts = config.dispatch.max_attempts,
        max_concurrent_sends = config.dispatch.max_concurrent_sends,
        "Configuration loaded"
    );

    if config.metrics.enabled {
        if let Err(e) = start_metrics(&config) {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    let store = match &snapshot_path {
        Some(path) => match AutomationStore::load_from(path)
            .with_context(|| format!("loading snapshot {}", path.display()))?
        {
            Some(store) => {
                info!(
                    path = %path.display(),
                    subscribers = store.subscriber_count(),
                    enrollments = store.enrollment_count(),
                    "Restored store snapshot"
                );
                store
            }
            None => AutomationStore::new(),
        },
        None => {
            warn!("No snapshot path configured, state will not survive a restart");
            AutomationStore::new()
        }
    };
    if let Some(path) = &snapshot_path {
        store
            .attach_journal(&journal_path(path))
            .with_context(|| format!("opening dispatch journal for {}", path.display()))?;
    }
    let store = Arc::new(store);

    let transport: Arc<dyn EmailTransport> = if cli.dry_run || config.sendgrid.api_key.is_none() {
        info!("Using dry-run transport");
        Arc::new(DryRunTransport::new())
    } else {
        Arc::new(SendGridTransport::new(config.sendgrid.clone())?)
    };

    let engine = AutomationEngine::with_event_sink(
        store.clone(),
        transport,
        &config.dispatch,
        Arc::new(NodeSink::new(config.node_id.clone(), Arc::new(TracingSink))),
    );
    engine.seed_default_sequences()?;

    if cli.run_once {
        if let FireOutcome::Completed(report) = engine.run_once(chrono::Utc::now()).await {
            info!(
                due = report.due,
                sent = report.sent,
                failed = report.failed,
                "Single run finished"
            );
        }
        if let Some(path) = &snapshot_path {
            store.save_to(path)?;
        }
        return Ok(());
    }

    let trigger = engine.trigger(&config.trigger, snapshot_path.clone())?;
    let handle = trigger.start();

    info!("Drip scheduler is running");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("Shutdown requested");
    trigger.stop();
    // Resolves after any run in progress has finished.
    handle.await.context("trigger loop panicked")?;

    if let Some(path) = &snapshot_path {
        store.save_to(path)?;
        info!(path = %path.display(), "Final snapshot saved");
    }
    Ok(())
}

fn start_metrics(config: &AppConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::new(config.metrics.host.parse()?, config.metrics.port);
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!(port = config.metrics.port, "Metrics exporter started");
    Ok(())
}
