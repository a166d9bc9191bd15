//! # Courtline — Notification Dispatch Engine
//!
//! Runs the trigger scheduler, the SMS delivery channel, and the realtime
//! gateway for a multi-branch sports academy backend.
//!
//! Usage:
//!   courtline                            # Start with ~/.courtline/config.toml
//!   courtline --config ./dev.toml        # Custom config
//!   courtline --no-sms                   # Realtime fanout only

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use courtline_core::config::CourtlineConfig;
use courtline_core::types::Snapshot;
use courtline_engine::clock::{until_next, until_next_minute};
use courtline_engine::{spawn_ticker, Cadence, DispatchEngine, InMemoryDirectory, SqliteRuleStore};
use courtline_realtime::server::{self, AppState};
use courtline_realtime::Hub;

#[derive(Parser)]
#[command(
    name = "courtline",
    version,
    about = "🏟️ Courtline — notification dispatch engine for sports academies"
)]
struct Cli {
    /// Config file path (default: ~/.courtline/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Gateway port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Rule database path override
    #[arg(long)]
    db_path: Option<String>,

    /// Domain snapshot JSON file (users/players/subscriptions)
    #[arg(long)]
    snapshot: Option<String>,

    /// Disable SMS delivery; rules still fire into the realtime hub
    #[arg(long)]
    no_sms: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "courtline=debug,courtline_engine=debug,courtline_sms=debug,courtline_realtime=debug,tower_http=debug"
    } else {
        "courtline=info,courtline_engine=info,courtline_sms=info,courtline_realtime=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => CourtlineConfig::load_from(std::path::Path::new(path))
            .map_err(|e| anyhow::anyhow!("{e}"))?,
        None => CourtlineConfig::load().map_err(|e| anyhow::anyhow!("{e}"))?,
    };
    let tz = config.timezone();

    // Rule run-state store
    let db_path = expand_path(cli.db_path.as_deref().unwrap_or(&config.scheduler.db_path));
    let store = Arc::new(
        SqliteRuleStore::open(std::path::Path::new(&db_path)).map_err(|e| anyhow::anyhow!("{e}"))?,
    );

    // Domain snapshot — synced in from the academy's relational store.
    let directory = Arc::new(match &cli.snapshot {
        Some(path) => {
            let content = std::fs::read_to_string(expand_path(path))?;
            let snapshot: Snapshot = serde_json::from_str(&content)?;
            tracing::info!(
                "Loaded snapshot: {} users, {} players, {} subscriptions",
                snapshot.users.len(),
                snapshot.players.len(),
                snapshot.subscriptions.len()
            );
            InMemoryDirectory::new(snapshot)
        }
        None => InMemoryDirectory::default(),
    });

    // SMS channel — a credential problem degrades to realtime-only rather
    // than refusing to start.
    let sms = if cli.no_sms {
        None
    } else {
        match courtline_sms::build_gateway(&config.sms) {
            Ok(gateway) => Some(Arc::new(gateway)),
            Err(e) => {
                tracing::warn!("⚠️ SMS delivery disabled: {e}");
                None
            }
        }
    };
    let sms_enabled = sms.is_some();

    let hub = Arc::new(Hub::new());
    let engine = Arc::new(DispatchEngine::new(
        store,
        directory,
        sms,
        hub.clone(),
        tz,
    ));

    // Align the coarse ticker to the configured daily time and the fine
    // ticker to minute boundaries.
    let daily_time = chrono::NaiveTime::parse_from_str(&config.scheduler.daily_time, "%H:%M")
        .map_err(|e| anyhow::anyhow!("bad scheduler.daily_time '{}': {e}", config.scheduler.daily_time))?;
    let now_local = chrono::Utc::now().with_timezone(&tz);
    spawn_ticker(
        engine.clone(),
        Cadence::Coarse,
        until_next(now_local, daily_time),
        Duration::from_secs(24 * 3600),
    );
    spawn_ticker(
        engine.clone(),
        Cadence::Fine,
        until_next_minute(now_local),
        Duration::from_secs(config.scheduler.fine_interval_secs),
    );

    let port = cli.port.unwrap_or(config.gateway.port);
    println!("🏟️ Courtline v{}", env!("CARGO_PKG_VERSION"));
    println!("   🌐 Gateway:     ws://{}:{}/ws", config.gateway.host, port);
    println!("   🗄️  Database:    {db_path}");
    println!("   🕘 Daily tick:  {} (UTC{:+})", config.scheduler.daily_time, config.timezone_offset_hours);
    println!("   ⏱️  Fine tick:   every {}s", config.scheduler.fine_interval_secs);
    println!(
        "   📨 SMS:         {}",
        if sms_enabled { config.sms.active_provider.as_str() } else { "disabled" }
    );
    println!();

    let state = Arc::new(AppState {
        hub,
        status_secret: config.sms.status_secret.clone(),
        start_time: std::time::Instant::now(),
    });
    server::run(state, &config.gateway.host, port)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    Ok(())
}
