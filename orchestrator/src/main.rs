use clap::Parser;
use log::{debug, info, warn};
use orchestrator::config::OrchestratorConfig;
use orchestrator::provisioning::LocalProvisioner;
use orchestrator::Orchestrator;
use shared::PlayerId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use worker::policy::RandomWalk;

/// Runs a local match: in-process workers, one turn collection per tick.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Ticks per second
    #[arg(short, long, default_value = "2")]
    tick_rate: u32,

    /// Turn deadline in milliseconds
    #[arg(short, long, default_value = "400")]
    deadline_ms: u64,

    /// Number of players to start workers for
    #[arg(short, long, default_value = "4")]
    players: u32,

    /// Cap on concurrent turn fetches
    #[arg(short = 'f', long)]
    max_fetches: Option<usize>,

    /// Artificial worker latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = OrchestratorConfig::new(Duration::from_millis(args.deadline_ms));
    if let Some(limit) = args.max_fetches {
        config = config.with_max_concurrent_fetches(limit);
    }

    let provisioner = Arc::new(LocalProvisioner::new(Arc::new(RandomWalk)).with_latency(args.fake_ping));
    let orchestrator = Arc::new(Orchestrator::with_udp_workers(config, provisioner));

    let players: HashSet<PlayerId> = (1..=args.players).map(PlayerId).collect();
    for (player_id, result) in orchestrator.add_players(players.clone()).await {
        if let Err(e) = result {
            warn!("Could not start {}: {}", player_id, e);
        }
    }
    info!("{} players ready", orchestrator.len().await);

    tokio::select! {
        _ = run_tick_loop(Arc::clone(&orchestrator), args.tick_rate) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    orchestrator.remove_players(players).await;
    Ok(())
}

/// Collects a turn every tick and hands it to a stand-in for the simulation engine
async fn run_tick_loop(orchestrator: Arc<Orchestrator>, tick_rate: u32) {
    let mut tick_timer = interval(Duration::from_secs_f32(1.0 / tick_rate.max(1) as f32));
    tick_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tick_timer.tick().await;

        let game_states: HashMap<PlayerId, Vec<u8>> = orchestrator
            .player_ids()
            .await
            .into_iter()
            .map(|id| (id, format!("{{\"player\":{}}}", id.0).into_bytes()))
            .collect();

        let result = orchestrator.collect_turn(&game_states).await;
        info!(
            "Tick {}: {}/{} actions collected",
            result.tick(),
            result.answered(),
            result.len()
        );

        let mut actions: Vec<_> = result.actions().iter().collect();
        actions.sort_by_key(|(id, _)| **id);
        for (id, action) in actions {
            match action {
                Some(action) => debug!("  {} -> {}", id, String::from_utf8_lossy(action)),
                None => debug!("  {} -> (no action)", id),
            }
        }

        for (id, log) in orchestrator.logs().await {
            debug!("  {} log: {}", id, log);
        }
        orchestrator.clear_logs().await;
    }
}
