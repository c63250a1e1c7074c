use clap::Parser;
use orchestrator::transport::{TurnRequest, UdpWorkerClient, WorkerClient};
use shared::PlayerId;
use std::net::SocketAddr;
use tokio::time::{sleep, timeout, Duration, Instant};

/// Sends a few turn requests to a running worker and prints what comes back.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Worker address
    #[arg(short, long, default_value = "127.0.0.1:9000")]
    worker: SocketAddr,

    /// Number of turns to request
    #[arg(short, long, default_value = "5")]
    turns: u64,

    /// Give up on a turn after this many milliseconds
    #[arg(short, long, default_value = "2000")]
    deadline_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let client = UdpWorkerClient::new();
    let deadline = Duration::from_millis(args.deadline_ms);

    println!("Probing worker at {}", args.worker);

    for tick in 1..=args.turns {
        let request = TurnRequest {
            tick,
            player_id: PlayerId(1),
            game_state: format!("{{\"tick\":{}}}", tick).into_bytes(),
        };

        let started = Instant::now();
        match timeout(deadline, client.fetch_turn(args.worker, request)).await {
            Ok(Ok(turn)) => println!(
                "Tick {}: {} in {:?} (code updated: {}) log: {}",
                tick,
                String::from_utf8_lossy(&turn.action),
                started.elapsed(),
                turn.code_updated,
                turn.log
            ),
            Ok(Err(e)) => println!("Tick {}: failed: {}", tick, e),
            Err(_) => println!("Tick {}: no reply within {:?}", tick, deadline),
        }

        sleep(Duration::from_millis(250)).await;
    }

    println!("Probe finished");
    Ok(())
}
