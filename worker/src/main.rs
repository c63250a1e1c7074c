use clap::Parser;
use log::info;
use std::sync::Arc;
use worker::network::WorkerServer;
use worker::policy::RandomWalk;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 picks a free port)
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Simulate a slow player program, delaying every reply by this many milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Player code: whitespace separated action names to choose from
    #[arg(short, long)]
    code: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let server = WorkerServer::bind(&address, Arc::new(RandomWalk), args.fake_ping).await?;

    if let Some(code) = args.code {
        server.code_loader().load(code.into_bytes());
    }
    if args.fake_ping > 0 {
        info!("Simulating {}ms decision latency", args.fake_ping);
    }

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    }
}
