use clap::Parser;
use client::{ClientError, GameClient};
use log::{info, warn};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:7777")]
    server: SocketAddr,

    /// Number of pings to send
    #[arg(short = 'n', long, default_value = "5000")]
    count: u32,

    /// Pause between pings in milliseconds (0 sends as fast as possible)
    #[arg(short = 'd', long, default_value = "0")]
    delay_ms: u64,

    /// How long to keep reading replies after the burst, in milliseconds
    #[arg(long, default_value = "2000")]
    settle_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Connecting to {}", args.server);
    let mut client = GameClient::connect(args.server).await?;

    match client.handshake().await {
        Ok(_) => {}
        Err(ClientError::Rejected(reason)) => {
            warn!("Server refused the handshake: {}", reason);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    info!(
        "Sending {} pings ({}ms apart)...",
        args.count, args.delay_ms
    );
    let sent = client
        .ping_burst(args.count, Duration::from_millis(args.delay_ms))
        .await?;

    let tally = client
        .collect_replies(Duration::from_millis(args.settle_ms))
        .await;

    match tally.disconnect {
        Some(reason) => info!("Server disconnected us: {}", reason),
        None if tally.closed => info!("Server closed the connection"),
        None => match client.disconnect().await {
            Ok(reason) => info!("Disconnected (server reason: {:?})", reason),
            Err(e) => warn!("Disconnect failed: {}", e),
        },
    }

    info!(
        "Done. sent={} pongs={} other={}",
        sent, tally.pongs, tally.other
    );
    Ok(())
}
