use clap::Parser;
use log::{error, info};
use server::config::{RuntimeConfig, DEFAULT_CONFIG_PATH};
use server::content;
use server::handlers::default_router;
use server::host::ServerHost;
use server::metrics::spawn_snapshot_reporter;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Runtime configuration file (defaults are used when it does not exist)
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured bind address
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Override the configured port
    #[arg(short, long)]
    port: Option<u16>,

    /// Content data root
    #[arg(short, long, default_value = "data")]
    data: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match RuntimeConfig::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    if let Some(host) = args.host {
        config.network.host = host;
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Err(e) = config.check_port().and_then(|_| config.validate()) {
        error!("{}", e);
        std::process::exit(1);
    }

    let store = match content::load_all(&args.data) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to load content: {}", e);
            std::process::exit(1);
        }
    };
    let report = content::validate(&store);
    if !report.is_ok() {
        for issue in report.issues() {
            error!("{}", issue);
        }
        error!(
            "Content under {} failed validation with {} issue(s)",
            args.data.display(),
            report.issues().len()
        );
        std::process::exit(1);
    }
    info!(
        "Content OK: {} items, {} mobs, {} drop tables",
        store.items().len(),
        store.mobs().len(),
        store.drops().tables.len()
    );

    let host_config = match config.to_host_config().await {
        Ok(host_config) => host_config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let host = ServerHost::new(host_config, default_router());
    let addr = host.start().await?;
    info!("Server listening on {}", addr);

    let reporter = if config.metrics.snapshot_enabled {
        Some(spawn_snapshot_reporter(
            host.metrics(),
            config.snapshot_interval(),
            host.shutdown_token(),
        ))
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");

    host.stop().await;
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }
    info!("Final metrics: {}", host.metrics().snapshot());

    Ok(())
}
