//! lanview-server entry point.
//!
//! ```text
//! lanview-server                        Run in the foreground
//! lanview-server --config <path>        Load a custom config TOML
//! lanview-server --gen-config           Print the default config to stdout
//! lanview-server --write-config         Write the default config to --config
//! lanview-server --port 9000            Override the WebSocket port
//! lanview-server --discovery-port 9001  Override the discovery port
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lanview_server::config::ServerConfig;
use lanview_server::service::RemoteService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "lanview-server", about = "LAN screen streaming server")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "lanview-server.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the --config path and exit.
    #[arg(long)]
    write_config: bool,

    /// WebSocket port (overrides the config file).
    #[arg(short, long)]
    port: Option<u16>,

    /// UDP discovery port (overrides the config file).
    #[arg(long)]
    discovery_port: Option<u16>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }
    if cli.write_config {
        ServerConfig::write_default(&cli.config)?;
        println!("Wrote {}", cli.config.display());
        return Ok(());
    }

    let mut config = ServerConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.websocket_port = port;
    }
    if let Some(port) = cli.discovery_port {
        config.network.discovery_port = port;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("lanview-server v{}", env!("CARGO_PKG_VERSION"));
    info!("websocket: {}", config.websocket_addr());
    info!("discovery: udp {}", config.discovery_addr());
    info!(
        "fps {} ({}-{}), quality {} ({}-{}), max clients {}",
        config.capture.fps,
        config.capture.min_fps,
        config.capture.max_fps,
        config.compression.quality,
        config.compression.min_quality,
        config.compression.max_quality,
        config.network.max_clients
    );

    let service = RemoteService::new(config);
    let stop = service.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
        }
        stop.cancel();
    });

    if let Err(e) = service.run().await {
        error!("{e}");
        return Err(e.into());
    }
    Ok(())
}
