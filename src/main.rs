//! # stathub
//!
//! Stats-service hub binary. Accepts WebSocket links from game-server
//! nodes and serves correlated request/response traffic over them.

use clap::Parser;
use stathub_server::{ServerConfig, StaticIdentityProvider, start};

/// JSON object of `token -> { account, scopes }` read at startup.
const TOKENS_ENV: &str = "STATHUB_TOKENS";

/// Stats-service hub.
#[derive(Parser, Debug)]
#[command(name = "stathub", about = "Stats-service hub for game-server nodes")]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, default_value = "8338")]
    port: u16,

    /// Seconds between heartbeat pings on each link.
    #[arg(long, default_value = "30")]
    heartbeat_secs: u64,
}

fn load_provider() -> StaticIdentityProvider {
    match std::env::var(TOKENS_ENV) {
        Ok(raw) => {
            let provider = StaticIdentityProvider::from_json(&raw)
                .expect("Failed to parse STATHUB_TOKENS");
            tracing::info!(tokens = provider.len(), "token table loaded");
            provider
        }
        Err(_) => {
            tracing::warn!("STATHUB_TOKENS not set; every authentication will be rejected");
            StaticIdentityProvider::new()
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let provider = load_provider();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        heartbeat: std::time::Duration::from_secs(args.heartbeat_secs),
        ..ServerConfig::default()
    };

    let handle = start(config, std::sync::Arc::new(provider))
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "stathub ready");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
    handle.shutdown();
}
