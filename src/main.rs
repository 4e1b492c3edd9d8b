//! Gateway observation server.
//!
//! Forwards every request to one upstream and instruments each proxied call
//! with a client observation.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request      ┌──────────────────────────────────────────────┐
//!     ────────────────────┼─▶ server ─▶ request filters ─▶ hyper client ─┼──▶ Upstream
//!                         │                  │ start                     │
//!                         │                  ▼                           │
//!                         │        observation + context (exchange)      │
//!                         │                  │ stop                      │
//!     Client Response     │                  ▼                           │
//!     ◀───────────────────┼── server ◀─ response filters ◀───────────────┼─── Upstream
//!                         │                                              │
//!                         │  handlers: propagation, tracing, metrics     │
//!                         └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use gateway_observation::config::validation::validate_config;
use gateway_observation::config::{load_config, ConfigError, GatewayObservationConfig};
use gateway_observation::observability::{logging, metrics, registry_from_config};
use gateway_observation::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "gateway-observation")]
#[command(about = "Forwarding gateway with per-request observations", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind address
    #[arg(long)]
    bind: Option<String>,

    /// Override the upstream base URL
    #[arg(long)]
    upstream: Option<String>,
}

fn resolve_config(args: &Args) -> Result<GatewayObservationConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayObservationConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.server.bind_address = bind.clone();
    }
    if let Some(upstream) = &args.upstream {
        config.server.upstream = upstream.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    logging::init_logging(&config.logging)?;

    tracing::info!(
        bind_address = %config.server.bind_address,
        upstream = %config.server.upstream,
        propagation = ?config.tracing.propagation,
        uri_tag = ?config.convention.uri_tag,
        "Configuration loaded"
    );

    if config.metrics.enabled {
        match config.metrics.address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.metrics.address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = registry_from_config(&config);
    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config, registry)?;
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
