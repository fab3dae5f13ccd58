//! API gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────────────┐
//!                      │                      GATEWAY                          │
//!                      │                                                       │
//!   Client Request     │  ┌────────┐   ┌──────────────┐   ┌───────────────┐    │
//!   ───────────────────┼─▶│  http  │──▶│ route finder │──▶│ security/auth │    │
//!                      │  │ server │   │  (routing)   │   │   /claims     │    │
//!                      │  └────────┘   └──────────────┘   └───────┬───────┘    │
//!                      │                                          ▼            │
//!                      │                 ┌───────────┐    ┌───────────────┐    │
//!                      │                 │ discovery │◀───│ load_balancer │    │
//!                      │                 └───────────┘    └───────┬───────┘    │
//!                      │                                          ▼            │
//!   Client Response    │  ┌───────────┐               ┌───────────────────┐    │
//!   ◀──────────────────┼──│ responder │◀──────────────│ requester + QoS   │◀───┼── Downstream
//!                      │  └───────────┘               │   (resilience)    │    │   Service
//!                      │                              └───────────────────┘    │
//!                      │  config (hot reload) · observability · lifecycle      │
//!                      └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use api_gateway::config::{load_config, watcher::ConfigWatcher};
use api_gateway::http::HttpServer;
use api_gateway::lifecycle::{spawn_signal_handler, Shutdown};
use api_gateway::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "api-gateway", version, about = "HTTP API gateway")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Do not watch the configuration file for changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    logging::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        routes = config.routes.len(),
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        downstream_timeout_ms = config.timeouts.downstream_ms,
        "api-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let (watcher, config_updates) = ConfigWatcher::new(&args.config);
    // dropping the handle stops the watch
    let _watch = if args.no_watch { None } else { Some(watcher.run()?) };

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);

    let server = HttpServer::new(config)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
