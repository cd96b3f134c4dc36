//! Main entry point for the Farol registry server.
//!
//! Builds the component graph explicitly - store, caches, leases,
//! discovery engine, event bus, janitor - then serves the v4 REST API
//! until a shutdown signal arrives. Any initialization failure exits
//! with code 1.

use std::sync::Arc;

use clap::Parser;
use farol_registry::Registry;
use farol_server::config::Configuration;
use farol_server::model::AppState;
use farol_server::startup::{
    get_subscriber, init_subscriber, registry_server, wait_for_shutdown_signal,
};
use farol_store::{KvStore, MemoryStore};
use tracing::info;

#[derive(Parser)]
#[command(name = "farol", about = "Microservice registry and discovery server")]
struct Cli {
    /// Bind address; overrides FAROL_HTTP_HOST
    #[arg(long)]
    host: Option<String>,
    /// Bind port; overrides FAROL_HTTP_PORT
    #[arg(long)]
    port: Option<u16>,
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    let subscriber = get_subscriber("farol", "info", std::io::stdout);
    init_subscriber(subscriber);

    let configuration = Arc::new(Configuration::new()?);
    let store = Arc::new(MemoryStore::new()) as Arc<dyn KvStore>;
    let registry = Arc::new(Registry::new(store, configuration.registry_options()));
    registry
        .start()
        .await
        .map_err(|err| format!("failed to start registry: {}", err))?;

    let state = Arc::new(AppState {
        registry: registry.clone(),
        configuration: configuration.clone(),
    });

    let host = args.host.unwrap_or_else(|| configuration.http_host());
    let port = args.port.unwrap_or_else(|| configuration.http_port());
    info!(%host, port, "starting registry server");
    let server = registry_server(state, host, port)?;

    let shutdown = wait_for_shutdown_signal().await;
    let mut shutdown_rx = shutdown.subscribe();
    tokio::select! {
        result = server => {
            result?;
        }
        _ = shutdown_rx.recv() => {
            info!("shutdown signal received");
        }
    }

    registry.stop();
    info!("registry server shutdown complete");
    Ok(())
}
