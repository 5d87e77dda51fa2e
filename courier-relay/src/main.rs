//! courier-relay binary entry point.
//!
//! Usage:
//! ```bash
//! courier-relay --config courier.toml
//! ```
//!
//! Binds the iroh endpoint for the `/courier/1` protocol, serves the HTTP
//! surface (health, metrics, admin), and runs until Ctrl+C.

use anyhow::{Context, Result};
use courier_relay::account::AllowAll;
use courier_relay::config::{Config, StorageBackend};
use courier_relay::http;
use courier_relay::protocol::{CourierProtocol, ALPN};
use courier_relay::server::Relay;
use courier_relay::storage::{MemoryStore, MessageStore, SqliteStore};
use iroh::protocol::Router;
use iroh::Endpoint;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often the rate limiter key maps are compacted.
const LIMITER_SHRINK_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        tracing::info!(
            "No config at {}, using defaults",
            config_path.display()
        );
        Config::default()
    };

    let store: Arc<dyn MessageStore> = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory message store");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::Sqlite => {
            tracing::info!("Opening message store at {}", config.storage.database.display());
            Arc::new(
                SqliteStore::new(&config.storage.database)
                    .await
                    .context("Failed to open message store")?,
            )
        }
    };

    // Account integration is out-of-process; the relay itself runs open.
    let relay = Arc::new(Relay::new(config, store, Arc::new(AllowAll)));

    http::health::init_start_time();

    // HTTP surface
    let http_addr = relay.config().http.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {http_addr}"))?;
    tracing::info!("HTTP listening on {}", http_addr);

    let http_router = http::build_router(relay.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, http_router).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    // Periodic compaction of rate limiter key maps
    let shrink_relay = relay.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_SHRINK_INTERVAL);
        loop {
            interval.tick().await;
            shrink_relay.rate_limits().shrink();
        }
    });

    // iroh endpoint + protocol router
    let endpoint = Endpoint::builder()
        .alpns(vec![ALPN.to_vec()])
        .bind()
        .await
        .context("Failed to create endpoint")?;

    tracing::info!("Relay endpoint id: {}", endpoint.id());

    let protocol = CourierProtocol::new(relay);
    let router = Router::builder(endpoint).accept(ALPN, protocol).spawn();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    tracing::info!("Shutting down");
    router
        .shutdown()
        .await
        .context("Failed to shutdown router")?;

    Ok(())
}

fn config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("courier.toml"))
}
