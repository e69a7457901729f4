//! # wsgate
//!
//! Demo gateway binary: token auth, a chat handler that records every
//! message as an envelope in SQLite, and a browser test page at `/`.

#![deny(unsafe_code)]

mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use wsgate_core::logging::{self, LogFormat};
use wsgate_server::config::load_layered;
use wsgate_server::{ConnectionRegistry, Gateway, ServerConfig};
use wsgate_store::{Database, SqliteEnvelopeStore};

use crate::demo::{ChatHandler, DemoConfig, TokenValidator};

/// wsgate demo server.
#[derive(Parser, Debug)]
#[command(name = "wsgate", about = "WebSocket connection gateway demo")]
struct Cli {
    /// JSON config file (server and demo keys side by side).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Log level when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log line format: `compact` or `json`.
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    logging::init_subscriber(&args.log_level, args.log_format);

    let mut config = ServerConfig::load(args.config.as_deref()).context("Failed to load server config")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    let demo: DemoConfig =
        load_layered(args.config.as_deref()).context("Failed to load demo config")?;

    let db = Database::open(&demo.database_path).context("Failed to open envelope database")?;
    let store = Arc::new(SqliteEnvelopeStore::new(db));

    let registry = Arc::new(ConnectionRegistry::new());
    if demo.tokens.is_empty() {
        tracing::warn!("no tokens configured, admitting every client anonymously");
    }
    let validator = Arc::new(TokenValidator::new(demo.tokens));
    let handler = Arc::new(ChatHandler::new(store.clone(), Arc::clone(&registry)));
    let gateway = Gateway::with_registry(config, validator, handler, store, registry);

    let router = gateway.router().merge(demo::index_router());
    let (addr, server) = gateway
        .listen_with(router)
        .await
        .context("Failed to bind listener")?;
    tracing::info!(%addr, "wsgate ready, open http://{addr}/");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    if !gateway.graceful_shutdown().await {
        tracing::warn!("some connections did not close before the timeout");
    }
    server.await.context("Server task panicked")?;
    Ok(())
}
