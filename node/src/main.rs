// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Ember Node
//!
//! Entry point for the `ember-node` binary. Parses CLI arguments, initializes
//! logging and metrics, rebuilds the chain from disk, starts the background
//! worker, and serves the public API, the peer API and `/metrics`.
//!
//! Subcommands:
//!
//! - `run`     — start the node
//! - `status`  — query a running node's peer status endpoint
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod peer_client;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;

use ember_protocol::config::{Genesis, NodeConfig};
use ember_protocol::events::EventSink;
use ember_protocol::network::node::{NodeArgs, NodeState};
use ember_protocol::network::peers::Peer;
use ember_protocol::network::rpc::PeerClient;
use ember_protocol::network::worker::Worker;
use ember_protocol::storage::SledStorage;

use cli::{Commands, EmberNodeCli};
use metrics::NodeMetrics;
use peer_client::HttpPeerClient;

/// How long background loops get to wind down after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = EmberNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node and blocks until a shutdown signal or a server error.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format);

    tracing::info!(
        host = %args.host,
        public_addr = %args.public_addr,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        consensus = %args.consensus,
        strategy = %args.strategy,
        "starting ember-node"
    );

    // --- Genesis ---
    let genesis = Genesis::load(&args.genesis)
        .with_context(|| format!("failed to load genesis from {}", args.genesis.display()))?;

    // --- Persistent storage ---
    let db_path = args.data_dir.join("blocks");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let storage = SledStorage::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Node state ---
    let mut config = NodeConfig::new(args.beneficiary.clone());
    config.host = args.host.clone();
    config.consensus = args.consensus;
    config.strategy = args.strategy;
    config.known_peers = args.known_peers();
    config.peer_update_interval = Duration::from_secs(args.peer_update_secs.max(1));
    config.poa_cycle = Duration::from_secs(args.poa_cycle_secs.max(1));
    config.peer_request_timeout = Duration::from_secs(args.peer_timeout_secs.max(1));

    let client: Arc<dyn PeerClient> = Arc::new(
        HttpPeerClient::new(config.peer_request_timeout).context("failed to build HTTP client")?,
    );

    let (node, channels) = NodeState::new(NodeArgs {
        config,
        genesis,
        storage: Arc::new(storage),
        events: EventSink::default(),
    })
    .context("failed to rebuild chain state")?;

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    let recorder = metrics::spawn_recorder(Arc::clone(&node_metrics), Arc::clone(&node));

    // --- Worker ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = Worker::run(Arc::clone(&node), channels, client, shutdown_rx);

    // --- Servers ---
    let app_state = api::AppState {
        node: Arc::clone(&node),
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            ember_protocol::config::PROTOCOL_VERSION,
        ),
    };

    let public_router = api::create_router(app_state.clone());
    let public_listener = tokio::net::TcpListener::bind(&args.public_addr)
        .await
        .with_context(|| format!("failed to bind public listener on {}", args.public_addr))?;
    tracing::info!("public API listening on {}", args.public_addr);

    let peer_router = api::create_peer_router(app_state);
    let peer_listener = tokio::net::TcpListener::bind(&args.host)
        .await
        .with_context(|| format!("failed to bind peer listener on {}", args.host))?;
    tracing::info!("peer API listening on {}", args.host);

    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(public_listener, public_router) => {
            if let Err(e) = res {
                tracing::error!("public API server error: {}", e);
            }
        }
        res = axum::serve(peer_listener, peer_router) => {
            if let Err(e) = res {
                tracing::error!("peer API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, join_workers(workers)).await;
    if drained.is_err() {
        tracing::warn!("background loops did not stop in time");
    }
    recorder.abort();

    node.shutdown().context("failed to flush storage")?;
    tracing::info!("ember-node stopped");
    Ok(())
}

async fn join_workers(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(%err, "background loop panicked");
        }
    }
}

/// Fetches a running node's peer status and prints it as JSON.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let client = HttpPeerClient::new(ember_protocol::config::DEFAULT_PEER_REQUEST_TIMEOUT)
        .context("failed to build HTTP client")?;
    let status = client
        .status(&Peer::new(args.host.clone()))
        .await
        .with_context(|| format!("failed to query {}", args.host))?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn print_version() {
    println!("ember-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol   {}", ember_protocol::config::PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(%err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
