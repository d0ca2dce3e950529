//! # Prometheus Metrics
//!
//! Operational metrics for an Ember node, scraped at `/metrics` on the
//! metrics port. Values are driven by the node's event stream rather than
//! by the handlers themselves, so locally mined blocks, peer blocks and
//! resync replays are all counted the same way.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] prefixed with
//! `ember_`.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use tokio::sync::broadcast;

use ember_protocol::events::NodeEvent;
use ember_protocol::network::NodeState;

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Number of the chain head.
    pub block_height: IntGauge,
    /// Blocks applied from any source.
    pub blocks_accepted_total: IntCounter,
    /// Blocks this node solved itself.
    pub blocks_mined_total: IntCounter,
    pub transactions_accepted_total: IntCounter,
    pub transactions_in_mempool: IntGauge,
    pub known_peers: IntGauge,
    pub reorganizations_total: IntCounter,
    /// Wall time of successful proof-of-work searches.
    pub mining_duration_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("ember".into()), None)?;

        let block_height = IntGauge::new("block_height", "Number of the latest block")?;
        registry.register(Box::new(block_height.clone()))?;

        let blocks_accepted_total =
            IntCounter::new("blocks_accepted_total", "Blocks applied to the local chain")?;
        registry.register(Box::new(blocks_accepted_total.clone()))?;

        let blocks_mined_total =
            IntCounter::new("blocks_mined_total", "Blocks solved by this node")?;
        registry.register(Box::new(blocks_mined_total.clone()))?;

        let transactions_accepted_total = IntCounter::new(
            "transactions_accepted_total",
            "Transactions admitted to the mempool",
        )?;
        registry.register(Box::new(transactions_accepted_total.clone()))?;

        let transactions_in_mempool = IntGauge::new(
            "transactions_in_mempool",
            "Current number of pending transactions in the mempool",
        )?;
        registry.register(Box::new(transactions_in_mempool.clone()))?;

        let known_peers = IntGauge::new("known_peers", "Number of known peers")?;
        registry.register(Box::new(known_peers.clone()))?;

        let reorganizations_total = IntCounter::new(
            "reorganizations_total",
            "Times the chain was reset to genesis for a resync",
        )?;
        registry.register(Box::new(reorganizations_total.clone()))?;

        let mining_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "mining_duration_seconds",
                "Time spent solving a block's proof of work",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(mining_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            block_height,
            blocks_accepted_total,
            blocks_mined_total,
            transactions_accepted_total,
            transactions_in_mempool,
            known_peers,
            reorganizations_total,
            mining_duration_seconds,
        })
    }

    /// Folds one node event into the metrics.
    pub fn observe(&self, event: &NodeEvent) {
        match event {
            NodeEvent::BlockAccepted { number, .. } => {
                self.blocks_accepted_total.inc();
                self.block_height.set(*number as i64);
            }
            NodeEvent::BlockMined { elapsed_ms, .. } => {
                self.blocks_mined_total.inc();
                self.mining_duration_seconds
                    .observe(*elapsed_ms as f64 / 1_000.0);
            }
            NodeEvent::TransactionAccepted { pool_size, .. } => {
                self.transactions_accepted_total.inc();
                self.transactions_in_mempool.set(*pool_size as i64);
            }
            NodeEvent::Reorganizing { .. } => {
                self.reorganizations_total.inc();
                self.block_height.set(0);
            }
            NodeEvent::Synced { latest_number } => self.block_height.set(*latest_number as i64),
            NodeEvent::PeerAdded { .. } => self.known_peers.inc(),
            NodeEvent::PeerRemoved { .. } => self.known_peers.dec(),
            NodeEvent::MiningStarted { .. } | NodeEvent::MiningProgress { .. } => {}
        }
    }

    /// Sets gauges that events cannot track exactly.
    pub fn refresh(&self, node: &NodeState) {
        self.block_height.set(node.latest_block().number() as i64);
        self.transactions_in_mempool.set(node.mempool_count() as i64);
        self.known_peers.set(node.known_external_peers().len() as i64);
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Feeds the node's event stream into `metrics` until the stream closes.
pub fn spawn_recorder(
    metrics: SharedMetrics,
    node: Arc<NodeState>,
) -> tokio::task::JoinHandle<()> {
    let mut events = node.subscribe();
    tokio::spawn(async move {
        metrics.refresh(&node);
        loop {
            match events.recv().await {
                Ok(event) => {
                    metrics.observe(&event);
                    if matches!(event, NodeEvent::BlockAccepted { .. }) {
                        metrics.refresh(&node);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "metrics recorder lagged");
                    metrics.refresh(&node);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
