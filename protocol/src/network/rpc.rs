//! # Peer RPC Definitions
//!
//! What one node asks of another, independent of how the bytes travel. The
//! worker talks to peers only through [`PeerClient`]; the node binary
//! implements it over HTTP and serves the matching routes with axum. The
//! protocol crate stays transport-agnostic, and tests wire nodes together
//! in-process.
//!
//! ## Route Index
//!
//! | Route                                  | Method | Body / Reply              |
//! |----------------------------------------|--------|---------------------------|
//! | `/v1/node/status`                      | GET    | → [`PeerStatus`]          |
//! | `/v1/node/tx/list`                     | GET    | → `[BlockTx]`             |
//! | `/v1/node/block/list/{from}/latest`    | GET    | → `[Block]`               |
//! | `/v1/node/block/propose`               | POST   | `Block` → [`Acknowledgement`] |
//! | `/v1/node/tx/submit`                   | POST   | `BlockTx` → [`Acknowledgement`] |
//! | `/v1/node/peers`                       | POST   | `Peer` → [`Acknowledgement`] |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::storage::block::Block;
use crate::transaction::BlockTx;

use super::peers::Peer;

pub const STATUS_PATH: &str = "/v1/node/status";
pub const MEMPOOL_PATH: &str = "/v1/node/tx/list";
pub const BLOCKS_PATH: &str = "/v1/node/block/list/:from/latest";
pub const PROPOSE_BLOCK_PATH: &str = "/v1/node/block/propose";
pub const SUBMIT_TX_PATH: &str = "/v1/node/tx/submit";
pub const ANNOUNCE_PATH: &str = "/v1/node/peers";

/// Concrete path for fetching every block from `from` onwards.
pub fn blocks_from_path(from: u64) -> String {
    format!("/v1/node/block/list/{from}/latest")
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A node's answer to a status request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    /// `0x`-prefixed hash of the node's chain head.
    pub latest_block_hash: String,
    pub latest_block_number: u64,
    pub known_peers: Vec<Peer>,
}

/// Reply to a pushed block, transaction, or announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Acknowledgement {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error("peer {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("peer {host} rejected the request with status {status}: {body}")]
    Rejected {
        host: String,
        status: u16,
        body: String,
    },

    #[error("peer {host} sent an undecodable reply: {reason}")]
    Decode { host: String, reason: String },

    #[error("peer {host} timed out")]
    Timeout { host: String },
}

// ---------------------------------------------------------------------------
// PeerClient
// ---------------------------------------------------------------------------

/// Outbound calls to one peer at a time. Implementations enforce their own
/// per-request timeout.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn status(&self, peer: &Peer) -> Result<PeerStatus, PeerError>;

    async fn mempool(&self, peer: &Peer) -> Result<Vec<BlockTx>, PeerError>;

    /// Every block numbered `from` or above, ascending.
    async fn blocks_from(&self, peer: &Peer, from: u64) -> Result<Vec<Block>, PeerError>;

    async fn propose_block(&self, peer: &Peer, block: &Block) -> Result<Acknowledgement, PeerError>;

    async fn submit_transaction(
        &self,
        peer: &Peer,
        tx: &BlockTx,
    ) -> Result<Acknowledgement, PeerError>;

    /// Tells `peer` that `me` exists.
    async fn announce(&self, peer: &Peer, me: &Peer) -> Result<Acknowledgement, PeerError>;
}
