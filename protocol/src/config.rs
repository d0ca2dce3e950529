//! # Node Configuration & Constants
//!
//! Every tunable of an Ember node lives here: the genesis document that all
//! peers on a chain must agree on, and the per-node runtime knobs (cycle
//! durations, queue capacities, timeouts) that each operator may pick freely.
//!
//! The genesis file is read once at startup and never written back. Two
//! nodes with different genesis documents are on different chains, full stop.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::keys::Account;
use crate::network::consensus::ConsensusKind;
use crate::network::mempool::MempoolConfig;
use crate::network::peers::Peer;
use crate::network::selector::Strategy;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Reported by `ember-node version` and the status endpoint.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Mining
// ---------------------------------------------------------------------------

/// Gas units charged for a plain value transfer.
pub const ONE_UNIT_OF_GAS: u64 = 1;

/// Nonce attempts between two `MiningProgress` events.
pub const POW_PROGRESS_INTERVAL: u64 = 1_000_000;

/// Hex nibbles in a 32-byte hash; no difficulty may exceed it.
pub const MAX_DIFFICULTY: u16 = 64;

/// Proof-of-Authority cycle length. Cycles start on wall-clock multiples of
/// this value so every node agrees on the boundaries without talking.
pub const DEFAULT_POA_CYCLE: Duration = Duration::from_secs(12);

// ---------------------------------------------------------------------------
// Networking
// ---------------------------------------------------------------------------

/// How often the discovery loop polls known peers.
pub const DEFAULT_PEER_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Hard ceiling for any single request to a peer.
pub const DEFAULT_PEER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the outbound transaction-share queue. Shares beyond this are
/// dropped; peers will pick the transaction up on their next resync.
pub const DEFAULT_SHARE_TX_CAPACITY: usize = 100;

/// Broadcast capacity for [`crate::events::NodeEvent`] subscribers.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default address the node advertises to peers.
pub const DEFAULT_HOST: &str = "127.0.0.1:9080";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading or checking configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse genesis document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Genesis
// ---------------------------------------------------------------------------

/// The chain-wide parameters every peer must share.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    /// Creation date; also the timestamp of the genesis placeholder block.
    pub date: DateTime<Utc>,
    /// Stamped into every transaction so signatures cannot be replayed
    /// across chains.
    pub chain_id: u16,
    /// Target (and maximum) number of transactions per block.
    pub trans_per_block: u16,
    /// Leading zero hex nibbles a PoW block hash must carry.
    pub difficulty: u16,
    /// Credited to the beneficiary of every accepted block.
    pub mining_reward: u64,
    /// Price of one gas unit, charged on top of the tip.
    pub gas_price: u64,
    /// Opening balances.
    pub balances: BTreeMap<Account, u64>,
}

impl Genesis {
    /// Reads and validates a genesis document from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parses and validates a genesis document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let genesis: Genesis = serde_json::from_str(raw)?;
        genesis.validate()?;
        Ok(genesis)
    }

    /// Rejects parameter combinations no node could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trans_per_block == 0 {
            return Err(ConfigError::Invalid(
                "trans_per_block must be at least 1".into(),
            ));
        }
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "difficulty {} exceeds the maximum of {}",
                self.difficulty, MAX_DIFFICULTY
            )));
        }
        Ok(())
    }

    /// Genesis creation time in milliseconds since the UNIX epoch.
    pub fn timestamp_millis(&self) -> u64 {
        u64::try_from(self.date.timestamp_millis()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Per-node runtime configuration.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// `ip:port` this node advertises to peers. Doubles as its identity in
    /// the peer set and in PoA leader selection.
    pub host: String,
    /// Account credited with fees and mining rewards.
    pub beneficiary: Account,
    pub consensus: ConsensusKind,
    pub strategy: Strategy,
    /// Seed peers; the discovery loop grows the set from here.
    pub known_peers: Vec<Peer>,
    pub peer_update_interval: Duration,
    pub poa_cycle: Duration,
    pub share_tx_capacity: usize,
    pub peer_request_timeout: Duration,
    pub mempool: MempoolConfig,
}

impl NodeConfig {
    /// A config with defaults for everything but the beneficiary.
    pub fn new(beneficiary: Account) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            beneficiary,
            consensus: ConsensusKind::default(),
            strategy: Strategy::default(),
            known_peers: Vec::new(),
            peer_update_interval: DEFAULT_PEER_UPDATE_INTERVAL,
            poa_cycle: DEFAULT_POA_CYCLE,
            share_tx_capacity: DEFAULT_SHARE_TX_CAPACITY,
            peer_request_timeout: DEFAULT_PEER_REQUEST_TIMEOUT,
            mempool: MempoolConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
