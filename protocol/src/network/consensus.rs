//! # Consensus Rules
//!
//! Ember nodes agree on who may extend the chain in one of two ways.
//!
//! 1. **Proof of Work**: any node may mine once it has pending
//!    transactions. A block is valid when its hash has at least the genesis
//!    difficulty in leading zero nibbles. Competing blocks race; the first
//!    one a node accepts wins and the loser's miner is cancelled.
//!
//! 2. **Proof of Authority**: time is cut into fixed cycles aligned to
//!    wall-clock multiples of the cycle length. At each tick every node
//!    computes the same leader from the chain head and the sorted host list;
//!    only the leader mines, and its blocks carry difficulty 0.
//!
//! ## Leader Selection
//!
//! ```text
//! hosts  = sort(self ∪ known peers)
//! seed   = u64::from_be_bytes(BLAKE3(head_hash)[0..8])
//! leader = hosts[seed mod len(hosts)]
//! ```
//!
//! Hashing the head means the leader rotates with every block, yet every
//! node that agrees on the head agrees on the leader.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::hash::blake3_hash;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown consensus `{0}` (expected `pow` or `poa`)")]
pub struct UnknownConsensus(pub String);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusKind {
    #[default]
    Pow,
    Poa,
}

impl ConsensusKind {
    /// Difficulty stamped on blocks mined under this rule.
    pub fn block_difficulty(self, genesis_difficulty: u16) -> u16 {
        match self {
            ConsensusKind::Pow => genesis_difficulty,
            ConsensusKind::Poa => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConsensusKind::Pow => "pow",
            ConsensusKind::Poa => "poa",
        }
    }
}

impl fmt::Display for ConsensusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsensusKind {
    type Err = UnknownConsensus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pow" => Ok(ConsensusKind::Pow),
            "poa" => Ok(ConsensusKind::Poa),
            other => Err(UnknownConsensus(other.to_string())),
        }
    }
}

/// Picks the PoA leader for the cycle following `head_hash`.
///
/// Returns `None` when `hosts` is empty. Input order does not matter.
pub fn select_leader(head_hash: &[u8; 32], hosts: &[String]) -> Option<String> {
    if hosts.is_empty() {
        return None;
    }
    let mut sorted = hosts.to_vec();
    sorted.sort();
    sorted.dedup();

    let digest = blake3_hash(head_hash);
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    let index = u64::from_be_bytes(seed) % sorted.len() as u64;

    sorted.into_iter().nth(index as usize)
}

/// Time from `since_epoch` until the next multiple of `cycle`.
pub fn next_cycle_delay(since_epoch: Duration, cycle: Duration) -> Duration {
    let cycle_ms = cycle.as_millis().max(1);
    let into_cycle = since_epoch.as_millis() % cycle_ms;
    Duration::from_millis((cycle_ms - into_cycle) as u64)
}
