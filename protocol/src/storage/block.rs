//! # Block Structure
//!
//! A block is a header plus an ordered list of transactions committed to by
//! the header's Merkle root. Blocks link to their parent by hash and are
//! sealed by proof of work: the header hash must start with `difficulty`
//! zero hex nibbles.
//!
//! ## Block Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  BlockHeader                                │
//! │  ├── number: u64                            │
//! │  ├── parent_hash: [u8; 32]                  │
//! │  ├── beneficiary: Account                   │
//! │  ├── difficulty: u16     (zero nibbles)     │
//! │  ├── mining_reward: u64                     │
//! │  ├── total_tip / total_gas: u64             │
//! │  ├── timestamp: u64      (ms)               │
//! │  ├── nonce: u64          (PoW search space) │
//! │  └── trans_root: [u8; 32] (Merkle root)     │
//! ├─────────────────────────────────────────────┤
//! │  transactions: Vec<BlockTx>                 │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! The block hash is BLAKE3 over every header field in declaration order,
//! integers little-endian. Block number 0 is the genesis placeholder that
//! heads an empty chain; its hash is all zeros by definition.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Genesis, POW_PROGRESS_INTERVAL};
use crate::crypto::hash::{blake3_hash, leading_zero_nibbles, to_hex_prefixed};
use crate::crypto::keys::Account;
use crate::events::{EventSink, NodeEvent};
use crate::transaction::BlockTx;

use super::ledger::{Ledger, LedgerError};
use super::merkle::MerkleTree;

/// Hash of the genesis placeholder and parent of block 1.
pub const ZERO_HASH: [u8; 32] = [0u8; 32];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    /// The candidate builds on a chain we do not have.
    #[error("chain forked: block {number} does not extend local head {head}")]
    ChainForked { number: u64, head: u64 },

    #[error("invalid difficulty {difficulty}: {reason}")]
    InvalidDifficulty { difficulty: u16, reason: String },

    #[error("invalid block number: expected {expected}, got {got}")]
    InvalidNumber { expected: u64, got: u64 },

    #[error("parent hash mismatch: expected {expected}, got {got}")]
    InvalidParentHash { expected: String, got: String },

    #[error("block timestamp {got} precedes parent timestamp {parent}")]
    InvalidTimestamp { parent: u64, got: u64 },

    #[error("block carries {count} transactions, capacity is {capacity}")]
    TooManyTransactions { count: usize, capacity: usize },

    #[error("transaction root does not match the block's transactions")]
    InvalidTransactionRoot,

    #[error("header totals do not match the block's transactions")]
    InvalidTotals,

    #[error("mining reward mismatch: expected {expected}, got {got}")]
    InvalidMiningReward { expected: u64, got: u64 },

    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] LedgerError),

    #[error("proof of work cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// BlockHeader
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    #[serde(with = "hex::serde")]
    pub parent_hash: [u8; 32],
    /// Receives fees and the mining reward.
    pub beneficiary: Account,
    /// Required leading zero hex nibbles of the block hash.
    pub difficulty: u16,
    pub mining_reward: u64,
    pub total_tip: u64,
    pub total_gas: u64,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: u64,
    pub nonce: u64,
    #[serde(with = "hex::serde")]
    pub trans_root: [u8; 32],
}

impl BlockHeader {
    pub fn hash(&self) -> [u8; 32] {
        if self.number == 0 {
            return ZERO_HASH;
        }
        blake3_hash(&self.preimage())
    }

    fn preimage(&self) -> Vec<u8> {
        let mut preimage = Vec::with_capacity(160);
        preimage.extend_from_slice(&self.number.to_le_bytes());
        preimage.extend_from_slice(&self.parent_hash);
        preimage.extend_from_slice(self.beneficiary.as_str().as_bytes());
        preimage.extend_from_slice(&self.difficulty.to_le_bytes());
        preimage.extend_from_slice(&self.mining_reward.to_le_bytes());
        preimage.extend_from_slice(&self.total_tip.to_le_bytes());
        preimage.extend_from_slice(&self.total_gas.to_le_bytes());
        preimage.extend_from_slice(&self.timestamp.to_le_bytes());
        preimage.extend_from_slice(&self.nonce.to_le_bytes());
        preimage.extend_from_slice(&self.trans_root);
        preimage
    }
}

/// Whether `hash` carries at least `difficulty` leading zero nibbles.
pub fn is_hash_solved(difficulty: u16, hash: &[u8; 32]) -> bool {
    leading_zero_nibbles(hash) >= u32::from(difficulty)
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<BlockTx>,
}

/// Everything needed to assemble a candidate block.
#[derive(Clone, Debug)]
pub struct BlockArgs {
    pub beneficiary: Account,
    pub difficulty: u16,
    pub mining_reward: u64,
    /// Maximum transactions per block.
    pub capacity: usize,
    pub parent: BlockHeader,
    pub transactions: Vec<BlockTx>,
}

impl Block {
    /// The placeholder at number 0 that heads an empty chain.
    pub fn genesis(genesis: &Genesis, difficulty: u16) -> Self {
        Block {
            header: BlockHeader {
                number: 0,
                parent_hash: ZERO_HASH,
                beneficiary: Account::zero(),
                difficulty,
                mining_reward: genesis.mining_reward,
                total_tip: 0,
                total_gas: 0,
                timestamp: genesis.timestamp_millis(),
                nonce: 0,
                trans_root: ZERO_HASH,
            },
            transactions: Vec::new(),
        }
    }

    /// Assembles an unsolved block on top of `args.parent`.
    pub fn new(args: BlockArgs) -> Result<Self, BlockError> {
        if args.transactions.len() > args.capacity {
            return Err(BlockError::TooManyTransactions {
                count: args.transactions.len(),
                capacity: args.capacity,
            });
        }

        let (total_tip, total_gas) = totals(&args.transactions);
        let trans_root = MerkleTree::new(args.transactions.clone()).root();
        let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();

        Ok(Block {
            header: BlockHeader {
                number: args.parent.number + 1,
                parent_hash: args.parent.hash(),
                beneficiary: args.beneficiary,
                difficulty: args.difficulty,
                mining_reward: args.mining_reward,
                total_tip,
                total_gas,
                // Never earlier than the parent, even under clock skew.
                timestamp: now.max(args.parent.timestamp),
                nonce: 0,
                trans_root,
            },
            transactions: args.transactions,
        })
    }

    /// Assembles and solves a block. Returns the block and the time spent
    /// solving it.
    pub fn pow(
        args: BlockArgs,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<(Self, Duration), BlockError> {
        let mut block = Block::new(args)?;
        let elapsed = block.perform_pow(cancel, events)?;
        Ok((block, elapsed))
    }

    /// Searches for a nonce that satisfies the header's difficulty.
    ///
    /// Starts from a random nonce so that competing miners do not walk the
    /// same sequence. The cancellation token is polled on every attempt.
    pub fn perform_pow(
        &mut self,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<Duration, BlockError> {
        let started = Instant::now();
        let number = self.header.number;
        let mut nonce: u64 = rand::random();
        let mut attempts: u64 = 0;

        events.emit(NodeEvent::MiningStarted {
            number,
            tx_count: self.transactions.len(),
            difficulty: self.header.difficulty,
        });

        loop {
            if cancel.is_cancelled() {
                debug!(number, attempts, "proof of work cancelled");
                return Err(BlockError::Cancelled);
            }

            self.header.nonce = nonce;
            if is_hash_solved(self.header.difficulty, &self.header.hash()) {
                let elapsed = started.elapsed();
                info!(
                    number,
                    attempts,
                    nonce,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "proof of work solved"
                );
                return Ok(elapsed);
            }

            attempts += 1;
            nonce = nonce.wrapping_add(1);

            if attempts % POW_PROGRESS_INTERVAL == 0 {
                events.emit(NodeEvent::MiningProgress { number, attempts });
            }
        }
    }

    /// Checks that this block may follow `parent` and returns the ledger as
    /// it stands after the block. `ledger` itself is never modified.
    ///
    /// Checks run in this order, and the first failure wins:
    ///
    /// 1. Fork: more than one block ahead and not linked to `parent`.
    /// 2. Difficulty: not below the parent's, and the hash satisfies it.
    /// 3. Number, parent hash, and timestamp linkage.
    /// 4. Capacity, Merkle root, header totals, and mining reward.
    /// 5. Replay of every transaction plus the reward on a copy of `ledger`.
    pub fn validate(
        &self,
        parent: &Block,
        ledger: &Ledger,
        capacity: usize,
    ) -> Result<Ledger, BlockError> {
        let header = &self.header;
        let expected_number = parent.header.number + 1;
        let parent_hash = parent.hash();

        if header.number > expected_number && header.parent_hash != parent_hash {
            return Err(BlockError::ChainForked {
                number: header.number,
                head: parent.header.number,
            });
        }

        if header.difficulty < parent.header.difficulty {
            return Err(BlockError::InvalidDifficulty {
                difficulty: header.difficulty,
                reason: format!("below the parent's {}", parent.header.difficulty),
            });
        }

        if !is_hash_solved(header.difficulty, &self.hash()) {
            return Err(BlockError::InvalidDifficulty {
                difficulty: header.difficulty,
                reason: "hash does not carry enough leading zeros".into(),
            });
        }

        if header.number != expected_number {
            return Err(BlockError::InvalidNumber {
                expected: expected_number,
                got: header.number,
            });
        }

        if header.parent_hash != parent_hash {
            return Err(BlockError::InvalidParentHash {
                expected: to_hex_prefixed(&parent_hash),
                got: to_hex_prefixed(&header.parent_hash),
            });
        }

        if header.timestamp < parent.header.timestamp {
            return Err(BlockError::InvalidTimestamp {
                parent: parent.header.timestamp,
                got: header.timestamp,
            });
        }

        if self.transactions.len() > capacity {
            return Err(BlockError::TooManyTransactions {
                count: self.transactions.len(),
                capacity,
            });
        }

        if self.merkle_tree().root() != header.trans_root {
            return Err(BlockError::InvalidTransactionRoot);
        }

        if totals(&self.transactions) != (header.total_tip, header.total_gas) {
            return Err(BlockError::InvalidTotals);
        }

        if header.mining_reward != ledger.mining_reward() {
            return Err(BlockError::InvalidMiningReward {
                expected: ledger.mining_reward(),
                got: header.mining_reward,
            });
        }

        let mut scratch = ledger.clone();
        for tx in &self.transactions {
            scratch.apply_transaction(&header.beneficiary, tx)?;
        }
        scratch.apply_mining_reward(&header.beneficiary);

        debug!(number = header.number, tx_count = self.transactions.len(), "block validated");
        Ok(scratch)
    }

    pub fn hash(&self) -> [u8; 32] {
        self.header.hash()
    }

    /// `0x`-prefixed hex block hash.
    pub fn hash_hex(&self) -> String {
        to_hex_prefixed(&self.hash())
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn merkle_tree(&self) -> MerkleTree<BlockTx> {
        MerkleTree::new(self.transactions.clone())
    }

    /// Whether `account` mined this block or sent or received in it.
    pub fn involves(&self, account: &Account) -> bool {
        if &self.header.beneficiary == account {
            return true;
        }
        self.transactions.iter().any(|tx| {
            tx.to() == account || tx.from_account().map_or(false, |from| &from == account)
        })
    }
}

fn totals(transactions: &[BlockTx]) -> (u64, u64) {
    transactions.iter().fold((0u64, 0u64), |(tip, gas), tx| {
        (tip.saturating_add(tx.tip()), gas.saturating_add(tx.gas()))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
