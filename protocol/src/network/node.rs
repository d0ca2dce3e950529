//! # Node State
//!
//! `NodeState` is the single owner of a node's chain: the ledger, the head
//! block, the mempool, and the known-peer set. Everything that changes the
//! chain goes through its methods, and every ledger mutation happens under
//! one mutex, so block applies are linearized no matter whether the block
//! was mined locally, proposed by a peer, or fetched during a resync.
//!
//! A node is in one of two modes:
//!
//! ```text
//!            ChainForked / InvalidDifficulty
//!   Normal ───────────────────────────────────▶ Resyncing
//!     ▲        (ledger reset, storage wiped)        │
//!     └──────────────── finish_resync() ◀───────────┘
//! ```
//!
//! While resyncing, local mining and peer proposals are refused; blocks
//! fetched from peers are replayed one at a time through the same
//! validation path as live blocks.
//!
//! Fork detection runs before the proof-of-work check, so any block numbered
//! more than one past our head sends the node into a full reset, solved or
//! not. Peers are trusted: the peer router must only be reachable by other
//! nodes of the network, never exposed publicly.
//!
//! The mutex is a `parking_lot::Mutex` and is never held across an
//! `.await`. Proof of work runs on a blocking thread with the lock released;
//! the solved block is validated again under the lock before it is applied.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Genesis, NodeConfig, ONE_UNIT_OF_GAS};
use crate::crypto::keys::Account;
use crate::events::{EventSink, NodeEvent};
use crate::network::consensus::select_leader;
use crate::network::mempool::{Mempool, MempoolError};
use crate::network::peers::{Peer, PeerSet};
use crate::network::rpc::PeerStatus;
use crate::network::worker::{self, Signals, WorkerChannels};
use crate::storage::block::{Block, BlockArgs, BlockError};
use crate::storage::db::{DbError, Storage};
use crate::storage::ledger::{AccountRecord, Ledger, LedgerError};
use crate::transaction::{BlockTx, SignedTx};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// How the caller should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input. Reject it; never retry.
    Validation,
    /// The chain has diverged. Reorganize.
    Consensus,
    /// Nothing to do right now. Skip the cycle.
    Resource,
    /// A peer misbehaved or vanished. Evict it and continue.
    Network,
    /// Work was cancelled on purpose.
    Cancellation,
    Storage,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("no transactions to mine")]
    NoTransactions,

    #[error("node is resyncing")]
    Resyncing,

    #[error("mining cancelled")]
    Cancelled,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Mempool(#[from] MempoolError),

    #[error(transparent)]
    Block(BlockError),

    #[error("storage: {0}")]
    Storage(#[from] DbError),

    #[error("internal: {0}")]
    Internal(String),
}

impl From<BlockError> for StateError {
    fn from(err: BlockError) -> Self {
        match err {
            BlockError::Cancelled => StateError::Cancelled,
            other => StateError::Block(other),
        }
    }
}

impl StateError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StateError::Ledger(_) | StateError::Mempool(_) => ErrorCategory::Validation,
            StateError::Block(BlockError::ChainForked { .. })
            | StateError::Block(BlockError::InvalidDifficulty { .. }) => ErrorCategory::Consensus,
            StateError::Block(_) => ErrorCategory::Validation,
            StateError::NoTransactions | StateError::Resyncing => ErrorCategory::Resource,
            StateError::Cancelled => ErrorCategory::Cancellation,
            StateError::Storage(_) => ErrorCategory::Storage,
            StateError::Internal(_) => ErrorCategory::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeState
// ---------------------------------------------------------------------------

/// Everything [`NodeState::new`] needs.
pub struct NodeArgs {
    pub config: NodeConfig,
    pub genesis: Genesis,
    pub storage: Arc<dyn Storage>,
    pub events: EventSink,
}

struct ChainState {
    ledger: Ledger,
    latest_block: Block,
    mining_allowed: bool,
}

pub struct NodeState {
    config: NodeConfig,
    genesis: Genesis,
    /// Difficulty the chain requires, stamped on the genesis placeholder.
    difficulty: u16,
    /// Difficulty the local miner solves at.
    mining_difficulty: u16,
    capacity: usize,
    chain: Mutex<ChainState>,
    mempool: Mempool,
    peers: PeerSet,
    storage: Arc<dyn Storage>,
    signals: Signals,
    events: EventSink,
}

impl NodeState {
    /// Rebuilds the ledger by replaying stored blocks and seeds the peer set.
    ///
    /// The returned channels must be handed to [`worker::Worker::run`] for
    /// mining, broadcast, and resync to happen.
    pub fn new(args: NodeArgs) -> Result<(Arc<Self>, WorkerChannels), StateError> {
        Self::build(args, None)
    }

    fn build(
        args: NodeArgs,
        mining_difficulty: Option<u16>,
    ) -> Result<(Arc<Self>, WorkerChannels), StateError> {
        let NodeArgs {
            config,
            genesis,
            storage,
            events,
        } = args;

        let difficulty = config.consensus.block_difficulty(genesis.difficulty);
        let capacity = usize::from(genesis.trans_per_block);

        let mut ledger = Ledger::new(&genesis);
        let mut latest_block = Block::genesis(&genesis, difficulty);
        for block in storage.for_each() {
            let block = block?;
            ledger = block.validate(&latest_block, &ledger, capacity)?;
            latest_block = block;
        }

        let peers = PeerSet::new();
        for peer in &config.known_peers {
            if !peer.is_host(&config.host) {
                peers.add(peer.clone());
            }
        }

        let (signals, channels) = worker::channels(config.share_tx_capacity);

        info!(
            host = %config.host,
            latest_block = latest_block.number(),
            peers = peers.len(),
            "node state loaded"
        );

        let state = Arc::new(Self {
            mempool: Mempool::new(config.mempool.clone()),
            mining_difficulty: mining_difficulty.unwrap_or(difficulty),
            config,
            genesis,
            difficulty,
            capacity,
            chain: Mutex::new(ChainState {
                ledger,
                latest_block,
                mining_allowed: true,
            }),
            peers,
            storage,
            signals,
            events,
        });
        Ok((state, channels))
    }

    /// A node whose own miner can never solve a block. For exercising
    /// cancellation.
    #[cfg(test)]
    pub(crate) fn new_unsolvable_miner(
        args: NodeArgs,
    ) -> Result<(Arc<Self>, WorkerChannels), StateError> {
        Self::build(args, Some(crate::config::MAX_DIFFICULTY))
    }

    // -- Transactions -------------------------------------------------------

    /// Admits a transaction signed by a wallet and queues it for broadcast.
    pub fn upsert_wallet_transaction(&self, signed: SignedTx) -> Result<BlockTx, StateError> {
        let tx = BlockTx::new(signed, self.genesis.gas_price, ONE_UNIT_OF_GAS);
        self.admit(tx.clone())?;
        self.signals.share_tx(tx.clone());
        Ok(tx)
    }

    /// Admits a transaction relayed by another node. Not re-shared.
    pub fn upsert_node_transaction(&self, tx: BlockTx) -> Result<usize, StateError> {
        self.admit(tx)
    }

    fn admit(&self, tx: BlockTx) -> Result<usize, StateError> {
        let from = self.chain.lock().ledger.validate_transaction(&tx)?;

        let key = tx.unique_key();
        let to = tx.to().to_string();
        let value = tx.value();
        let pool_size = self.mempool.upsert(tx)?;

        debug!(%key, %from, pool_size, "transaction admitted");
        self.events.emit(NodeEvent::TransactionAccepted {
            key,
            from: from.to_string(),
            to,
            value,
            pool_size,
        });

        if pool_size >= self.capacity {
            self.signals.start_mining();
        }
        Ok(pool_size)
    }

    // -- Blocks -------------------------------------------------------------

    /// Selects, solves, and applies a block from the mempool.
    ///
    /// Transactions that no longer apply on top of the current ledger are
    /// evicted instead of mined. A block solved after `cancel` fired is
    /// discarded.
    pub async fn mine_new_block(&self, cancel: &CancellationToken) -> Result<Block, StateError> {
        let args = self.prepare_block()?;
        let tx_count = args.transactions.len();

        let token = cancel.clone();
        let events = self.events.clone();
        let (block, elapsed) =
            tokio::task::spawn_blocking(move || Block::pow(args, &token, &events))
                .await
                .map_err(|e| StateError::Internal(format!("proof of work task: {e}")))??;

        if cancel.is_cancelled() {
            debug!(number = block.number(), "discarding block solved after cancellation");
            return Err(StateError::Cancelled);
        }

        self.commit_block(&block, true)?;

        self.events.emit(NodeEvent::BlockMined {
            number: block.number(),
            hash: block.hash_hex(),
            tx_count,
            elapsed_ms: elapsed.as_millis() as u64,
        });
        Ok(block)
    }

    fn prepare_block(&self) -> Result<BlockArgs, StateError> {
        let chain = self.chain.lock();
        if !chain.mining_allowed {
            return Err(StateError::Resyncing);
        }
        if self.mempool.is_empty() {
            return Err(StateError::NoTransactions);
        }

        let beneficiary = &self.config.beneficiary;
        let mut scratch = chain.ledger.clone();
        let mut transactions = Vec::new();
        for tx in self.mempool.pick_best(self.config.strategy, Some(self.capacity)) {
            match scratch.apply_transaction(beneficiary, &tx) {
                Ok(()) => transactions.push(tx),
                Err(err) => {
                    warn!(key = %tx.unique_key(), %err, "evicting transaction that no longer applies");
                    self.mempool.delete(&tx);
                }
            }
        }
        if transactions.is_empty() {
            return Err(StateError::NoTransactions);
        }

        Ok(BlockArgs {
            beneficiary: beneficiary.clone(),
            difficulty: self.mining_difficulty,
            mining_reward: self.genesis.mining_reward,
            capacity: self.capacity,
            parent: chain.latest_block.header.clone(),
            transactions,
        })
    }

    /// Applies a block proposed by a peer once local mining has stopped.
    pub async fn mine_peer_block(&self, block: Block) -> Result<(), StateError> {
        let _pause = self.signals.pause_mining().await;
        self.commit_block(&block, false)
    }

    /// Entry point for blocks pushed by peers. A block that shows our chain
    /// has diverged triggers a reorganization.
    pub async fn process_proposed_block(&self, block: Block) -> Result<(), StateError> {
        if !self.chain.lock().mining_allowed {
            return Err(StateError::Resyncing);
        }

        let number = block.number();
        match self.mine_peer_block(block).await {
            Err(err) if err.category() == ErrorCategory::Consensus => {
                warn!(number, %err, "proposed block disagrees with local chain");
                self.reorganize(&err.to_string());
                Err(err)
            }
            other => other,
        }
    }

    /// Validates `block` against the head and, if it passes, persists it and
    /// makes it the new head. `local` blocks are refused while resyncing.
    fn commit_block(&self, block: &Block, local: bool) -> Result<(), StateError> {
        let mut chain = self.chain.lock();
        if local && !chain.mining_allowed {
            return Err(StateError::Resyncing);
        }

        let next = block.validate(&chain.latest_block, &chain.ledger, self.capacity)?;
        self.storage.write(block)?;
        chain.ledger = next;
        chain.latest_block = block.clone();

        for tx in &block.transactions {
            self.mempool.delete(tx);
        }
        // Anything else pending from these senders at or below their new
        // nonce can never be mined.
        for tx in &block.transactions {
            let Ok(sender) = tx.from_account() else {
                continue;
            };
            let current = chain.ledger.query(&sender).nonce;
            for stale in self.mempool.pending_for_account(&sender) {
                if stale.nonce() <= current {
                    self.mempool.delete(&stale);
                }
            }
        }
        drop(chain);

        info!(
            number = block.number(),
            hash = %block.hash_hex(),
            tx_count = block.tx_count(),
            local,
            "block accepted"
        );
        self.events.emit(NodeEvent::BlockAccepted {
            number: block.number(),
            hash: block.hash_hex(),
            tx_count: block.tx_count(),
            beneficiary: block.header.beneficiary.to_string(),
        });
        Ok(())
    }

    // -- Resync -------------------------------------------------------------

    /// Throws away the local chain and asks the worker to rebuild it from
    /// peers. The mempool is kept; its contents are revalidated at mining
    /// time.
    pub fn reorganize(&self, reason: &str) {
        {
            let mut chain = self.chain.lock();
            chain.mining_allowed = false;
            chain.ledger.reset();
            chain.latest_block = Block::genesis(&self.genesis, self.difficulty);
            if let Err(err) = self.storage.reset() {
                error!(%err, "failed to clear block storage during reorganization");
            }
        }

        warn!(reason, "reorganizing: chain reset to genesis");
        self.events.emit(NodeEvent::Reorganizing {
            reason: reason.to_string(),
        });
        self.signals.request_resync();
    }

    /// Disables local mining until [`finish_resync`](Self::finish_resync).
    pub fn begin_resync(&self) {
        self.chain.lock().mining_allowed = false;
    }

    /// Re-enables mining after a resync.
    pub fn finish_resync(&self) {
        let latest_number = {
            let mut chain = self.chain.lock();
            chain.mining_allowed = true;
            chain.latest_block.number()
        };

        info!(latest_number, "resync complete");
        self.events.emit(NodeEvent::Synced { latest_number });
        if !self.mempool.is_empty() {
            self.signals.start_mining();
        }
    }

    pub fn is_mining_allowed(&self) -> bool {
        self.chain.lock().mining_allowed
    }

    // -- Peers --------------------------------------------------------------

    /// Every known peer except this node.
    pub fn known_external_peers(&self) -> Vec<Peer> {
        self.peers.copy(Some(&self.config.host))
    }

    /// Adds a peer; returns `false` for this node itself or a known peer.
    pub fn add_known_peer(&self, peer: Peer) -> bool {
        if peer.is_host(&self.config.host) {
            return false;
        }
        let host = peer.host.clone();
        let added = self.peers.add(peer);
        if added {
            info!(%host, "peer added");
            self.events.emit(NodeEvent::PeerAdded { host });
        }
        added
    }

    pub fn remove_known_peer(&self, peer: &Peer) -> bool {
        let removed = self.peers.remove(peer);
        if removed {
            info!(host = %peer.host, "peer removed");
            self.events.emit(NodeEvent::PeerRemoved {
                host: peer.host.clone(),
            });
        }
        removed
    }

    /// Host that should mine the next PoA block.
    pub fn poa_leader(&self) -> Option<String> {
        let head = self.chain.lock().latest_block.hash();
        let mut hosts: Vec<String> = self
            .known_external_peers()
            .into_iter()
            .map(|peer| peer.host)
            .collect();
        hosts.push(self.config.host.clone());
        select_leader(&head, &hosts)
    }

    // -- Queries ------------------------------------------------------------

    pub fn accounts(&self) -> BTreeMap<Account, AccountRecord> {
        self.chain.lock().ledger.copy().into_iter().collect()
    }

    pub fn query_account(&self, account: &Account) -> AccountRecord {
        self.chain.lock().ledger.query(account)
    }

    pub fn total_supply(&self) -> u128 {
        self.chain.lock().ledger.total_supply()
    }

    pub fn latest_block(&self) -> Block {
        self.chain.lock().latest_block.clone()
    }

    /// Stored blocks numbered `from..=to`; `to = None` means the head.
    pub fn query_blocks_by_number(
        &self,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<Block>, StateError> {
        let latest = self.chain.lock().latest_block.number();
        let to = to.map_or(latest, |to| to.min(latest));
        let from = from.max(1);
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self.storage.blocks_in_range(from, to)?)
    }

    /// Stored blocks `account` mined, sent in, or received in.
    pub fn query_blocks_by_account(&self, account: &Account) -> Result<Vec<Block>, StateError> {
        let mut blocks = Vec::new();
        for block in self.storage.for_each() {
            let block = block?;
            if block.involves(account) {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }

    pub fn mempool(&self) -> Vec<BlockTx> {
        self.mempool.copy()
    }

    pub fn mempool_count(&self) -> usize {
        self.mempool.count()
    }

    pub fn status(&self) -> PeerStatus {
        let latest = self.latest_block();
        PeerStatus {
            latest_block_hash: latest.hash_hex(),
            latest_block_number: latest.number(),
            known_peers: self.known_external_peers(),
        }
    }

    pub fn genesis(&self) -> &Genesis {
        &self.genesis
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// This node as peers know it.
    pub fn as_peer(&self) -> Peer {
        Peer::new(self.config.host.clone())
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub(crate) fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Flushes storage. Call once on shutdown.
    pub fn shutdown(&self) -> Result<(), StateError> {
        self.storage.close()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
