//! # Network Module
//!
//! Everything that turns a ledger into a node: the mempool, the chain owner
//! ([`NodeState`]), the background [`Worker`] and its loops, and the
//! transport-agnostic peer RPC surface.
//!
//! ## Architecture
//!
//! ```text
//! node.rs       — NodeState: chain, ledger, mempool, peers; all mutations
//! mempool.rs    — Keyed transaction pool with per-account nonce ordering
//! selector.rs   — Tip-based transaction selection strategies
//! consensus.rs  — PoW / PoA rules and PoA leader selection
//! worker.rs     — Signals, the mining-pause rendezvous, loop spawning
//! mining.rs     — PoW and PoA mining loops
//! gossip.rs     — Transaction and block broadcast
//! discovery.rs  — Periodic peer status polling
//! sync.rs       — Catching up from peers
//! peers.rs      — Known-peer set
//! rpc.rs        — PeerClient trait, routes, and wire types
//! ```
//!
//! ## Lock Ordering
//!
//! `NodeState` guards the chain with a `parking_lot::Mutex` and the mempool
//! with a `parking_lot::RwLock`. When both are needed the chain lock is
//! taken first. Neither is ever held across an `.await`.

pub mod consensus;
pub mod discovery;
pub mod gossip;
pub mod mempool;
pub mod mining;
pub mod node;
pub mod peers;
pub mod rpc;
pub mod selector;
pub mod sync;
pub mod worker;

pub use consensus::{select_leader, ConsensusKind, UnknownConsensus};
pub use discovery::DiscoveryReport;
pub use gossip::Delivery;
pub use mempool::{Mempool, MempoolConfig, MempoolError};
pub use node::{ErrorCategory, NodeArgs, NodeState, StateError};
pub use peers::{Peer, PeerSet};
pub use rpc::{Acknowledgement, PeerClient, PeerError, PeerStatus};
pub use selector::{Strategy, UnknownStrategy};
pub use sync::SyncReport;
pub use worker::{MiningPause, Signals, Worker, WorkerChannels};
