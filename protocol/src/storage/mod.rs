//! # Storage Module
//!
//! The chain's data structures and their persistence.
//!
//! ## Architecture
//!
//! ```text
//! merkle.rs  — Binary BLAKE3 tree committing a block to its transactions
//! ledger.rs  — Account balances and nonces, derived by replaying blocks
//! block.rs   — Block structure, proof of work, and validation
//! db.rs      — Storage trait and the sled-backed implementation
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! BlockTx → Block ──validate──→ Ledger (next state)
//!             │
//!             └──write──→ Storage
//! ```
//!
//! Only blocks are persisted. The ledger is rebuilt from them at startup,
//! so there is a single source of truth on disk.

pub mod block;
pub mod db;
pub mod ledger;
pub mod merkle;

pub use block::{Block, BlockArgs, BlockError, BlockHeader};
pub use db::{DbError, SledStorage, Storage};
pub use ledger::{AccountRecord, Ledger, LedgerError};
pub use merkle::{Hashable, MerkleProof, MerkleTree};
