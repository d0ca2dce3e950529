// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Ember Protocol — Core Library
//!
//! Ember is a small account-based blockchain. Wallets sign transfers with
//! secp256k1 keys, nodes pool them, and either any node (proof of work) or a
//! rotating leader (proof of authority) packs them into blocks that every
//! peer validates and replays against its own ledger.
//!
//! ## Architecture
//!
//! - **crypto** — Hashing, secp256k1 key pairs, recoverable signatures.
//! - **transaction** — Unsigned, signed, and block-ready transactions.
//! - **storage** — Ledger, Merkle trees, blocks, and sled-backed persistence.
//! - **network** — Mempool, node state, mining and peer loops, peer RPC.
//! - **events** — Broadcast stream of things worth telling an operator.
//! - **config** — Genesis document, node settings, protocol constants.
//!
//! ## Ground Rules
//!
//! 1. Every ledger mutation happens under the node's chain lock.
//! 2. A block is applied only after it validates against the current head.
//! 3. Nothing blocking runs on the async runtime; proof of work gets its own
//!    thread.

pub mod config;
pub mod crypto;
pub mod events;
pub mod network;
pub mod storage;
pub mod transaction;
