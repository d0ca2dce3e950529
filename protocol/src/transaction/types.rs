//! Transaction data types.
//!
//! ```text
//! Tx        what the wallet means:   chain, nonce, to, value, tip, data
//! SignedTx  Tx + {v, r, s}           sender recovered, never stated
//! BlockTx   SignedTx + gas + time    what a node stores and mines
//! ```

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::crypto::hash::blake3_hash_multi;
use crate::crypto::keys::Account;
use crate::crypto::signatures::Signature;
use crate::storage::merkle::Hashable;

// ---------------------------------------------------------------------------
// Tx
// ---------------------------------------------------------------------------

/// An unsigned value transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub chain_id: u16,
    /// Must be strictly greater than the sender's last applied nonce.
    pub nonce: u64,
    pub to: Account,
    pub value: u64,
    /// Paid to the miner on top of gas.
    pub tip: u64,
    #[serde(default, with = "hex::serde")]
    pub data: Vec<u8>,
}

impl Tx {
    /// Canonical little-endian encoding covered by the signature.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + 8 + 42 + 8 + 8 + 8 + self.data.len());
        out.extend_from_slice(&self.chain_id.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(self.to.as_str().as_bytes());
        out.extend_from_slice(&self.value.to_le_bytes());
        out.extend_from_slice(&self.tip.to_le_bytes());
        out.extend_from_slice(&(self.data.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

// ---------------------------------------------------------------------------
// SignedTx
// ---------------------------------------------------------------------------

/// A transaction plus the signature that names its sender.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedTx {
    pub tx: Tx,
    pub signature: Signature,
    /// Recovered sender, filled on first use.
    #[serde(skip)]
    pub(crate) from: OnceLock<Account>,
}

impl SignedTx {
    pub fn new(tx: Tx, signature: Signature) -> Self {
        Self {
            tx,
            signature,
            from: OnceLock::new(),
        }
    }

    /// Identity of this transaction: hex BLAKE3 of the signature.
    pub fn unique_key(&self) -> String {
        hex::encode(self.signature.digest())
    }
}

impl PartialEq for SignedTx {
    fn eq(&self, other: &Self) -> bool {
        self.tx == other.tx && self.signature == other.signature
    }
}

impl Eq for SignedTx {}

// ---------------------------------------------------------------------------
// BlockTx
// ---------------------------------------------------------------------------

/// A signed transaction as a node holds it: stamped with the time it was
/// accepted and the gas it is charged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTx {
    pub signed: SignedTx,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: u64,
    pub gas_price: u64,
    pub gas_units: u64,
}

impl BlockTx {
    /// Wraps a signed transaction, stamping it with the current time.
    pub fn new(signed: SignedTx, gas_price: u64, gas_units: u64) -> Self {
        Self {
            signed,
            timestamp: u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default(),
            gas_price,
            gas_units,
        }
    }

    pub fn unique_key(&self) -> String {
        self.signed.unique_key()
    }

    pub fn nonce(&self) -> u64 {
        self.signed.tx.nonce
    }

    pub fn tip(&self) -> u64 {
        self.signed.tx.tip
    }

    pub fn value(&self) -> u64 {
        self.signed.tx.value
    }

    pub fn to(&self) -> &Account {
        &self.signed.tx.to
    }

    pub fn chain_id(&self) -> u16 {
        self.signed.tx.chain_id
    }

    /// Gas charged for execution.
    pub fn gas(&self) -> u64 {
        self.gas_price.saturating_mul(self.gas_units)
    }

    /// Everything the miner collects: gas plus tip.
    pub fn fee(&self) -> u64 {
        self.gas().saturating_add(self.tip())
    }
}

impl Hashable for BlockTx {
    fn leaf_hash(&self) -> [u8; 32] {
        blake3_hash_multi(&[
            self.signed.tx.canonical_bytes().as_slice(),
            self.signed.signature.to_bytes().as_slice(),
            self.timestamp.to_le_bytes().as_slice(),
            self.gas_price.to_le_bytes().as_slice(),
            self.gas_units.to_le_bytes().as_slice(),
        ])
    }
}
