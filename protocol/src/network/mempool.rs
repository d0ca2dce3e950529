//! Pending-transaction pool.
//!
//! Holds candidate transactions between admission and block inclusion.
//! Transactions are keyed by [`BlockTx::unique_key`] for duplicate
//! suppression, with a secondary `(account, nonce)` index that drives
//! replacement and per-account limits and gives the selectors their
//! nonce-ordered view.
//!
//! ## Design
//!
//! - A single `parking_lot::RwLock` guards both indices so a replacement is
//!   never observable half-done. Reads (`copy`, `count`) are frequent and
//!   cheap, and they never need the node's chain lock.
//! - Resubmitting an identical transaction is a no-op, not an error, so
//!   gossip echoes are harmless.
//! - A different transaction for an occupied `(account, nonce)` slot replaces
//!   the pending one only if it bumps the tip by at least
//!   `replacement_bump_percent`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::keys::Account;
use crate::transaction::BlockTx;

use super::selector::Strategy;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable parameters for mempool behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolConfig {
    /// Maximum number of transactions the pool will hold.
    pub max_size: usize,

    /// Maximum pending transactions allowed per sending account.
    pub max_per_account: usize,

    /// Minimum tip increase, in percent, for a same-nonce replacement.
    pub replacement_bump_percent: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_per_account: 100,
            replacement_bump_percent: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// MempoolError
// ---------------------------------------------------------------------------

/// Errors returned by mempool operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    /// Another transaction already holds this account's nonce and the new
    /// one does not outbid it.
    Duplicate {
        account: Account,
        nonce: u64,
        required_tip: u64,
    },

    /// The account already has too many pending transactions.
    AccountLimitExceeded { account: Account, limit: usize },

    /// The pool is at capacity.
    MempoolFull { size: usize },

    /// The sender could not be recovered from the signature.
    InvalidSignature(String),
}

impl fmt::Display for MempoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate {
                account,
                nonce,
                required_tip,
            } => write!(
                f,
                "nonce {} of {} is already pending; replacing it needs a tip of at least {}",
                nonce, account, required_tip
            ),
            Self::AccountLimitExceeded { account, limit } => {
                write!(f, "account {} exceeded per-account limit of {}", account, limit)
            }
            Self::MempoolFull { size } => {
                write!(f, "mempool is full ({} transactions)", size)
            }
            Self::InvalidSignature(reason) => write!(f, "invalid signature: {}", reason),
        }
    }
}

impl std::error::Error for MempoolError {}

// ---------------------------------------------------------------------------
// Mempool
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    entries: HashMap<String, BlockTx>,
    /// `(account, nonce) → unique key`, ordered so one account's queue is a
    /// contiguous range.
    by_account: BTreeMap<(Account, u64), String>,
}

impl Inner {
    fn account_range(&self, account: &Account) -> impl Iterator<Item = &String> {
        self.by_account
            .range((account.clone(), 0)..=(account.clone(), u64::MAX))
            .map(|(_, key)| key)
    }
}

/// A thread-safe transaction pool.
pub struct Mempool {
    inner: RwLock<Inner>,
    config: MempoolConfig,
}

impl fmt::Debug for Mempool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mempool")
            .field("size", &self.count())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MempoolConfig::default())
    }
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            config,
        }
    }

    pub fn config(&self) -> &MempoolConfig {
        &self.config
    }

    /// Inserts or replaces a transaction and returns the pool size.
    ///
    /// 1. **Resubmission**: an identical transaction is already pending; no-op.
    /// 2. **Replacement**: the sender's nonce is occupied. The new transaction
    ///    wins if its tip clears the bump threshold, else `Duplicate`.
    /// 3. **Per-account limit** and **capacity** apply to new slots only.
    pub fn upsert(&self, tx: BlockTx) -> Result<usize, MempoolError> {
        let account = tx
            .from_account()
            .map_err(|e| MempoolError::InvalidSignature(e.to_string()))?;
        let key = tx.unique_key();
        let slot = (account.clone(), tx.nonce());

        let mut inner = self.inner.write();

        if inner.entries.contains_key(&key) {
            return Ok(inner.entries.len());
        }

        if let Some(existing_key) = inner.by_account.get(&slot).cloned() {
            let existing_tip = inner.entries.get(&existing_key).map_or(0, BlockTx::tip);
            let required_tip = self.replacement_tip(existing_tip);
            if tx.tip() < required_tip {
                return Err(MempoolError::Duplicate {
                    account,
                    nonce: tx.nonce(),
                    required_tip,
                });
            }

            debug!(%account, nonce = tx.nonce(), old_tip = existing_tip, new_tip = tx.tip(), "replacing pending transaction");
            inner.entries.remove(&existing_key);
            inner.entries.insert(key.clone(), tx);
            inner.by_account.insert(slot, key);
            return Ok(inner.entries.len());
        }

        if inner.account_range(&account).count() >= self.config.max_per_account {
            return Err(MempoolError::AccountLimitExceeded {
                account,
                limit: self.config.max_per_account,
            });
        }

        if inner.entries.len() >= self.config.max_size {
            return Err(MempoolError::MempoolFull {
                size: self.config.max_size,
            });
        }

        inner.entries.insert(key.clone(), tx);
        inner.by_account.insert(slot, key);
        Ok(inner.entries.len())
    }

    /// Removes `tx` if present.
    pub fn delete(&self, tx: &BlockTx) -> bool {
        self.delete_key(&tx.unique_key())
    }

    /// Removes the transaction stored under `key` if present.
    pub fn delete_key(&self, key: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(removed) = inner.entries.remove(key) else {
            return false;
        };
        if let Ok(account) = removed.from_account() {
            let slot = (account, removed.nonce());
            if inner.by_account.get(&slot).map(String::as_str) == Some(key) {
                inner.by_account.remove(&slot);
            }
        }
        true
    }

    /// Empties the pool.
    pub fn truncate(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.by_account.clear();
    }

    /// Every pending transaction, ordered by account then nonce.
    pub fn copy(&self) -> Vec<BlockTx> {
        let inner = self.inner.read();
        inner
            .by_account
            .values()
            .filter_map(|key| inner.entries.get(key).cloned())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<BlockTx> {
        self.inner.read().entries.get(key).cloned()
    }

    /// Pending transactions from `account` in nonce order.
    pub fn pending_for_account(&self, account: &Account) -> Vec<BlockTx> {
        let inner = self.inner.read();
        inner
            .account_range(account)
            .filter_map(|key| inner.entries.get(key).cloned())
            .collect()
    }

    /// The pool grouped by sending account, each queue nonce-ordered.
    pub fn grouped(&self) -> BTreeMap<Account, Vec<BlockTx>> {
        let inner = self.inner.read();
        let mut grouped: BTreeMap<Account, Vec<BlockTx>> = BTreeMap::new();
        for ((account, _), key) in &inner.by_account {
            if let Some(tx) = inner.entries.get(key) {
                grouped.entry(account.clone()).or_default().push(tx.clone());
            }
        }
        grouped
    }

    /// Runs `strategy` over a snapshot of the pool. `None` selects all.
    pub fn pick_best(&self, strategy: Strategy, how_many: Option<usize>) -> Vec<BlockTx> {
        strategy.select(&self.grouped(), how_many)
    }

    fn replacement_tip(&self, existing: u64) -> u64 {
        let bump = (u128::from(existing) * u128::from(self.config.replacement_bump_percent))
            .div_ceil(100)
            .max(1);
        u64::try_from(u128::from(existing) + bump).unwrap_or(u64::MAX)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
