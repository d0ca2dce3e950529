//! Best-transaction selection strategies.
//!
//! A selector receives the mempool grouped by sending account and returns the
//! batch a miner should put in its next block. Whatever the strategy, the
//! transactions it returns for one account are always a nonce-ordered prefix
//! of that account's queue: a block never skips a nonce.
//!
//! Two strategies ship:
//!
//! - [`Strategy::Tip`] works in rounds. Round `k` takes the `k`-th pending
//!   transaction of every account. When a round does not fit, its highest
//!   tips fill the remaining space and selection stops.
//! - [`Strategy::TipAdvanced`] solves the underlying grouped knapsack
//!   exactly. It will take a low-tip transaction to unlock a high-tip one
//!   queued behind it on the same account, which round-based selection
//!   cannot do.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::keys::Account;
use crate::transaction::BlockTx;

/// Signature every selection strategy shares. `None` asks for everything.
pub type SelectFn = fn(&BTreeMap<Account, Vec<BlockTx>>, Option<usize>) -> Vec<BlockTx>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown selection strategy `{0}` (expected `tip` or `tip_advanced`)")]
pub struct UnknownStrategy(pub String);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Tip,
    TipAdvanced,
}

impl Strategy {
    pub fn select_fn(self) -> SelectFn {
        match self {
            Strategy::Tip => tip_select,
            Strategy::TipAdvanced => advanced_tip_select,
        }
    }

    pub fn select(
        self,
        grouped: &BTreeMap<Account, Vec<BlockTx>>,
        how_many: Option<usize>,
    ) -> Vec<BlockTx> {
        (self.select_fn())(grouped, how_many)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Tip => "tip",
            Strategy::TipAdvanced => "tip_advanced",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tip" => Ok(Strategy::Tip),
            "tip_advanced" => Ok(Strategy::TipAdvanced),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// Each account's queue sorted by ascending nonce, in account order.
fn nonce_ordered(grouped: &BTreeMap<Account, Vec<BlockTx>>) -> Vec<Vec<&BlockTx>> {
    grouped
        .values()
        .map(|txs| {
            let mut queue: Vec<&BlockTx> = txs.iter().collect();
            queue.sort_by_key(|tx| tx.nonce());
            queue
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tip
// ---------------------------------------------------------------------------

/// Round-based selection by tip.
pub fn tip_select(grouped: &BTreeMap<Account, Vec<BlockTx>>, how_many: Option<usize>) -> Vec<BlockTx> {
    let queues = nonce_ordered(grouped);
    let total: usize = queues.iter().map(Vec::len).sum();
    let need = how_many.map_or(total, |n| n.min(total));

    let mut selected = Vec::with_capacity(need);
    let mut round = 0;

    while selected.len() < need {
        let mut row: Vec<&BlockTx> = queues.iter().filter_map(|q| q.get(round).copied()).collect();
        if row.is_empty() {
            break;
        }

        let remaining = need - selected.len();
        if row.len() > remaining {
            // Stable: equal tips keep account order.
            row.sort_by(|a, b| b.tip().cmp(&a.tip()));
            selected.extend(row.into_iter().take(remaining).cloned());
            break;
        }

        selected.extend(row.into_iter().cloned());
        round += 1;
    }

    selected
}

// ---------------------------------------------------------------------------
// TipAdvanced
// ---------------------------------------------------------------------------

/// Maximizes total tip over every gap-free choice of per-account prefixes.
///
/// `best[i][c]` is the best `(total_tip, tx_count)` using the first `i`
/// accounts and at most `c` slots; `take[i][c]` records how many of account
/// `i`'s transactions achieve it. Runs in O(accounts × capacity²) worst case.
pub fn advanced_tip_select(
    grouped: &BTreeMap<Account, Vec<BlockTx>>,
    how_many: Option<usize>,
) -> Vec<BlockTx> {
    let queues = nonce_ordered(grouped);
    let total: usize = queues.iter().map(Vec::len).sum();
    let capacity = match how_many {
        Some(n) if n < total => n,
        _ => return queues.into_iter().flatten().cloned().collect(),
    };

    // prefix[i][k]: tip sum of account i's first k transactions.
    let prefix: Vec<Vec<u128>> = queues
        .iter()
        .map(|queue| {
            let limit = queue.len().min(capacity);
            let mut sums = Vec::with_capacity(limit + 1);
            sums.push(0u128);
            for tx in &queue[..limit] {
                let last = sums[sums.len() - 1];
                sums.push(last + u128::from(tx.tip()));
            }
            sums
        })
        .collect();

    let accounts = queues.len();
    let mut best = vec![vec![(0u128, 0usize); capacity + 1]; accounts + 1];
    let mut take = vec![vec![0usize; capacity + 1]; accounts + 1];

    for i in 1..=accounts {
        let sums = &prefix[i - 1];
        for c in 0..=capacity {
            let mut chosen = best[i - 1][c];
            let mut chosen_k = 0;
            for k in 1..sums.len().min(c + 1) {
                let (tip, count) = best[i - 1][c - k];
                let candidate = (tip + sums[k], count + k);
                if candidate > chosen {
                    chosen = candidate;
                    chosen_k = k;
                }
            }
            best[i][c] = chosen;
            take[i][c] = chosen_k;
        }
    }

    let mut counts = vec![0usize; accounts];
    let mut c = capacity;
    for i in (1..=accounts).rev() {
        counts[i - 1] = take[i][c];
        c -= take[i][c];
    }

    queues
        .iter()
        .zip(counts)
        .flat_map(|(queue, k)| queue[..k].iter().map(|tx| (*tx).clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
