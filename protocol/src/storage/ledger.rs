//! # Ledger
//!
//! Account balances and nonces, derived by replaying blocks on top of the
//! genesis balances.
//!
//! ## Transition rules
//!
//! A transaction from `F` to `T` mined by `M` with `fee = gas + tip`:
//!
//! ```text
//! F.balance -= value + fee
//! T.balance += value
//! M.balance += fee
//! F.nonce    = tx.nonce
//! ```
//!
//! Every check runs before the first write, so a rejected transaction leaves
//! the ledger untouched. The ledger itself carries no lock: it is reachable
//! only through the node state's mutex, and block validation works on a
//! clone.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::Genesis;
use crate::crypto::keys::Account;
use crate::transaction::{BlockTx, SignedTx};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Per-account state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub balance: u64,
    /// Nonce of the last applied transaction sent by this account.
    pub nonce: u64,
}

/// Reasons a transaction cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("wrong chain id: expected {expected}, got {got}")]
    WrongChain { expected: u16, got: u16 },

    #[error("account {0} cannot send to itself")]
    SelfTransfer(Account),

    #[error("nonce too low for {account}: got {got}, last applied {current}")]
    NonceTooLow {
        account: Account,
        got: u64,
        current: u64,
    },

    #[error("insufficient balance for {account}: needs {needed}, has {available}")]
    InsufficientBalance {
        account: Account,
        needed: u64,
        available: u64,
    },
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Ledger {
    chain_id: u16,
    mining_reward: u64,
    genesis: BTreeMap<Account, u64>,
    accounts: HashMap<Account, AccountRecord>,
}

impl Ledger {
    /// A ledger holding exactly the genesis balances.
    pub fn new(genesis: &Genesis) -> Self {
        let mut ledger = Self {
            chain_id: genesis.chain_id,
            mining_reward: genesis.mining_reward,
            genesis: genesis.balances.clone(),
            accounts: HashMap::new(),
        };
        ledger.reset();
        ledger
    }

    pub fn chain_id(&self) -> u16 {
        self.chain_id
    }

    pub fn mining_reward(&self) -> u64 {
        self.mining_reward
    }

    // -- Checks -------------------------------------------------------------

    /// Signature, chain, and self-transfer checks. Returns the sender.
    pub fn check_signed(&self, tx: &SignedTx) -> Result<Account, LedgerError> {
        if tx.tx.chain_id != self.chain_id {
            return Err(LedgerError::WrongChain {
                expected: self.chain_id,
                got: tx.tx.chain_id,
            });
        }

        let from = tx
            .from_account()
            .map_err(|e| LedgerError::InvalidSignature(e.to_string()))?;

        if from == tx.tx.to {
            return Err(LedgerError::SelfTransfer(from));
        }

        Ok(from)
    }

    /// The transaction's nonce must be strictly above the sender's last
    /// applied nonce.
    pub fn validate_nonce(&self, tx: &SignedTx) -> Result<(), LedgerError> {
        let from = self.check_signed(tx)?;
        self.check_nonce(&from, tx.tx.nonce)
    }

    /// Whether the sender can currently pay `value + gas + tip`.
    pub fn check_funds(&self, tx: &BlockTx) -> Result<(), LedgerError> {
        let from = tx
            .from_account()
            .map_err(|e| LedgerError::InvalidSignature(e.to_string()))?;
        self.check_balance(&from, tx).map(|_| ())
    }

    /// Every precondition of [`Ledger::apply_transaction`], without applying.
    pub fn validate_transaction(&self, tx: &BlockTx) -> Result<Account, LedgerError> {
        let from = self.check_signed(&tx.signed)?;
        self.check_nonce(&from, tx.nonce())?;
        self.check_balance(&from, tx)?;
        Ok(from)
    }

    fn check_nonce(&self, from: &Account, nonce: u64) -> Result<(), LedgerError> {
        let current = self.query(from).nonce;
        if nonce <= current {
            return Err(LedgerError::NonceTooLow {
                account: from.clone(),
                got: nonce,
                current,
            });
        }
        Ok(())
    }

    /// Returns the total debit on success.
    fn check_balance(&self, from: &Account, tx: &BlockTx) -> Result<u64, LedgerError> {
        let available = self.query(from).balance;
        let needed = tx
            .value()
            .checked_add(tx.gas())
            .and_then(|v| v.checked_add(tx.tip()));

        match needed {
            Some(needed) if needed <= available => Ok(needed),
            needed => Err(LedgerError::InsufficientBalance {
                account: from.clone(),
                needed: needed.unwrap_or(u64::MAX),
                available,
            }),
        }
    }

    // -- Mutations ----------------------------------------------------------

    /// Applies one transaction, crediting fees to `miner`.
    pub fn apply_transaction(&mut self, miner: &Account, tx: &BlockTx) -> Result<(), LedgerError> {
        let from = self.validate_transaction(tx)?;
        let debit = tx.value() + tx.fee();

        // Read-modify-write per account so that miner == from or
        // miner == to alias correctly.
        let mut sender = self.query(&from);
        sender.balance -= debit;
        sender.nonce = tx.nonce();
        self.accounts.insert(from, sender);

        let mut recipient = self.query(tx.to());
        recipient.balance = recipient.balance.saturating_add(tx.value());
        self.accounts.insert(tx.to().clone(), recipient);

        let mut beneficiary = self.query(miner);
        beneficiary.balance = beneficiary.balance.saturating_add(tx.fee());
        self.accounts.insert(miner.clone(), beneficiary);

        Ok(())
    }

    /// Credits the genesis mining reward to `miner`.
    pub fn apply_mining_reward(&mut self, miner: &Account) {
        let record = self.accounts.entry(miner.clone()).or_default();
        record.balance = record.balance.saturating_add(self.mining_reward);
    }

    /// Forgets every applied block.
    pub fn reset(&mut self) {
        self.accounts = self
            .genesis
            .iter()
            .map(|(account, balance)| {
                (
                    account.clone(),
                    AccountRecord {
                        balance: *balance,
                        nonce: 0,
                    },
                )
            })
            .collect();
    }

    // -- Queries ------------------------------------------------------------

    /// State of `account`; unknown accounts are empty.
    pub fn query(&self, account: &Account) -> AccountRecord {
        self.accounts.get(account).copied().unwrap_or_default()
    }

    /// Snapshot of every known account.
    pub fn copy(&self) -> HashMap<Account, AccountRecord> {
        self.accounts.clone()
    }

    /// Sum of all balances.
    pub fn total_supply(&self) -> u128 {
        self.accounts.values().map(|r| u128::from(r.balance)).sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;
    use crate::transaction::Tx;
    use chrono::TimeZone;

    struct Fixture {
        alice: KeyPair,
        bob: KeyPair,
        miner: Account,
        ledger: Ledger,
    }

    fn setup() -> Fixture {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let miner = KeyPair::generate().account().clone();

        let mut balances = BTreeMap::new();
        balances.insert(alice.account().clone(), 1_000);
        balances.insert(bob.account().clone(), 0);

        let genesis = Genesis {
            date: chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            chain_id: 1,
            trans_per_block: 10,
            difficulty: 1,
            mining_reward: 100,
            gas_price: 10,
            balances,
        };

        Fixture {
            ledger: Ledger::new(&genesis),
            alice,
            bob,
            miner,
        }
    }

    fn make_tx(from: &KeyPair, to: &Account, nonce: u64, value: u64, tip: u64) -> BlockTx {
        let signed = Tx {
            chain_id: 1,
            nonce,
            to: to.clone(),
            value,
            tip,
            data: Vec::new(),
        }
        .sign(from)
        .unwrap();
        BlockTx::new(signed, 10, 1)
    }

    // -- Transition scenario ------------------------------------------------

    #[test]
    fn transfer_moves_value_and_fee() {
        let mut f = setup();
        let tx = make_tx(&f.alice, f.bob.account(), 1, 100, 20);

        f.ledger.apply_transaction(&f.miner, &tx).unwrap();

        assert_eq!(f.ledger.query(f.alice.account()).balance, 870);
        assert_eq!(f.ledger.query(f.alice.account()).nonce, 1);
        assert_eq!(f.ledger.query(f.bob.account()).balance, 100);
        assert_eq!(f.ledger.query(&f.miner).balance, 30);

        f.ledger.apply_mining_reward(&f.miner);
        assert_eq!(f.ledger.query(&f.miner).balance, 130);
    }

    #[test]
    fn supply_is_conserved_apart_from_rewards() {
        let mut f = setup();
        let before = f.ledger.total_supply();

        for nonce in 1..=3 {
            let tx = make_tx(&f.alice, f.bob.account(), nonce, 50, 7);
            f.ledger.apply_transaction(&f.miner, &tx).unwrap();
        }
        assert_eq!(f.ledger.total_supply(), before);

        f.ledger.apply_mining_reward(&f.miner);
        assert_eq!(f.ledger.total_supply(), before + 100);
    }

    #[test]
    fn miner_may_be_sender() {
        let mut f = setup();
        let alice = f.alice.account().clone();
        let tx = make_tx(&f.alice, f.bob.account(), 1, 100, 20);

        f.ledger.apply_transaction(&alice, &tx).unwrap();

        // Alice pays 130 and collects the 30 fee back.
        assert_eq!(f.ledger.query(&alice).balance, 900);
        assert_eq!(f.ledger.query(f.bob.account()).balance, 100);
    }

    // -- Rejections ---------------------------------------------------------

    #[test]
    fn rejects_nonce_replay() {
        let mut f = setup();
        let tx = make_tx(&f.alice, f.bob.account(), 1, 10, 0);
        f.ledger.apply_transaction(&f.miner, &tx).unwrap();

        let snapshot = f.ledger.copy();
        let err = f.ledger.apply_transaction(&f.miner, &tx).unwrap_err();
        assert!(matches!(err, LedgerError::NonceTooLow { got: 1, current: 1, .. }));
        assert_eq!(f.ledger.copy(), snapshot);
    }

    #[test]
    fn nonce_may_skip_ahead() {
        let mut f = setup();
        let tx = make_tx(&f.alice, f.bob.account(), 5, 10, 0);
        f.ledger.apply_transaction(&f.miner, &tx).unwrap();
        assert_eq!(f.ledger.query(f.alice.account()).nonce, 5);

        let stale = make_tx(&f.alice, f.bob.account(), 4, 10, 0);
        assert!(f.ledger.validate_nonce(&stale.signed).is_err());
    }

    #[test]
    fn rejects_insufficient_balance_without_mutation() {
        let mut f = setup();
        // 990 + 10 gas + 1 tip = 1001 > 1000
        let tx = make_tx(&f.alice, f.bob.account(), 1, 990, 1);
        let snapshot = f.ledger.copy();

        let err = f.ledger.apply_transaction(&f.miner, &tx).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { needed: 1001, available: 1000, .. }
        ));
        assert_eq!(f.ledger.copy(), snapshot);
    }

    #[test]
    fn exact_balance_is_enough() {
        let mut f = setup();
        let tx = make_tx(&f.alice, f.bob.account(), 1, 990, 0);
        f.ledger.apply_transaction(&f.miner, &tx).unwrap();
        assert_eq!(f.ledger.query(f.alice.account()).balance, 0);
    }

    #[test]
    fn rejects_self_transfer() {
        let mut f = setup();
        let alice = f.alice.account().clone();
        let tx = make_tx(&f.alice, &alice, 1, 10, 0);
        assert!(matches!(
            f.ledger.apply_transaction(&f.miner, &tx),
            Err(LedgerError::SelfTransfer(_))
        ));
    }

    #[test]
    fn rejects_foreign_chain() {
        let f = setup();
        let signed = Tx {
            chain_id: 2,
            nonce: 1,
            to: f.bob.account().clone(),
            value: 1,
            tip: 0,
            data: Vec::new(),
        }
        .sign(&f.alice)
        .unwrap();
        assert!(matches!(
            f.ledger.validate_nonce(&signed),
            Err(LedgerError::WrongChain { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn rejects_value_overflow() {
        let f = setup();
        let tx = make_tx(&f.alice, f.bob.account(), 1, u64::MAX, 1);
        assert!(matches!(
            f.ledger.check_funds(&tx),
            Err(LedgerError::InsufficientBalance { needed: u64::MAX, .. })
        ));
    }

    // -- Reset --------------------------------------------------------------

    #[test]
    fn reset_restores_genesis() {
        let mut f = setup();
        let tx = make_tx(&f.alice, f.bob.account(), 1, 100, 20);
        f.ledger.apply_transaction(&f.miner, &tx).unwrap();
        f.ledger.apply_mining_reward(&f.miner);

        f.ledger.reset();

        assert_eq!(f.ledger.query(f.alice.account()).balance, 1_000);
        assert_eq!(f.ledger.query(f.alice.account()).nonce, 0);
        assert_eq!(f.ledger.query(&f.miner), AccountRecord::default());
        assert_eq!(f.ledger.total_supply(), 1_000);
    }
}
