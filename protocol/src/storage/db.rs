//! # Block Storage
//!
//! The chain's on-disk form is just its blocks, in order. Ledger state is
//! never persisted; a node rebuilds it at startup by replaying every stored
//! block through validation. [`Storage`] is the seam the node depends on and
//! [`SledStorage`] is the implementation it ships with.
//!
//! ## Tree Layout
//!
//! | Tree     | Key                 | Value            |
//! |----------|---------------------|------------------|
//! | `blocks` | `number` (8B BE)    | `bincode(Block)` |
//!
//! Block numbers are stored big-endian so that sled's lexicographic order
//! matches numeric order and iteration walks the chain from block 1 upwards.

use std::path::Path;

use sled::{Db, Tree};
use tracing::debug;

use super::block::Block;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Iterator over stored blocks, lowest number first.
pub type BlockIter<'a> = Box<dyn Iterator<Item = DbResult<Block>> + 'a>;

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Append-only block persistence.
pub trait Storage: Send + Sync {
    /// Persists `block`, replacing any block stored under the same number.
    fn write(&self, block: &Block) -> DbResult<()>;

    fn get_block(&self, number: u64) -> DbResult<Option<Block>>;

    /// Every stored block in ascending number order.
    fn for_each(&self) -> BlockIter<'_>;

    /// Drops every stored block.
    fn reset(&self) -> DbResult<()>;

    /// Flushes outstanding writes.
    fn close(&self) -> DbResult<()>;

    /// Blocks numbered `from..=to` that exist in storage.
    fn blocks_in_range(&self, from: u64, to: u64) -> DbResult<Vec<Block>> {
        let mut blocks = Vec::new();
        for number in from..=to {
            match self.get_block(number)? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }
}

// ---------------------------------------------------------------------------
// SledStorage
// ---------------------------------------------------------------------------

/// [`Storage`] over an embedded sled database.
///
/// sled trees are internally synchronized, so a `SledStorage` can be shared
/// through `Arc<dyn Storage>` without an outer lock.
#[derive(Debug, Clone)]
pub struct SledStorage {
    db: Db,
    /// Blocks indexed by number (big-endian u64 keys).
    blocks: Tree,
}

impl SledStorage {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A database that lives in memory and disappears on drop. For tests.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let blocks = db.open_tree("blocks")?;
        Ok(Self { db, blocks })
    }

    /// Highest stored block number, if any.
    pub fn latest_block_number(&self) -> DbResult<Option<u64>> {
        match self.blocks.last()? {
            Some((key, _)) => Ok(Some(decode_number(&key)?)),
            None => Ok(None),
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl Storage for SledStorage {
    fn write(&self, block: &Block) -> DbResult<()> {
        let bytes =
            bincode::serialize(block).map_err(|e| DbError::Serialization(e.to_string()))?;
        self.blocks.insert(block.number().to_be_bytes(), bytes)?;
        self.blocks.flush()?;
        debug!(number = block.number(), "block persisted");
        Ok(())
    }

    fn get_block(&self, number: u64) -> DbResult<Option<Block>> {
        match self.blocks.get(number.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode_block(&bytes)?)),
            None => Ok(None),
        }
    }

    fn for_each(&self) -> BlockIter<'_> {
        Box::new(self.blocks.iter().map(|entry| {
            let (_, bytes) = entry?;
            decode_block(&bytes)
        }))
    }

    fn reset(&self) -> DbResult<()> {
        self.blocks.clear()?;
        self.db.flush()?;
        debug!("block storage cleared");
        Ok(())
    }

    fn close(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_block(bytes: &[u8]) -> DbResult<Block> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode_number(key: &[u8]) -> DbResult<u64> {
    let raw: [u8; 8] = key
        .try_into()
        .map_err(|_| DbError::Serialization(format!("bad block key length {}", key.len())))?;
    Ok(u64::from_be_bytes(raw))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;
    use crate::storage::block::{BlockHeader, ZERO_HASH};
    use crate::transaction::{BlockTx, Tx};

    fn make_test_tx(nonce: u64) -> BlockTx {
        let key = KeyPair::generate();
        let signed = Tx {
            chain_id: 1,
            nonce,
            to: KeyPair::generate().account().clone(),
            value: 10,
            tip: 1,
            data: vec![],
        }
        .sign(&key)
        .unwrap();
        BlockTx::new(signed, 1, 1)
    }

    fn make_block_chain(count: u64) -> Vec<Block> {
        let mut parent_hash = ZERO_HASH;
        (1..=count)
            .map(|number| {
                let block = Block {
                    header: BlockHeader {
                        number,
                        parent_hash,
                        beneficiary: KeyPair::generate().account().clone(),
                        difficulty: 0,
                        mining_reward: 100,
                        total_tip: 0,
                        total_gas: 0,
                        timestamp: 1_700_000_000_000 + number,
                        nonce: 0,
                        trans_root: ZERO_HASH,
                    },
                    transactions: vec![make_test_tx(number)],
                };
                parent_hash = block.hash();
                block
            })
            .collect()
    }

    #[test]
    fn open_temporary_database() {
        let db = SledStorage::open_temporary().unwrap();
        assert_eq!(db.block_count(), 0);
        assert_eq!(db.latest_block_number().unwrap(), None);
    }

    #[test]
    fn open_persistent_database() {
        let dir = tempfile::tempdir().unwrap();
        let blocks = make_block_chain(2);
        {
            let db = SledStorage::open(dir.path()).unwrap();
            for block in &blocks {
                db.write(block).unwrap();
            }
            db.close().unwrap();
        }
        let db = SledStorage::open(dir.path()).unwrap();
        assert_eq!(db.latest_block_number().unwrap(), Some(2));
        assert_eq!(db.get_block(2).unwrap().unwrap(), blocks[1]);
    }

    #[test]
    fn store_and_retrieve_block_with_transactions() {
        let db = SledStorage::open_temporary().unwrap();
        let block = make_block_chain(1).remove(0);
        db.write(&block).unwrap();

        let loaded = db.get_block(1).unwrap().unwrap();
        assert_eq!(loaded, block);
        assert_eq!(loaded.tx_count(), 1);
        assert_eq!(loaded.hash(), block.hash());
    }

    #[test]
    fn get_block_returns_none_for_missing_number() {
        let db = SledStorage::open_temporary().unwrap();
        assert!(db.get_block(42).unwrap().is_none());
    }

    #[test]
    fn for_each_walks_in_number_order() {
        let db = SledStorage::open_temporary().unwrap();
        let blocks = make_block_chain(300);
        // Insert out of order; big-endian keys restore the order.
        for block in blocks.iter().rev() {
            db.write(block).unwrap();
        }

        let numbers: Vec<u64> = db.for_each().map(|b| b.unwrap().number()).collect();
        assert_eq!(numbers, (1..=300).collect::<Vec<_>>());
    }

    #[test]
    fn blocks_in_range_stops_at_gap() {
        let db = SledStorage::open_temporary().unwrap();
        for block in make_block_chain(5) {
            db.write(&block).unwrap();
        }
        assert_eq!(db.blocks_in_range(2, 4).unwrap().len(), 3);
        assert_eq!(db.blocks_in_range(4, 10).unwrap().len(), 2);
        assert!(db.blocks_in_range(6, 10).unwrap().is_empty());
    }

    #[test]
    fn reset_drops_everything() {
        let db = SledStorage::open_temporary().unwrap();
        for block in make_block_chain(3) {
            db.write(&block).unwrap();
        }
        db.reset().unwrap();
        assert_eq!(db.block_count(), 0);
        assert_eq!(db.for_each().count(), 0);
    }

    #[test]
    fn overwrite_block_at_same_number() {
        let db = SledStorage::open_temporary().unwrap();
        let mut block = make_block_chain(1).remove(0);
        db.write(&block).unwrap();

        block.header.nonce = 7;
        db.write(&block).unwrap();

        assert_eq!(db.block_count(), 1);
        assert_eq!(db.get_block(1).unwrap().unwrap().header.nonce, 7);
    }

    #[test]
    fn usable_as_trait_object() {
        let db: std::sync::Arc<dyn Storage> = std::sync::Arc::new(SledStorage::open_temporary().unwrap());
        db.write(&make_block_chain(1)[0]).unwrap();
        assert!(db.get_block(1).unwrap().is_some());
    }
}
