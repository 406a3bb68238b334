//! C3: durable, reorg-safe persistence for the two record types (§4.3).
//!
//! Two `kv` buckets, each key a fixed-width 32-byte hash mapping directly
//! to an encoded record, with no implicit commit — every mutation
//! goes through a caller-supplied [`StoreTxn`], and only [`StoreTxn::commit`]
//! makes it durable. The subsystem itself never calls `commit`; that is the
//! caller's block-connection driver's job, matching §4.3's "transactional:
//! the same transaction context used... must be shared".
//!
//! `MissingKey` is not an error: a read for a key that has never been
//! written returns `Ok(None)`, per §4.3's "a recoverable signal, not an
//! error".

use std::collections::HashMap;

use bitcoin::hashes::Hash;
use bitcoin::BlockHash;
use bitcoin::Txid;
use kv::Batch;
use kv::Bucket;
use kv::Config;
use kv::Raw;
use kv::Store;

use crate::codec::TSpendMinedRecord;
use crate::codec::TreasuryRecord;
use crate::error::StoreError;

const TREASURY_BUCKET: &str = "treasury";
const TSPEND_MINED_BUCKET: &str = "tspend-mined";

/// Opens (creating if necessary) the two buckets this subsystem needs,
/// inside the `kv` store rooted at `path`.
pub struct TreasuryStore {
    treasury: Bucket<'static, Raw, Raw>,
    tspend_mined: Bucket<'static, Raw, Raw>,
}

impl TreasuryStore {
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let cfg = Config::new(path);
        let store = Store::new(cfg).map_err(|e| StoreError::Backend(e.to_string()))?;
        let treasury = store
            .bucket::<Raw, Raw>(Some(TREASURY_BUCKET))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let tspend_mined = store
            .bucket::<Raw, Raw>(Some(TSPEND_MINED_BUCKET))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(TreasuryStore {
            treasury,
            tspend_mined,
        })
    }

    /// Opens a transaction. Reads made through the returned handle see this
    /// transaction's own uncommitted writes; nothing is visible to other
    /// readers, and nothing is durable, until [`StoreTxn::commit`].
    pub fn begin(&self) -> StoreTxn<'_> {
        StoreTxn {
            store: self,
            treasury_writes: HashMap::new(),
            tspend_writes: HashMap::new(),
        }
    }
}

fn treasury_key(hash: &BlockHash) -> Raw {
    Raw::from(hash.as_ref() as &[u8])
}

fn tspend_key(txid: &Txid) -> Raw {
    Raw::from(txid.as_ref() as &[u8])
}

/// A caller-supplied transaction context, with read-your-own-writes
/// semantics over the two buckets. Dropping without calling
/// [`commit`](Self::commit) discards every pending write.
pub struct StoreTxn<'a> {
    store: &'a TreasuryStore,
    treasury_writes: HashMap<BlockHash, Option<Vec<u8>>>,
    tspend_writes: HashMap<Txid, Option<Vec<u8>>>,
}

impl<'a> StoreTxn<'a> {
    /// Reads the treasury record for `block`, if one has been written.
    pub fn get_treasury(&self, block: &BlockHash) -> Result<Option<TreasuryRecord>, StoreError> {
        if let Some(pending) = self.treasury_writes.get(block) {
            return pending
                .as_ref()
                .map(|bytes| TreasuryRecord::decode(bytes).map_err(StoreError::from))
                .transpose();
        }
        let raw = self
            .store
            .treasury
            .get(&treasury_key(block))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        raw.map(|r| TreasuryRecord::decode(r.as_ref()).map_err(StoreError::from))
            .transpose()
    }

    /// Stages a treasury record for `block`. Visible to subsequent reads on
    /// this transaction immediately; not durable until [`commit`](Self::commit).
    pub fn put_treasury(
        &mut self,
        block: BlockHash,
        record: &TreasuryRecord,
    ) -> Result<(), StoreError> {
        let bytes = record.encode()?;
        self.treasury_writes.insert(block, Some(bytes));
        Ok(())
    }

    /// Removes the treasury record for `block`, staged like any other write.
    /// Used when pruning (§C) and when disconnecting a block that has one.
    pub fn remove_treasury(&mut self, block: BlockHash) {
        self.treasury_writes.insert(block, None);
    }

    /// Reads the full mined-block history for `spend`, if the spend has
    /// ever been included anywhere on any branch.
    pub fn get_tspend(&self, spend: &Txid) -> Result<Option<TSpendMinedRecord>, StoreError> {
        if let Some(pending) = self.tspend_writes.get(spend) {
            return pending
                .as_ref()
                .map(|bytes| TSpendMinedRecord::decode(bytes).map_err(StoreError::from))
                .transpose();
        }
        let raw = self
            .store
            .tspend_mined
            .get(&tspend_key(spend))
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        raw.map(|r| TSpendMinedRecord::decode(r.as_ref()).map_err(StoreError::from))
            .transpose()
    }

    /// Appends `block` to `spend`'s mined-block history, intentionally
    /// without deduplicating: a spend mined twice on two branches that
    /// later both become part of history (impossible under §4.6's
    /// same-branch check, but not something this layer assumes) would
    /// otherwise silently lose a record.
    pub fn append_tspend(&mut self, spend: Txid, block: BlockHash) -> Result<(), StoreError> {
        let mut record = self.get_tspend(&spend)?.unwrap_or_default();
        record.blocks.push(block);
        self.tspend_writes.insert(spend, Some(record.encode()));
        Ok(())
    }

    /// Removes `block` from `spend`'s mined-block history (the last entry
    /// matching `block`), for disconnecting a block that mined it.
    pub fn remove_tspend(&mut self, spend: Txid, block: BlockHash) -> Result<(), StoreError> {
        let mut record = self.get_tspend(&spend)?.unwrap_or_default();
        if let Some(pos) = record.blocks.iter().rposition(|h| *h == block) {
            record.blocks.remove(pos);
        }
        if record.blocks.is_empty() {
            self.tspend_writes.insert(spend, None);
        } else {
            self.tspend_writes.insert(spend, Some(record.encode()));
        }
        Ok(())
    }

    /// Drops every treasury record whose block hash is not `keep` — used to
    /// prune history older than the reorg-safety horizon. `tspend-mined`
    /// records are never pruned this way: §8's branch-inclusion invariant
    /// needs the full mined-anywhere history for as long as the spend's
    /// transaction could theoretically still be relayed.
    pub fn prune_treasury_except(&mut self, keep: &[BlockHash]) -> Result<(), StoreError> {
        let keep: std::collections::HashSet<_> = keep.iter().collect();
        for item in self.store.treasury.iter() {
            let item = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let key: Raw = item
                .key::<Raw>()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            if key.len() != 32 {
                continue;
            }
            let mut arr = [0u8; 32];
            arr.copy_from_slice(key.as_ref());
            let hash = BlockHash::from_byte_array(arr);
            if !keep.contains(&hash) {
                self.treasury_writes.insert(hash, None);
            }
        }
        Ok(())
    }

    /// Commits every staged write atomically. On success the transaction is
    /// consumed; on failure no partial write has been made durable.
    pub fn commit(self) -> Result<(), StoreError> {
        let mut treasury_batch = Batch::new();
        for (hash, write) in self.treasury_writes {
            let key = treasury_key(&hash);
            match write {
                Some(bytes) => treasury_batch
                    .set(&key, &Raw::from(bytes.as_slice()))
                    .map_err(|e| StoreError::Backend(e.to_string()))?,
                None => treasury_batch
                    .remove(&key)
                    .map_err(|e| StoreError::Backend(e.to_string()))?,
            }
        }
        self.store
            .treasury
            .batch(treasury_batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut tspend_batch = Batch::new();
        for (txid, write) in self.tspend_writes {
            let key = tspend_key(&txid);
            match write {
                Some(bytes) => tspend_batch
                    .set(&key, &Raw::from(bytes.as_slice()))
                    .map_err(|e| StoreError::Backend(e.to_string()))?,
                None => tspend_batch
                    .remove(&key)
                    .map_err(|e| StoreError::Backend(e.to_string()))?,
            }
        }
        self.store
            .tspend_mined
            .batch(tspend_batch)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }
}
