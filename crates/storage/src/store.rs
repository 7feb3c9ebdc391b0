//! The ledger storage port and its sled-backed implementation.

use crate::db::{BatchOp, Key, Result, Storage, StorageError};
use tracing::debug;

/// Where finalized ledger records go.
///
/// Blocks are keyed by height and transactions by id, both as opaque wire
/// bytes. Writes issued between [`begin`](LedgerStore::begin) and
/// [`commit`](LedgerStore::commit) become visible together or not at all;
/// writes outside a transaction are applied immediately.
pub trait LedgerStore {
    fn begin(&mut self) -> Result<()>;
    fn put_block(&mut self, height: u64, bytes: &[u8]) -> Result<()>;
    fn put_transaction(&mut self, id: &str, bytes: &[u8]) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    fn block(&self, height: u64) -> Result<Option<Vec<u8>>>;
    fn transaction(&self, id: &str) -> Result<Option<Vec<u8>>>;
    /// Highest stored block height, `None` when no block is stored.
    fn height(&self) -> Result<Option<u64>>;
}

#[derive(Default)]
struct Pending {
    ops: Vec<BatchOp>,
    max_height: Option<u64>,
}

/// [`LedgerStore`] on top of sled.
pub struct SledStore {
    storage: Storage,
    pending: Option<Pending>,
}

impl SledStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            pending: None,
        }
    }

    /// Open a store in the given directory.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Storage::open(path)?))
    }

    /// Open an in-memory store (for testing).
    pub fn open_temporary() -> Result<Self> {
        Ok(Self::new(Storage::open_temporary()?))
    }

    pub fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    fn bump_height(&self, height: u64) -> Result<()> {
        if self.height()?.map_or(true, |h| height > h) {
            self.storage.put(Key::Height, &height)?;
        }
        Ok(())
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.storage.flush()
    }
}

impl LedgerStore for SledStore {
    fn begin(&mut self) -> Result<()> {
        if self.pending.is_some() {
            return Err(StorageError::TransactionOpen);
        }
        self.pending = Some(Pending::default());
        Ok(())
    }

    fn put_block(&mut self, height: u64, bytes: &[u8]) -> Result<()> {
        let key = Key::Block(height);
        match self.pending.as_mut() {
            Some(pending) => {
                pending.ops.push(BatchOp::insert(key, bytes));
                pending.max_height = pending.max_height.max(Some(height));
                Ok(())
            }
            None => {
                self.storage.put_raw(key, bytes)?;
                self.bump_height(height)
            }
        }
    }

    fn put_transaction(&mut self, id: &str, bytes: &[u8]) -> Result<()> {
        let key = Key::Transaction(id);
        match self.pending.as_mut() {
            Some(pending) => {
                pending.ops.push(BatchOp::insert(key, bytes));
                Ok(())
            }
            None => self.storage.put_raw(key, bytes),
        }
    }

    fn commit(&mut self) -> Result<()> {
        let mut pending = self.pending.take().ok_or(StorageError::NoTransaction)?;

        if let Some(height) = pending.max_height {
            if self.height()?.map_or(true, |h| height > h) {
                pending
                    .ops
                    .push(BatchOp::insert(Key::Height, bincode::serialize(&height)?));
            }
        }

        let count = pending.ops.len();
        self.storage.batch(pending.ops)?;
        debug!(writes = count, "store transaction committed");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let pending = self.pending.take().ok_or(StorageError::NoTransaction)?;
        debug!(discarded = pending.ops.len(), "store transaction rolled back");
        Ok(())
    }

    fn block(&self, height: u64) -> Result<Option<Vec<u8>>> {
        self.storage.get_raw(Key::Block(height))
    }

    fn transaction(&self, id: &str) -> Result<Option<Vec<u8>>> {
        self.storage.get_raw(Key::Transaction(id))
    }

    fn height(&self) -> Result<Option<u64>> {
        self.storage.get(Key::Height)
    }
}
