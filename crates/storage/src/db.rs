//! sled database wrapper and the ledger key layout.

use authchain_core::ErrorKind;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("A store transaction is already open")]
    TransactionOpen,

    #[error("No store transaction is open")]
    NoTransaction,
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::TransactionOpen | StorageError::NoTransaction => {
                ErrorKind::InvalidArgument
            }
            _ => ErrorKind::Io,
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Keys of the ledger records.
///
/// | key | layout |
/// |---|---|
/// | `Block(h)` | `block:` + big-endian `h`, so blocks sort by height |
/// | `Transaction(id)` | `tx:` + UTF-8 id |
/// | `Height` | `chain:height` |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key<'a> {
    Block(u64),
    Transaction(&'a str),
    Height,
}

impl Key<'_> {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Key::Block(height) => [b"block:".as_slice(), &height.to_be_bytes()].concat(),
            Key::Transaction(id) => [b"tx:".as_slice(), id.as_bytes()].concat(),
            Key::Height => b"chain:height".to_vec(),
        }
    }
}

/// One write in an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

impl BatchOp {
    pub fn insert(key: Key<'_>, value: impl Into<Vec<u8>>) -> Self {
        BatchOp::Insert {
            key: key.encode(),
            value: value.into(),
        }
    }
}

/// A sled database addressed by [`Key`].
pub struct Storage {
    db: sled::Db,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// In-memory database, removed on drop.
    pub fn open_temporary() -> Result<Self> {
        Ok(Self {
            db: sled::Config::new().temporary(true).open()?,
        })
    }

    pub fn get_raw(&self, key: Key<'_>) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.encode())?.map(|v| v.to_vec()))
    }

    pub fn put_raw(&self, key: Key<'_>, value: &[u8]) -> Result<()> {
        self.db.insert(key.encode(), value)?;
        Ok(())
    }

    /// Read a bincode-encoded value.
    pub fn get<V: DeserializeOwned>(&self, key: Key<'_>) -> Result<Option<V>> {
        self.get_raw(key)?
            .map(|bytes| bincode::deserialize(&bytes))
            .transpose()
            .map_err(StorageError::from)
    }

    /// Write a value bincode-encoded.
    pub fn put<V: Serialize>(&self, key: Key<'_>, value: &V) -> Result<()> {
        self.put_raw(key, &bincode::serialize(value)?)
    }

    /// Apply all operations atomically.
    pub fn batch(&self, operations: Vec<BatchOp>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for op in operations {
            match op {
                BatchOp::Insert { key, value } => batch.insert(key, value),
                BatchOp::Remove { key } => batch.remove(key),
            }
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
