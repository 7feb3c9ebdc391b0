//! Blocks: ordered transactions, a merkle root and hash-chain linkage.

use crate::codec::{CodecError, Decoder, Encoder};
use crate::error::ErrorKind;
use crate::hash::sha256_hex;
use crate::merkle::{verify_proof, MerkleTree};
use crate::payload::Payload;
use crate::time::Timestamp;
use crate::transaction::{Transaction, TransactionError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "GENESIS";

/// Errors describing why a block is invalid or could not be decoded.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block {0} has no hash")]
    MissingHash(i64),

    #[error("block {0} has no previous hash")]
    MissingPreviousHash(i64),

    #[error("block index {0} is negative")]
    NegativeIndex(i64),

    #[error("block {0} contains no transactions")]
    Empty(i64),

    #[error("block {index} hash mismatch (stored {stored}, computed {computed})")]
    HashMismatch {
        index: i64,
        stored: String,
        computed: String,
    },

    #[error("block {0} merkle root does not match its transactions")]
    MerkleRootMismatch(i64),

    #[error("transaction {position} in block {index} is invalid: {source}")]
    InvalidTransaction {
        index: i64,
        position: usize,
        #[source]
        source: TransactionError,
    },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BlockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BlockError::Codec(_) | BlockError::Json(_) => ErrorKind::Io,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

pub type Result<T> = std::result::Result<T, BlockError>;

/// A block of transactions linked to its predecessor by hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "T: Payload")]
pub struct Block<T> {
    /// Position in the chain (0 for genesis).
    pub index: i64,
    /// Hash of the previous block, or `GENESIS`.
    pub previous_hash: String,
    /// SHA-256 over the header fields, hex encoded.
    pub hash: String,
    /// Transactions in merkle-leaf order.
    pub transactions: Vec<Transaction<T>>,
    pub nonce: i64,
    pub timestamp: Timestamp,
    /// Merkle root over the transactions' canonical strings.
    pub merkle_root: String,
}

impl<T: Payload> Block<T> {
    /// Create a free-standing block. Index and previous hash are stamped by
    /// the chain when the block is appended.
    pub fn new(transactions: Vec<Transaction<T>>) -> Self {
        Self::linked(0, String::new(), transactions)
    }

    /// Create a block already linked to a predecessor.
    pub fn linked(index: i64, previous_hash: impl Into<String>, transactions: Vec<Transaction<T>>) -> Self {
        let mut block = Self {
            index,
            previous_hash: previous_hash.into(),
            hash: String::new(),
            transactions,
            nonce: 0,
            timestamp: Timestamp::now(),
            merkle_root: String::new(),
        };
        block.rehash();
        block
    }

    /// Create the genesis block.
    pub fn genesis(transactions: Vec<Transaction<T>>) -> Self {
        Self::linked(0, GENESIS_PREVIOUS_HASH, transactions)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == GENESIS_PREVIOUS_HASH
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// Canonical strings of the contained transactions, in order.
    pub fn leaves(&self) -> Vec<String> {
        self.transactions
            .iter()
            .map(Transaction::canonical_string)
            .collect()
    }

    pub fn merkle_tree(&self) -> MerkleTree {
        MerkleTree::new(&self.leaves())
    }

    /// Merkle root recomputed from the transactions.
    pub fn calculate_merkle_root(&self) -> String {
        self.merkle_tree().root().to_string()
    }

    /// Hash recomputed from the stored header fields.
    pub fn calculate_hash(&self) -> String {
        let input = format!(
            "{}{}{}{}{}{}",
            self.index,
            self.timestamp.secs,
            self.timestamp.nanos,
            self.previous_hash,
            self.nonce,
            self.merkle_root
        );
        sha256_hex(input.as_bytes())
    }

    /// Recompute the merkle root and then the hash.
    pub fn rehash(&mut self) {
        self.merkle_root = self.calculate_merkle_root();
        self.hash = self.calculate_hash();
    }

    /// Link the block behind a predecessor and rehash.
    pub fn stamp(&mut self, index: i64, previous_hash: &str) {
        self.index = index;
        self.previous_hash = previous_hash.to_string();
        self.rehash();
    }

    /// Hash and merkle root agree with the stored fields.
    pub fn verify_integrity(&self) -> Result<()> {
        let computed = self.calculate_hash();
        if computed != self.hash {
            return Err(BlockError::HashMismatch {
                index: self.index,
                stored: self.hash.clone(),
                computed,
            });
        }
        if self.calculate_merkle_root() != self.merkle_root {
            return Err(BlockError::MerkleRootMismatch(self.index));
        }
        Ok(())
    }

    /// Full validity check, reporting the first failure: field presence,
    /// hash, merkle root, then every transaction.
    pub fn validate(&self) -> Result<()> {
        if self.index < 0 {
            return Err(BlockError::NegativeIndex(self.index));
        }
        if self.hash.is_empty() {
            return Err(BlockError::MissingHash(self.index));
        }
        if self.previous_hash.is_empty() {
            return Err(BlockError::MissingPreviousHash(self.index));
        }
        if self.transactions.is_empty() {
            return Err(BlockError::Empty(self.index));
        }

        self.verify_integrity()?;

        for (position, tx) in self.transactions.iter().enumerate() {
            tx.validate()
                .map_err(|source| BlockError::InvalidTransaction {
                    index: self.index,
                    position,
                    source,
                })?;
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Inclusion proof for the transaction at `position`.
    pub fn merkle_proof(&self, position: usize) -> Option<Vec<String>> {
        self.merkle_tree().proof(position)
    }

    /// Prove that the transaction at `position` is committed to by the
    /// stored merkle root. The tree is rebuilt from the transactions, so a
    /// root forged independently of the transaction list fails.
    pub fn verify_transaction(&self, position: usize) -> bool {
        let Some(tx) = self.transactions.get(position) else {
            return false;
        };
        let tree = self.merkle_tree();
        let Some(proof) = tree.proof(position) else {
            return false;
        };
        tree.root() == self.merkle_root
            && verify_proof(&self.merkle_root, &tx.canonical_string(), position, &proof)
    }

    pub fn find_transaction(&self, id: &str) -> Option<&Transaction<T>> {
        self.transactions.iter().find(|tx| tx.id == id)
    }

    /// Encode to the binary wire format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.put_i64(self.index);
        enc.put_str(&self.previous_hash)?;
        enc.put_str(&self.hash)?;
        enc.put_i64(self.nonce)
            .put_i64(self.timestamp.secs)
            .put_u32(self.timestamp.nanos);
        enc.put_str(&self.merkle_root)?;

        let count = u32::try_from(self.transactions.len())
            .map_err(|_| CodecError::TooLarge(self.transactions.len()))?;
        enc.put_u32(count);
        for tx in &self.transactions {
            let mut inner = Encoder::new();
            tx.encode_into(&mut inner)?;
            enc.put_bytes(&inner.finish())?;
        }
        Ok(enc.finish())
    }

    /// Decode from the binary wire format. The decoded block is returned as
    /// stored; call [`Block::validate`] to check it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let index = dec.i64()?;
        let previous_hash = dec.string()?;
        let hash = dec.string()?;
        let nonce = dec.i64()?;
        let secs = dec.i64()?;
        let nanos = dec.u32()?;
        let merkle_root = dec.string()?;

        let count = dec.u32()? as usize;
        let mut transactions = Vec::with_capacity(count.min(dec.remaining()));
        for _ in 0..count {
            let mut inner = Decoder::new(dec.bytes()?);
            transactions.push(Transaction::decode_from(&mut inner)?);
            inner.finish()?;
        }
        dec.finish()?;

        Ok(Self {
            index,
            previous_hash,
            hash,
            transactions,
            nonce,
            timestamp: Timestamp::new(secs, nanos),
            merkle_root,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
