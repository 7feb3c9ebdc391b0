//! The append-only hash chain and its admission rules.

use crate::authenticator::{AuthError, Authenticator, Participant};
use authchain_core::{
    Block, BlockError, ErrorKind, Payload, SigningKey, Transaction, TransactionError,
};
use authchain_storage::{LedgerStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, warn};

/// ID of the single transaction carried by every genesis block.
pub const GENESIS_TRANSACTION_ID: &str = "genesis";

/// Errors that can occur during chain operations.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transaction {0} has already been used")]
    DuplicateTransaction(String),

    #[error("invalid block: {0}")]
    InvalidBlock(#[from] BlockError),

    #[error("invalid genesis block")]
    InvalidGenesis,

    #[error("chain has no blocks")]
    EmptyChain,

    #[error("block {index} does not link to its predecessor")]
    BrokenLink { index: usize },

    #[error("block {0} not found")]
    BlockNotFound(u64),

    #[error("store holds no blocks")]
    EmptyStore,

    #[error("authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::DuplicateTransaction(_) => ErrorKind::AlreadyExists,
            ChainError::BlockNotFound(_) | ChainError::EmptyStore | ChainError::EmptyChain => {
                ErrorKind::NotFound
            }
            ChainError::InvalidBlock(e) => e.kind(),
            ChainError::Auth(e) => e.kind(),
            ChainError::Transaction(e) => e.kind(),
            ChainError::Storage(e) => e.kind(),
            ChainError::Json(_) => ErrorKind::Io,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// A hash-linked sequence of blocks starting at genesis, together with the
/// authenticator that guards it.
///
/// `Chain` is not internally synchronized. [`add_block`](Chain::add_block)
/// takes `&mut self`, so the used-ID check, the used-ID write and the append
/// cannot interleave with another admission.
///
/// Deserializing goes through [`validate`](Chain::validate), so a decoded
/// chain always holds a valid genesis block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "T: Payload", try_from = "ChainRecord<T>")]
pub struct Chain<T> {
    id: String,
    blocks: Vec<Block<T>>,
    authenticator: Authenticator,
}

/// Serialized form of a [`Chain`], checked before it becomes one.
#[derive(Deserialize)]
#[serde(bound = "T: Payload")]
struct ChainRecord<T> {
    id: String,
    blocks: Vec<Block<T>>,
    #[serde(default)]
    authenticator: Authenticator,
}

impl<T: Payload> TryFrom<ChainRecord<T>> for Chain<T> {
    type Error = ChainError;

    fn try_from(record: ChainRecord<T>) -> Result<Self> {
        let mut chain = Self {
            id: record.id,
            blocks: record.blocks,
            authenticator: record.authenticator,
        };
        chain.validate()?;
        chain.mark_block_transactions_used();
        Ok(chain)
    }
}

impl<T: Payload> Chain<T> {
    /// Create a chain whose genesis block carries `genesis_payload`, signed
    /// by `key`.
    pub fn new(id: impl Into<String>, genesis_payload: T, key: &dyn SigningKey) -> Result<Self> {
        let genesis_tx = Transaction::new(GENESIS_TRANSACTION_ID, genesis_payload, 0).signed(key)?;
        let genesis = Block::genesis(vec![genesis_tx]);

        let mut authenticator = Authenticator::new();
        authenticator.mark_transactions_used([GENESIS_TRANSACTION_ID]);

        let id = id.into();
        info!(chain = %id, hash = %genesis.hash, "chain created");
        Ok(Self {
            id,
            blocks: vec![genesis],
            authenticator,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Number of blocks, genesis included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always `false`: a chain holds at least its genesis block.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn genesis(&self) -> &Block<T> {
        &self.blocks[0]
    }

    pub fn latest_block(&self) -> &Block<T> {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn block(&self, index: usize) -> Option<&Block<T>> {
        self.blocks.get(index)
    }

    pub fn blocks(&self) -> &[Block<T>] {
        &self.blocks
    }

    /// Link `candidate` behind the current tip and rehash it, without
    /// admitting it.
    pub fn prepare_block(&self, candidate: &mut Block<T>) {
        let tip = self.latest_block();
        candidate.stamp(tip.index + 1, &tip.hash);
    }

    /// Check that an already prepared block could be appended now.
    pub fn check_block(&self, block: &Block<T>) -> Result<()> {
        let tip = self.latest_block();
        if block.index != tip.index + 1 || block.previous_hash != tip.hash {
            return Err(ChainError::BrokenLink {
                index: self.blocks.len(),
            });
        }

        let mut seen = HashSet::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            if self.authenticator.is_transaction_used(&tx.id) || !seen.insert(tx.id.as_str()) {
                return Err(ChainError::DuplicateTransaction(tx.id.clone()));
            }
        }

        block.validate()?;
        Ok(())
    }

    /// Append a block.
    ///
    /// The candidate is linked behind the tip, every transaction ID is
    /// checked against the used set and against the rest of the block, and
    /// the block is re-validated. Only then are the IDs marked used and the
    /// block appended. A rejected block changes nothing.
    pub fn add_block(&mut self, mut candidate: Block<T>) -> Result<&Block<T>> {
        self.prepare_block(&mut candidate);
        if let Err(e) = self.check_block(&candidate) {
            warn!(chain = %self.id, index = candidate.index, error = %e, "block rejected");
            return Err(e);
        }

        self.authenticator
            .mark_transactions_used(candidate.transactions.iter().map(|tx| tx.id.clone()));
        info!(
            chain = %self.id,
            index = candidate.index,
            hash = %candidate.hash,
            txs = candidate.tx_count(),
            "block added"
        );
        self.blocks.push(candidate);
        Ok(self.latest_block())
    }

    /// Re-derive every hash, merkle root and link, reporting the first
    /// failure.
    pub fn validate(&self) -> Result<()> {
        let genesis = self.blocks.first().ok_or(ChainError::EmptyChain)?;
        if !genesis.is_genesis() {
            return Err(ChainError::InvalidGenesis);
        }
        genesis.validate()?;

        for (i, pair) in self.blocks.windows(2).enumerate() {
            let (prev, block) = (&pair[0], &pair[1]);
            let index = i + 1;
            if block.previous_hash != prev.hash || block.index != index as i64 {
                return Err(ChainError::BrokenLink { index });
            }
            block.validate()?;
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Locate a transaction by ID, returning the block index along with it.
    pub fn find_transaction(&self, id: &str) -> Option<(usize, &Transaction<T>)> {
        self.blocks
            .iter()
            .enumerate()
            .find_map(|(i, block)| block.find_transaction(id).map(|tx| (i, tx)))
    }

    /// Merkle inclusion check for one transaction of one block.
    pub fn verify_transaction(&self, block_index: usize, tx_index: usize) -> bool {
        self.blocks
            .get(block_index)
            .is_some_and(|block| block.verify_transaction(tx_index))
    }

    pub fn is_transaction_used(&self, tx_id: &str) -> bool {
        self.authenticator.is_transaction_used(tx_id)
    }

    // =========================================================================
    // Participants
    // =========================================================================

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn register_participant(
        &mut self,
        id: impl Into<String>,
        state: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) {
        self.authenticator.register_participant(id, state, metadata);
    }

    pub fn deauthorize_participant(&mut self, id: &str) -> Option<Participant> {
        self.authenticator.deauthorize_participant(id)
    }

    pub fn grant_capability(&mut self, id: &str, capability: impl Into<String>) {
        self.authenticator.grant_capability(id, capability);
    }

    pub fn revoke_capability(&mut self, id: &str, capability: &str) {
        self.authenticator.revoke_capability(id, capability);
    }

    pub fn is_authorized(&self, id: &str) -> bool {
        self.authenticator.is_authorized(id)
    }

    pub fn has_capability(&self, id: &str, capability: &str) -> bool {
        self.authenticator.has_capability(id, capability)
    }

    pub fn check_authorization(&self, issuer: &str, capability: &str) -> Result<()> {
        Ok(self.authenticator.check_authorization(issuer, capability)?)
    }

    /// Authorize an action and consume its transaction ID.
    pub fn validate_and_record_action(
        &mut self,
        issuer: &str,
        description: &str,
        tx_id: &str,
        required_capability: &str,
    ) -> Result<()> {
        Ok(self.authenticator.validate_and_record_action(
            issuer,
            description,
            tx_id,
            required_capability,
        )?)
    }

    // =========================================================================
    // Export / import
    // =========================================================================

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Import a chain and re-validate it. Every transaction ID found in the
    /// blocks is marked used.
    pub fn from_json(json: &str) -> Result<Self> {
        let record: ChainRecord<T> = serde_json::from_str(json)?;
        Self::try_from(record)
    }

    fn mark_block_transactions_used(&mut self) {
        let ids: Vec<String> = self
            .blocks
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.id.clone()))
            .collect();
        self.authenticator.mark_transactions_used(ids);
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write every block the store does not hold yet, with its
    /// transactions, in one store transaction. Returns the number of blocks
    /// written.
    pub fn persist<S: LedgerStore + ?Sized>(&self, store: &mut S) -> Result<usize> {
        let start = match store.height()? {
            Some(h) => h as usize + 1,
            None => 0,
        };
        if start >= self.blocks.len() {
            return Ok(0);
        }

        store.begin()?;
        if let Err(e) = self.write_blocks(store, start) {
            if let Err(rollback) = store.rollback() {
                warn!(chain = %self.id, error = %rollback, "rollback after failed persist");
            }
            return Err(e);
        }
        store.commit()?;

        let written = self.blocks.len() - start;
        debug!(chain = %self.id, from = start, written, "blocks persisted");
        Ok(written)
    }

    fn write_blocks<S: LedgerStore + ?Sized>(&self, store: &mut S, start: usize) -> Result<()> {
        for block in &self.blocks[start..] {
            store.put_block(block.index as u64, &block.to_bytes()?)?;
            for tx in &block.transactions {
                store.put_transaction(&tx.id, &tx.to_bytes()?)?;
            }
        }
        Ok(())
    }

    /// Rebuild a chain from a store and re-validate it.
    ///
    /// Only blocks are stored; participants must be registered again.
    pub fn load<S: LedgerStore + ?Sized>(id: impl Into<String>, store: &S) -> Result<Self> {
        let height = store.height()?.ok_or(ChainError::EmptyStore)?;

        let mut blocks = Vec::with_capacity(height as usize + 1);
        for h in 0..=height {
            let bytes = store.block(h)?.ok_or(ChainError::BlockNotFound(h))?;
            blocks.push(Block::from_bytes(&bytes)?);
        }

        let chain = Self::try_from(ChainRecord {
            id: id.into(),
            blocks,
            authenticator: Authenticator::new(),
        })?;
        info!(chain = %chain.id, blocks = chain.len(), "chain loaded");
        Ok(chain)
    }
}
