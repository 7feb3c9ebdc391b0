//! Consensus-gated block admission.
//!
//! A [`Ledger`] parks candidate blocks while validators sign their hashes and
//! appends a block to its [`Chain`] only once the proposal has quorum:
//!
//! ```text
//! propose ──▶ sign × N ──▶ commit ──▶ Chain::add_block
//!    │                        │
//!    └─ rate limit            └─ StaleProposal if the tip moved
//! ```

use crate::chain::{Chain, ChainError};
use authchain_consensus::{BlockSignature, ConsensusError, PoAConsensus};
use authchain_core::{now_millis, Block, ErrorKind, Payload};
use authchain_storage::LedgerStore;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while driving blocks through consensus.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("no pending block for proposal {0}")]
    UnknownProposal(String),

    #[error("proposal {0} was built on a block that is no longer the tip")]
    StaleProposal(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Chain(e) => e.kind(),
            LedgerError::Consensus(e) => e.kind(),
            LedgerError::UnknownProposal(_) => ErrorKind::NotFound,
            LedgerError::StaleProposal(_) => ErrorKind::InvalidArgument,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// A chain whose blocks are admitted through Proof of Authority.
///
/// The consensus engine is shared, so several ledgers can be driven by one
/// validator set.
pub struct Ledger<T> {
    chain: Chain<T>,
    consensus: Arc<PoAConsensus>,
    pending: HashMap<String, Block<T>>,
}

impl<T: Payload> Ledger<T> {
    pub fn new(chain: Chain<T>, consensus: Arc<PoAConsensus>) -> Self {
        Self {
            chain,
            consensus,
            pending: HashMap::new(),
        }
    }

    /// Rebuild the chain from a store and attach it to `consensus`.
    pub fn load<S: LedgerStore + ?Sized>(
        id: impl Into<String>,
        store: &S,
        consensus: Arc<PoAConsensus>,
    ) -> Result<Self> {
        Ok(Self::new(Chain::load(id, store)?, consensus))
    }

    pub fn chain(&self) -> &Chain<T> {
        &self.chain
    }

    /// Mutable access for participant management. Blocks appended here
    /// bypass consensus.
    pub fn chain_mut(&mut self) -> &mut Chain<T> {
        &mut self.chain
    }

    pub fn consensus(&self) -> &Arc<PoAConsensus> {
        &self.consensus
    }

    /// Block parked under a proposal.
    pub fn pending_block(&self, proposal_id: &str) -> Option<&Block<T>> {
        self.pending.get(proposal_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Link `block` behind the tip, check it is admissible and open a
    /// proposal for its hash. Returns the proposal ID.
    pub fn propose(&mut self, mut block: Block<T>, proposer_id: &str) -> Result<String> {
        self.chain.prepare_block(&mut block);
        self.chain.check_block(&block)?;

        self.consensus.can_propose(proposer_id)?;
        let proposal_id = self.consensus.create_proposal(&block.hash, proposer_id)?;
        self.consensus.record_proposal(proposer_id)?;

        info!(
            chain = %self.chain.id(),
            proposal = %proposal_id,
            index = block.index,
            "block proposed"
        );
        self.pending.insert(proposal_id.clone(), block);
        Ok(proposal_id)
    }

    /// Sign a proposal with a validator's local key. Returns `true` when this
    /// signature completed the quorum.
    pub fn sign(&self, proposal_id: &str, validator_id: &str) -> Result<bool> {
        Ok(self.consensus.sign_proposal(proposal_id, validator_id)?)
    }

    /// Record a signature produced elsewhere.
    pub fn add_signature(
        &self,
        proposal_id: &str,
        validator_id: &str,
        signature: Vec<u8>,
    ) -> Result<bool> {
        Ok(self
            .consensus
            .add_signature(proposal_id, validator_id, signature)?)
    }

    /// Append a proposal's block once it has quorum and return the
    /// signatures that finalized it.
    ///
    /// If the chain advanced since the block was proposed, the proposal is
    /// dropped and `StaleProposal` is returned. A block whose proposal no
    /// longer exists in the engine is dropped as well.
    pub fn commit(&mut self, proposal_id: &str) -> Result<Vec<BlockSignature>> {
        let block = self
            .pending
            .get(proposal_id)
            .ok_or_else(|| LedgerError::UnknownProposal(proposal_id.to_string()))?;
        let signatures = match self.consensus.finalized_signatures(proposal_id) {
            Ok(signatures) => signatures,
            Err(e @ (ConsensusError::ProposalNotFound(_) | ConsensusError::ProposalExpired(_))) => {
                warn!(proposal = %proposal_id, error = %e, "pending block dropped");
                self.pending.remove(proposal_id);
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let mut restamped = block.clone();
        self.chain.prepare_block(&mut restamped);
        if restamped.hash != block.hash {
            warn!(proposal = %proposal_id, "stale proposal dropped");
            self.pending.remove(proposal_id);
            self.consensus.remove_proposal(proposal_id);
            return Err(LedgerError::StaleProposal(proposal_id.to_string()));
        }

        self.chain.add_block(restamped)?;
        self.pending.remove(proposal_id);
        self.consensus.remove_proposal(proposal_id);

        info!(
            chain = %self.chain.id(),
            proposal = %proposal_id,
            signatures = signatures.len(),
            "block committed"
        );
        Ok(signatures)
    }

    /// Forget a pending block and its proposal.
    pub fn abandon(&mut self, proposal_id: &str) -> Option<Block<T>> {
        self.consensus.remove_proposal(proposal_id);
        self.pending.remove(proposal_id)
    }

    /// Sweep expired proposals from the engine and drop every pending block
    /// whose proposal is gone. Returns the number of blocks dropped.
    pub fn cleanup_expired(&mut self) -> usize {
        self.cleanup_expired_at(now_millis())
    }

    pub fn cleanup_expired_at(&mut self, now: u64) -> usize {
        self.consensus.cleanup_expired_at(now);
        let before = self.pending.len();
        let consensus = &self.consensus;
        self.pending.retain(|id, _| consensus.proposal(id).is_some());
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!(chain = %self.chain.id(), dropped, "expired pending blocks dropped");
        }
        dropped
    }

    /// Write blocks not yet in `store`. Returns the number written.
    pub fn persist<S: LedgerStore + ?Sized>(&self, store: &mut S) -> Result<usize> {
        Ok(self.chain.persist(store)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authchain_consensus::PoAConfig;
    use authchain_core::{Ed25519Key, Transaction};
    use authchain_storage::SledStore;

    struct Setup {
        ledger: Ledger<String>,
        validators: Vec<String>,
        key: Ed25519Key,
    }

    fn setup() -> Setup {
        let consensus = Arc::new(PoAConsensus::new(PoAConfig::new(2, 1)).unwrap());
        let validators = (0..3)
            .map(|i| {
                consensus
                    .add_validator(format!("node-{i}"), Arc::new(Ed25519Key::generate()), 1)
                    .unwrap()
            })
            .collect();
        Setup {
            ledger: Ledger::new(
                Chain::new("test", "init".to_string(), &Ed25519Key::generate()).unwrap(),
                consensus,
            ),
            validators,
            key: Ed25519Key::generate(),
        }
    }

    fn block(id: &str, key: &Ed25519Key) -> Block<String> {
        let tx = Transaction::new(id, "data".to_string(), 1).signed(key).unwrap();
        Block::new(vec![tx])
    }

    #[test]
    fn test_propose_sign_commit() {
        let Setup { mut ledger, validators, key } = setup();
        let pid = ledger.propose(block("tx-1", &key), &validators[0]).unwrap();
        assert_eq!(ledger.pending_count(), 1);

        assert!(!ledger.sign(&pid, &validators[0]).unwrap());
        assert!(matches!(
            ledger.commit(&pid),
            Err(LedgerError::Consensus(ConsensusError::QuorumNotReached { .. }))
        ));
        assert_eq!(ledger.chain().len(), 1);

        assert!(ledger.sign(&pid, &validators[1]).unwrap());
        let signatures = ledger.commit(&pid).unwrap();
        assert_eq!(signatures.len(), 2);
        assert_eq!(ledger.chain().len(), 2);
        assert!(ledger.chain().is_transaction_used("tx-1"));
        assert_eq!(ledger.pending_count(), 0);
        assert!(ledger.consensus().proposal(&pid).is_none());
    }

    #[test]
    fn test_propose_rejects_inadmissible_block() {
        let Setup { mut ledger, validators, .. } = setup();
        let unsigned = Block::new(vec![Transaction::new("tx-1", "data".to_string(), 1)]);
        assert!(matches!(
            ledger.propose(unsigned, &validators[0]),
            Err(LedgerError::Chain(ChainError::InvalidBlock(_)))
        ));
        assert_eq!(ledger.consensus().proposal_count(), 0);
    }

    #[test]
    fn test_proposer_rate_limited() {
        let Setup { mut ledger, validators, key } = setup();
        ledger.propose(block("tx-1", &key), &validators[0]).unwrap();
        let err = ledger.propose(block("tx-2", &key), &validators[0]).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Consensus(ConsensusError::ProposingTooSoon { .. })
        ));
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_stale_proposal() {
        let Setup { mut ledger, validators, key } = setup();
        let first = ledger.propose(block("tx-1", &key), &validators[0]).unwrap();
        let second = ledger.propose(block("tx-2", &key), &validators[1]).unwrap();

        for v in &validators[..2] {
            ledger.sign(&first, v).unwrap();
            ledger.sign(&second, v).unwrap();
        }
        ledger.commit(&first).unwrap();

        assert!(matches!(
            ledger.commit(&second),
            Err(LedgerError::StaleProposal(_))
        ));
        assert!(ledger.pending_block(&second).is_none());
        assert_eq!(ledger.chain().len(), 2);
        assert!(!ledger.chain().is_transaction_used("tx-2"));
    }

    #[test]
    fn test_unknown_proposal() {
        let Setup { mut ledger, .. } = setup();
        let err = ledger.commit("proposal-none").unwrap_err();
        assert!(matches!(err, LedgerError::UnknownProposal(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_abandon() {
        let Setup { mut ledger, validators, key } = setup();
        let pid = ledger.propose(block("tx-1", &key), &validators[0]).unwrap();
        assert!(ledger.abandon(&pid).is_some());
        assert_eq!(ledger.consensus().proposal_count(), 0);
        assert!(!ledger.chain().is_transaction_used("tx-1"));
    }

    #[test]
    fn test_cleanup_drops_expired_pending_blocks() {
        let Setup { mut ledger, validators, key } = setup();
        let expired = ledger.propose(block("tx-1", &key), &validators[0]).unwrap();
        let created_at = ledger.consensus().proposal(&expired).unwrap().created_at;

        assert_eq!(ledger.cleanup_expired_at(created_at), 0);
        assert_eq!(ledger.pending_count(), 1);

        assert_eq!(ledger.cleanup_expired_at(created_at + 60_000), 1);
        assert_eq!(ledger.pending_count(), 0);
        assert!(ledger.consensus().proposal(&expired).is_none());
        assert!(!ledger.chain().is_transaction_used("tx-1"));
    }

    #[test]
    fn test_commit_drops_block_of_vanished_proposal() {
        let Setup { mut ledger, validators, key } = setup();
        let pid = ledger.propose(block("tx-1", &key), &validators[0]).unwrap();
        assert_eq!(ledger.consensus().cleanup_expired_at(u64::MAX), 1);

        assert!(matches!(
            ledger.commit(&pid),
            Err(LedgerError::Consensus(ConsensusError::ProposalNotFound(_)))
        ));
        assert_eq!(ledger.pending_count(), 0);
        assert!(matches!(
            ledger.commit(&pid),
            Err(LedgerError::UnknownProposal(_))
        ));
    }

    #[test]
    fn test_persist_and_load() {
        let Setup { mut ledger, validators, key } = setup();
        let pid = ledger.propose(block("tx-1", &key), &validators[0]).unwrap();
        ledger.sign(&pid, &validators[1]).unwrap();
        ledger.sign(&pid, &validators[2]).unwrap();
        ledger.commit(&pid).unwrap();

        let mut store = SledStore::open_temporary().unwrap();
        assert_eq!(ledger.persist(&mut store).unwrap(), 2);

        let loaded: Ledger<String> =
            Ledger::load("test", &store, Arc::clone(ledger.consensus())).unwrap();
        assert_eq!(loaded.chain().blocks(), ledger.chain().blocks());
    }
}
