//! Proof of Authority (PoA) consensus engine.
//!
//! A fixed but changing set of validators signs block hashes. A proposal is
//! finalized once enough distinct active validators have signed it. The bar
//! follows the number of active validators so that a minority going offline
//! cannot stall the ledger:
//!
//! ```text
//! required = max(minimum_required, min(initial_required, active_validators))
//! ```
//!
//! All engine state sits behind one mutex; every public method holds it for
//! its whole duration.

use crate::validator::{BlockSignature, Validator, ValidatorStatus};
use authchain_core::{now_millis, CryptoError, ErrorKind, SigningKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Length of the rate-limiting window.
pub const RATE_WINDOW_MS: u64 = 60 * 60 * 1000;

/// Errors that can occur during consensus operations.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("invalid consensus config: {0}")]
    InvalidConfig(String),

    #[error("validator {0} is already registered")]
    DuplicateValidator(String),

    #[error("unknown validator: {0}")]
    UnknownValidator(String),

    #[error("validator {0} is revoked")]
    ValidatorRevoked(String),

    #[error("validator {id} cannot sign while {status}")]
    ValidatorCannotSign { id: String, status: ValidatorStatus },

    #[error("block hash is empty")]
    EmptyBlockHash,

    #[error("proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("proposal {0} already exists")]
    ProposalExists(String),

    #[error("proposal {0} has expired")]
    ProposalExpired(String),

    #[error("validator {validator} already signed proposal {proposal}")]
    AlreadySigned { proposal: String, validator: String },

    #[error("signature from validator {0} does not verify")]
    InvalidSignature(String),

    #[error("proposal {proposal} has {have} of {need} required signatures")]
    QuorumNotReached {
        proposal: String,
        have: usize,
        need: usize,
    },

    #[error("validator {validator} must wait {wait_secs}s before proposing again")]
    ProposingTooSoon { validator: String, wait_secs: u64 },

    #[error("validator {validator} reached the limit of {limit} proposals per hour")]
    HourlyLimitReached { validator: String, limit: u32 },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl ConsensusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsensusError::UnknownValidator(_) | ConsensusError::ProposalNotFound(_) => {
                ErrorKind::NotFound
            }
            ConsensusError::ProposalExists(_) | ConsensusError::AlreadySigned { .. } => {
                ErrorKind::AlreadyExists
            }
            ConsensusError::ValidatorCannotSign { .. }
            | ConsensusError::InvalidSignature(_)
            | ConsensusError::ProposingTooSoon { .. }
            | ConsensusError::HourlyLimitReached { .. } => ErrorKind::PermissionDenied,
            ConsensusError::Crypto(e) => e.kind(),
            _ => ErrorKind::InvalidArgument,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Proof of Authority configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoAConfig {
    /// Signature threshold while enough validators are active.
    pub initial_required_signatures: usize,
    /// Floor the threshold never drops below.
    pub minimum_required_signatures: usize,
    /// How long a proposal accepts signatures.
    pub signature_timeout_ms: u64,
    /// Minimum gap between two proposals from one validator.
    pub min_seconds_between_proposals: u64,
    /// Proposals one validator may make within an hour.
    pub max_proposals_per_hour: u32,
}

impl Default for PoAConfig {
    fn default() -> Self {
        Self {
            initial_required_signatures: 2,
            minimum_required_signatures: 1,
            signature_timeout_ms: 30_000,
            min_seconds_between_proposals: 5,
            max_proposals_per_hour: 100,
        }
    }
}

impl PoAConfig {
    /// Create a configuration with the given thresholds and default timings.
    pub fn new(initial_required_signatures: usize, minimum_required_signatures: usize) -> Self {
        Self {
            initial_required_signatures,
            minimum_required_signatures,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.minimum_required_signatures == 0 {
            return Err(ConsensusError::InvalidConfig(
                "minimum_required_signatures must be at least 1".into(),
            ));
        }
        if self.minimum_required_signatures > self.initial_required_signatures {
            return Err(ConsensusError::InvalidConfig(format!(
                "minimum_required_signatures ({}) exceeds initial_required_signatures ({})",
                self.minimum_required_signatures, self.initial_required_signatures
            )));
        }
        if self.max_proposals_per_hour == 0 {
            return Err(ConsensusError::InvalidConfig(
                "max_proposals_per_hour must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Signature threshold for a given number of active validators.
    pub fn required_signatures(&self, active_validators: usize) -> usize {
        self.minimum_required_signatures
            .max(self.initial_required_signatures.min(active_validators))
    }
}

/// Proposal IDs are derived from the block hash.
pub fn proposal_id(block_hash: &str) -> String {
    format!("proposal-{block_hash}")
}

/// An in-flight request for validator signatures on one block hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub block_hash: String,
    pub proposer_id: String,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Threshold captured when the proposal was created.
    pub required_signatures: usize,
    /// Validators that were active at creation and have not signed yet.
    pub pending_validators: BTreeSet<String>,
    pub signed_validators: BTreeSet<String>,
    pub signatures: Vec<BlockSignature>,
}

impl Proposal {
    pub fn is_expired(&self, now: u64, timeout_ms: u64) -> bool {
        now.saturating_sub(self.created_at) > timeout_ms
    }

    pub fn has_quorum(&self) -> bool {
        self.signed_validators.len() >= self.required_signatures
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimit {
    last_proposal_ms: u64,
    proposal_count: u32,
}

#[derive(Default)]
struct ConsensusState {
    validators: HashMap<String, Validator>,
    proposals: HashMap<String, Proposal>,
    rate_limits: HashMap<String, RateLimit>,
}

impl ConsensusState {
    fn active_count(&self) -> usize {
        self.validators.values().filter(|v| v.can_sign()).count()
    }

    fn validator_mut(&mut self, id: &str) -> Result<&mut Validator> {
        self.validators
            .get_mut(id)
            .ok_or_else(|| ConsensusError::UnknownValidator(id.to_string()))
    }
}

enum SignatureSource {
    Provided(Vec<u8>),
    Local,
}

/// Proof of Authority engine: validator set, in-flight proposals and
/// per-validator proposal rate limits.
pub struct PoAConsensus {
    config: PoAConfig,
    state: Mutex<ConsensusState>,
}

impl PoAConsensus {
    pub fn new(config: PoAConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(ConsensusState::default()),
        })
    }

    pub fn config(&self) -> &PoAConfig {
        &self.config
    }

    // =========================================================================
    // Validators
    // =========================================================================

    /// Register a validator and return its key-derived ID.
    pub fn add_validator(
        &self,
        participant_id: impl Into<String>,
        identity: Arc<dyn SigningKey>,
        weight: u64,
    ) -> Result<String> {
        let mut state = self.state.lock();
        let validator = Validator::new(participant_id, identity, weight, now_millis());
        let id = validator.id.clone();
        if state.validators.contains_key(&id) {
            return Err(ConsensusError::DuplicateValidator(id));
        }
        info!(validator = %id, participant = %validator.participant_id, weight, "validator added");
        state.validators.insert(id.clone(), validator);
        Ok(id)
    }

    /// Delete a validator entirely, along with its rate-limit history.
    pub fn remove_validator(&self, validator_id: &str) -> Result<Validator> {
        let mut state = self.state.lock();
        let removed = state
            .validators
            .remove(validator_id)
            .ok_or_else(|| ConsensusError::UnknownValidator(validator_id.to_string()))?;
        state.rate_limits.remove(validator_id);
        info!(validator = %validator_id, "validator removed");
        Ok(removed)
    }

    pub fn mark_offline(&self, validator_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.validator_mut(validator_id)?.mark_offline(now_millis())?;
        info!(validator = %validator_id, "validator offline");
        Ok(())
    }

    pub fn mark_online(&self, validator_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.validator_mut(validator_id)?.mark_online(now_millis())?;
        info!(validator = %validator_id, "validator online");
        Ok(())
    }

    /// Revoke a validator. Revocation cannot be undone.
    pub fn revoke_validator(&self, validator_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.validator_mut(validator_id)?.revoke(now_millis());
        warn!(validator = %validator_id, "validator revoked");
        Ok(())
    }

    /// Refresh a validator's last-activity time.
    pub fn record_activity(&self, validator_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.validator_mut(validator_id)?.last_active_at = now_millis();
        Ok(())
    }

    pub fn validator(&self, validator_id: &str) -> Option<Validator> {
        self.state.lock().validators.get(validator_id).cloned()
    }

    /// All validators, sorted by ID.
    pub fn validators(&self) -> Vec<Validator> {
        let state = self.state.lock();
        let mut all: Vec<_> = state.validators.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn validator_count(&self) -> usize {
        self.state.lock().validators.len()
    }

    pub fn active_validator_count(&self) -> usize {
        self.state.lock().active_count()
    }

    pub fn total_weight(&self) -> u64 {
        self.state.lock().validators.values().map(|v| v.weight).sum()
    }

    pub fn active_weight(&self) -> u64 {
        self.state
            .lock()
            .validators
            .values()
            .filter(|v| v.can_sign())
            .map(|v| v.weight)
            .sum()
    }

    // =========================================================================
    // Quorum
    // =========================================================================

    /// Signatures a proposal created now would need.
    pub fn required_signatures(&self) -> usize {
        let active = self.state.lock().active_count();
        self.config.required_signatures(active)
    }

    /// Whether `signatures` come from enough distinct validators to meet the
    /// current threshold.
    pub fn has_quorum(&self, signatures: &[BlockSignature]) -> bool {
        let distinct: HashSet<&str> = signatures.iter().map(|s| s.validator_id.as_str()).collect();
        distinct.len() >= self.required_signatures()
    }

    // =========================================================================
    // Proposals
    // =========================================================================

    pub fn create_proposal(&self, block_hash: &str, proposer_id: &str) -> Result<String> {
        self.create_proposal_at(block_hash, proposer_id, now_millis())
    }

    /// Open a proposal for `block_hash`. The current threshold and active
    /// validator set are captured; later churn does not change them.
    pub fn create_proposal_at(&self, block_hash: &str, proposer_id: &str, now: u64) -> Result<String> {
        if block_hash.is_empty() {
            return Err(ConsensusError::EmptyBlockHash);
        }

        let mut state = self.state.lock();
        let proposer = state
            .validators
            .get(proposer_id)
            .ok_or_else(|| ConsensusError::UnknownValidator(proposer_id.to_string()))?;
        if !proposer.can_sign() {
            return Err(ConsensusError::ValidatorCannotSign {
                id: proposer_id.to_string(),
                status: proposer.status,
            });
        }

        let id = proposal_id(block_hash);
        if let Some(existing) = state.proposals.get(&id) {
            if !existing.is_expired(now, self.config.signature_timeout_ms) {
                return Err(ConsensusError::ProposalExists(id));
            }
            debug!(proposal = %id, "replacing expired proposal");
        }

        let pending_validators: BTreeSet<String> = state
            .validators
            .values()
            .filter(|v| v.can_sign())
            .map(|v| v.id.clone())
            .collect();
        let required_signatures = self.config.required_signatures(pending_validators.len());

        let proposal = Proposal {
            id: id.clone(),
            block_hash: block_hash.to_string(),
            proposer_id: proposer_id.to_string(),
            created_at: now,
            required_signatures,
            pending_validators,
            signed_validators: BTreeSet::new(),
            signatures: Vec::new(),
        };
        state.proposals.insert(id.clone(), proposal);

        info!(proposal = %id, proposer = %proposer_id, required = required_signatures, "proposal created");
        Ok(id)
    }

    pub fn add_signature(&self, proposal_id: &str, validator_id: &str, signature: Vec<u8>) -> Result<bool> {
        self.add_signature_at(proposal_id, validator_id, signature, now_millis())
    }

    /// Record `validator_id`'s signature over the proposal's block hash.
    ///
    /// Returns `true` only for the signature that brings the proposal to
    /// quorum. A rejected signature leaves the proposal untouched.
    pub fn add_signature_at(
        &self,
        proposal_id: &str,
        validator_id: &str,
        signature: Vec<u8>,
        now: u64,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        self.add_signature_locked(
            &mut state,
            proposal_id,
            validator_id,
            SignatureSource::Provided(signature),
            now,
        )
    }

    pub fn sign_proposal(&self, proposal_id: &str, validator_id: &str) -> Result<bool> {
        self.sign_proposal_at(proposal_id, validator_id, now_millis())
    }

    /// Sign the proposal's block hash with the validator's locally held key
    /// and record the signature.
    pub fn sign_proposal_at(&self, proposal_id: &str, validator_id: &str, now: u64) -> Result<bool> {
        let mut state = self.state.lock();
        self.add_signature_locked(&mut state, proposal_id, validator_id, SignatureSource::Local, now)
    }

    fn add_signature_locked(
        &self,
        state: &mut ConsensusState,
        proposal_id: &str,
        validator_id: &str,
        source: SignatureSource,
        now: u64,
    ) -> Result<bool> {
        let proposal = state
            .proposals
            .get(proposal_id)
            .ok_or_else(|| ConsensusError::ProposalNotFound(proposal_id.to_string()))?;

        if proposal.is_expired(now, self.config.signature_timeout_ms) {
            warn!(proposal = %proposal_id, validator = %validator_id, "signature for expired proposal");
            return Err(ConsensusError::ProposalExpired(proposal_id.to_string()));
        }
        if proposal.signed_validators.contains(validator_id) {
            return Err(ConsensusError::AlreadySigned {
                proposal: proposal_id.to_string(),
                validator: validator_id.to_string(),
            });
        }

        let validator = state
            .validators
            .get(validator_id)
            .ok_or_else(|| ConsensusError::UnknownValidator(validator_id.to_string()))?;
        if !validator.can_sign() {
            return Err(ConsensusError::ValidatorCannotSign {
                id: validator_id.to_string(),
                status: validator.status,
            });
        }

        let message = proposal.block_hash.as_bytes();
        let signature = match source {
            SignatureSource::Provided(signature) => {
                if !validator.verify(message, &signature) {
                    warn!(proposal = %proposal_id, validator = %validator_id, "signature rejected");
                    return Err(ConsensusError::InvalidSignature(validator_id.to_string()));
                }
                signature
            }
            SignatureSource::Local => validator.identity.sign(message)?,
        };
        let participant_id = validator.participant_id.clone();

        // All checks passed; mutate.
        if let Some(v) = state.validators.get_mut(validator_id) {
            v.last_active_at = now;
        }
        let Some(proposal) = state.proposals.get_mut(proposal_id) else {
            return Err(ConsensusError::ProposalNotFound(proposal_id.to_string()));
        };
        let had_quorum = proposal.has_quorum();
        proposal.pending_validators.remove(validator_id);
        proposal.signed_validators.insert(validator_id.to_string());
        proposal.signatures.push(BlockSignature {
            validator_id: validator_id.to_string(),
            participant_id,
            signature,
            signed_at: now,
        });

        let reached = !had_quorum && proposal.has_quorum();
        if reached {
            info!(
                proposal = %proposal_id,
                signatures = proposal.signed_validators.len(),
                "proposal reached quorum"
            );
        } else {
            debug!(
                proposal = %proposal_id,
                validator = %validator_id,
                have = proposal.signed_validators.len(),
                need = proposal.required_signatures,
                "signature recorded"
            );
        }
        Ok(reached)
    }

    /// Whether the proposal exists and has reached its threshold.
    pub fn is_proposal_ready(&self, proposal_id: &str) -> bool {
        self.state
            .lock()
            .proposals
            .get(proposal_id)
            .is_some_and(Proposal::has_quorum)
    }

    /// The collected signatures, once quorum holds.
    pub fn finalized_signatures(&self, proposal_id: &str) -> Result<Vec<BlockSignature>> {
        let state = self.state.lock();
        let proposal = state
            .proposals
            .get(proposal_id)
            .ok_or_else(|| ConsensusError::ProposalNotFound(proposal_id.to_string()))?;
        if !proposal.has_quorum() {
            return Err(ConsensusError::QuorumNotReached {
                proposal: proposal_id.to_string(),
                have: proposal.signed_validators.len(),
                need: proposal.required_signatures,
            });
        }
        Ok(proposal.signatures.clone())
    }

    /// Snapshot of a proposal.
    pub fn proposal(&self, proposal_id: &str) -> Option<Proposal> {
        self.state.lock().proposals.get(proposal_id).cloned()
    }

    /// Snapshot of all open proposals, ordered by ID.
    pub fn proposals(&self) -> Vec<Proposal> {
        let mut proposals: Vec<_> = self.state.lock().proposals.values().cloned().collect();
        proposals.sort_by(|a, b| a.id.cmp(&b.id));
        proposals
    }

    pub fn proposal_count(&self) -> usize {
        self.state.lock().proposals.len()
    }

    pub fn remove_proposal(&self, proposal_id: &str) -> Option<Proposal> {
        self.state.lock().proposals.remove(proposal_id)
    }

    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(now_millis())
    }

    /// Drop every proposal whose signature window has passed. Nothing calls
    /// this automatically.
    pub fn cleanup_expired_at(&self, now: u64) -> usize {
        let timeout = self.config.signature_timeout_ms;
        let mut state = self.state.lock();
        let before = state.proposals.len();
        state.proposals.retain(|id, p| {
            let keep = !p.is_expired(now, timeout);
            if !keep {
                debug!(proposal = %id, "proposal expired");
            }
            keep
        });
        let removed = before - state.proposals.len();
        if removed > 0 {
            info!(removed, "expired proposals cleaned up");
        }
        removed
    }

    // =========================================================================
    // Rate limiting
    // =========================================================================

    pub fn can_propose(&self, validator_id: &str) -> Result<()> {
        self.can_propose_at(validator_id, now_millis())
    }

    /// Check whether `validator_id` may create a proposal now.
    ///
    /// This only checks; call [`record_proposal`](Self::record_proposal)
    /// after proposing. The two calls are separate lock acquisitions, so two
    /// threads can both pass the check before either records.
    pub fn can_propose_at(&self, validator_id: &str, now: u64) -> Result<()> {
        let state = self.state.lock();
        let validator = state
            .validators
            .get(validator_id)
            .ok_or_else(|| ConsensusError::UnknownValidator(validator_id.to_string()))?;
        if !validator.can_sign() {
            return Err(ConsensusError::ValidatorCannotSign {
                id: validator_id.to_string(),
                status: validator.status,
            });
        }

        let Some(limit) = state.rate_limits.get(validator_id) else {
            return Ok(());
        };

        let elapsed = now.saturating_sub(limit.last_proposal_ms);
        let min_gap = self.config.min_seconds_between_proposals.saturating_mul(1000);
        if elapsed < min_gap {
            debug!(validator = %validator_id, elapsed_ms = elapsed, "proposal too soon");
            return Err(ConsensusError::ProposingTooSoon {
                validator: validator_id.to_string(),
                wait_secs: (min_gap - elapsed).div_ceil(1000),
            });
        }
        if elapsed > RATE_WINDOW_MS {
            return Ok(());
        }
        if limit.proposal_count >= self.config.max_proposals_per_hour {
            debug!(validator = %validator_id, count = limit.proposal_count, "hourly proposal limit");
            return Err(ConsensusError::HourlyLimitReached {
                validator: validator_id.to_string(),
                limit: self.config.max_proposals_per_hour,
            });
        }
        Ok(())
    }

    pub fn record_proposal(&self, validator_id: &str) -> Result<()> {
        self.record_proposal_at(validator_id, now_millis())
    }

    /// Count a proposal against `validator_id`'s rate limit.
    pub fn record_proposal_at(&self, validator_id: &str, now: u64) -> Result<()> {
        let mut state = self.state.lock();
        if !state.validators.contains_key(validator_id) {
            return Err(ConsensusError::UnknownValidator(validator_id.to_string()));
        }
        let entry = state
            .rate_limits
            .entry(validator_id.to_string())
            .or_insert(RateLimit {
                last_proposal_ms: now,
                proposal_count: 0,
            });
        if now.saturating_sub(entry.last_proposal_ms) > RATE_WINDOW_MS {
            entry.proposal_count = 0;
        }
        entry.proposal_count += 1;
        entry.last_proposal_ms = now;
        Ok(())
    }
}
