//! Validator identities and their lifecycle.
//!
//! ```text
//!   Active ⇄ Offline      (mark_offline / mark_online)
//!   Active | Offline → Revoked   (revoke, terminal)
//! ```

use crate::poa::{ConsensusError, Result};
use authchain_core::SigningKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Lifecycle status of a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidatorStatus {
    Active,
    Offline,
    Revoked,
}

impl fmt::Display for ValidatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidatorStatus::Active => "active",
            ValidatorStatus::Offline => "offline",
            ValidatorStatus::Revoked => "revoked",
        };
        f.write_str(s)
    }
}

/// A participant identity allowed to sign block proposals.
#[derive(Clone)]
pub struct Validator {
    /// Identifier derived from the public key.
    pub id: String,
    /// The ledger participant this validator acts for.
    pub participant_id: String,
    /// Public half always; private half only if this node signs for it.
    pub identity: Arc<dyn SigningKey>,
    pub weight: u64,
    pub status: ValidatorStatus,
    /// Unix milliseconds of the last status change or signature.
    pub last_active_at: u64,
}

impl Validator {
    pub fn new(
        participant_id: impl Into<String>,
        identity: Arc<dyn SigningKey>,
        weight: u64,
        now: u64,
    ) -> Self {
        Self {
            id: identity.id(),
            participant_id: participant_id.into(),
            identity,
            weight,
            status: ValidatorStatus::Active,
            last_active_at: now,
        }
    }

    /// Only active validators may sign.
    pub fn can_sign(&self) -> bool {
        self.status == ValidatorStatus::Active
    }

    pub fn is_revoked(&self) -> bool {
        self.status == ValidatorStatus::Revoked
    }

    pub fn mark_offline(&mut self, now: u64) -> Result<()> {
        if self.is_revoked() {
            return Err(ConsensusError::ValidatorRevoked(self.id.clone()));
        }
        self.status = ValidatorStatus::Offline;
        self.last_active_at = now;
        Ok(())
    }

    pub fn mark_online(&mut self, now: u64) -> Result<()> {
        if self.is_revoked() {
            return Err(ConsensusError::ValidatorRevoked(self.id.clone()));
        }
        self.status = ValidatorStatus::Active;
        self.last_active_at = now;
        Ok(())
    }

    /// Revoke permanently. Revoking twice is harmless.
    pub fn revoke(&mut self, now: u64) {
        self.status = ValidatorStatus::Revoked;
        self.last_active_at = now;
    }

    /// Check a signature over `message` against this validator's key.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        self.identity.verify(message, signature)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("id", &self.id)
            .field("participant_id", &self.participant_id)
            .field("weight", &self.weight)
            .field("status", &self.status)
            .field("last_active_at", &self.last_active_at)
            .finish()
    }
}

/// One validator's signature over a proposal's block hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    pub validator_id: String,
    pub participant_id: String,
    pub signature: Vec<u8>,
    /// Unix milliseconds.
    pub signed_at: u64,
}
