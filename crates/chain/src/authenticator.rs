//! Participant registry and double-spend guard.
//!
//! The authenticator answers two questions for the ledger: may this
//! participant perform this action, and has this transaction ID been seen
//! before. Used IDs are never forgotten.

use authchain_core::ErrorKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised when an action is rejected.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("transaction {0} has already been used")]
    DuplicateTransaction(String),

    #[error("participant {0} is not authorized")]
    Unauthorized(String),

    #[error("participant {participant} lacks capability {capability}")]
    MissingCapability {
        participant: String,
        capability: String,
    },

    #[error("transaction id is empty")]
    EmptyTransactionId,
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::DuplicateTransaction(_) => ErrorKind::AlreadyExists,
            AuthError::Unauthorized(_) | AuthError::MissingCapability { .. } => {
                ErrorKind::PermissionDenied
            }
            AuthError::EmptyTransactionId => ErrorKind::InvalidArgument,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// What the ledger knows about one authorized participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Free-form application state, e.g. `"active"`.
    pub state: String,
    pub capabilities: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Authorized participants, their capabilities and the set of used
/// transaction IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authenticator {
    participants: BTreeMap<String, Participant>,
    used_transactions: BTreeSet<String>,
}

impl Authenticator {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Participants
    // =========================================================================

    /// Authorize a participant, or replace the state and metadata of one
    /// already registered. Capabilities survive re-registration.
    pub fn register_participant(
        &mut self,
        id: impl Into<String>,
        state: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) {
        let id = id.into();
        let state = state.into();
        match self.participants.get_mut(&id) {
            Some(existing) => {
                existing.state = state;
                existing.metadata = metadata;
                debug!(participant = %id, "participant updated");
            }
            None => {
                info!(participant = %id, state = %state, "participant registered");
                self.participants.insert(
                    id,
                    Participant {
                        state,
                        capabilities: BTreeSet::new(),
                        metadata,
                    },
                );
            }
        }
    }

    /// Remove a participant and everything attached to it. Transaction IDs it
    /// used stay used.
    pub fn deauthorize_participant(&mut self, id: &str) -> Option<Participant> {
        let removed = self.participants.remove(id);
        if removed.is_some() {
            warn!(participant = %id, "participant deauthorized");
        }
        removed
    }

    pub fn is_authorized(&self, id: &str) -> bool {
        self.participants.contains_key(id)
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// Authorized participant IDs in sorted order.
    pub fn participants(&self) -> impl Iterator<Item = &str> {
        self.participants.keys().map(String::as_str)
    }

    pub fn participant_state(&self, id: &str) -> Option<&str> {
        self.participants.get(id).map(|p| p.state.as_str())
    }

    /// Returns `false` if the participant is not registered.
    pub fn set_participant_state(&mut self, id: &str, state: impl Into<String>) -> bool {
        match self.participants.get_mut(id) {
            Some(p) => {
                p.state = state.into();
                true
            }
            None => false,
        }
    }

    pub fn participant_metadata(&self, id: &str) -> Option<&BTreeMap<String, String>> {
        self.participants.get(id).map(|p| &p.metadata)
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    /// Grant a capability. Does nothing for unregistered participants.
    pub fn grant_capability(&mut self, id: &str, capability: impl Into<String>) {
        let capability = capability.into();
        match self.participants.get_mut(id) {
            Some(p) => {
                if p.capabilities.insert(capability.clone()) {
                    debug!(participant = %id, capability = %capability, "capability granted");
                }
            }
            None => debug!(participant = %id, capability = %capability, "grant ignored, unknown participant"),
        }
    }

    /// Revoke a capability. Does nothing for unregistered participants.
    pub fn revoke_capability(&mut self, id: &str, capability: &str) {
        match self.participants.get_mut(id) {
            Some(p) => {
                if p.capabilities.remove(capability) {
                    debug!(participant = %id, capability, "capability revoked");
                }
            }
            None => debug!(participant = %id, capability, "revoke ignored, unknown participant"),
        }
    }

    pub fn has_capability(&self, id: &str, capability: &str) -> bool {
        self.participants
            .get(id)
            .is_some_and(|p| p.capabilities.contains(capability))
    }

    /// Capabilities of a participant in sorted order; empty when unknown.
    pub fn capabilities(&self, id: &str) -> Vec<String> {
        self.participants
            .get(id)
            .map(|p| p.capabilities.iter().cloned().collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Check that `issuer` may act with `required_capability` without
    /// consuming anything. An empty capability only requires authorization.
    pub fn check_authorization(&self, issuer: &str, required_capability: &str) -> Result<()> {
        if !self.is_authorized(issuer) {
            return Err(AuthError::Unauthorized(issuer.to_string()));
        }
        if !required_capability.is_empty() && !self.has_capability(issuer, required_capability) {
            return Err(AuthError::MissingCapability {
                participant: issuer.to_string(),
                capability: required_capability.to_string(),
            });
        }
        Ok(())
    }

    /// Validate an action and, only if it is allowed, mark `tx_id` used.
    ///
    /// Checks run in order: duplicate ID, issuer authorization, capability.
    /// A rejected action leaves the authenticator unchanged.
    pub fn validate_and_record_action(
        &mut self,
        issuer: &str,
        description: &str,
        tx_id: &str,
        required_capability: &str,
    ) -> Result<()> {
        if tx_id.is_empty() {
            return Err(AuthError::EmptyTransactionId);
        }
        if self.used_transactions.contains(tx_id) {
            warn!(issuer, tx = tx_id, "duplicate transaction rejected");
            return Err(AuthError::DuplicateTransaction(tx_id.to_string()));
        }
        if let Err(e) = self.check_authorization(issuer, required_capability) {
            warn!(issuer, tx = tx_id, error = %e, "action rejected");
            return Err(e);
        }

        self.used_transactions.insert(tx_id.to_string());
        debug!(issuer, tx = tx_id, action = description, "action recorded");
        Ok(())
    }

    // =========================================================================
    // Used transaction IDs
    // =========================================================================

    pub fn is_transaction_used(&self, tx_id: &str) -> bool {
        self.used_transactions.contains(tx_id)
    }

    /// Mark every ID as used.
    pub fn mark_transactions_used<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.used_transactions.extend(ids.into_iter().map(Into::into));
    }

    pub fn used_transaction_count(&self) -> usize {
        self.used_transactions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Authenticator {
        let mut auth = Authenticator::new();
        auth.register_participant("p1", "active", BTreeMap::new());
        auth.grant_capability("p1", "write");
        auth
    }

    #[test]
    fn test_register_is_upsert() {
        let mut auth = setup();
        let mut meta = BTreeMap::new();
        meta.insert("region".to_string(), "eu".to_string());
        auth.register_participant("p1", "suspended", meta);

        assert_eq!(auth.participants().count(), 1);
        assert_eq!(auth.participant_state("p1"), Some("suspended"));
        assert_eq!(auth.participant_metadata("p1").unwrap()["region"], "eu");
        assert!(auth.has_capability("p1", "write"));
    }

    #[test]
    fn test_capabilities_are_sorted_and_deduplicated() {
        let mut auth = setup();
        auth.grant_capability("p1", "read");
        auth.grant_capability("p1", "write");
        assert_eq!(auth.capabilities("p1"), vec!["read", "write"]);

        auth.revoke_capability("p1", "read");
        assert_eq!(auth.capabilities("p1"), vec!["write"]);
    }

    #[test]
    fn test_capability_changes_ignore_unknown_participants() {
        let mut auth = setup();
        auth.grant_capability("ghost", "write");
        auth.revoke_capability("ghost", "write");
        assert!(!auth.is_authorized("ghost"));
        assert!(auth.capabilities("ghost").is_empty());
    }

    #[test]
    fn test_action_recorded_once() {
        let mut auth = setup();
        auth.validate_and_record_action("p1", "store", "tx-1", "write")
            .unwrap();
        assert!(auth.is_transaction_used("tx-1"));

        let err = auth
            .validate_and_record_action("p1", "store", "tx-1", "write")
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateTransaction(_)));
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_rejected_action_does_not_consume_id() {
        let mut auth = setup();

        let err = auth
            .validate_and_record_action("ghost", "store", "tx-1", "")
            .unwrap_err();
        assert!(matches!(err, AuthError::Unauthorized(_)));
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let err = auth
            .validate_and_record_action("p1", "admin", "tx-1", "admin")
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingCapability { .. }));

        assert!(!auth.is_transaction_used("tx-1"));
        assert_eq!(auth.used_transaction_count(), 0);
    }

    #[test]
    fn test_duplicate_checked_before_authorization() {
        let mut auth = setup();
        auth.mark_transactions_used(["tx-1"]);
        assert!(matches!(
            auth.validate_and_record_action("ghost", "store", "tx-1", "write"),
            Err(AuthError::DuplicateTransaction(_))
        ));
    }

    #[test]
    fn test_empty_capability_only_requires_authorization() {
        let auth = setup();
        assert!(auth.check_authorization("p1", "").is_ok());
        assert!(auth.check_authorization("ghost", "").is_err());
    }

    #[test]
    fn test_deauthorize_keeps_used_ids() {
        let mut auth = setup();
        auth.validate_and_record_action("p1", "store", "tx-1", "write")
            .unwrap();
        assert!(auth.deauthorize_participant("p1").is_some());
        assert!(!auth.is_authorized("p1"));
        assert!(!auth.has_capability("p1", "write"));
        assert!(auth.is_transaction_used("tx-1"));
        assert!(!auth.set_participant_state("p1", "active"));
    }
}
