//! Proof of Authority consensus for authchain.
//!
//! This crate provides:
//! - Validator registration and the Active/Offline/Revoked lifecycle
//! - A signature threshold that follows the number of active validators
//! - Block proposals that collect signatures until quorum
//! - Per-validator proposal rate limiting
//!
//! # Example
//!
//! ```rust,no_run
//! use authchain_consensus::{PoAConfig, PoAConsensus};
//! use authchain_core::Ed25519Key;
//! use std::sync::Arc;
//!
//! let poa = PoAConsensus::new(PoAConfig::new(2, 1)).unwrap();
//! let alice = poa.add_validator("alice", Arc::new(Ed25519Key::generate()), 1).unwrap();
//! let bob = poa.add_validator("bob", Arc::new(Ed25519Key::generate()), 1).unwrap();
//!
//! let proposal = poa.create_proposal("block-hash", &alice).unwrap();
//! poa.sign_proposal(&proposal, &alice).unwrap();
//! let finalized = poa.sign_proposal(&proposal, &bob).unwrap();
//! assert!(finalized);
//! ```

pub mod poa;
pub mod validator;

// Re-export commonly used types
pub use poa::{proposal_id, ConsensusError, PoAConfig, PoAConsensus, Proposal, Result, RATE_WINDOW_MS};
pub use validator::{BlockSignature, Validator, ValidatorStatus};
