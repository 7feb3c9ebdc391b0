//! Authenticated hash chain for authchain.
//!
//! This crate brings the lower layers together:
//! - **Authenticator**: authorized participants, capabilities and the
//!   double-spend guard over transaction IDs
//! - **Chain**: append-only, hash-linked blocks with atomic admission
//! - **Ledger**: blocks admitted only after Proof of Authority quorum, with
//!   optional persistence through a [`LedgerStore`](authchain_storage::LedgerStore)
//!
//! # Example
//!
//! ```rust,no_run
//! use authchain_chain::Chain;
//! use authchain_core::{Block, Ed25519Key, Transaction};
//! use std::collections::BTreeMap;
//!
//! let key = Ed25519Key::generate();
//! let mut chain = Chain::new("demo", "init".to_string(), &key).unwrap();
//! chain.register_participant("p1", "active", BTreeMap::new());
//! chain.grant_capability("p1", "write");
//!
//! chain.check_authorization("p1", "write").unwrap();
//! let tx = Transaction::new("tx-1", "hello".to_string(), 1).signed(&key).unwrap();
//! chain.add_block(Block::new(vec![tx])).unwrap();
//! assert!(chain.is_transaction_used("tx-1"));
//! ```

pub mod authenticator;
pub mod chain;
pub mod ledger;

// Re-export commonly used types
pub use authenticator::{AuthError, Authenticator, Participant};
pub use chain::{Chain, ChainError, GENESIS_TRANSACTION_ID};
pub use ledger::{Ledger, LedgerError};
