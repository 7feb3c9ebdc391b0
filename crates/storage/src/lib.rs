//! Storage layer for authchain.
//!
//! The ledger treats persistence as a port: finalized blocks and
//! transactions are handed over as opaque wire bytes, keyed by height and
//! id, inside a caller-controlled begin/commit/rollback boundary.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Ledger (Chain, Ledger<T>)                │
//! └────────────────────────┬────────────────────────────────┘
//!                          │  LedgerStore (port)
//! ┌────────────────────────▼────────────────────────────────┐
//! │  SledStore                                               │
//! │   - pending batch between begin/commit                   │
//! │   - block:<height>, tx:<id>, chain:height                │
//! └────────────────────────┬────────────────────────────────┘
//!                          │
//! ┌────────────────────────▼────────────────────────────────┐
//! │                    sled Database                         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use authchain_storage::{LedgerStore, SledStore};
//!
//! let mut store = SledStore::open("./ledger_data").unwrap();
//! store.begin().unwrap();
//! store.put_block(0, b"...").unwrap();
//! store.commit().unwrap();
//! ```

pub mod db;
pub mod store;

// Re-export commonly used types
pub use db::{BatchOp, Key, Result, Storage, StorageError};
pub use store::{LedgerStore, SledStore};
